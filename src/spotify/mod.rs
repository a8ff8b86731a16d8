//! Integración con la Spotify Web API.
//!
//! El sync loop solo conoce el trait [`PlaybackFeed`]: una instantánea de
//! "qué está sonando" por usuario. La gestión de tokens (refresh incluido)
//! vive dentro de [`SpotifySession`] y nunca se ve desde fuera.

pub mod session;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;

pub use session::SpotifySession;

/// Instantánea del estado de reproducción de un usuario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    /// Identificador de track de Spotify (base-62).
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub is_playing: bool,
    pub track_url: Option<String>,
}

/// Fuente externa de "qué está sonando".
///
/// Debe ser seguro llamarla en cada tick del poller; cualquier refresh de
/// credenciales es responsabilidad interna de la implementación.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlaybackFeed: Send + Sync {
    /// Estado de reproducción actual del usuario, o `None` si no suena nada.
    async fn currently_playing(&self, user_id: UserId) -> Result<Option<NowPlaying>>;

    /// Indica si el usuario tiene una cuenta de Spotify vinculada.
    async fn is_connected(&self, user_id: UserId) -> bool;
}
