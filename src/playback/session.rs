use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::Call;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::pipeline::{self, PipelineSettings, ProcessGeneration};
use crate::resolver::TrackResolver;
use crate::spotify::NowPlaying;

use super::sync::{PlayerControl, SinkState};

/// El track que una sesión está espejando, para consumo de `/nowplaying`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub url: Option<String>,
}

impl From<&NowPlaying> for MirroredTrack {
    fn from(snapshot: &NowPlaying) -> Self {
        Self {
            track_id: snapshot.track_id.clone(),
            title: snapshot.title.clone(),
            artist: snapshot.artist.clone(),
            url: snapshot.track_url.clone(),
        }
    }
}

/// Estado de espejo de un guild: conexión de voz, sink y track actual.
///
/// Mutada únicamente por su propio poller o por el camino
/// connect/disconnect del registry; nadie más escribe aquí.
pub struct PlaybackSession {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Usuario cuyo Spotify espeja esta sesión. Inmutable hasta disconnect.
    pub controlling_user_id: UserId,
    call: Arc<tokio::sync::Mutex<Call>>,
    /// Track del sink actualmente suscrito a la conexión, si hay.
    track: Mutex<Option<TrackHandle>>,
    /// Track de Spotify arrancado con éxito más recientemente.
    current: Mutex<Option<MirroredTrack>>,
    /// Generación de subprocesos que alimenta el sink. Se reemplaza junto
    /// con `current`, nunca por separado.
    generation: Mutex<Option<Arc<ProcessGeneration>>>,
    /// Cancela el poller y marca la sesión como muerta.
    cancel: CancellationToken,
}

impl PlaybackSession {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        controlling_user_id: UserId,
        call: Arc<tokio::sync::Mutex<Call>>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            controlling_user_id,
            call,
            track: Mutex::new(None),
            current: Mutex::new(None),
            generation: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.current.lock().as_ref().map(|t| t.track_id.clone())
    }

    pub fn current_track(&self) -> Option<MirroredTrack> {
        self.current.lock().clone()
    }

    /// Para el sink, mata la generación activa y limpia el track actual.
    pub(crate) fn halt_playback(&self) {
        if let Some(track) = self.track.lock().take() {
            let _ = track.stop();
        }
        if let Some(generation) = self.generation.lock().take() {
            generation.terminate();
        }
        *self.current.lock() = None;
    }

    /// Desmonta la sesión: cancela el poller y libera sink + generación.
    ///
    /// La conexión de voz en sí la destruye el registry (que es quien habla
    /// con el manager de songbird).
    pub fn shutdown(&self) {
        debug!(
            "Desmontando sesión de guild {} (canal {})",
            self.guild_id, self.channel_id
        );
        self.cancel.cancel();
        self.halt_playback();
    }
}

/// [`PlayerControl`] real: resuelve, abre el pipeline y toca el sink.
pub struct SessionPlayer {
    session: Arc<PlaybackSession>,
    resolver: Arc<TrackResolver>,
    settings: PipelineSettings,
    volume: f32,
}

impl SessionPlayer {
    pub fn new(
        session: Arc<PlaybackSession>,
        resolver: Arc<TrackResolver>,
        settings: PipelineSettings,
        volume: f32,
    ) -> Self {
        Self {
            session,
            resolver,
            settings,
            volume,
        }
    }
}

#[async_trait]
impl PlayerControl for SessionPlayer {
    fn is_live(&self) -> bool {
        self.session.is_live()
    }

    fn current_track_id(&self) -> Option<String> {
        self.session.current_track_id()
    }

    async fn sink_state(&self) -> SinkState {
        let track = self.session.track.lock().clone();
        let Some(track) = track else {
            return SinkState::Idle;
        };

        match track.get_info().await {
            Ok(info) => match info.playing {
                PlayMode::Play => SinkState::Playing,
                PlayMode::Pause => SinkState::Paused,
                _ => SinkState::Idle,
            },
            // El driver ya soltó el track (terminó o se cayó)
            Err(_) => SinkState::Idle,
        }
    }

    async fn start_track(&self, snapshot: &NowPlaying) -> Result<()> {
        let locator = self
            .resolver
            .resolve(&snapshot.title, &snapshot.artist)
            .await?;

        let opened = pipeline::open_stream(&locator, self.settings).await?;

        // La sesión pudo desmontarse durante la resolución: no adoptar nada
        if !self.session.is_live() {
            debug!("Sesión desmontada a mitad de arranque, matando generación nueva");
            opened.generation.terminate();
            return Ok(());
        }

        // Reemplazo de generación: la anterior muere antes de sonar la nueva
        self.session.halt_playback();

        let handle = {
            let mut call = self.session.call.lock().await;
            call.play_input(opened.input)
        };

        if let Err(e) = handle.set_volume(self.volume) {
            warn!("No se pudo fijar el volumen: {}", e);
        }

        // Sink, generación y track actual avanzan juntos
        *self.session.track.lock() = Some(handle);
        *self.session.generation.lock() = Some(opened.generation);
        *self.session.current.lock() = Some(MirroredTrack::from(snapshot));

        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        if let Some(track) = self.session.track.lock().as_ref() {
            track.pause()?;
        }
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        if let Some(track) = self.session.track.lock().as_ref() {
            track.play()?;
        }
        Ok(())
    }

    async fn stop_all(&self) -> Result<()> {
        self.session.halt_playback();
        Ok(())
    }
}
