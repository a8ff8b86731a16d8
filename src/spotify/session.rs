use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use serde::Deserialize;
use serenity::model::id::UserId;
use tracing::{debug, info, warn};

use crate::config::Config;

use super::{NowPlaying, PlaybackFeed};

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const ACCOUNTS_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";
const OAUTH_SCOPE: &str = "user-read-currently-playing user-read-playback-state";

// Renovar el access token cuando falten menos de 60s para expirar
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Tokens de un usuario vinculado.
#[derive(Debug, Clone)]
struct UserTokens {
    access_token: String,
    refresh_token: String,
    expires_at: Instant,
}

/// Cliente de la Spotify Web API con tokens por usuario.
///
/// El intercambio OAuth inicial ocurre fuera del bot (el callback HTTP llama
/// a [`SpotifySession::store_tokens`]); aquí solo se consumen y renuevan.
pub struct SpotifySession {
    client: reqwest::Client,
    config: Arc<Config>,
    tokens: DashMap<UserId, UserTokens>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentlyPlayingResponse {
    is_playing: bool,
    item: Option<PlayingItem>,
}

#[derive(Debug, Deserialize)]
struct PlayingItem {
    id: Option<String>,
    name: String,
    artists: Option<Vec<ItemArtist>>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Debug, Deserialize)]
struct ItemArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

impl SpotifySession {
    pub fn new(config: Arc<Config>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("spotcord/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            config,
            tokens: DashMap::new(),
        }
    }

    /// URL de autorización para que un usuario vincule su cuenta.
    ///
    /// El `state` lleva el id de Discord para que el callback sepa a quién
    /// pertenecen los tokens resultantes.
    pub fn authorize_url(&self, user_id: UserId) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            ACCOUNTS_AUTHORIZE_URL,
            urlencoding::encode(&self.config.spotify_client_id),
            urlencoding::encode(&self.config.spotify_redirect_uri),
            urlencoding::encode(OAUTH_SCOPE),
            user_id,
        )
    }

    /// Registra los tokens obtenidos por la capa OAuth externa.
    #[allow(dead_code)]
    pub fn store_tokens(
        &self,
        user_id: UserId,
        access_token: String,
        refresh_token: String,
        expires_in_secs: u64,
    ) {
        info!("🔗 Cuenta de Spotify vinculada para usuario {}", user_id);
        self.tokens.insert(
            user_id,
            UserTokens {
                access_token,
                refresh_token,
                expires_at: Instant::now() + Duration::from_secs(expires_in_secs),
            },
        );
    }

    /// Devuelve un access token vigente, renovándolo si está por expirar.
    async fn fresh_access_token(&self, user_id: UserId) -> Result<String> {
        let refresh_token = {
            let entry = self
                .tokens
                .get(&user_id)
                .with_context(|| format!("usuario {} sin cuenta vinculada", user_id))?;

            let remaining = entry.expires_at.saturating_duration_since(Instant::now());
            if remaining > REFRESH_MARGIN {
                return Ok(entry.access_token.clone());
            }
            entry.refresh_token.clone()
        };

        self.refresh_tokens(user_id, &refresh_token).await
    }

    /// Renueva el access token contra accounts.spotify.com.
    async fn refresh_tokens(&self, user_id: UserId, refresh_token: &str) -> Result<String> {
        debug!("🔄 Renovando access token de usuario {}", user_id);

        let basic = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.config.spotify_client_id, self.config.spotify_client_secret
        ));

        let response = self
            .client
            .post(ACCOUNTS_TOKEN_URL)
            .header("Authorization", format!("Basic {}", basic))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("no se pudo contactar accounts.spotify.com")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("refresh de token falló ({}): {}", status, body);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("respuesta de token inválida")?;

        let access = token.access_token.clone();
        self.tokens.insert(
            user_id,
            UserTokens {
                access_token: token.access_token,
                // Spotify solo devuelve refresh_token nuevo a veces
                refresh_token: token
                    .refresh_token
                    .unwrap_or_else(|| refresh_token.to_string()),
                expires_at: Instant::now() + Duration::from_secs(token.expires_in),
            },
        );

        Ok(access)
    }
}

#[async_trait]
impl PlaybackFeed for SpotifySession {
    async fn currently_playing(&self, user_id: UserId) -> Result<Option<NowPlaying>> {
        let access_token = self.fresh_access_token(user_id).await?;

        let response = self
            .client
            .get(CURRENTLY_PLAYING_URL)
            .bearer_auth(access_token)
            .send()
            .await
            .context("no se pudo consultar currently-playing")?;

        // 204: no hay reproducción activa
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !response.status().is_success() {
            anyhow::bail!("currently-playing devolvió {}", response.status());
        }

        let payload: CurrentlyPlayingResponse = response
            .json()
            .await
            .context("respuesta de currently-playing inválida")?;

        Ok(snapshot_from_response(payload))
    }

    async fn is_connected(&self, user_id: UserId) -> bool {
        self.tokens.contains_key(&user_id)
    }
}

/// Convierte la respuesta de la API en una instantánea del feed.
///
/// Episodios de podcast y anuncios llegan sin `item.id`; se tratan como
/// "nada que espejar" en lugar de inventar un identificador.
fn snapshot_from_response(payload: CurrentlyPlayingResponse) -> Option<NowPlaying> {
    let item = payload.item?;
    let Some(track_id) = item.id else {
        warn!("🎧 Item sin id (¿podcast o anuncio?), se ignora");
        return None;
    };

    let artist = item
        .artists
        .unwrap_or_default()
        .into_iter()
        .map(|a| a.name)
        .collect::<Vec<_>>()
        .join(", ");

    Some(NowPlaying {
        track_id,
        title: item.name,
        artist,
        is_playing: payload.is_playing,
        track_url: item.external_urls.and_then(|u| u.spotify),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn playing_payload(json: &str) -> CurrentlyPlayingResponse {
        serde_json::from_str(json).expect("payload de prueba inválido")
    }

    #[test]
    fn test_snapshot_from_track_payload() {
        let payload = playing_payload(
            r#"{
                "is_playing": true,
                "item": {
                    "id": "11dFghVXANMlKmJXsNCbNl",
                    "name": "Cut To The Feeling",
                    "artists": [{"name": "Carly Rae Jepsen"}, {"name": "Ft. Nadie"}],
                    "external_urls": {"spotify": "https://open.spotify.com/track/11dFghVXANMlKmJXsNCbNl"}
                }
            }"#,
        );

        let snapshot = snapshot_from_response(payload).expect("debería haber snapshot");
        assert_eq!(snapshot.track_id, "11dFghVXANMlKmJXsNCbNl");
        assert_eq!(snapshot.title, "Cut To The Feeling");
        assert_eq!(snapshot.artist, "Carly Rae Jepsen, Ft. Nadie");
        assert!(snapshot.is_playing);
        assert!(snapshot.track_url.is_some());
    }

    #[test]
    fn test_snapshot_paused_track() {
        let payload = playing_payload(
            r#"{"is_playing": false, "item": {"id": "x1", "name": "T", "artists": []}}"#,
        );

        let snapshot = snapshot_from_response(payload).unwrap();
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.artist, "");
    }

    #[test]
    fn test_snapshot_without_item_is_none() {
        let payload = playing_payload(r#"{"is_playing": true, "item": null}"#);
        assert_eq!(snapshot_from_response(payload), None);
    }

    #[test]
    fn test_snapshot_without_track_id_is_none() {
        // Anuncios y episodios locales llegan sin id
        let payload =
            playing_payload(r#"{"is_playing": true, "item": {"id": null, "name": "Ad"}}"#);
        assert_eq!(snapshot_from_response(payload), None);
    }
}
