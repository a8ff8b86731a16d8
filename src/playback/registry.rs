use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::{CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pipeline::PipelineSettings;
use crate::resolver::TrackResolver;
use crate::spotify::PlaybackFeed;

use super::session::{PlaybackSession, SessionPlayer};
use super::sync;

/// Por qué se rechazó una petición de connect/disconnect.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("otro usuario ya controla la reproducción en este servidor")]
    AlreadyControlled,
    #[error("no tienes una cuenta de Spotify vinculada; usa /link primero")]
    NotAuthorized,
    #[error("el bot no está conectado en este servidor")]
    NotConnected,
    #[error("no se pudo entrar al canal de voz: {0}")]
    JoinFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Created,
    /// El mismo usuario ya estaba conectado: no-op exitoso.
    AlreadyConnected,
}

/// Dueño de todas las sesiones: guild → sesión, un controlador por guild.
///
/// Todas las mutaciones de una sesión pasan por aquí o por el poller que
/// este registry le arranca; los comandos solo llaman a estos métodos.
pub struct SessionRegistry {
    config: Arc<Config>,
    feed: Arc<dyn PlaybackFeed>,
    resolver: Arc<TrackResolver>,
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
}

impl SessionRegistry {
    pub fn new(
        config: Arc<Config>,
        feed: Arc<dyn PlaybackFeed>,
        resolver: Arc<TrackResolver>,
    ) -> Self {
        Self {
            config,
            feed,
            resolver,
            sessions: DashMap::new(),
        }
    }

    /// Crea la sesión de un guild y arranca su poller.
    ///
    /// Idempotente para el mismo usuario; conflicto si otro usuario ya
    /// controla el guild; `NotAuthorized` si no tiene Spotify vinculado.
    pub async fn connect(
        self: &Arc<Self>,
        manager: Arc<Songbird>,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<ConnectOutcome, RejectReason> {
        if let Some(existing) = self.sessions.get(&guild_id) {
            return admission(existing.controlling_user_id, user_id);
        }

        if !self.feed.is_connected(user_id).await {
            return Err(RejectReason::NotAuthorized);
        }

        let call = manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| RejectReason::JoinFailed(e.to_string()))?;

        let session = Arc::new(PlaybackSession::new(
            guild_id,
            channel_id,
            user_id,
            call.clone(),
        ));

        // Caída permanente del driver de voz = fatal para la sesión
        {
            let mut call_lock = call.lock().await;
            call_lock.add_global_event(
                VoiceEvent::Core(CoreEvent::DriverDisconnect),
                DriverDisconnectWatch {
                    registry: Arc::clone(self),
                    manager: manager.clone(),
                    guild_id,
                },
            );
        }

        // Registrar antes de arrancar el poller; si otro connect ganó la
        // carrera mientras entrábamos al canal, esta sesión no vale
        match self.sessions.entry(guild_id) {
            Entry::Occupied(existing) => {
                session.shutdown();
                return admission(existing.get().controlling_user_id, user_id);
            }
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
            }
        }

        let player = Arc::new(SessionPlayer::new(
            session.clone(),
            self.resolver.clone(),
            PipelineSettings::from(self.config.as_ref()),
            self.config.default_volume,
        ));

        // El task del poller se gobierna por el token de la sesión, no por
        // su JoinHandle
        let _ = sync::spawn_sync_loop(
            self.feed.clone(),
            player,
            user_id,
            Duration::from_secs(self.config.poll_interval_secs),
            session.cancel_token(),
        );

        info!(
            "🔊 Sesión creada en guild {} (controla {})",
            guild_id, user_id
        );

        Ok(ConnectOutcome::Created)
    }

    /// Desmonta la sesión de un guild por completo.
    ///
    /// Orden: parar el poller, matar la generación, parar el sink, destruir
    /// la conexión de voz, quitar la sesión. Cada paso sigue aunque el
    /// anterior falle: aquí no se dejan timers ni subprocesos vivos.
    pub async fn disconnect(
        &self,
        manager: Arc<Songbird>,
        guild_id: GuildId,
    ) -> Result<(), RejectReason> {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return Err(RejectReason::NotConnected);
        };

        session.shutdown();

        if let Err(e) = manager.remove(guild_id).await {
            warn!("No se pudo destruir la conexión de voz de {}: {}", guild_id, e);
        }

        info!("👋 Sesión desmontada en guild {}", guild_id);
        Ok(())
    }

    /// Lookup de solo lectura, sin efectos.
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Track que la sesión espeja ahora mismo, si hay.
    pub fn current_track(&self, guild_id: GuildId) -> Option<super::MirroredTrack> {
        self.get(guild_id).and_then(|s| s.current_track())
    }

    /// Desmonta todas las sesiones (shutdown del proceso).
    pub async fn disconnect_all(&self, manager: Arc<Songbird>) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|e| *e.key()).collect();
        let results = futures::future::join_all(
            guilds
                .iter()
                .map(|&guild_id| self.disconnect(manager.clone(), guild_id)),
        )
        .await;

        for (guild_id, result) in guilds.iter().zip(results) {
            if let Err(e) = result {
                warn!("Desconexión de {} durante shutdown: {}", guild_id, e);
            }
        }
    }
}

/// Decide qué pasa con un connect sobre un guild que ya tiene sesión.
fn admission(
    existing_controller: UserId,
    requesting: UserId,
) -> Result<ConnectOutcome, RejectReason> {
    if existing_controller == requesting {
        Ok(ConnectOutcome::AlreadyConnected)
    } else {
        Err(RejectReason::AlreadyControlled)
    }
}

/// Vigila la caída permanente del driver de voz de un guild.
///
/// Una sesión a medio vivir polleando contra una conexión muerta no sirve
/// de nada: se desmonta entera, igual que un /disconnect.
struct DriverDisconnectWatch {
    registry: Arc<SessionRegistry>,
    manager: Arc<Songbird>,
    guild_id: GuildId,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectWatch {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(_) = ctx {
            error!(
                "🔌 Driver de voz caído en guild {}, desmontando sesión",
                self.guild_id
            );

            let registry = self.registry.clone();
            let manager = self.manager.clone();
            let guild_id = self.guild_id;

            // Fuera del task del driver: el disconnect habla con el manager
            tokio::spawn(async move {
                if let Err(e) = registry.disconnect(manager, guild_id).await {
                    // NotConnected: alguien llegó antes, no pasa nada
                    warn!("Limpieza tras caída de voz en {}: {}", guild_id, e);
                }
            });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spotify::MockPlaybackFeed;

    fn test_registry(feed: MockPlaybackFeed) -> Arc<SessionRegistry> {
        let config = Arc::new(Config::default());
        let resolver = Arc::new(TrackResolver::new(
            vec![],
            vec![],
            Duration::from_secs(1),
        ));
        Arc::new(SessionRegistry::new(config, Arc::new(feed), resolver))
    }

    #[test]
    fn test_admission_same_user_is_noop_success() {
        let outcome = admission(UserId::new(7), UserId::new(7));
        assert!(matches!(outcome, Ok(ConnectOutcome::AlreadyConnected)));
    }

    #[test]
    fn test_admission_other_user_is_conflict() {
        let outcome = admission(UserId::new(7), UserId::new(8));
        assert!(matches!(outcome, Err(RejectReason::AlreadyControlled)));
    }

    #[tokio::test]
    async fn test_connect_requires_linked_account() {
        let mut feed = MockPlaybackFeed::new();
        feed.expect_is_connected().returning(|_| false);

        let registry = test_registry(feed);
        let manager = Songbird::serenity();

        let result = registry
            .connect(
                manager,
                GuildId::new(1),
                ChannelId::new(2),
                UserId::new(3),
            )
            .await;

        assert!(matches!(result, Err(RejectReason::NotAuthorized)));
        assert!(registry.get(GuildId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_disconnect_without_session() {
        let registry = test_registry(MockPlaybackFeed::new());
        let manager = Songbird::serenity();

        let result = registry.disconnect(manager, GuildId::new(1)).await;
        assert!(matches!(result, Err(RejectReason::NotConnected)));
    }

    #[test]
    fn test_reject_reasons_are_human_readable() {
        assert!(RejectReason::AlreadyControlled.to_string().contains("otro usuario"));
        assert!(RejectReason::NotAuthorized.to_string().contains("/link"));
        assert!(RejectReason::NotConnected.to_string().contains("no está conectado"));
    }
}
