//! Poller por sesión: espeja el feed de Spotify sobre el sink de voz.
//!
//! Cada tick compara la instantánea del feed contra el estado del sink y
//! decide una sola acción: arrancar track nuevo, pausar, reanudar, parar o
//! nada. Un tick fallido se loguea y el poller sigue; nunca tumba la sesión.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::spotify::{NowPlaying, PlaybackFeed};

/// Estado observable del sink de voz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Playing,
    Paused,
}

/// Lo que el poller puede hacerle a una sesión.
///
/// La implementación real ([`super::SessionPlayer`]) resuelve, abre el
/// pipeline y toca el sink; el trait existe para que el tick sea testeable
/// sin Discord ni subprocesos.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerControl: Send + Sync {
    /// `false` una vez que la sesión fue desmontada; ningún tick debe mutar
    /// una sesión muerta.
    fn is_live(&self) -> bool;

    /// Track de Spotify arrancado con éxito más recientemente.
    fn current_track_id(&self) -> Option<String>;

    async fn sink_state(&self) -> SinkState;

    /// Resuelve + abre pipeline + reproduce, reemplazando la generación
    /// anterior. Solo si retorna `Ok` cambia el track actual.
    async fn start_track(&self, snapshot: &NowPlaying) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Para el sink, mata la generación activa y limpia el track actual.
    async fn stop_all(&self) -> Result<()>;
}

/// Lanza el poller de una sesión.
///
/// El primer tick dispara inmediatamente (así el connect se siente
/// instantáneo); después cada `interval`. Cancelar el token corta el loop.
pub fn spawn_sync_loop(
    feed: Arc<dyn PlaybackFeed>,
    control: Arc<dyn PlayerControl>,
    user_id: UserId,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("🔁 Poller iniciado para usuario {} cada {:?}", user_id, interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("🛑 Poller detenido para usuario {}", user_id);
                    break;
                }
                _ = ticker.tick() => {
                    if !control.is_live() {
                        break;
                    }
                    if let Err(e) = sync_tick(feed.as_ref(), control.as_ref(), user_id).await {
                        warn!("⚠️ Tick fallido para usuario {}: {:#}", user_id, e);
                    }
                }
            }
        }
    })
}

/// Un tick del espejo: instantánea del feed → acción sobre el sink.
///
/// Transiciones:
/// - feed vacío → parar todo si algo sonaba o quedó un track colgado
/// - pausado en Spotify → pausar el sink (la generación sigue viva para que
///   reanudar sea inmediato)
/// - track distinto → arrancar de cero, reemplazando la generación
/// - mismo track pausado en el sink → reanudar sin re-resolver
/// - mismo track con el sink muerto → re-arrancar (el stream se cayó antes)
/// - mismo track sonando → nada
pub async fn sync_tick(
    feed: &dyn PlaybackFeed,
    control: &dyn PlayerControl,
    user_id: UserId,
) -> Result<()> {
    if !control.is_live() {
        return Ok(());
    }

    let snapshot = feed.currently_playing(user_id).await?;

    // La sesión pudo desmontarse mientras esperábamos la respuesta
    if !control.is_live() {
        return Ok(());
    }

    match snapshot {
        None => {
            if control.sink_state().await != SinkState::Idle
                || control.current_track_id().is_some()
            {
                debug!("⏹️ Spotify sin reproducción, limpiando sink");
                control.stop_all().await?;
            }
        }
        Some(snapshot) if !snapshot.is_playing => {
            if control.sink_state().await == SinkState::Playing {
                debug!("⏸️ Spotify en pausa, pausando sink");
                control.pause().await?;
            }
        }
        Some(snapshot) => {
            let is_same_track =
                control.current_track_id().as_deref() == Some(snapshot.track_id.as_str());

            if !is_same_track {
                info!("🎶 Track nuevo: {} - {}", snapshot.title, snapshot.artist);
                control.start_track(&snapshot).await?;
            } else {
                match control.sink_state().await {
                    SinkState::Paused => {
                        debug!("▶️ Reanudando {}", snapshot.title);
                        control.resume().await?;
                    }
                    SinkState::Idle => {
                        // El stream terminó o murió antes que el track real
                        info!("🔁 Re-arrancando {}", snapshot.title);
                        control.start_track(&snapshot).await?;
                    }
                    SinkState::Playing => {}
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spotify::MockPlaybackFeed;

    const USER: UserId = UserId::new(99);

    fn playing(track_id: &str) -> NowPlaying {
        NowPlaying {
            track_id: track_id.to_string(),
            title: format!("title-{}", track_id),
            artist: "artist".to_string(),
            is_playing: true,
            track_url: None,
        }
    }

    fn paused(track_id: &str) -> NowPlaying {
        NowPlaying {
            is_playing: false,
            ..playing(track_id)
        }
    }

    fn feed_returning(snapshot: Option<NowPlaying>) -> MockPlaybackFeed {
        let mut feed = MockPlaybackFeed::new();
        feed.expect_currently_playing()
            .returning(move |_| Ok(snapshot.clone()));
        feed
    }

    fn live_control() -> MockPlayerControl {
        let mut control = MockPlayerControl::new();
        control.expect_is_live().return_const(true);
        control
    }

    #[tokio::test]
    async fn test_new_track_starts_pipeline() {
        let feed = feed_returning(Some(playing("A")));

        let mut control = live_control();
        control.expect_current_track_id().return_const(None::<String>);
        control
            .expect_start_track()
            .withf(|s| s.track_id == "A")
            .times(1)
            .returning(|_| Ok(()));

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_track_does_not_re_resolve() {
        let feed = feed_returning(Some(playing("A")));

        let mut control = live_control();
        control
            .expect_current_track_id()
            .return_const(Some("A".to_string()));
        control
            .expect_sink_state()
            .returning(|| SinkState::Playing);
        control.expect_start_track().times(0);
        control.expect_resume().times(0);

        // Mismo snapshot repetido: ningún tick re-resuelve
        sync_tick(&feed, &control, USER).await.unwrap();
        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_spotify_pause_pauses_sink_only() {
        let feed = feed_returning(Some(paused("A")));

        let mut control = live_control();
        control.expect_sink_state().returning(|| SinkState::Playing);
        control.expect_pause().times(1).returning(|| Ok(()));
        control.expect_start_track().times(0);
        control.expect_stop_all().times(0);

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_same_track_without_resolving() {
        let feed = feed_returning(Some(playing("A")));

        let mut control = live_control();
        control
            .expect_current_track_id()
            .return_const(Some("A".to_string()));
        control.expect_sink_state().returning(|| SinkState::Paused);
        control.expect_resume().times(1).returning(|| Ok(()));
        control.expect_start_track().times(0);

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_track_switch_starts_replacement() {
        let feed = feed_returning(Some(playing("B")));

        let mut control = live_control();
        control
            .expect_current_track_id()
            .return_const(Some("A".to_string()));
        control
            .expect_start_track()
            .withf(|s| s.track_id == "B")
            .times(1)
            .returning(|_| Ok(()));

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_feed_stops_everything() {
        let feed = feed_returning(None);

        let mut control = live_control();
        control.expect_sink_state().returning(|| SinkState::Playing);
        control.expect_stop_all().times(1).returning(|| Ok(()));

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_feed_with_idle_sink_is_noop() {
        let feed = feed_returning(None);

        let mut control = live_control();
        control.expect_sink_state().returning(|| SinkState::Idle);
        control.expect_current_track_id().return_const(None::<String>);
        control.expect_stop_all().times(0);

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_track_id_with_idle_sink_restarts() {
        let feed = feed_returning(Some(playing("A")));

        let mut control = live_control();
        control
            .expect_current_track_id()
            .return_const(Some("A".to_string()));
        control.expect_sink_state().returning(|| SinkState::Idle);
        control
            .expect_start_track()
            .times(1)
            .returning(|_| Ok(()));

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_resolution_bubbles_but_changes_nothing() {
        let feed = feed_returning(Some(playing("A")));

        let mut control = live_control();
        control.expect_current_track_id().return_const(None::<String>);
        control
            .expect_start_track()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("todas las fuentes agotadas")));
        control.expect_stop_all().times(0);

        // El error sube para que el loop lo loguee; nada más cambió
        assert!(sync_tick(&feed, &control, USER).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_session_skips_fetch() {
        let mut feed = MockPlaybackFeed::new();
        feed.expect_currently_playing().times(0);

        let mut control = MockPlayerControl::new();
        control.expect_is_live().return_const(false);

        sync_tick(&feed, &control, USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_feed_error_propagates_without_side_effects() {
        let mut feed = MockPlaybackFeed::new();
        feed.expect_currently_playing()
            .returning(|_| Err(anyhow::anyhow!("HTTP 500")));

        let mut control = live_control();
        control.expect_stop_all().times(0);
        control.expect_start_track().times(0);

        assert!(sync_tick(&feed, &control, USER).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_loop_stops_ticking() {
        let mut feed = MockPlaybackFeed::new();
        feed.expect_currently_playing()
            .returning(|_| Ok(None));

        let mut control = MockPlayerControl::new();
        control.expect_is_live().return_const(true);
        control.expect_sink_state().returning(|| SinkState::Idle);
        control.expect_current_track_id().return_const(None::<String>);

        let cancel = CancellationToken::new();
        let handle = spawn_sync_loop(
            Arc::new(feed),
            Arc::new(control),
            USER,
            Duration::from_secs(60),
            cancel.clone(),
        );

        cancel.cancel();
        // Con el token cancelado el task debe terminar solo
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("el poller no terminó tras cancelar")
            .unwrap();
    }
}
