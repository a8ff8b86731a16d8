use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use tracing::{error, info};

mod bot;
mod config;
mod pipeline;
mod playback;
mod resolver;
mod spotify;
mod ui;

use crate::bot::SpotcordBot;
use crate::config::Config;
use crate::playback::SessionRegistry;
use crate::resolver::TrackResolver;
use crate::spotify::SpotifySession;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spotcord=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎧 Iniciando Spotcord v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Capa de Spotify (feed de "qué está sonando")
    let spotify = Arc::new(SpotifySession::new(config.clone()));

    // Escalera de resolución de fuentes
    let resolver = Arc::new(TrackResolver::with_default_providers(Duration::from_secs(
        config.provider_timeout_secs,
    )));

    // Registry de sesiones por guild
    let registry = Arc::new(SessionRegistry::new(
        config.clone(),
        spotify.clone(),
        resolver,
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = SpotcordBot::new(config.clone(), registry.clone(), spotify);

    // Construir cliente con songbird compartido
    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird.clone())
        .await?;

    // Manejar shutdown graceful: desmontar todas las sesiones antes de salir
    {
        let registry = registry.clone();
        let songbird = songbird.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Error al registrar Ctrl+C: {}", e);
                return;
            }
            info!("⚠️ Señal de shutdown recibida, desmontando sesiones...");
            registry.disconnect_all(songbird).await;
            std::process::exit(0);
        });
    }

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Verifica las dependencias externas del pipeline.
async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
