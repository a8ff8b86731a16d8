//! # Bot Module
//!
//! Implementación del bot de Discord para Spotcord.
//!
//! La lógica de espejo vive en [`crate::playback`]; este módulo solo
//! traduce eventos de Discord a llamadas sobre el [`SessionRegistry`]:
//! - Registro y despacho de comandos slash
//! - Detección de expulsión del canal de voz (fatal para la sesión)

use std::sync::Arc;

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{config::Config, playback::SessionRegistry, spotify::SpotifySession};

/// Handler principal de eventos de Discord.
pub struct SpotcordBot {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub spotify: Arc<SpotifySession>,
}

impl SpotcordBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        spotify: Arc<SpotifySession>,
    ) -> Self {
        Self {
            config,
            registry,
            spotify,
        }
    }

    /// Registra los comandos slash, globales o por guild según configuración.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::from(guild_id);
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos registrados para guild {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for SpotcordBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si alguien echa al bot del canal (o borra el canal), la sesión de ese
    /// guild queda apuntando a una conexión muerta: se desmonta entera.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                warn!("🔌 Bot expulsado del canal de voz en guild {}", guild_id);

                let Some(manager) = songbird::get(&ctx).await else {
                    error!("Songbird no inicializado");
                    return;
                };

                if let Err(e) = self.registry.disconnect(manager, guild_id).await {
                    // NotConnected: la limpieza ya corrió por otro camino
                    info!("Limpieza tras expulsión en {}: {}", guild_id, e);
                }
            }
        }
    }
}
