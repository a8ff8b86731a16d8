use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::info;

use crate::{
    playback::ConnectOutcome,
    ui::embeds,
};

use super::SpotcordBot;

/// Despacha un comando slash a su handler.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SpotcordBot,
) -> Result<()> {
    match command.data.name.as_str() {
        "connect" => handle_connect(ctx, command, bot).await,
        "disconnect" => handle_disconnect(ctx, command, bot).await,
        "nowplaying" => handle_nowplaying(ctx, command, bot).await,
        "link" => handle_link(ctx, command, bot).await,
        "help" => handle_help(ctx, command).await,
        other => {
            respond_ephemeral(
                ctx,
                &command,
                embeds::create_error_embed("Comando desconocido", other),
            )
            .await
        }
    }
}

/// `/connect`: crea la sesión de espejo para el usuario que lo invoca.
async fn handle_connect(ctx: &Context, command: CommandInteraction, bot: &SpotcordBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond_ephemeral(
            ctx,
            &command,
            embeds::create_error_embed("Fuera de servidor", "Este comando solo funciona en un servidor"),
        )
        .await;
    };

    // Entrar al canal puede tardar más que la ventana de respuesta
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let embed = match user_voice_channel(ctx, guild_id, command.user.id) {
        Err(reason) => embeds::create_error_embed("Sin canal de voz", &reason),
        Ok(channel_id) => {
            let manager = songbird::get(ctx)
                .await
                .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

            match bot
                .registry
                .connect(manager, guild_id, channel_id, command.user.id)
                .await
            {
                Ok(ConnectOutcome::Created) => {
                    info!("✅ {} conectó el espejo en {}", command.user.name, guild_id);
                    embeds::create_success_embed(
                        "Espejo activado",
                        "Reproduce algo en Spotify y lo escucharás aquí",
                    )
                }
                Ok(ConnectOutcome::AlreadyConnected) => embeds::create_success_embed(
                    "Ya conectado",
                    "Esta sesión ya espeja tu reproducción",
                ),
                Err(reason) => embeds::create_error_embed("No se pudo conectar", &reason.to_string()),
            }
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

/// `/disconnect`: desmonta la sesión del guild.
async fn handle_disconnect(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SpotcordBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond_ephemeral(
            ctx,
            &command,
            embeds::create_error_embed("Fuera de servidor", "Este comando solo funciona en un servidor"),
        )
        .await;
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let manager = songbird::get(ctx)
        .await
        .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

    let embed = match bot.registry.disconnect(manager, guild_id).await {
        Ok(()) => embeds::create_success_embed("Desconectado", "Hasta la próxima 👋"),
        Err(reason) => embeds::create_error_embed("No se pudo desconectar", &reason.to_string()),
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

/// `/nowplaying`: qué está espejando la sesión de este guild.
async fn handle_nowplaying(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SpotcordBot,
) -> Result<()> {
    let embed = match command.guild_id.and_then(|g| bot.registry.current_track(g)) {
        Some(track) => embeds::create_now_playing_embed(&track),
        None => embeds::create_error_embed("Nada sonando", "No hay ninguna canción espejándose"),
    };

    respond_ephemeral(ctx, &command, embed).await
}

/// `/link`: URL de autorización de Spotify para el usuario.
async fn handle_link(ctx: &Context, command: CommandInteraction, bot: &SpotcordBot) -> Result<()> {
    let url = bot.spotify.authorize_url(command.user.id);
    respond_ephemeral(ctx, &command, embeds::create_link_embed(&url)).await
}

async fn handle_help(ctx: &Context, command: CommandInteraction) -> Result<()> {
    respond_ephemeral(ctx, &command, embeds::create_help_embed()).await
}

/// Respuesta efímera de un solo embed.
async fn respond_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    embed: serenity::builder::CreateEmbed,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

/// Canal de voz donde está el usuario, desde la caché del gateway.
fn user_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, String> {
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return Err("Servidor no encontrado en caché".to_string());
    };

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| "Debes estar en un canal de voz".to_string())
}
