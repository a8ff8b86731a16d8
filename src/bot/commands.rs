use anyhow::Result;
use serenity::{
    builder::CreateCommand,
    model::id::GuildId,
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        connect_command(),
        disconnect_command(),
        nowplaying_command(),
        link_command(),
        help_command(),
    ]
}

// Comandos de sesión

fn connect_command() -> CreateCommand {
    CreateCommand::new("connect")
        .description("Entra a tu canal de voz y espeja tu reproducción de Spotify")
}

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect").description("Deja de espejar y sale del canal de voz")
}

// Comandos de información

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Muestra la canción que se está espejando")
}

fn link_command() -> CreateCommand {
    CreateCommand::new("link").description("Vincula tu cuenta de Spotify")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Muestra información de ayuda")
}
