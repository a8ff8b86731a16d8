use serenity::{all::Colour, builder::CreateEmbed};

use crate::playback::MirroredTrack;

/// Crea embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description.to_string())
        .color(Colour::from_rgb(67, 181, 129))
}

/// Crea embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description.to_string())
        .color(Colour::from_rgb(255, 69, 0))
}

/// Embed de "Now Playing" con el track espejado
pub fn create_now_playing_embed(track: &MirroredTrack) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Espejando ahora")
        .description(format!("**{}**\n{}", track.title, track.artist))
        .color(Colour::from_rgb(30, 215, 96));

    if let Some(url) = &track.url {
        embed = embed.field("Spotify", url.clone(), false);
    }

    embed
}

/// Embed con la URL de autorización de Spotify
pub fn create_link_embed(url: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("🔗 Vincula tu Spotify")
        .description(format!(
            "Autoriza el acceso de solo lectura a tu reproducción:\n{}\n\n\
            Cuando termines, usa `/connect` desde un canal de voz.",
            url
        ))
        .color(Colour::from_rgb(30, 215, 96))
}

/// Embed de ayuda
pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎧 Spotcord")
        .description("Espeja tu reproducción de Spotify en un canal de voz")
        .field("/link", "Vincula tu cuenta de Spotify", false)
        .field(
            "/connect",
            "Entra a tu canal de voz y empieza a espejar",
            false,
        )
        .field("/disconnect", "Para el espejo y sale del canal", false)
        .field("/nowplaying", "Muestra la canción espejada", false)
        .color(Colour::from_rgb(0, 123, 255))
}
