use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use tracing::debug;

use super::{AudioLocator, SearchProvider, SourceTag};

/// Plataforma secundaria: SoundCloud vía `scsearch` de yt-dlp.
///
/// Solo entra en juego cuando toda la pasada sobre YouTube/Invidious se
/// agotó, con la lista reducida de queries.
pub struct SoundCloudProvider;

impl SoundCloudProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SoundCloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for SoundCloudProvider {
    fn name(&self) -> &'static str {
        "soundcloud"
    }

    async fn find(&self, query: &str) -> Result<Option<AudioLocator>> {
        debug!("🔍 Buscando en SoundCloud: {}", query);

        let search_query = format!("scsearch1:{}", query);

        let output = Command::new("yt-dlp")
            .args([
                "--print",
                "%(webpage_url)s",
                "--no-playlist",
                "--flat-playlist",
                "--skip-download",
                "--quiet",
                "--no-warnings",
                "--socket-timeout",
                "10",
                "--retries",
                "2",
                &search_query,
            ])
            .output()
            .await
            .context("no se pudo ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp scsearch error: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let url = stdout.lines().map(str::trim).find(|l| !l.is_empty());

        Ok(url.map(|url| AudioLocator {
            url: url.to_string(),
            source: SourceTag::SoundCloud,
        }))
    }
}
