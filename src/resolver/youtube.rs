use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use super::{AudioLocator, SearchProvider, SourceTag};

/// Proveedor primario: búsqueda en YouTube a través de yt-dlp.
///
/// No descarga nada; solo pide la URL del primer resultado con `--print`,
/// con flags pensados para fallar rápido ante throttling o bloqueos.
pub struct YtSearchProvider {
    rate_limiter: tokio::sync::Semaphore,
}

impl YtSearchProvider {
    pub fn new() -> Self {
        Self {
            // Limitar búsquedas concurrentes para evitar rate limiting
            rate_limiter: tokio::sync::Semaphore::new(3),
        }
    }

    /// Verifica si una URL es de YouTube.
    pub fn is_youtube_url(url: &str) -> bool {
        let youtube_regex = Regex::new(
            r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)",
        )
        .unwrap();

        youtube_regex.is_match(url)
    }
}

impl Default for YtSearchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for YtSearchProvider {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn find(&self, query: &str) -> Result<Option<AudioLocator>> {
        let _permit = self.rate_limiter.acquire().await?;

        debug!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch1:{}", query);

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
                "--extractor-args",
                "youtube:player_client=android_embedded",
                "--geo-bypass",
                &search_query,
            ])
            .output()
            .await
            .context("no se pudo ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_search_output(&stdout))
    }
}

/// Primer resultado usable de la salida de `--print %(webpage_url)s`.
fn parse_search_output(stdout: &str) -> Option<AudioLocator> {
    for line in stdout.lines() {
        let url = line.trim();
        if url.is_empty() {
            continue;
        }
        if !YtSearchProvider::is_youtube_url(url) {
            warn!("⚠️ yt-dlp devolvió una URL inesperada: {}", url);
            continue;
        }
        return Some(AudioLocator {
            url: url.to_string(),
            source: SourceTag::YouTube,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YtSearchProvider::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YtSearchProvider::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YtSearchProvider::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YtSearchProvider::is_youtube_url("https://example.com/video"));
    }

    #[test]
    fn test_parse_search_output_takes_first_line() {
        let stdout = "https://www.youtube.com/watch?v=abc123\nhttps://www.youtube.com/watch?v=def\n";
        let locator = parse_search_output(stdout).unwrap();
        assert_eq!(locator.url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(locator.source, SourceTag::YouTube);
    }

    #[test]
    fn test_parse_search_output_skips_garbage() {
        let stdout = "\nWARNING: something\nhttps://youtu.be/abc123\n";
        let locator = parse_search_output(stdout).unwrap();
        assert_eq!(locator.url, "https://youtu.be/abc123");
    }

    #[test]
    fn test_parse_search_output_empty() {
        assert!(parse_search_output("").is_none());
        assert!(parse_search_output("\n\n").is_none());
    }
}
