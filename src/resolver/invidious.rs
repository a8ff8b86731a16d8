use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AudioLocator, SearchProvider, SourceTag};

/// Proveedor de respaldo: API de Invidious (alternativa a YouTube).
///
/// Rota entre instancias públicas; cada búsqueda arranca en la instancia
/// siguiente a la última usada para repartir carga y esquivar instancias
/// caídas o bloqueadas.
pub struct InvidiousProvider {
    client: reqwest::Client,
    instances: Vec<String>,
    next_instance: AtomicUsize,
}

#[derive(Debug, Deserialize)]
struct InvidiousSearchResult {
    #[serde(rename = "videoId")]
    video_id: String,
    title: String,
}

impl InvidiousProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .unwrap_or_default();

        // Instancias públicas de Invidious
        let instances = vec![
            "https://yewtu.be".to_string(),
            "https://inv.nadeko.net".to_string(),
            "https://invidious.nerdvpn.de".to_string(),
            "https://invidious.protokolla.fi".to_string(),
            "https://invidious.privacydev.net".to_string(),
            "https://vid.puffyan.us".to_string(),
            "https://inv.bp.projectsegfau.lt".to_string(),
            "https://invidious.fdn.fr".to_string(),
        ];

        Self {
            client,
            instances,
            next_instance: AtomicUsize::new(0),
        }
    }

    /// Índice de la próxima instancia a usar.
    fn rotate(&self) -> usize {
        self.next_instance.fetch_add(1, Ordering::SeqCst) % self.instances.len()
    }

    async fn try_search(&self, instance: &str, query: &str) -> Result<Vec<InvidiousSearchResult>> {
        let url = format!("{}/api/v1/search", instance);

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("type", "video")])
            .send()
            .await
            .with_context(|| format!("sin respuesta de {}", instance))?;

        if !response.status().is_success() {
            anyhow::bail!("{} devolvió {}", instance, response.status());
        }

        response
            .json::<Vec<InvidiousSearchResult>>()
            .await
            .with_context(|| format!("JSON inválido de {}", instance))
    }
}

impl Default for InvidiousProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchProvider for InvidiousProvider {
    fn name(&self) -> &'static str {
        "invidious"
    }

    async fn find(&self, query: &str) -> Result<Option<AudioLocator>> {
        debug!("🔍 Buscando en Invidious: {}", query);

        let start = self.rotate();
        let mut last_error = None;

        for offset in 0..self.instances.len() {
            let instance = &self.instances[(start + offset) % self.instances.len()];

            match self.try_search(instance, query).await {
                Ok(results) => {
                    if let Some(video) = results.into_iter().next() {
                        debug!("✅ {} encontró: {}", instance, video.title);
                        return Ok(Some(locator_for_video(&video.video_id)));
                    }
                    // Instancia sana pero sin resultados: no insistir en el resto
                    return Ok(None);
                }
                Err(e) => {
                    warn!("❌ Falló búsqueda en {}: {}", instance, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.context("todas las instancias de Invidious fallaron")),
            None => Ok(None),
        }
    }
}

/// El pipeline extrae audio con yt-dlp, así que el locator apunta a
/// youtube.com aunque el hallazgo venga de Invidious.
fn locator_for_video(video_id: &str) -> AudioLocator {
    AudioLocator {
        url: format!("https://www.youtube.com/watch?v={}", video_id),
        source: SourceTag::YouTube,
    }
}
