//! Resolución de fuentes de audio.
//!
//! Dado el título/artista que reporta Spotify, encuentra un locator
//! reproducible recorriendo una escalera declarativa de proveedores:
//! búsqueda en YouTube vía yt-dlp, la API de Invidious como respaldo, y
//! SoundCloud como plataforma alternativa si toda la pasada primaria falla.

pub mod invidious;
pub mod soundcloud;
pub mod youtube;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use invidious::InvidiousProvider;
pub use soundcloud::SoundCloudProvider;
pub use youtube::YtSearchProvider;

/// Plataforma de la que salió un locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    YouTube,
    SoundCloud,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::YouTube => "youtube",
            SourceTag::SoundCloud => "soundcloud",
        }
    }
}

/// Referencia reproducible a un audio remoto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioLocator {
    pub url: String,
    pub source: SourceTag,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no se encontró audio reproducible para `{title}` de `{artist}`")]
    NoResults { title: String, artist: String },
}

/// Un backend de búsqueda: recibe una query, devuelve a lo sumo un locator.
///
/// Los proveedores no reintentan ni encadenan nada por su cuenta; la
/// escalera de fallback vive en [`TrackResolver`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Primer resultado usable para la query, o `None` si no hay.
    async fn find(&self, query: &str) -> Result<Option<AudioLocator>>;
}

/// Variantes de búsqueda en orden de especificidad decreciente.
pub fn query_variants(title: &str, artist: &str) -> Vec<String> {
    let mut variants = vec![
        format!("{} {} official audio", title, artist),
        format!("{} {}", title, artist),
        format!("{} {} lyrics", title, artist),
        title.to_string(),
    ];
    if artist.is_empty() {
        // Sin artista las tres primeras variantes colapsan en la misma query
        variants = vec![format!("{} official audio", title), title.to_string()];
    }
    variants
}

/// Lista reducida para la pasada sobre la plataforma secundaria.
pub fn reduced_variants(title: &str, artist: &str) -> Vec<String> {
    if artist.is_empty() {
        vec![title.to_string()]
    } else {
        vec![format!("{} {}", title, artist), title.to_string()]
    }
}

/// Escalera de proveedores con fallback uniforme.
pub struct TrackResolver {
    /// Pasada primaria: YouTube vía yt-dlp, luego Invidious, por cada query.
    primary: Vec<Box<dyn SearchProvider>>,
    /// Pasada secundaria: otra plataforma, con queries reducidas.
    secondary: Vec<Box<dyn SearchProvider>>,
    provider_timeout: Duration,
}

impl TrackResolver {
    pub fn new(
        primary: Vec<Box<dyn SearchProvider>>,
        secondary: Vec<Box<dyn SearchProvider>>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            provider_timeout,
        }
    }

    /// Escalera por defecto: yt-dlp → Invidious, con SoundCloud de respaldo.
    pub fn with_default_providers(provider_timeout: Duration) -> Self {
        Self::new(
            vec![
                Box::new(YtSearchProvider::new()),
                Box::new(InvidiousProvider::new()),
            ],
            vec![Box::new(SoundCloudProvider::new())],
            provider_timeout,
        )
    }

    /// Encuentra un locator reproducible para el track.
    ///
    /// Gana el primer proveedor que responda, en orden de prioridad; no hay
    /// scoring adicional. Errores y timeouts de un proveedor cuentan como
    /// "sin resultado" y la escalera sigue.
    pub async fn resolve(&self, title: &str, artist: &str) -> Result<AudioLocator, ResolveError> {
        for query in query_variants(title, artist) {
            for provider in &self.primary {
                if let Some(locator) = self.attempt(provider.as_ref(), &query).await {
                    info!(
                        "🎯 Resuelto `{}` vía {} ({})",
                        title,
                        provider.name(),
                        locator.source.as_str()
                    );
                    return Ok(locator);
                }
            }
        }

        warn!(
            "⚠️ Pasada primaria agotada para `{}`, probando plataforma secundaria",
            title
        );

        for query in reduced_variants(title, artist) {
            for provider in &self.secondary {
                if let Some(locator) = self.attempt(provider.as_ref(), &query).await {
                    info!("🎯 Resuelto `{}` vía {} (secundaria)", title, provider.name());
                    return Ok(locator);
                }
            }
        }

        Err(ResolveError::NoResults {
            title: title.to_string(),
            artist: artist.to_string(),
        })
    }

    /// Un intento acotado: timeout y errores se degradan a `None`.
    async fn attempt(&self, provider: &dyn SearchProvider, query: &str) -> Option<AudioLocator> {
        match tokio::time::timeout(self.provider_timeout, provider.find(query)).await {
            Ok(Ok(Some(locator))) => Some(locator),
            Ok(Ok(None)) => {
                debug!("🔍 {} sin resultados para `{}`", provider.name(), query);
                None
            }
            Ok(Err(e)) => {
                warn!("❌ {} falló para `{}`: {}", provider.name(), query, e);
                None
            }
            Err(_) => {
                warn!(
                    "⏰ {} superó el timeout de {:?} para `{}`",
                    provider.name(),
                    self.provider_timeout,
                    query
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn locator(url: &str) -> AudioLocator {
        AudioLocator {
            url: url.to_string(),
            source: SourceTag::YouTube,
        }
    }

    fn resolver(
        primary: Vec<Box<dyn SearchProvider>>,
        secondary: Vec<Box<dyn SearchProvider>>,
    ) -> TrackResolver {
        TrackResolver::new(primary, secondary, Duration::from_secs(5))
    }

    #[test]
    fn test_query_variants_order() {
        let variants = query_variants("Clarity", "Zedd");
        assert_eq!(
            variants,
            vec![
                "Clarity Zedd official audio",
                "Clarity Zedd",
                "Clarity Zedd lyrics",
                "Clarity",
            ]
        );
    }

    #[test]
    fn test_query_variants_without_artist_dedupe() {
        let variants = query_variants("Clarity", "");
        assert_eq!(variants, vec!["Clarity official audio", "Clarity"]);
    }

    #[test]
    fn test_reduced_variants() {
        assert_eq!(
            reduced_variants("Clarity", "Zedd"),
            vec!["Clarity Zedd", "Clarity"]
        );
        assert_eq!(reduced_variants("Clarity", ""), vec!["Clarity"]);
    }

    #[tokio::test]
    async fn test_first_provider_wins() {
        let mut first = MockSearchProvider::new();
        first.expect_name().return_const("first");
        first
            .expect_find()
            .times(1)
            .returning(|_| Ok(Some(locator("https://yt/1"))));

        let mut second = MockSearchProvider::new();
        second.expect_name().return_const("second");
        second.expect_find().times(0);

        let resolver = resolver(vec![Box::new(first), Box::new(second)], vec![]);
        let found = resolver.resolve("Clarity", "Zedd").await.unwrap();
        assert_eq!(found.url, "https://yt/1");
    }

    #[tokio::test]
    async fn test_provider_error_falls_through() {
        let mut failing = MockSearchProvider::new();
        failing.expect_name().return_const("failing");
        failing
            .expect_find()
            .returning(|_| Err(anyhow::anyhow!("HTTP 429")));

        let mut backup = MockSearchProvider::new();
        backup.expect_name().return_const("backup");
        backup
            .expect_find()
            .times(1)
            .returning(|_| Ok(Some(locator("https://yt/backup"))));

        let resolver = resolver(vec![Box::new(failing), Box::new(backup)], vec![]);
        let found = resolver.resolve("Clarity", "Zedd").await.unwrap();
        assert_eq!(found.url, "https://yt/backup");
    }

    #[tokio::test]
    async fn test_secondary_source_used_with_reduced_queries() {
        let mut primary = MockSearchProvider::new();
        primary.expect_name().return_const("primary");
        // 4 variantes × 1 proveedor, todas sin resultado
        primary.expect_find().times(4).returning(|_| Ok(None));

        let mut secondary = MockSearchProvider::new();
        secondary.expect_name().return_const("secondary");
        secondary
            .expect_find()
            .withf(|q| q == "Clarity Zedd")
            .times(1)
            .returning(|_| {
                Ok(Some(AudioLocator {
                    url: "https://sc/1".to_string(),
                    source: SourceTag::SoundCloud,
                }))
            });

        let resolver = resolver(vec![Box::new(primary)], vec![Box::new(secondary)]);
        let found = resolver.resolve("Clarity", "Zedd").await.unwrap();
        assert_eq!(found.source, SourceTag::SoundCloud);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_no_results() {
        let mut primary = MockSearchProvider::new();
        primary.expect_name().return_const("primary");
        primary.expect_find().returning(|_| Ok(None));

        let mut secondary = MockSearchProvider::new();
        secondary.expect_name().return_const("secondary");
        secondary.expect_find().returning(|_| Ok(None));

        let resolver = resolver(vec![Box::new(primary)], vec![Box::new(secondary)]);
        let err = resolver.resolve("Clarity", "Zedd").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoResults { .. }));
    }
}
