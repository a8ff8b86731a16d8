use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Spotify
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_redirect_uri: String,

    // Sincronización
    pub poll_interval_secs: u64,

    // Resolución de fuentes
    pub provider_timeout_secs: u64,
    pub extract_timeout_secs: u64,

    // Pipeline de streaming
    pub reconnect_delay_max_secs: u32,

    // Audio
    pub default_volume: f32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Spotify
            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID")?,
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")?,
            spotify_redirect_uri: std::env::var("SPOTIFY_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:8888/callback".to_string()),

            // Sincronización
            poll_interval_secs: std::env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            // Resolución
            provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            extract_timeout_secs: std::env::var("EXTRACT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            // Pipeline
            reconnect_delay_max_secs: std::env::var("RECONNECT_DELAY_MAX_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Performs sanity checks on configuration values to catch
    /// common mistakes before the bot starts polling Spotify.
    pub fn validate(&self) -> Result<()> {
        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be at least 1 second");
        }

        if self.poll_interval_secs > 60 {
            anyhow::bail!(
                "Poll interval above 60s makes the mirror useless, got: {}",
                self.poll_interval_secs
            );
        }

        if self.provider_timeout_secs == 0 || self.extract_timeout_secs == 0 {
            anyhow::bail!("Provider/extract timeouts must be greater than 0");
        }

        if self.spotify_client_id.is_empty() || self.spotify_client_secret.is_empty() {
            anyhow::bail!("Spotify credentials must not be empty");
        }

        url::Url::parse(&self.spotify_redirect_uri)
            .map_err(|e| anyhow::anyhow!("Invalid SPOTIFY_REDIRECT_URI: {}", e))?;

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes sensitive information like tokens and client secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Spotify: client {}… → {}\n  \
            Sync: poll every {}s\n  \
            Resolver: {}s provider timeout, {}s extract timeout\n  \
            Pipeline: reconnect delay max {}s, {}% vol",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            &self.spotify_client_id[..self.spotify_client_id.len().min(8)],
            self.spotify_redirect_uri,
            self.poll_interval_secs,
            self.provider_timeout_secs,
            self.extract_timeout_secs,
            self.reconnect_delay_max_secs,
            (self.default_volume * 100.0) as u32,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Spotify (no defaults - must be provided)
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            spotify_redirect_uri: "http://localhost:8888/callback".to_string(),

            // Sync defaults
            poll_interval_secs: 5,

            // Resolver defaults
            provider_timeout_secs: 15,
            extract_timeout_secs: 20,

            // Pipeline defaults
            reconnect_delay_max_secs: 5,

            // Audio defaults
            default_volume: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            spotify_client_id: "abc12345".to_string(),
            spotify_client_secret: "hushhush".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let config = Config {
            poll_interval_secs: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_volume() {
        let config = Config {
            default_volume: 3.5,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secret() {
        let config = valid_config();
        assert!(!config.summary().contains("hushhush"));
    }
}
