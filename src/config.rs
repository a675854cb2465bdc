use std::path::PathBuf;

use crate::resolver::Strategy;
use crate::ytdl;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid listening port: {0}")]
    InvalidPort(String),
    #[error("unknown resolution strategy: {0}")]
    InvalidStrategy(String),
}

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listening port.
    pub port: u16,
    /// Path or name of the external downloader executable.
    pub program: PathBuf,
    /// Resolution backend used by the redirect routes.
    pub strategy: Strategy,
    /// Forward the caller's real IP to the downloader on redirects.
    pub use_client_ip: bool,
    /// Shared secret guarding the streaming routes. `None` leaves the
    /// feature unavailable.
    pub stream_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            program: PathBuf::from(ytdl::DEFAULT_PROGRAM),
            strategy: Strategy::RemoteApi,
            use_client_ip: false,
            stream_key: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the environment:
    /// `PORT`, `YTLINK_PROGRAM`, `YTLINK_STRATEGY` (`ytdl` or `remote`),
    /// `YTLINK_CLIENT_IP` (`1`/`true`) and `YTLINK_STREAM_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidPort(port))?;
        }

        if let Ok(program) = std::env::var("YTLINK_PROGRAM") {
            if !program.is_empty() {
                config.program = PathBuf::from(program);
            }
        }

        if let Ok(strategy) = std::env::var("YTLINK_STRATEGY") {
            config.strategy = Strategy::from_name(&strategy)
                .ok_or(ConfigError::InvalidStrategy(strategy))?;
        }

        if let Ok(flag) = std::env::var("YTLINK_CLIENT_IP") {
            config.use_client_ip = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        if let Ok(key) = std::env::var("YTLINK_STREAM_KEY") {
            if !key.is_empty() {
                config.stream_key = Some(key);
            }
        }

        Ok(config)
    }

    /// Whether any enabled feature requires the downloader executable.
    /// Streaming always runs through it, redirects only with [`Strategy::Ytdl`].
    pub fn needs_downloader(&self) -> bool {
        self.strategy == Strategy::Ytdl || self.stream_key.is_some()
    }
}
