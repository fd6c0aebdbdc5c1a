//! Pool and server configuration.

use crate::error::{CursorError, CursorResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard ceiling on the lifetime of a declared cursor.
pub const MAX_TTL: Duration = Duration::from_secs(20 * 60);

/// Hard ceiling on the number of rows returned by one fetch.
pub const MAX_PAGE_SIZE: usize = 500;

/// Deadline for closing a cursor when no caller is waiting on it.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a single database round trip.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings consumed by [`CursorPool`](crate::cursor::CursorPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    ttl: Duration,
    max_page_size: usize,
    statement_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl: MAX_TTL,
            max_page_size: MAX_PAGE_SIZE,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session lifetime. Values above [`MAX_TTL`] are clamped.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        if ttl > MAX_TTL {
            tracing::warn!(
                "Cursor ttl {}s exceeds ceiling, using {}s",
                ttl.as_secs(),
                MAX_TTL.as_secs()
            );
        }
        self.ttl = ttl.min(MAX_TTL);
        self
    }

    /// Set the page size ceiling. Zero and values above [`MAX_PAGE_SIZE`]
    /// fall back to [`MAX_PAGE_SIZE`].
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = if size == 0 || size > MAX_PAGE_SIZE {
            MAX_PAGE_SIZE
        } else {
            size
        };
        self
    }

    /// Set the deadline applied to each declare/fetch round trip.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.ttl
    }

    pub fn page_size_limit(&self) -> usize {
        self.max_page_size
    }

    pub fn round_trip_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Normalize a requested page size: zero or oversized requests get the
    /// ceiling.
    pub fn page_size(&self, requested: usize) -> usize {
        if requested == 0 || requested > self.max_page_size {
            self.max_page_size
        } else {
            requested
        }
    }
}

/// Main application configuration, usually read from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server bind address
    pub bind_address: String,

    /// Cursor lifetime in seconds
    pub ttl_secs: u64,

    /// Maximum rows per page
    pub max_page_size: usize,

    /// Per round trip deadline in seconds
    pub statement_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/pgcursor".to_string(),
            bind_address: "0.0.0.0:80".to_string(),
            ttl_secs: MAX_TTL.as_secs(),
            max_page_size: MAX_PAGE_SIZE,
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> CursorResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CursorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every cursor unusable.
    pub fn validate(&self) -> CursorResult<()> {
        if self.ttl_secs == 0 {
            return Err(CursorError::Config("ttl_secs must be at least 1".to_string()));
        }
        if self.statement_timeout_secs == 0 {
            return Err(CursorError::Config(
                "statement_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `path`, or from the user config directory when `path` is
    /// `None`. A missing default file yields the defaults.
    pub fn load(path: Option<&Path>) -> CursorResult<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_toml(&content)
            }
            None => match default_path() {
                Some(path) if path.exists() => {
                    tracing::debug!("Loading config from {}", path.display());
                    let content = std::fs::read_to_string(&path)?;
                    Self::from_toml(&content)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// The pool settings described by this configuration.
    pub fn pool(&self) -> PoolConfig {
        PoolConfig::new()
            .ttl(Duration::from_secs(self.ttl_secs))
            .max_page_size(self.max_page_size)
            .statement_timeout(Duration::from_secs(self.statement_timeout_secs))
    }
}

/// `<config_dir>/pgcursor/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pgcursor").join("config.toml"))
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    /// Set the cursor lifetime
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl_secs = ttl.as_secs();
        self
    }

    /// Set the page size ceiling
    pub fn max_page_size(mut self, size: usize) -> Self {
        self.config.max_page_size = size;
        self
    }

    /// Set the per round trip deadline
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.config.statement_timeout_secs = timeout.as_secs();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_normalization() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.page_size(0), 500);
        assert_eq!(cfg.page_size(501), 500);
        assert_eq!(cfg.page_size(10_000), 500);
        assert_eq!(cfg.page_size(1), 1);
        assert_eq!(cfg.page_size(500), 500);
    }

    #[test]
    fn test_ttl_is_clamped() {
        let cfg = PoolConfig::new().ttl(Duration::from_secs(3600));
        assert_eq!(cfg.session_ttl(), MAX_TTL);

        let cfg = PoolConfig::new().ttl(Duration::from_secs(5));
        assert_eq!(cfg.session_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn test_max_page_size_bounds() {
        assert_eq!(PoolConfig::new().max_page_size(0).page_size_limit(), 500);
        assert_eq!(PoolConfig::new().max_page_size(900).page_size_limit(), 500);
        let cfg = PoolConfig::new().max_page_size(50);
        assert_eq!(cfg.page_size(0), 50);
        assert_eq!(cfg.page_size(80), 50);
    }

    #[test]
    fn test_from_toml_partial() {
        let cfg = Config::from_toml(
            r#"
            database_url = "postgres://app@db/users"
            ttl_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.database_url, "postgres://app@db/users");
        assert_eq!(cfg.bind_address, "0.0.0.0:80");
        assert_eq!(cfg.pool().session_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.pool().page_size_limit(), 500);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(matches!(
            Config::from_toml("ttl_secs = \"soon\""),
            Err(CursorError::Config(_))
        ));
    }

    #[test]
    fn test_zero_durations_rejected() {
        for doc in ["ttl_secs = 0", "statement_timeout_secs = 0"] {
            assert!(matches!(Config::from_toml(doc), Err(CursorError::Config(_))));
        }

        let cfg = Config::builder().statement_timeout(Duration::from_millis(500)).build();
        assert!(matches!(cfg.validate(), Err(CursorError::Config(_))));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = Config::builder()
            .database("postgres://localhost/test")
            .bind("127.0.0.1:8080")
            .ttl(Duration::from_secs(90))
            .max_page_size(100)
            .build();
        assert_eq!(cfg.bind_address, "127.0.0.1:8080");
        assert_eq!(cfg.pool().session_ttl(), Duration::from_secs(90));
        assert_eq!(cfg.pool().page_size(0), 100);
    }
}
