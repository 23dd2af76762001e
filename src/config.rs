//! Configuration for the ledger binaries

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,

    /// HTTP listen address
    pub listen_addr: String,

    /// tracing EnvFilter directive (e.g. "info,shared_ledger=debug")
    pub log_filter: String,

    /// How long a writer waits for the SQLite lock (milliseconds)
    pub busy_timeout_ms: u64,

    pub auth: AuthConfig,

    pub settlement: SettlementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/ledger.db"),
            listen_addr: "0.0.0.0:3000".to_string(),
            log_filter: "info".to_string(),
            busy_timeout_ms: 5_000,
            auth: AuthConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

/// Token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for issued tokens; the server refuses to start without it
    pub jwt_secret: Option<String>,

    /// Token lifetime
    pub token_ttl_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
        }
    }
}

/// Settlement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Balance differences up to this are not reported as drift
    pub drift_tolerance: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            drift_tolerance: Decimal::ZERO,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// File (when given) first, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `LEDGER_*` overrides from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("LEDGER_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("LEDGER_LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Some(filter) = lookup("LEDGER_LOG") {
            self.log_filter = filter;
        }

        if let Some(secret) = lookup("LEDGER_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }

        if let Some(ttl) = lookup("LEDGER_TOKEN_TTL_HOURS") {
            self.auth.token_ttl_hours = ttl
                .parse()
                .with_context(|| format!("LEDGER_TOKEN_TTL_HOURS is not a number: {}", ttl))?;
        }

        if let Some(tolerance) = lookup("LEDGER_DRIFT_TOLERANCE") {
            self.settlement.drift_tolerance = Decimal::from_str(&tolerance)
                .with_context(|| format!("LEDGER_DRIFT_TOLERANCE is not a decimal: {}", tolerance))?;
        }

        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert!(config.auth.jwt_secret.is_none());
        assert_eq!(config.settlement.drift_tolerance, Decimal::ZERO);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_path = \"/tmp/ledger.db\"\n\n[auth]\njwt_secret = \"s3cret\"\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LEDGER_LISTEN_ADDR", "127.0.0.1:8080"),
            ("LEDGER_JWT_SECRET", "from-env"),
            ("LEDGER_TOKEN_TTL_HOURS", "2"),
            ("LEDGER_DRIFT_TOLERANCE", "0.01"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.auth.jwt_secret.as_deref(), Some("from-env"));
        assert_eq!(config.auth.token_ttl_hours, 2);
        assert_eq!(config.settlement.drift_tolerance, Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_bad_ttl_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "LEDGER_TOKEN_TTL_HOURS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
