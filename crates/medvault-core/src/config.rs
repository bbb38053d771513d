use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MedvaultError, MedvaultResult};

/// Top-level client configuration (loaded from medvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedvaultConfig {
    pub crypto: CryptoConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Cryptographic cost parameters and envelope policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Refuse to encrypt or decrypt record-bound files without an auth context
    pub require_aad: bool,
}

/// Key manager lifetime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds of inactivity before the master key is evicted (default: 900,
    /// clamped to one day)
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            require_aad: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 15 * 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl MedvaultConfig {
    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml_str(content: &str) -> MedvaultResult<Self> {
        toml::from_str(content).map_err(|e| MedvaultError::Config(e.to_string()))
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> MedvaultResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| MedvaultError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8
require_aad = true

[session]
idle_timeout_secs = 300

[logging]
level = "debug"
format = "json"
"#;
        let config = MedvaultConfig::from_toml_str(toml_str).unwrap();

        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
        assert_eq!(config.crypto.argon2_time_cost, 4);
        assert_eq!(config.crypto.argon2_parallelism, 8);
        assert!(config.crypto.require_aad);
        assert_eq!(config.session.idle_timeout_secs, 300);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config = MedvaultConfig::from_toml_str("").unwrap();

        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(config.crypto.argon2_time_cost, 3);
        assert_eq!(config.crypto.argon2_parallelism, 4);
        assert!(!config.crypto.require_aad);
        assert_eq!(config.session.idle_timeout_secs, 900);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[crypto]
require_aad = true
"#;
        let config = MedvaultConfig::from_toml_str(toml_str).unwrap();

        assert!(config.crypto.require_aad);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(config.session.idle_timeout_secs, 900);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = MedvaultConfig::from_toml_str("[crypto\nargon2_time_cost = ");
        assert!(matches!(result, Err(MedvaultError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = MedvaultConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.session.idle_timeout_secs, 900);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("medvault.toml");
        std::fs::write(&path, "[session]\nidle_timeout_secs = 60\n").unwrap();

        let config = MedvaultConfig::load(&path).unwrap();
        assert_eq!(config.session.idle_timeout_secs, 60);
    }
}
