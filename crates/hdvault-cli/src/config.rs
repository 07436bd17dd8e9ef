//! CLI configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use hdvault_keystore::{KeyDurability, ProtectionLevel, VaultOptions};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Storage and logging
    #[serde(default)]
    pub vault: VaultSection,

    /// Wrapping keys and protection defaults
    #[serde(default)]
    pub protection: ProtectionSection,

    /// Derivation paths
    #[serde(default)]
    pub derivation: DerivationSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSection {
    /// JSON file holding seeds and software wrapping keys
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionSection {
    /// Level for `create` and `import` when none is given
    #[serde(default = "default_level")]
    pub default_level: ProtectionLevel,

    #[serde(default = "default_open_alias")]
    pub open_alias: String,

    #[serde(default = "default_lockscreen_alias")]
    pub lockscreen_alias: String,

    #[serde(default = "default_biometric_alias")]
    pub biometric_alias: String,

    /// Seconds a lock-screen unlock keeps the key usable
    #[serde(default = "default_lockscreen_validity")]
    pub lockscreen_validity_secs: u64,

    #[serde(default)]
    pub durability: KeyDurability,
}

impl Default for ProtectionSection {
    fn default() -> Self {
        Self {
            default_level: default_level(),
            open_alias: default_open_alias(),
            lockscreen_alias: default_lockscreen_alias(),
            biometric_alias: default_biometric_alias(),
            lockscreen_validity_secs: default_lockscreen_validity(),
            durability: KeyDurability::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationSection {
    /// Path whose address labels a seed
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Path used by `derive` and `sign-*` when none is given
    #[serde(default = "default_account_path")]
    pub default_path: String,
}

impl Default for DerivationSection {
    fn default() -> Self {
        Self {
            root_path: default_root_path(),
            default_path: default_account_path(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_store_path() -> PathBuf {
    PathBuf::from("hdvault.json")
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_level() -> ProtectionLevel {
    ProtectionLevel::LockScreen
}

fn default_open_alias() -> String {
    hdvault_keystore::vault::DEFAULT_OPEN_ALIAS.to_string()
}

fn default_lockscreen_alias() -> String {
    hdvault_keystore::vault::DEFAULT_LOCKSCREEN_ALIAS.to_string()
}

fn default_biometric_alias() -> String {
    hdvault_keystore::vault::DEFAULT_BIOMETRIC_ALIAS.to_string()
}

fn default_lockscreen_validity() -> u64 {
    hdvault_keystore::vault::DEFAULT_LOCKSCREEN_VALIDITY.as_secs()
}

fn default_root_path() -> String {
    hdvault_core::ROOT_DERIVATION_PATH.to_string()
}

fn default_account_path() -> String {
    "m/44'/60'/0'/0/0".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl CliConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `HDVAULT_STORE_PATH`
    /// - `HDVAULT_LOG_LEVEL`
    /// - `HDVAULT_DEFAULT_LEVEL`
    /// - `HDVAULT_LOCKSCREEN_VALIDITY`
    /// - `HDVAULT_DEFAULT_PATH`
    ///
    /// Values that fail to parse leave the setting unchanged and come back as
    /// warnings for the caller to log.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Ok(v) = std::env::var("HDVAULT_STORE_PATH") {
            self.vault.store_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("HDVAULT_LOG_LEVEL") {
            self.vault.log_level = v;
        }
        if let Ok(v) = std::env::var("HDVAULT_DEFAULT_LEVEL") {
            match parse_override("HDVAULT_DEFAULT_LEVEL", &v) {
                Ok(level) => self.protection.default_level = level,
                Err(warning) => ignored.push(warning),
            }
        }
        if let Ok(v) = std::env::var("HDVAULT_LOCKSCREEN_VALIDITY") {
            match parse_override("HDVAULT_LOCKSCREEN_VALIDITY", &v) {
                Ok(secs) => self.protection.lockscreen_validity_secs = secs,
                Err(warning) => ignored.push(warning),
            }
        }
        if let Ok(v) = std::env::var("HDVAULT_DEFAULT_PATH") {
            self.derivation.default_path = v;
        }
        ignored
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.vault.store_path.as_os_str().is_empty(),
            "vault.store_path must not be empty"
        );

        let aliases = [
            &self.protection.open_alias,
            &self.protection.lockscreen_alias,
            &self.protection.biometric_alias,
        ];
        anyhow::ensure!(
            aliases.iter().all(|a| !a.is_empty()),
            "protection aliases must not be empty"
        );
        anyhow::ensure!(
            aliases[0] != aliases[1] && aliases[1] != aliases[2] && aliases[0] != aliases[2],
            "protection aliases must be distinct"
        );

        anyhow::ensure!(
            self.protection.lockscreen_validity_secs > 0,
            "protection.lockscreen_validity_secs must be > 0"
        );

        hdvault_core::parse_path(&self.derivation.root_path)
            .context("derivation.root_path is not a valid path")?;
        hdvault_core::parse_path(&self.derivation.default_path)
            .context("derivation.default_path is not a valid path")?;

        Ok(())
    }

    pub fn vault_options(&self) -> VaultOptions {
        VaultOptions {
            open_alias: self.protection.open_alias.clone(),
            lockscreen_alias: self.protection.lockscreen_alias.clone(),
            biometric_alias: self.protection.biometric_alias.clone(),
            lockscreen_validity: Duration::from_secs(self.protection.lockscreen_validity_secs),
            durability: self.protection.durability,
            root_path: self.derivation.root_path.clone(),
        }
    }
}

/// Parse an env override, describing the failure if it doesn't parse.
fn parse_override<T>(name: &str, value: &str) -> std::result::Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("Ignoring {}={:?}: {}", name, value, e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn full_toml() -> &'static str {
        r#"
[vault]
store_path = "/var/lib/hdvault/vault.json"
log_level = "debug"

[protection]
default_level = "BIOMETRIC"
open_alias = "acme.open"
lockscreen_alias = "acme.lockscreen"
biometric_alias = "acme.biometric"
lockscreen_validity_secs = 120
durability = "software"

[derivation]
default_path = "m/44'/60'/1'/0/0"
"#
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = CliConfig::from_file(file.path()).unwrap();

        assert_eq!(config.vault.store_path, PathBuf::from("hdvault.json"));
        assert_eq!(config.protection.default_level, ProtectionLevel::LockScreen);
        assert_eq!(config.protection.lockscreen_validity_secs, 30);
        assert_eq!(config.derivation.root_path, "m/7696500'/0'/0'/0'");
        assert_eq!(config.vault_options(), VaultOptions::default());
    }

    #[test]
    fn test_parse_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", full_toml()).unwrap();

        let config = CliConfig::from_file(file.path()).unwrap();
        assert_eq!(config.vault.log_level, "debug");
        assert_eq!(config.protection.default_level, ProtectionLevel::Biometric);
        assert_eq!(config.protection.durability, KeyDurability::Software);
        assert_eq!(config.derivation.default_path, "m/44'/60'/1'/0/0");

        let options = config.vault_options();
        assert_eq!(options.biometric_alias, "acme.biometric");
        assert_eq!(options.lockscreen_validity, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_default() {
        let config =
            CliConfig::load_or_default(Path::new("/nonexistent/hdvault/config.toml")).unwrap();
        assert_eq!(config.vault.log_level, "warn");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CliConfig::default();

        std::env::set_var("HDVAULT_STORE_PATH", "/env/vault.json");
        std::env::set_var("HDVAULT_DEFAULT_LEVEL", "open");
        std::env::set_var("HDVAULT_LOCKSCREEN_VALIDITY", "not-a-number");

        let ignored = config.apply_env_overrides();

        assert_eq!(config.vault.store_path, PathBuf::from("/env/vault.json"));
        assert_eq!(config.protection.default_level, ProtectionLevel::Open);
        assert_eq!(config.protection.lockscreen_validity_secs, 30);
        assert_eq!(ignored.len(), 1);
        assert!(ignored[0].contains("HDVAULT_LOCKSCREEN_VALIDITY"));

        std::env::remove_var("HDVAULT_STORE_PATH");
        std::env::remove_var("HDVAULT_DEFAULT_LEVEL");
        std::env::remove_var("HDVAULT_LOCKSCREEN_VALIDITY");
    }

    #[test]
    fn test_invalid_override_is_reported() {
        assert_eq!(parse_override::<u64>("HDVAULT_LOCKSCREEN_VALIDITY", " 90 "), Ok(90));
        assert_eq!(
            parse_override::<ProtectionLevel>("HDVAULT_DEFAULT_LEVEL", "biometric"),
            Ok(ProtectionLevel::Biometric)
        );

        let warning = parse_override::<u64>("HDVAULT_LOCKSCREEN_VALIDITY", "soon").unwrap_err();
        assert!(warning.contains("HDVAULT_LOCKSCREEN_VALIDITY"));
        assert!(warning.contains("soon"));
        let warning = parse_override::<ProtectionLevel>("HDVAULT_DEFAULT_LEVEL", "PIN").unwrap_err();
        assert!(warning.contains("unknown protection level"));
    }

    #[test]
    fn test_validation_rejects_shared_alias() {
        let mut config = CliConfig::default();
        config.protection.biometric_alias = config.protection.open_alias.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_path() {
        let mut config = CliConfig::default();
        config.derivation.default_path = "m/44'/sixty".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_level_fails_to_parse() {
        let toml = r#"
[protection]
default_level = "PIN"
"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml).unwrap();
        assert!(CliConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", full_toml()).unwrap();

        let config = CliConfig::from_file(file.path()).unwrap();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: CliConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.vault_options(), config.vault_options());
    }
}
