use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ModError, Result};

/// Environment variable overriding the spool directory for rewritten layers.
pub const ENV_TMPDIR: &str = "A3S_IMGMOD_TMPDIR";

/// Environment variable overriding the gzip level for recompressed layers.
pub const ENV_GZIP_LEVEL: &str = "A3S_IMGMOD_GZIP_LEVEL";

/// Environment variable listing registries reached over plain HTTP (comma separated).
pub const ENV_INSECURE_REGISTRIES: &str = "A3S_IMGMOD_INSECURE_REGISTRIES";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModConfig {
    /// Directory for temporary layer files (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Gzip level used when a rewritten layer is recompressed (0-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Registries that are reached over HTTP instead of HTTPS
    #[serde(default)]
    pub insecure_registries: Vec<String>,
}

fn default_compression_level() -> u32 {
    6
}

impl Default for ModConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            compression_level: default_compression_level(),
            insecure_registries: Vec::new(),
        }
    }
}

impl ModConfig {
    /// Build a configuration from `A3S_IMGMOD_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_TMPDIR).filter(|s| !s.trim().is_empty()) {
            config.temp_dir = Some(PathBuf::from(dir.trim()));
        }

        if let Some(level) = lookup(ENV_GZIP_LEVEL) {
            config.compression_level = level.trim().parse().map_err(|e| {
                ModError::ConfigError(format!("{} must be an integer: {}", ENV_GZIP_LEVEL, e))
            })?;
        }

        if let Some(list) = lookup(ENV_INSECURE_REGISTRIES) {
            config.insecure_registries = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(ModError::ConfigError(format!(
                "compression level {} out of range 0-9",
                self.compression_level
            )));
        }
        if let Some(dir) = &self.temp_dir {
            if dir.as_os_str().is_empty() {
                return Err(ModError::ConfigError("temp dir must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ModConfig::default();
        assert_eq!(config.temp_dir, None);
        assert_eq!(config.compression_level, 6);
        assert!(config.insecure_registries.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_empty_is_default() {
        let config = ModConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ModConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().to_string_lossy().to_string();
        let config = ModConfig::from_lookup(lookup(&[
            (ENV_TMPDIR, dir.as_str()),
            (ENV_GZIP_LEVEL, "9"),
            (ENV_INSECURE_REGISTRIES, "localhost:5000, registry.local ,"),
        ]))
        .unwrap();

        assert_eq!(config.temp_dir, Some(tmp.path().to_path_buf()));
        assert_eq!(config.compression_level, 9);
        assert_eq!(
            config.insecure_registries,
            vec!["localhost:5000".to_string(), "registry.local".to_string()]
        );
    }

    #[test]
    fn test_from_lookup_rejects_bad_level() {
        let result = ModConfig::from_lookup(lookup(&[(ENV_GZIP_LEVEL, "fast")]));
        assert!(matches!(result, Err(ModError::ConfigError(_))));

        let result = ModConfig::from_lookup(lookup(&[(ENV_GZIP_LEVEL, "12")]));
        assert!(matches!(result, Err(ModError::ConfigError(_))));
    }

    #[test]
    fn test_serde_defaults() {
        let config: ModConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ModConfig::default());

        let config: ModConfig = serde_json::from_str(r#"{"compression_level": 1}"#).unwrap();
        assert_eq!(config.compression_level, 1);
    }
}
