//! Engine configuration, loaded from TOML

use crate::validation::{DEFAULT_MAX_PROMPT_CHARS, ValidationOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What to do when a composed file changed on disk since it was loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Report a conflict and write nothing
    #[default]
    Abort,
    /// Overwrite the external change
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Upper bound for every store call, in milliseconds
    pub io_timeout_ms: u64,
    pub max_import_depth: usize,
    /// Keep `<file>.bak` with the previous content on overwrite
    pub backup: bool,
    pub conflict_policy: ConflictPolicy,
    pub max_prompt_chars: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 5000,
            max_import_depth: 32,
            backup: true,
            conflict_policy: ConflictPolicy::Abort,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }
}

impl PlanConfig {
    /// Load a configuration file
    ///
    /// # Arguments
    /// * `path` - Path to a TOML file; missing keys take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PlanConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            max_prompt_chars: self.max_prompt_chars,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlanConfig::default();
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_import_depth, 32);
        assert!(config.backup);
        assert_eq!(config.conflict_policy, ConflictPolicy::Abort);
        assert_eq!(config.max_prompt_chars, 2000);
    }

    #[test]
    fn test_partial_toml() {
        let config = PlanConfig::from_toml(
            r#"
conflict_policy = "overwrite"
backup = false
"#,
        )
        .unwrap();
        assert_eq!(config.conflict_policy, ConflictPolicy::Overwrite);
        assert!(!config.backup);
        assert_eq!(config.max_import_depth, 32);
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        assert!(PlanConfig::from_toml(r#"conflict_policy = "merge""#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = PlanConfig::load("/nonexistent/mindplan.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mindplan.toml");
        std::fs::write(&path, "io_timeout_ms = 250\n").unwrap();
        let config = PlanConfig::load(&path).unwrap();
        assert_eq!(config.io_timeout_ms, 250);
    }
}
