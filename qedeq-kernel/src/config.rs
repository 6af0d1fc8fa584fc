//! Kernel configuration and settings

use qedeq_logic::{CLASS_OPERATOR, IDENTITY_OPERATOR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main kernel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Predicate name of the identity operator
    pub identity_operator: String,
    /// Function name of the class operator
    pub class_operator: String,
    /// Verify edge symmetry after every resolution pass
    pub check_symmetry: bool,
    /// Blocked time after which a process counts as stalled
    pub stall_threshold_ms: u64,
    /// Maximum depth of nested service calls per process
    pub max_call_depth: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            identity_operator: IDENTITY_OPERATOR.to_string(),
            class_operator: CLASS_OPERATOR.to_string(),
            check_symmetry: true,
            stall_threshold_ms: 10_000,
            max_call_depth: 1024,
        }
    }
}

impl KernelConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let config: KernelConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize { error: e })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                error: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e,
        })
    }

    pub fn stall_threshold(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stall_threshold_ms as i64)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_operator.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "identity_operator".to_string(),
                message: "Identity operator name must not be empty".to_string(),
            });
        }

        if self.class_operator.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "class_operator".to_string(),
                message: "Class operator name must not be empty".to_string(),
            });
        }

        if self.identity_operator == self.class_operator {
            return Err(ConfigError::Invalid {
                field: "class_operator".to_string(),
                message: "Class and identity operator need different names".to_string(),
            });
        }

        // Every resolution needs at least a module call and a load call
        if self.max_call_depth < 2 {
            return Err(ConfigError::Invalid {
                field: "max_call_depth".to_string(),
                message: "Maximum call depth must be at least 2".to_string(),
            });
        }

        Ok(())
    }

    /// Merge with another configuration (other takes precedence)
    pub fn merge(&mut self, other: KernelConfig) {
        let defaults = KernelConfig::default();
        if other.identity_operator != defaults.identity_operator {
            self.identity_operator = other.identity_operator;
        }
        if other.class_operator != defaults.class_operator {
            self.class_operator = other.class_operator;
        }
        if other.check_symmetry != defaults.check_symmetry {
            self.check_symmetry = other.check_symmetry;
        }
        if other.stall_threshold_ms != defaults.stall_threshold_ms {
            self.stall_threshold_ms = other.stall_threshold_ms;
        }
        if other.max_call_depth != defaults.max_call_depth {
            self.max_call_depth = other.max_call_depth;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error for {path:?}: {error}")]
    Io { path: PathBuf, error: std::io::Error },

    #[error("Parse error for {path:?}: {error}")]
    Parse { path: PathBuf, error: toml::de::Error },

    #[error("Serialization error: {error}")]
    Serialize { error: toml::ser::Error },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("kernel.toml");

        let config = KernelConfig {
            stall_threshold_ms: 250,
            ..KernelConfig::default()
        };
        config.to_file(&path).unwrap();
        assert_eq!(KernelConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kernel.toml");
        std::fs::write(&path, "max_call_depth = 64\n").unwrap();

        let config = KernelConfig::from_file(&path).unwrap();
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.identity_operator, "equal");
    }

    #[test]
    fn test_validation() {
        let mut config = KernelConfig::default();
        assert!(config.validate().is_ok());

        config.class_operator = "equal".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "class_operator"
        ));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_call_depth = 1\n").unwrap();
        assert!(matches!(
            KernelConfig::from_file(&path),
            Err(ConfigError::Invalid { .. })
        ));
        std::fs::write(&path, "max_call_depth = \"deep\"\n").unwrap();
        assert!(matches!(
            KernelConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_merge() {
        let mut base = KernelConfig::default();
        base.merge(KernelConfig {
            identity_operator: "eq".to_string(),
            check_symmetry: false,
            ..KernelConfig::default()
        });
        assert_eq!(base.identity_operator, "eq");
        assert!(!base.check_symmetry);
        assert_eq!(base.class_operator, "class");
    }
}
