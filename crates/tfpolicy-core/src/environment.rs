//! Per-environment configuration loaded from YAML.
//!
//! ```yaml
//! - name: dev
//!   settings:
//!     Tenant: contoso-dev.onmicrosoft.com
//!     DeploymentMode: Development
//! - name: prod
//!   settings:
//!     Tenant: contoso.onmicrosoft.com
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::Settings;

/// Errors produced while loading or querying environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid environment config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("environment {0} not found")]
    EnvironmentNotFound(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// One named environment and the settings substituted into its policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Settings::is_empty")]
    pub settings: Settings,
}

impl EnvironmentConfig {
    pub fn new(name: impl Into<String>, settings: Settings) -> Self {
        Self {
            name: name.into(),
            settings,
        }
    }

    /// Parse a single environment record.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Parse a list of environment records.
pub fn parse_environments(yaml: &str) -> ConfigResult<Vec<EnvironmentConfig>> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load the list of environments from a YAML file.
pub fn load_environments(path: impl AsRef<Path>) -> ConfigResult<Vec<EnvironmentConfig>> {
    let path = path.as_ref();
    let yaml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_environments(&yaml)
}

/// Look up an environment by exact name.
pub fn find<'a>(
    environments: &'a [EnvironmentConfig],
    name: &str,
) -> ConfigResult<&'a EnvironmentConfig> {
    environments
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| ConfigError::EnvironmentNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVIRONMENTS: &str = r#"
- name: dev
  settings:
    Tenant: dev.onmicrosoft.com
    DeploymentMode: Development
- name: test
  settings:
    Tenant: test.onmicrosoft.com
- name: bare
"#;

    #[test]
    fn test_parse_environment_list() {
        let envs = parse_environments(ENVIRONMENTS).unwrap();
        assert_eq!(envs.len(), 3);
        assert_eq!(envs[0].name, "dev");
        assert_eq!(envs[0].settings["DeploymentMode"], "Development");
        assert!(envs[2].settings.is_empty());
    }

    #[test]
    fn test_single_record_from_yaml() {
        let env = EnvironmentConfig::from_yaml("name: dev\nsettings:\n  X: \"1\"\n").unwrap();
        assert_eq!(env, EnvironmentConfig::new("dev", Settings::from([("X".into(), "1".into())])));
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        let err = parse_environments("- name: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_find_by_name() {
        let envs = parse_environments(ENVIRONMENTS).unwrap();
        assert_eq!(find(&envs, "test").unwrap().settings["Tenant"], "test.onmicrosoft.com");

        let err = find(&envs, "prod").unwrap_err();
        assert_eq!(err.to_string(), "environment prod not found");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environments.yaml");
        fs::write(&path, ENVIRONMENTS).unwrap();

        assert_eq!(load_environments(&path).unwrap().len(), 3);
        assert!(matches!(
            load_environments(dir.path().join("missing.yaml")).unwrap_err(),
            ConfigError::Io { .. }
        ));
    }
}
