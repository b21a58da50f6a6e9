//! The controller configuration file.

use crate::reconcilers::process::ProcessDefaults;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path};

const EXTERNAL_PROTOCOL: &str = "https";

const DEFAULT_TIMEOUT_SECONDS: i64 = 60;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// The externally visible API host. Stored with its scheme once loaded.
    #[serde(default)]
    pub api_server_url: String,

    #[serde(default)]
    pub cf_process_defaults: CfProcessDefaults,

    #[serde(default = "default_root_namespace")]
    pub cf_root_namespace: String,

    #[serde(default)]
    pub container_registry_secret_name: String,

    #[serde(default)]
    pub runner_name: String,

    /// Labels added to every org and space namespace.
    #[serde(default)]
    pub namespace_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CfProcessDefaults {
    #[serde(default, rename = "memoryMB")]
    pub memory_mb: i64,

    #[serde(default, rename = "diskQuotaMB")]
    pub disk_quota_mb: i64,

    #[serde(default)]
    pub timeout: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse controller configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("ApiServerURL not specified")]
    NoApiServerUrl,
}

fn default_root_namespace() -> String {
    "cf".to_string()
}

// === impl ControllerConfig ===

impl ControllerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        yaml.parse()
    }

    /// The health check timeout applied to processes that do not set one.
    pub fn default_timeout_seconds(&self) -> i64 {
        self.cf_process_defaults
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    /// Resources and timeout for processes that leave them unset.
    pub fn process_defaults(&self) -> ProcessDefaults {
        ProcessDefaults {
            memory_mb: self.cf_process_defaults.memory_mb,
            disk_quota_mb: self.cf_process_defaults.disk_quota_mb,
            timeout_seconds: self.default_timeout_seconds(),
        }
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.api_server_url.is_empty() {
            return Err(ConfigError::NoApiServerUrl);
        }
        self.api_server_url = format!("{EXTERNAL_PROTOCOL}://{}", self.api_server_url);
        self.cf_process_defaults
            .timeout
            .get_or_insert(DEFAULT_TIMEOUT_SECONDS);
        Ok(self)
    }
}

impl std::str::FromStr for ControllerConfig {
    type Err = ConfigError;

    fn from_str(yaml: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str::<Self>(yaml)?.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn parses_full_config() {
        let config = r#"
apiServerUrl: api.example.com
cfRootNamespace: cf-root
containerRegistrySecretName: image-registry-credentials
runnerName: statefulset-runner
namespaceLabels:
  pod-security.kubernetes.io/enforce: restricted
cfProcessDefaults:
  memoryMB: 1024
  diskQuotaMB: 2048
  timeout: 30
"#
        .parse::<ControllerConfig>()
        .unwrap();

        assert_eq!(
            config,
            ControllerConfig {
                api_server_url: "https://api.example.com".to_string(),
                cf_process_defaults: CfProcessDefaults {
                    memory_mb: 1024,
                    disk_quota_mb: 2048,
                    timeout: Some(30),
                },
                cf_root_namespace: "cf-root".to_string(),
                container_registry_secret_name: "image-registry-credentials".to_string(),
                runner_name: "statefulset-runner".to_string(),
                namespace_labels: btreemap! {
                    "pod-security.kubernetes.io/enforce".to_string() => "restricted".to_string(),
                },
            }
        );
        assert_eq!(config.default_timeout_seconds(), 30);
        assert_eq!(
            config.process_defaults(),
            ProcessDefaults {
                memory_mb: 1024,
                disk_quota_mb: 2048,
                timeout_seconds: 30,
            }
        );
    }

    #[test]
    fn applies_defaults() {
        let config = "apiServerUrl: api.example.com\n"
            .parse::<ControllerConfig>()
            .unwrap();
        assert_eq!(config.cf_root_namespace, "cf");
        assert_eq!(config.cf_process_defaults.timeout, Some(60));
        assert_eq!(config.default_timeout_seconds(), 60);
        assert_eq!(config.process_defaults(), ProcessDefaults::default());
        assert!(config.namespace_labels.is_empty());
    }

    #[test]
    fn requires_api_server_url() {
        let error = "runnerName: statefulset-runner\n"
            .parse::<ControllerConfig>()
            .unwrap_err();
        assert!(matches!(error, ConfigError::NoApiServerUrl));
        assert_eq!(error.to_string(), "ApiServerURL not specified");
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            "apiServerUrl: [".parse::<ControllerConfig>(),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_names_path() {
        let error = ControllerConfig::load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/config.yaml"), "{error}");
    }
}
