//! Controller configuration loaded from a mounted YAML file

use serde::{Deserialize, Serialize};

/// Environment override for the build agent image tag
pub const AGENT_IMAGE_TAG_ENV: &str = "AGENT_IMAGE_TAG";

/// Build settings passed from the controller to the build agent
pub const BUILD_NAMESPACE_ENV: &str = "BUILD_NAMESPACE";
pub const BUILD_SERVICE_ACCOUNT_ENV: &str = "BUILD_SERVICE_ACCOUNT";
pub const KANIKO_IMAGE_ENV: &str = "KANIKO_IMAGE";
pub const GIT_IMAGE_ENV: &str = "GIT_IMAGE";

/// Credential resolver endpoints passed from the controller to the build agent
pub const AZURE_MANAGEMENT_URL_ENV: &str = "AZURE_MANAGEMENT_URL";
pub const AZURE_VAULT_URL_TEMPLATE_ENV: &str = "AZURE_VAULT_URL_TEMPLATE";

/// Main controller configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Where build jobs run and which images they use
    pub build: BuildConfig,

    /// Build agent (orchestrator) job settings
    pub agent: AgentConfig,

    /// Azure REST endpoints
    pub azure: AzureEndpoints,

    /// Reconciliation tuning
    pub reconcile: ReconcileConfig,

    /// Restrict the watched resources to a single namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildConfig {
    pub namespace: String,
    pub service_account_name: String,
    pub kaniko_image: String,
    pub git_image: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            namespace: "humalect".to_string(),
            service_account_name: "humalect-sa".to_string(),
            kaniko_image: "gcr.io/kaniko-project/executor:latest".to_string(),
            git_image: "alpine/git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub image: ImageConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            image: ImageConfig {
                repository: "public.ecr.aws/humalect/core-agent".to_string(),
                tag: "latest".to_string(),
            },
        }
    }
}

/// Image configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageConfig {
    /// Image repository (e.g., "public.ecr.aws/humalect/core-agent")
    pub repository: String,

    /// Image tag (e.g., "latest", "v1.0.0")
    pub tag: String,
}

impl ImageConfig {
    /// Returns true when both repository and tag are non-empty.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.repository.trim().is_empty() && !self.tag.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureEndpoints {
    pub management_url: String,
    /// Key Vault base URL, `{vault}` is replaced by the vault name
    pub vault_url_template: String,
}

impl Default for AzureEndpoints {
    fn default() -> Self {
        Self {
            management_url: "https://management.azure.com".to_string(),
            vault_url_template: "https://{vault}.vault.azure.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Requeue delay after a failed reconciliation
    pub error_requeue_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            error_requeue_seconds: 30,
        }
    }
}

impl ControllerConfig {
    /// Validate that the configuration has required fields
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.agent.image.is_configured() {
            return Err(anyhow::anyhow!(
                "Agent image is not configured. Provide agent.image.repository and agent.image.tag."
            ));
        }

        if self.build.namespace.trim().is_empty() {
            return Err(anyhow::anyhow!("build.namespace must not be empty"));
        }

        for (field, image) in [
            ("build.kanikoImage", &self.build.kaniko_image),
            ("build.gitImage", &self.build.git_image),
        ] {
            if image.trim().is_empty() {
                return Err(anyhow::anyhow!("{field} must not be empty"));
            }
        }

        if !self.azure.vault_url_template.contains("{vault}") {
            return Err(anyhow::anyhow!(
                "azure.vaultUrlTemplate must contain the {{vault}} placeholder"
            ));
        }

        Ok(())
    }

    /// Load configuration from mounted `ConfigMap` file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Full build agent image reference, honoring `AGENT_IMAGE_TAG`.
    #[must_use]
    pub fn agent_image(&self) -> String {
        let tag = std::env::var(AGENT_IMAGE_TAG_ENV)
            .ok()
            .filter(|tag| !tag.trim().is_empty())
            .unwrap_or_else(|| self.agent.image.tag.clone());
        format!("{}:{}", self.agent.image.repository, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_is_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.build.namespace, "humalect");
        assert_eq!(config.build.service_account_name, "humalect-sa");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r"
build:
  namespace: builds
agent:
  image:
    repository: registry.local/agent
    tag: v2
";
        let config: ControllerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.build.namespace, "builds");
        assert_eq!(config.build.service_account_name, "humalect-sa");
        assert_eq!(config.agent.image.tag, "v2");
        assert_eq!(config.reconcile.error_requeue_seconds, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_agent_image() {
        let mut config = ControllerConfig::default();
        config.agent.image.repository.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_vault_template_without_placeholder() {
        let mut config = ControllerConfig::default();
        config.azure.vault_url_template = "https://vault.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ControllerConfig::from_mounted_file("/nonexistent/config.yaml").is_err());
    }

    #[test]
    #[serial]
    fn agent_tag_env_overrides_config() {
        let config = ControllerConfig::default();

        std::env::remove_var(AGENT_IMAGE_TAG_ENV);
        assert_eq!(config.agent_image(), "public.ecr.aws/humalect/core-agent:latest");

        std::env::set_var(AGENT_IMAGE_TAG_ENV, "v1.4.2");
        assert_eq!(config.agent_image(), "public.ecr.aws/humalect/core-agent:v1.4.2");

        std::env::set_var(AGENT_IMAGE_TAG_ENV, "");
        assert_eq!(config.agent_image(), "public.ecr.aws/humalect/core-agent:latest");
        std::env::remove_var(AGENT_IMAGE_TAG_ENV);
    }
}
