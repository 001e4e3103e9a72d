/*
 * 5D Labs Deployment Platform - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command-line surface of the build agent.
//!
//! The `BuildRequest` loop renders a request with [`agent_args`]; the agent
//! parses it back with [`AgentArgs`] and decodes it with
//! [`AgentArgs::into_spec`]. Structured fields travel as JSON strings.

use clap::{ArgAction, Args, Parser};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::credentials::CredentialError;
use crate::crds::common::{default_managed_by, default_namespace};
use crate::crds::BuildRequestSpec;
use crate::tasks::config::{
    AzureEndpoints, BuildConfig, ControllerConfig, AZURE_MANAGEMENT_URL_ENV,
    AZURE_VAULT_URL_TEMPLATE_ENV, BUILD_NAMESPACE_ENV, BUILD_SERVICE_ACCOUNT_ENV, GIT_IMAGE_ENV,
    KANIKO_IMAGE_ENV,
};
use crate::tasks::types::Result;

/// Build an image for one commit, publish it and deploy the application
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "build-agent")]
#[command(about = "Build, publish and deploy one BuildRequest")]
#[command(version)]
pub struct AgentArgs {
    /// Target registry: ecr, acr or dockerhub
    #[arg(long, default_value_t)]
    pub artifacts_registry_provider: String,

    /// Secret store: aws or azure (defaults to the cloud provider)
    #[arg(long, default_value_t)]
    pub secrets_provider: String,

    /// ECR credentials as JSON
    #[arg(long, default_value_t)]
    pub ecr_credentials: String,

    /// ACR credentials as JSON
    #[arg(long, default_value_t)]
    pub acr_credentials: String,

    /// Docker Hub credentials as JSON
    #[arg(long, default_value_t)]
    pub docker_hub_credentials: String,

    /// AWS Secrets Manager credentials as JSON
    #[arg(long, default_value_t)]
    pub aws_secret_credentials: String,

    /// Azure Key Vault credentials as JSON
    #[arg(long, default_value_t)]
    pub azure_vault_credentials: String,

    #[arg(long, default_value_t)]
    pub cloud_provider: String,

    #[arg(long, default_value_t)]
    pub cloud_region: String,

    /// github, gitlab or bitbucket
    #[arg(long, default_value_t)]
    pub source_code_provider: String,

    #[arg(long, default_value_t)]
    pub source_code_org_name: String,

    #[arg(long, default_value_t)]
    pub source_code_repository_name: String,

    #[arg(long, default_value_t, hide_default_value = true)]
    pub source_code_token: String,

    #[arg(long, default_value_t)]
    pub commit_id: String,

    /// Inline Dockerfile as a JSON array of lines
    #[arg(long, default_value_t)]
    pub docker_manifest: String,

    /// Build with the Dockerfile committed to the repository
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pub use_docker_from_code_flag: bool,

    #[arg(long, default_value_t)]
    pub artifacts_repository_name: String,

    #[arg(long, default_value_t)]
    pub k8s_app_name: String,

    #[arg(long, default_value_t)]
    pub k8s_resources_identifier: String,

    /// Deployment manifest as JSON
    #[arg(long, default_value_t)]
    pub deployment_yaml_manifest: String,

    /// Service manifest as JSON
    #[arg(long, default_value_t)]
    pub service_yaml_manifest: String,

    /// Ingress manifest as JSON
    #[arg(long, default_value_t)]
    pub ingress_yaml_manifest: String,

    /// Build-time secret references as a JSON array
    #[arg(long, default_value_t)]
    pub build_secrets_config: String,

    /// Runtime secret references as a JSON array
    #[arg(long, default_value_t)]
    pub application_secrets_config: String,

    #[arg(long, default_value_t)]
    pub managed_by: String,

    /// Namespace the application is deployed into
    #[arg(long, default_value_t)]
    pub namespace: String,

    #[arg(long, default_value_t)]
    pub deployment_id: String,

    #[arg(long, default_value_t)]
    pub pipeline_id: String,

    #[arg(long, default_value_t)]
    pub webhook_endpoint: String,

    /// Accumulated status payload
    #[arg(long, default_value_t)]
    pub webhook_data: String,

    #[command(flatten)]
    pub build: BuildSettings,

    #[command(flatten)]
    pub resolver: ResolverSettings,
}

/// Where and how the image build job runs. Set by the controller through the environment.
#[derive(Args, Debug, Clone)]
pub struct BuildSettings {
    #[arg(long, env = BUILD_NAMESPACE_ENV, default_value = "humalect")]
    pub build_namespace: String,

    #[arg(long, env = BUILD_SERVICE_ACCOUNT_ENV, default_value = "humalect-sa")]
    pub build_service_account: String,

    #[arg(long, env = KANIKO_IMAGE_ENV, default_value = "gcr.io/kaniko-project/executor:latest")]
    pub kaniko_image: String,

    #[arg(long, env = GIT_IMAGE_ENV, default_value = "alpine/git")]
    pub git_image: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        let config = BuildConfig::default();
        Self {
            build_namespace: config.namespace,
            build_service_account: config.service_account_name,
            kaniko_image: config.kaniko_image,
            git_image: config.git_image,
        }
    }
}

impl From<BuildSettings> for BuildConfig {
    fn from(settings: BuildSettings) -> Self {
        Self {
            namespace: settings.build_namespace,
            service_account_name: settings.build_service_account,
            kaniko_image: settings.kaniko_image,
            git_image: settings.git_image,
        }
    }
}

/// Credential endpoints the controller was configured with.
#[derive(Args, Debug, Clone)]
pub struct ResolverSettings {
    #[arg(long, env = AZURE_MANAGEMENT_URL_ENV, default_value = "https://management.azure.com")]
    pub azure_management_url: String,

    #[arg(long, env = AZURE_VAULT_URL_TEMPLATE_ENV, default_value = "https://{vault}.vault.azure.net")]
    pub azure_vault_url_template: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        let endpoints = AzureEndpoints::default();
        Self {
            azure_management_url: endpoints.management_url,
            azure_vault_url_template: endpoints.vault_url_template,
        }
    }
}

impl From<ResolverSettings> for AzureEndpoints {
    fn from(settings: ResolverSettings) -> Self {
        Self {
            management_url: settings.azure_management_url,
            vault_url_template: settings.azure_vault_url_template,
        }
    }
}

impl AgentArgs {
    /// Controller settings the agent runs with: build placement and resolver endpoints.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            build: BuildConfig::from(self.build.clone()),
            azure: AzureEndpoints::from(self.resolver.clone()),
            ..ControllerConfig::default()
        }
    }
}

/// Blank input decodes to the type's default.
fn decode<T: DeserializeOwned + Default>(field: &'static str, raw: &str) -> Result<T, CredentialError> {
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(raw).map_err(|source| CredentialError::InvalidInput { field, source })
}

fn or_default(value: String, default: fn() -> String) -> String {
    if value.trim().is_empty() {
        default()
    } else {
        value
    }
}

impl AgentArgs {
    /// Decode every JSON-encoded flag into a typed request.
    pub fn into_spec(self) -> Result<BuildRequestSpec, CredentialError> {
        Ok(BuildRequestSpec {
            ecr_credentials: decode("ecrCredentials", &self.ecr_credentials)?,
            acr_credentials: decode("acrCredentials", &self.acr_credentials)?,
            docker_hub_credentials: decode("dockerHubCredentials", &self.docker_hub_credentials)?,
            aws_secret_credentials: decode("awsSecretCredentials", &self.aws_secret_credentials)?,
            azure_vault_credentials: decode("azureVaultCredentials", &self.azure_vault_credentials)?,
            docker_manifest: decode("dockerManifest", &self.docker_manifest)?,
            deployment_yaml_manifest: decode("deploymentYamlManifest", &self.deployment_yaml_manifest)?,
            service_yaml_manifest: decode("serviceYamlManifest", &self.service_yaml_manifest)?,
            ingress_yaml_manifest: decode("ingressYamlManifest", &self.ingress_yaml_manifest)?,
            build_secrets_config: decode("buildSecretsConfig", &self.build_secrets_config)?,
            application_secrets_config: decode(
                "applicationSecretsConfig",
                &self.application_secrets_config,
            )?,
            artifacts_registry_provider: self.artifacts_registry_provider,
            secrets_provider: self.secrets_provider,
            commit_id: self.commit_id,
            source_code_token: self.source_code_token,
            cloud_region: self.cloud_region,
            source_code_provider: self.source_code_provider,
            source_code_org_name: self.source_code_org_name,
            source_code_repository_name: self.source_code_repository_name,
            artifacts_repository_name: self.artifacts_repository_name,
            cloud_provider: self.cloud_provider,
            k8s_resources_identifier: self.k8s_resources_identifier,
            k8s_app_name: self.k8s_app_name,
            use_docker_from_code_flag: self.use_docker_from_code_flag,
            managed_by: or_default(self.managed_by, default_managed_by),
            namespace: or_default(self.namespace, default_namespace),
            deployment_id: self.deployment_id,
            pipeline_id: self.pipeline_id,
            webhook_endpoint: self.webhook_endpoint,
            webhook_data: self.webhook_data,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Render `spec` as build-agent flags, with `webhook_data` replacing the request's own payload.
pub fn agent_args(spec: &BuildRequestSpec, webhook_data: &str) -> Result<Vec<String>> {
    let flags: Vec<(&str, String)> = vec![
        ("artifacts-registry-provider", spec.artifacts_registry_provider.clone()),
        ("secrets-provider", spec.secrets_provider.clone()),
        ("ecr-credentials", encode(&spec.ecr_credentials)?),
        ("acr-credentials", encode(&spec.acr_credentials)?),
        ("docker-hub-credentials", encode(&spec.docker_hub_credentials)?),
        ("aws-secret-credentials", encode(&spec.aws_secret_credentials)?),
        ("azure-vault-credentials", encode(&spec.azure_vault_credentials)?),
        ("cloud-provider", spec.cloud_provider.clone()),
        ("cloud-region", spec.cloud_region.clone()),
        ("source-code-provider", spec.source_code_provider.clone()),
        ("source-code-org-name", spec.source_code_org_name.clone()),
        ("source-code-repository-name", spec.source_code_repository_name.clone()),
        ("source-code-token", spec.source_code_token.clone()),
        ("commit-id", spec.commit_id.clone()),
        ("docker-manifest", encode(&spec.docker_manifest)?),
        ("use-docker-from-code-flag", spec.use_docker_from_code_flag.to_string()),
        ("artifacts-repository-name", spec.artifacts_repository_name.clone()),
        ("k8s-app-name", spec.k8s_app_name.clone()),
        ("k8s-resources-identifier", spec.k8s_resources_identifier.clone()),
        ("deployment-yaml-manifest", encode(&spec.deployment_yaml_manifest)?),
        ("service-yaml-manifest", encode(&spec.service_yaml_manifest)?),
        ("ingress-yaml-manifest", encode(&spec.ingress_yaml_manifest)?),
        ("build-secrets-config", encode(&spec.build_secrets_config)?),
        ("application-secrets-config", encode(&spec.application_secrets_config)?),
        ("managed-by", spec.managed_by.clone()),
        ("namespace", spec.namespace.clone()),
        ("deployment-id", spec.deployment_id.clone()),
        ("pipeline-id", spec.pipeline_id.clone()),
        ("webhook-endpoint", spec.webhook_endpoint.clone()),
        ("webhook-data", webhook_data.to_string()),
    ];

    Ok(flags
        .into_iter()
        .map(|(flag, value)| format!("--{flag}={value}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{DockerHubCredentials, SecretConfig};
    use serde_json::json;
    use serial_test::serial;

    fn request() -> BuildRequestSpec {
        BuildRequestSpec {
            artifacts_registry_provider: "dockerhub".to_string(),
            docker_hub_credentials: DockerHubCredentials {
                username: "acme".to_string(),
                secret_name: "registry/dockerhub".to_string(),
            },
            commit_id: "9f8e7d6c5b4a".to_string(),
            source_code_token: "ghp_token=with=equals".to_string(),
            source_code_provider: "github".to_string(),
            source_code_org_name: "acme".to_string(),
            source_code_repository_name: "shop".to_string(),
            artifacts_repository_name: "shop".to_string(),
            cloud_provider: "aws".to_string(),
            k8s_app_name: "shop".to_string(),
            deployment_yaml_manifest: json!({"metadata": {"name": "shop"}, "spec": {"replicas": 2}}),
            docker_manifest: vec![
                "FROM node:20".to_string(),
                "COPY . .".to_string(),
                "CMD [\"npm\", \"start\"]".to_string(),
            ],
            build_secrets_config: vec![SecretConfig {
                name: "build-env".to_string(),
                content_type: None,
            }],
            managed_by: "acme".to_string(),
            namespace: "apps".to_string(),
            deployment_id: "dep-1".to_string(),
            pipeline_id: "pipe-1".to_string(),
            webhook_endpoint: "https://hooks.example.com".to_string(),
            webhook_data: "{}".to_string(),
            ..BuildRequestSpec::default()
        }
    }

    fn parse(args: Vec<String>) -> AgentArgs {
        AgentArgs::try_parse_from(std::iter::once("build-agent".to_string()).chain(args)).unwrap()
    }

    #[test]
    fn rendered_flags_parse_back_to_the_same_request() {
        let spec = request();
        let args = agent_args(&spec, r#"{"statusData":{"DEPLOYMENT_JOB_CREATED":true}}"#).unwrap();

        let decoded = parse(args).into_spec().unwrap();

        assert_eq!(decoded.webhook_data, r#"{"statusData":{"DEPLOYMENT_JOB_CREATED":true}}"#);
        let mut expected = spec;
        expected.webhook_data = decoded.webhook_data.clone();
        assert_eq!(
            serde_json::to_value(&decoded).unwrap(),
            serde_json::to_value(&expected).unwrap()
        );
    }

    #[test]
    fn every_flag_uses_the_equals_form() {
        let args = agent_args(&request(), "{}").unwrap();
        assert!(args.iter().all(|a| a.starts_with("--") && a.contains('=')));
        assert!(args.contains(&"--use-docker-from-code-flag=false".to_string()));
        assert!(args.contains(&"--commit-id=9f8e7d6c5b4a".to_string()));
    }

    #[test]
    fn missing_flags_take_defaults() {
        let spec = parse(vec![]).into_spec().unwrap();
        assert_eq!(spec.managed_by, "humalect");
        assert_eq!(spec.namespace, "default");
        assert!(spec.docker_manifest.is_empty());
        assert!(spec.deployment_yaml_manifest.is_null());
        assert!(!spec.use_docker_from_code_flag);
    }

    #[test]
    fn malformed_blob_names_the_field() {
        let args = parse(vec!["--acr-credentials={not json".to_string()]);
        let err = args.into_spec().unwrap_err();
        assert!(matches!(err, CredentialError::InvalidInput { field: "acrCredentials", .. }));
    }

    #[test]
    #[serial]
    fn build_settings_come_from_the_environment() {
        std::env::set_var(BUILD_NAMESPACE_ENV, "builds");
        std::env::remove_var(KANIKO_IMAGE_ENV);
        let config = BuildConfig::from(parse(vec![]).build);
        std::env::remove_var(BUILD_NAMESPACE_ENV);

        assert_eq!(config.namespace, "builds");
        assert_eq!(config.kaniko_image, "gcr.io/kaniko-project/executor:latest");
    }

    #[test]
    #[serial]
    fn resolver_endpoints_come_from_the_environment() {
        std::env::set_var(AZURE_MANAGEMENT_URL_ENV, "https://management.usgovcloudapi.net");
        std::env::remove_var(AZURE_VAULT_URL_TEMPLATE_ENV);
        let config = parse(vec![]).controller_config();
        std::env::remove_var(AZURE_MANAGEMENT_URL_ENV);

        assert_eq!(config.azure.management_url, "https://management.usgovcloudapi.net");
        assert_eq!(config.azure.vault_url_template, "https://{vault}.vault.azure.net");
    }

    #[test]
    fn boolean_flag_takes_explicit_value() {
        let args = parse(vec!["--use-docker-from-code-flag=true".to_string()]);
        assert!(args.use_docker_from_code_flag);
    }
}
