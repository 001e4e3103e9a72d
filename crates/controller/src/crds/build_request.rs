//! `BuildRequest` Custom Resource Definition for image build and deploy attempts

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    default_managed_by, default_namespace, opaque_object, AcrCredentials, AwsSecretCredentials,
    AzureVaultCredentials, DeploymentStatus, DockerHubCredentials, EcrCredentials, SecretConfig,
};

/// `BuildRequest` CRD: build `commitId` into an image and deploy it
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "deployments.platform", version = "v1", kind = "BuildRequest")]
#[kube(namespaced)]
#[kube(status = "DeploymentStatus")]
#[kube(printcolumn = r#"{"name":"Registry","type":"string","jsonPath":".spec.artifactsRegistryProvider"}"#)]
#[kube(printcolumn = r#"{"name":"Commit","type":"string","jsonPath":".spec.commitId"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequestSpec {
    /// Target registry: `ecr`, `acr` or `dockerhub`
    #[serde(default)]
    pub artifacts_registry_provider: String,

    /// Secret store: `aws` or `azure`; empty falls back to `cloudProvider`
    #[serde(default)]
    pub secrets_provider: String,

    #[serde(default)]
    pub ecr_credentials: EcrCredentials,

    #[serde(default)]
    pub docker_hub_credentials: DockerHubCredentials,

    #[serde(default)]
    pub acr_credentials: AcrCredentials,

    #[serde(default)]
    pub aws_secret_credentials: AwsSecretCredentials,

    #[serde(default)]
    pub azure_vault_credentials: AzureVaultCredentials,

    #[serde(default)]
    pub commit_id: String,

    #[serde(default)]
    pub source_code_token: String,

    #[serde(default)]
    pub cloud_region: String,

    /// `github`, `gitlab` or `bitbucket`
    #[serde(default)]
    pub source_code_provider: String,

    #[serde(default)]
    pub source_code_org_name: String,

    #[serde(default)]
    pub source_code_repository_name: String,

    #[serde(default)]
    pub artifacts_repository_name: String,

    #[serde(default)]
    pub cloud_provider: String,

    #[serde(default)]
    pub k8s_resources_identifier: String,

    /// Name of the `ApplicationDeployment` to create after the build
    #[serde(default)]
    pub k8s_app_name: String,

    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub deployment_yaml_manifest: serde_json::Value,

    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub service_yaml_manifest: serde_json::Value,

    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub ingress_yaml_manifest: serde_json::Value,

    /// Inline Dockerfile, one entry per line
    #[serde(default)]
    pub docker_manifest: Vec<String>,

    /// Build with the Dockerfile committed to the repository
    #[serde(default)]
    pub use_docker_from_code_flag: bool,

    #[serde(default)]
    pub build_secrets_config: Vec<SecretConfig>,

    #[serde(default)]
    pub application_secrets_config: Vec<SecretConfig>,

    #[serde(default = "default_managed_by")]
    pub managed_by: String,

    /// Namespace the application is deployed into
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub deployment_id: String,

    #[serde(default)]
    pub pipeline_id: String,

    #[serde(default)]
    pub webhook_endpoint: String,

    /// Opaque accumulated status payload
    #[serde(default)]
    pub webhook_data: String,
}
