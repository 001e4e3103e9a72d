//! `ApplicationDeployment` Custom Resource Definition for runtime application state

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    default_managed_by, default_namespace, opaque_object, AwsSecretCredentials,
    AzureVaultCredentials, DeploymentStatus, SecretConfig,
};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "deployments.platform",
    version = "v1",
    kind = "ApplicationDeployment",
    shortname = "appdeploy"
)]
#[kube(namespaced)]
#[kube(status = "DeploymentStatus")]
#[kube(printcolumn = r#"{"name":"Deployment","type":"string","jsonPath":".spec.deploymentId"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDeploymentSpec {
    #[serde(default)]
    pub secrets_provider: String,

    #[serde(default)]
    pub aws_secret_credentials: AwsSecretCredentials,

    #[serde(default)]
    pub azure_vault_credentials: AzureVaultCredentials,

    #[serde(default)]
    pub cloud_region: String,

    #[serde(default)]
    pub cloud_provider: String,

    #[serde(default)]
    pub k8s_resources_identifier: String,

    /// Deployment manifest; its pull-secret list already points at the build's registry secret
    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub deployment_yaml_manifest: serde_json::Value,

    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub service_yaml_manifest: serde_json::Value,

    #[serde(default)]
    #[schemars(schema_with = "opaque_object")]
    pub ingress_yaml_manifest: serde_json::Value,

    #[serde(default)]
    pub build_secrets_config: Vec<SecretConfig>,

    /// Each entry becomes one runtime `Secret`
    #[serde(default)]
    pub application_secrets_config: Vec<SecretConfig>,

    #[serde(default = "default_managed_by")]
    pub managed_by: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub deployment_id: String,

    #[serde(default)]
    pub pipeline_id: String,

    #[serde(default)]
    pub webhook_endpoint: String,

    #[serde(default)]
    pub webhook_data: String,
}
