//! Types shared by the `BuildRequest` and `ApplicationDeployment` resources

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Explicit keys for the ECR registry. Empty keys fall back to the ambient identity.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EcrCredentials {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`
    #[serde(default)]
    pub registry_url: String,
    #[serde(default)]
    pub region: String,
}

/// Docker Hub account; the token lives in the configured secret store
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DockerHubCredentials {
    #[serde(default)]
    pub username: String,
    /// Secret-store entry holding the token under the `dockerhub` key
    #[serde(default)]
    pub secret_name: String,
}

/// Azure Container Registry coordinates plus a management-scope bearer token
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcrCredentials {
    #[serde(default)]
    pub management_scope_token: String,
    #[serde(default)]
    pub registry_name: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub resource_group_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretCredentials {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureVaultCredentials {
    /// Bearer token scoped to the Key Vault data plane
    #[serde(default)]
    pub token: String,
    /// Vault name, the `{name}` in `{name}.vault.azure.net`
    #[serde(default)]
    pub name: String,
}

/// Reference to a secret-store entry
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Progress record written through the status subresource
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub phase: String,
    pub message: Option<String>,
    pub last_update: Option<String>,
    /// `metadata.generation` the phase was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Schema for embedded manifests, which are carried as opaque objects.
pub(crate) fn opaque_object(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

pub(crate) fn default_managed_by() -> String {
    "humalect".to_string()
}

pub(crate) fn default_namespace() -> String {
    "default".to_string()
}
