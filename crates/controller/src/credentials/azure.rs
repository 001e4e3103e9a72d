//! Azure: ACR admin credentials and Key Vault secrets over the REST APIs

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    parse_string_map, require, CredentialBundle, CredentialError, CredentialResolver,
    ProviderCredentials, RegistryStrategy, SecretStore,
};
use crate::crds::{AcrCredentials, AzureVaultCredentials};

const ACR: &str = "acr";
const KEY_VAULT: &str = "azure-key-vault";

const ACR_API_VERSION: &str = "2019-05-01";
const KEY_VAULT_API_VERSION: &str = "7.3";

#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Admin `(username, password)` of a container registry.
    async fn acr_credentials(
        &self,
        acr: &AcrCredentials,
    ) -> Result<(String, String), CredentialError>;

    /// Raw string value of a Key Vault secret.
    async fn vault_secret(
        &self,
        vault: &AzureVaultCredentials,
        secret_name: &str,
    ) -> Result<String, CredentialError>;
}

#[derive(Deserialize)]
struct AcrListCredentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    passwords: Vec<AcrPassword>,
}

#[derive(Deserialize)]
struct AcrPassword {
    value: String,
}

#[derive(Deserialize)]
struct VaultSecretBundle {
    value: String,
}

/// [`AzureApi`] over `reqwest`
pub struct AzureRestClient {
    http: reqwest::Client,
    management_url: String,
    vault_url_template: String,
}

impl AzureRestClient {
    /// `vault_url_template` must contain `{vault}`, e.g. `https://{vault}.vault.azure.net`.
    #[must_use]
    pub fn new(management_url: &str, vault_url_template: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            management_url: management_url.trim_end_matches('/').to_string(),
            vault_url_template: vault_url_template.trim_end_matches('/').to_string(),
        }
    }

    fn list_credentials_url(&self, acr: &AcrCredentials) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ContainerRegistry/registries/{}/listCredentials?api-version={ACR_API_VERSION}",
            self.management_url,
            acr.subscription_id.trim(),
            acr.resource_group_name.trim(),
            acr.registry_name.trim(),
        )
    }

    fn secret_url(&self, vault_name: &str, secret_name: &str) -> String {
        format!(
            "{}/secrets/{secret_name}?api-version={KEY_VAULT_API_VERSION}",
            self.vault_url_template.replace("{vault}", vault_name)
        )
    }
}

fn transport_failure(provider: &'static str, err: &reqwest::Error) -> CredentialError {
    CredentialError::ProviderUnavailable {
        provider,
        message: err.to_string(),
    }
}

async fn decode_body<T: for<'de> Deserialize<'de>>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, CredentialError> {
    let status = response.status();
    if !status.is_success() {
        warn!(provider, status = %status, "Azure request rejected");
        return Err(CredentialError::ProviderRequestFailed {
            provider,
            status: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| transport_failure(provider, &e))?;
    serde_json::from_slice(&body).map_err(|e| CredentialError::MalformedResponse {
        provider,
        message: e.to_string(),
    })
}

#[async_trait]
impl AzureApi for AzureRestClient {
    async fn acr_credentials(
        &self,
        acr: &AcrCredentials,
    ) -> Result<(String, String), CredentialError> {
        let url = self.list_credentials_url(acr);
        debug!(registry = %acr.registry_name, "Requesting ACR admin credentials");

        let response = self
            .http
            .post(url)
            .bearer_auth(acr.management_scope_token.trim())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await
            .map_err(|e| transport_failure(ACR, &e))?;

        let listed: AcrListCredentials = decode_body(ACR, response).await?;
        let password = listed
            .passwords
            .into_iter()
            .next()
            .map(|p| p.value)
            .ok_or_else(|| CredentialError::MalformedResponse {
                provider: ACR,
                message: "no passwords returned".to_string(),
            })?;

        if listed.username.is_empty() {
            return Err(CredentialError::MalformedResponse {
                provider: ACR,
                message: "no username returned".to_string(),
            });
        }

        Ok((listed.username, password))
    }

    async fn vault_secret(
        &self,
        vault: &AzureVaultCredentials,
        secret_name: &str,
    ) -> Result<String, CredentialError> {
        let url = self.secret_url(vault.name.trim(), secret_name);
        debug!(vault = %vault.name, secret = %secret_name, "Reading Key Vault secret");

        let response = self
            .http
            .get(url)
            .bearer_auth(vault.token.trim())
            .send()
            .await
            .map_err(|e| transport_failure(KEY_VAULT, &e))?;

        let bundle: VaultSecretBundle = decode_body(KEY_VAULT, response).await?;
        Ok(bundle.value)
    }
}

pub struct AcrStrategy {
    api: Arc<dyn AzureApi>,
}

impl AcrStrategy {
    #[must_use]
    pub fn new(api: Arc<dyn AzureApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RegistryStrategy for AcrStrategy {
    async fn resolve(
        &self,
        credentials: &ProviderCredentials,
        _fallback_region: &str,
        _resolver: &CredentialResolver,
    ) -> Result<CredentialBundle, CredentialError> {
        let acr = &credentials.acr;
        require(ACR, "managementScopeToken", &acr.management_scope_token)?;
        require(ACR, "subscriptionId", &acr.subscription_id)?;
        require(ACR, "resourceGroupName", &acr.resource_group_name)?;
        let registry = require(ACR, "registryName", &acr.registry_name)?;

        let (username, password) = self.api.acr_credentials(acr).await?;

        Ok(CredentialBundle {
            username,
            password,
            server: acr_server(registry),
            auth: None,
        })
    }
}

#[must_use]
pub fn acr_server(registry_name: &str) -> String {
    format!("{registry_name}.azurecr.io")
}

/// Key Vault secrets hold a JSON object encoded as the secret's string value.
pub struct AzureVaultStore {
    api: Arc<dyn AzureApi>,
}

impl AzureVaultStore {
    #[must_use]
    pub fn new(api: Arc<dyn AzureApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SecretStore for AzureVaultStore {
    async fn fetch(
        &self,
        secret_name: &str,
        credentials: &ProviderCredentials,
    ) -> Result<HashMap<String, String>, CredentialError> {
        let vault = &credentials.azure_vault;
        require(KEY_VAULT, "token", &vault.token)?;
        require(KEY_VAULT, "name", &vault.name)?;
        let secret_name = require(KEY_VAULT, "secretName", secret_name)?;

        let raw = self.api.vault_secret(vault, secret_name).await?;
        parse_string_map(KEY_VAULT, &raw)
    }
}
