//! Registry and secret-store credential resolution
//!
//! Every supported provider maps to exactly one strategy. Callers ask for a
//! [`CredentialBundle`] (registries) or a flat key/value map (secret stores)
//! and never see provider-specific wire formats.

pub mod aws;
pub mod azure;
pub mod dockerhub;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crds::{
    AcrCredentials, AwsSecretCredentials, AzureVaultCredentials, DockerHubCredentials,
    EcrCredentials,
};
use crate::tasks::config::ControllerConfig;

pub use self::aws::{AwsAccess, AwsApi, AwsSdkClient, AwsSecretStore, EcrStrategy};
pub use self::azure::{AcrStrategy, AzureApi, AzureRestClient, AzureVaultStore};
pub use self::dockerhub::DockerHubStrategy;

/// Credential resolution failures. All of them are terminal for the calling phase.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("missing credentials for {provider}: {field} is empty")]
    MissingCredentials {
        provider: &'static str,
        field: &'static str,
    },

    #[error("{provider} request failed with status {status}")]
    ProviderRequestFailed { provider: &'static str, status: u16 },

    #[error("malformed {provider} response: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },

    #[error("unknown registry provider '{0}'")]
    UnknownRegistryProvider(String),

    #[error("unknown secrets provider '{0}'")]
    UnknownSecretsProvider(String),

    #[error("invalid {field}: {source}")]
    InvalidInput {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{provider} unavailable: {message}")]
    ProviderUnavailable {
        provider: &'static str,
        message: String,
    },
}

/// Supported artifact registries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryProvider {
    Ecr,
    Acr,
    DockerHub,
}

impl RegistryProvider {
    pub const ALL: [Self; 3] = [Self::Ecr, Self::Acr, Self::DockerHub];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ecr => "ecr",
            Self::Acr => "acr",
            Self::DockerHub => "dockerhub",
        }
    }
}

impl FromStr for RegistryProvider {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecr" => Ok(Self::Ecr),
            "acr" => Ok(Self::Acr),
            "dockerhub" => Ok(Self::DockerHub),
            _ => Err(CredentialError::UnknownRegistryProvider(s.to_string())),
        }
    }
}

impl fmt::Display for RegistryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported secret stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretsProvider {
    Aws,
    Azure,
}

impl SecretsProvider {
    pub const ALL: [Self; 2] = [Self::Aws, Self::Azure];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
        }
    }
}

impl FromStr for SecretsProvider {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            _ => Err(CredentialError::UnknownSecretsProvider(s.to_string())),
        }
    }
}

impl fmt::Display for SecretsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider credential blobs of one request, already decoded.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub ecr: EcrCredentials,
    pub acr: AcrCredentials,
    pub docker_hub: DockerHubCredentials,
    pub aws_secrets: AwsSecretCredentials,
    pub azure_vault: AzureVaultCredentials,
    /// Raw secrets-provider selector, may be empty
    pub secrets_provider: String,
    pub cloud_provider: String,
    pub cloud_region: String,
}

impl ProviderCredentials {
    /// The configured secret store, falling back to the cloud provider.
    pub fn secrets_provider(&self) -> Result<SecretsProvider, CredentialError> {
        if self.secrets_provider.trim().is_empty() {
            self.cloud_provider.parse()
        } else {
            self.secrets_provider.parse()
        }
    }
}

/// Normalized registry login
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub username: String,
    pub password: String,
    pub server: String,
    /// Stored base64 `user:password` written verbatim as the registry `auth`
    pub auth: Option<String>,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server", &self.server)
            .field("auth", &self.auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialBundle {
    /// `.dockerconfigjson` document with a single host entry.
    ///
    /// A stored `auth` is written alone; otherwise it is derived from the login.
    #[must_use]
    pub fn docker_config_json(&self) -> String {
        let entry = match &self.auth {
            Some(auth) => json!({ "auth": auth }),
            None => json!({
                "username": self.username,
                "password": self.password,
                "auth": STANDARD.encode(format!("{}:{}", self.username, self.password)),
            }),
        };
        json!({ "auths": { self.server.as_str(): entry } }).to_string()
    }
}

/// Exchanges provider credentials for a registry login.
#[async_trait]
pub trait RegistryStrategy: Send + Sync {
    async fn resolve(
        &self,
        credentials: &ProviderCredentials,
        fallback_region: &str,
        resolver: &CredentialResolver,
    ) -> Result<CredentialBundle, CredentialError>;
}

/// Looks up a named secret as a flat key/value map.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(
        &self,
        secret_name: &str,
        credentials: &ProviderCredentials,
    ) -> Result<HashMap<String, String>, CredentialError>;
}

/// Provider-keyed strategy map.
#[derive(Clone, Default)]
pub struct CredentialResolver {
    registries: HashMap<RegistryProvider, Arc<dyn RegistryStrategy>>,
    secret_stores: HashMap<SecretsProvider, Arc<dyn SecretStore>>,
}

impl CredentialResolver {
    /// Empty resolver; every lookup fails until strategies are registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver wired to the real cloud APIs.
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        let aws: Arc<dyn AwsApi> = Arc::new(AwsSdkClient);
        let azure: Arc<dyn AzureApi> = Arc::new(AzureRestClient::new(
            &config.azure.management_url,
            &config.azure.vault_url_template,
        ));

        Self::new()
            .with_registry(RegistryProvider::Ecr, Arc::new(EcrStrategy::new(aws.clone())))
            .with_registry(RegistryProvider::Acr, Arc::new(AcrStrategy::new(azure.clone())))
            .with_registry(RegistryProvider::DockerHub, Arc::new(DockerHubStrategy))
            .with_secret_store(SecretsProvider::Aws, Arc::new(AwsSecretStore::new(aws)))
            .with_secret_store(SecretsProvider::Azure, Arc::new(AzureVaultStore::new(azure)))
    }

    #[must_use]
    pub fn with_registry(
        mut self,
        provider: RegistryProvider,
        strategy: Arc<dyn RegistryStrategy>,
    ) -> Self {
        self.registries.insert(provider, strategy);
        self
    }

    #[must_use]
    pub fn with_secret_store(mut self, provider: SecretsProvider, store: Arc<dyn SecretStore>) -> Self {
        self.secret_stores.insert(provider, store);
        self
    }

    #[instrument(skip(self, credentials), fields(provider = %provider))]
    pub async fn resolve_registry_credentials(
        &self,
        provider: RegistryProvider,
        credentials: &ProviderCredentials,
        fallback_region: &str,
    ) -> Result<CredentialBundle, CredentialError> {
        let strategy = self
            .registries
            .get(&provider)
            .ok_or_else(|| CredentialError::UnknownRegistryProvider(provider.to_string()))?;

        let bundle = strategy.resolve(credentials, fallback_region, self).await?;
        debug!(server = %bundle.server, "Resolved registry credentials");
        Ok(bundle)
    }

    #[instrument(skip(self, credentials), fields(provider = %provider))]
    pub async fn resolve_secret(
        &self,
        provider: SecretsProvider,
        secret_name: &str,
        credentials: &ProviderCredentials,
    ) -> Result<HashMap<String, String>, CredentialError> {
        let store = self
            .secret_stores
            .get(&provider)
            .ok_or_else(|| CredentialError::UnknownSecretsProvider(provider.to_string()))?;

        let values = store.fetch(secret_name, credentials).await?;
        debug!(keys = values.len(), "Resolved secret");
        Ok(values)
    }
}

/// Decode a JSON object whose values are all strings.
pub(crate) fn parse_string_map(
    provider: &'static str,
    raw: &str,
) -> Result<HashMap<String, String>, CredentialError> {
    let decoded: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| CredentialError::MalformedResponse {
            provider,
            message: e.to_string(),
        })?;

    decoded
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            other => Err(CredentialError::MalformedResponse {
                provider,
                message: format!("value of '{key}' is {other}, expected a string"),
            }),
        })
        .collect()
}

pub(crate) fn require<'a>(
    provider: &'static str,
    field: &'static str,
    value: &'a str,
) -> Result<&'a str, CredentialError> {
    let value = value.trim();
    if value.is_empty() {
        Err(CredentialError::MissingCredentials { provider, field })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticRegistry;

    #[async_trait]
    impl RegistryStrategy for StaticRegistry {
        async fn resolve(
            &self,
            _credentials: &ProviderCredentials,
            _fallback_region: &str,
            _resolver: &CredentialResolver,
        ) -> Result<CredentialBundle, CredentialError> {
            Ok(CredentialBundle {
                username: "u".to_string(),
                password: "p".to_string(),
                server: "registry.local".to_string(),
                auth: None,
            })
        }
    }

    #[test]
    fn registry_selectors_parse() {
        for provider in RegistryProvider::ALL {
            assert_eq!(provider.as_str().parse::<RegistryProvider>().unwrap(), provider);
        }
        assert_eq!("DockerHub".parse::<RegistryProvider>().unwrap(), RegistryProvider::DockerHub);
        assert!(matches!(
            "quay".parse::<RegistryProvider>(),
            Err(CredentialError::UnknownRegistryProvider(s)) if s == "quay"
        ));
    }

    #[test]
    fn secrets_selector_falls_back_to_cloud_provider() {
        let credentials = ProviderCredentials {
            cloud_provider: "azure".to_string(),
            ..ProviderCredentials::default()
        };
        assert_eq!(credentials.secrets_provider().unwrap(), SecretsProvider::Azure);

        let explicit = ProviderCredentials {
            secrets_provider: "aws".to_string(),
            cloud_provider: "azure".to_string(),
            ..ProviderCredentials::default()
        };
        assert_eq!(explicit.secrets_provider().unwrap(), SecretsProvider::Aws);

        let neither = ProviderCredentials {
            cloud_provider: "civo".to_string(),
            ..ProviderCredentials::default()
        };
        assert!(matches!(
            neither.secrets_provider(),
            Err(CredentialError::UnknownSecretsProvider(_))
        ));
    }

    #[test]
    fn docker_config_has_single_host() {
        let bundle = CredentialBundle {
            username: "AWS".to_string(),
            password: "secret".to_string(),
            server: "1234.dkr.ecr.us-east-1.amazonaws.com".to_string(),
            auth: None,
        };
        let doc: serde_json::Value = serde_json::from_str(&bundle.docker_config_json()).unwrap();
        let auths = doc["auths"].as_object().unwrap();

        assert_eq!(auths.len(), 1);
        let entry = &auths["1234.dkr.ecr.us-east-1.amazonaws.com"];
        assert_eq!(entry["username"], "AWS");
        assert_eq!(entry["auth"], STANDARD.encode("AWS:secret"));
    }

    #[test]
    fn bundle_debug_hides_password() {
        let bundle = CredentialBundle {
            username: "u".to_string(),
            password: "hunter2".to_string(),
            server: "s".to_string(),
            auth: Some("dTpodW50ZXIy".to_string()),
        };
        let printed = format!("{bundle:?}");
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("dTpodW50ZXIy"));
    }

    #[test]
    fn stored_auth_is_written_verbatim() {
        let stored = STANDARD.encode("acme:dckr_pat_x");
        let bundle = CredentialBundle {
            username: "acme".to_string(),
            password: String::new(),
            server: "https://index.docker.io/v1/".to_string(),
            auth: Some(stored.clone()),
        };
        let doc: serde_json::Value = serde_json::from_str(&bundle.docker_config_json()).unwrap();
        let entry = doc["auths"]["https://index.docker.io/v1/"].as_object().unwrap();

        assert_eq!(entry["auth"], stored.as_str());
        assert_eq!(entry.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_provider_is_unknown() {
        let resolver = CredentialResolver::new();
        let err = resolver
            .resolve_registry_credentials(RegistryProvider::Acr, &ProviderCredentials::default(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::UnknownRegistryProvider(p) if p == "acr"));
    }

    #[tokio::test]
    async fn dispatches_to_registered_strategy() {
        let resolver =
            CredentialResolver::new().with_registry(RegistryProvider::Ecr, Arc::new(StaticRegistry));
        let bundle = resolver
            .resolve_registry_credentials(RegistryProvider::Ecr, &ProviderCredentials::default(), "")
            .await
            .unwrap();
        assert_eq!(bundle.server, "registry.local");
    }

    #[test]
    fn string_map_rejects_non_string_values() {
        assert_eq!(
            parse_string_map("aws", r#"{"A":"1"}"#).unwrap().get("A").map(String::as_str),
            Some("1")
        );
        assert!(matches!(
            parse_string_map("aws", r#"{"A":1}"#),
            Err(CredentialError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_string_map("aws", "nope"),
            Err(CredentialError::MalformedResponse { .. })
        ));
    }
}
