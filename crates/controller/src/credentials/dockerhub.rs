//! Docker Hub: username from the request, stored registry `auth` from the configured secret store

use async_trait::async_trait;

use super::{
    require, CredentialBundle, CredentialError, CredentialResolver, ProviderCredentials,
    RegistryStrategy,
};

const DOCKER_HUB: &str = "dockerhub";

/// Key of the base64 `user:token` auth inside the referenced secret
pub const DOCKER_HUB_TOKEN_KEY: &str = "dockerhub";

pub const DOCKER_HUB_SERVER: &str = "https://index.docker.io/v1/";

pub struct DockerHubStrategy;

#[async_trait]
impl RegistryStrategy for DockerHubStrategy {
    async fn resolve(
        &self,
        credentials: &ProviderCredentials,
        _fallback_region: &str,
        resolver: &CredentialResolver,
    ) -> Result<CredentialBundle, CredentialError> {
        let hub = &credentials.docker_hub;
        let username = require(DOCKER_HUB, "username", &hub.username)?;
        let secret_name = require(DOCKER_HUB, "secretName", &hub.secret_name)?;

        let store = credentials.secrets_provider()?;
        let mut values = resolver.resolve_secret(store, secret_name, credentials).await?;
        let token = values
            .remove(DOCKER_HUB_TOKEN_KEY)
            .filter(|token| !token.is_empty())
            .ok_or(CredentialError::MissingCredentials {
                provider: DOCKER_HUB,
                field: "dockerhub token",
            })?;

        Ok(CredentialBundle {
            username: username.to_string(),
            password: String::new(),
            server: DOCKER_HUB_SERVER.to_string(),
            auth: Some(token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{RegistryProvider, SecretStore, SecretsProvider};
    use crate::crds::DockerHubCredentials;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingStore {
        values: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SecretStore for RecordingStore {
        async fn fetch(
            &self,
            secret_name: &str,
            _credentials: &ProviderCredentials,
        ) -> Result<HashMap<String, String>, CredentialError> {
            self.requested.lock().unwrap().push(secret_name.to_string());
            Ok(self.values.clone())
        }
    }

    fn hub_credentials(secrets_provider: &str, cloud_provider: &str) -> ProviderCredentials {
        ProviderCredentials {
            docker_hub: DockerHubCredentials {
                username: "acme".to_string(),
                secret_name: "registry/dockerhub".to_string(),
            },
            secrets_provider: secrets_provider.to_string(),
            cloud_provider: cloud_provider.to_string(),
            ..ProviderCredentials::default()
        }
    }

    fn resolver_with(provider: SecretsProvider, store: Arc<RecordingStore>) -> CredentialResolver {
        CredentialResolver::new()
            .with_registry(RegistryProvider::DockerHub, Arc::new(DockerHubStrategy))
            .with_secret_store(provider, store)
    }

    #[tokio::test]
    async fn token_comes_from_secret_store() {
        let store = Arc::new(RecordingStore {
            values: HashMap::from([("dockerhub".to_string(), "hub-token".to_string())]),
            ..RecordingStore::default()
        });
        let resolver = resolver_with(SecretsProvider::Aws, store.clone());

        let bundle = resolver
            .resolve_registry_credentials(RegistryProvider::DockerHub, &hub_credentials("aws", ""), "")
            .await
            .unwrap();

        assert_eq!(bundle.username, "acme");
        assert_eq!(bundle.auth.as_deref(), Some("hub-token"));
        assert_eq!(bundle.server, DOCKER_HUB_SERVER);
        assert_eq!(*store.requested.lock().unwrap(), vec!["registry/dockerhub".to_string()]);
    }

    #[tokio::test]
    async fn secret_store_falls_back_to_cloud_provider() {
        let store = Arc::new(RecordingStore {
            values: HashMap::from([("dockerhub".to_string(), "t".to_string())]),
            ..RecordingStore::default()
        });
        let resolver = resolver_with(SecretsProvider::Azure, store);

        let bundle = resolver
            .resolve_registry_credentials(RegistryProvider::DockerHub, &hub_credentials("", "azure"), "")
            .await
            .unwrap();
        assert_eq!(bundle.auth.as_deref(), Some("t"));
    }

    #[tokio::test]
    async fn missing_token_key_is_missing_credentials() {
        let store = Arc::new(RecordingStore::default());
        let resolver = resolver_with(SecretsProvider::Aws, store);

        let err = resolver
            .resolve_registry_credentials(RegistryProvider::DockerHub, &hub_credentials("aws", ""), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MissingCredentials { provider: "dockerhub", .. }));
    }
}
