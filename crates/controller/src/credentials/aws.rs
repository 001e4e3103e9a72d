//! AWS: ECR authorization tokens and Secrets Manager lookups

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::config::http::HttpResponse;
use aws_sdk_ecr::config::Credentials;
use aws_sdk_ecr::error::{DisplayErrorContext, SdkError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{
    parse_string_map, require, CredentialBundle, CredentialError, CredentialResolver,
    ProviderCredentials, RegistryStrategy, SecretStore,
};

const ECR: &str = "ecr";
const SECRETS_MANAGER: &str = "aws-secrets-manager";

/// ECR logins always use this username
pub const ECR_USERNAME: &str = "AWS";

/// Identity used for one AWS call. Keys left empty use the ambient provider chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AwsAccess {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl AwsAccess {
    #[must_use]
    pub fn new(access_key: &str, secret_key: &str, region: &str) -> Self {
        Self {
            access_key: access_key.trim().to_string(),
            secret_key: secret_key.trim().to_string(),
            region: region.trim().to_string(),
        }
    }

    fn has_static_keys(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AwsApi: Send + Sync {
    /// Raw base64 `user:password` token from `GetAuthorizationToken`.
    async fn ecr_authorization_token(&self, access: &AwsAccess) -> Result<String, CredentialError>;

    /// `SecretString` of a Secrets Manager entry.
    async fn secret_string(
        &self,
        access: &AwsAccess,
        secret_name: &str,
    ) -> Result<String, CredentialError>;
}

/// [`AwsApi`] backed by the AWS SDK for Rust
pub struct AwsSdkClient;

impl AwsSdkClient {
    async fn sdk_config(access: &AwsAccess) -> aws_config::SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if !access.region.is_empty() {
            loader = loader.region(Region::new(access.region.clone()));
        }

        if access.has_static_keys() {
            loader = loader.credentials_provider(Credentials::new(
                access.access_key.clone(),
                access.secret_key.clone(),
                None,
                None,
                "deployment-request",
            ));
        } else {
            debug!("No explicit AWS keys, using ambient credentials");
        }

        loader.load().await
    }
}

fn sdk_failure<E>(provider: &'static str, err: &SdkError<E, HttpResponse>) -> CredentialError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(service) => CredentialError::ProviderRequestFailed {
            provider,
            status: service.raw().status().as_u16(),
        },
        _ => CredentialError::ProviderUnavailable {
            provider,
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

#[async_trait]
impl AwsApi for AwsSdkClient {
    async fn ecr_authorization_token(&self, access: &AwsAccess) -> Result<String, CredentialError> {
        let config = Self::sdk_config(access).await;
        let client = aws_sdk_ecr::Client::new(&config);

        let output = client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| sdk_failure(ECR, &e))?;

        output
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .map(str::to_string)
            .ok_or_else(|| CredentialError::MalformedResponse {
                provider: ECR,
                message: "no authorization data returned".to_string(),
            })
    }

    async fn secret_string(
        &self,
        access: &AwsAccess,
        secret_name: &str,
    ) -> Result<String, CredentialError> {
        let config = Self::sdk_config(access).await;
        let client = aws_sdk_secretsmanager::Client::new(&config);

        let output = client
            .get_secret_value()
            .secret_id(secret_name)
            .send()
            .await
            .map_err(|e| sdk_failure(SECRETS_MANAGER, &e))?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| CredentialError::MalformedResponse {
                provider: SECRETS_MANAGER,
                message: format!("secret '{secret_name}' has no string value"),
            })
    }
}

/// Split a decoded ECR token into its password half.
pub(crate) fn decode_ecr_token(token: &str) -> Result<String, CredentialError> {
    let malformed = |message: String| CredentialError::MalformedResponse {
        provider: ECR,
        message,
    };

    let decoded = STANDARD
        .decode(token.trim())
        .map_err(|e| malformed(format!("token is not base64: {e}")))?;
    let decoded = String::from_utf8(decoded).map_err(|e| malformed(e.to_string()))?;

    decoded
        .split_once(':')
        .map(|(_, password)| password.to_string())
        .filter(|password| !password.is_empty())
        .ok_or_else(|| malformed("token is not in user:password form".to_string()))
}

pub struct EcrStrategy {
    api: Arc<dyn AwsApi>,
}

impl EcrStrategy {
    #[must_use]
    pub fn new(api: Arc<dyn AwsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RegistryStrategy for EcrStrategy {
    async fn resolve(
        &self,
        credentials: &ProviderCredentials,
        fallback_region: &str,
        _resolver: &CredentialResolver,
    ) -> Result<CredentialBundle, CredentialError> {
        let ecr = &credentials.ecr;
        let server = require(ECR, "registryUrl", &ecr.registry_url)?;
        let region = if ecr.region.trim().is_empty() {
            fallback_region
        } else {
            &ecr.region
        };

        let access = AwsAccess::new(&ecr.access_key, &ecr.secret_key, region);
        let token = self.api.ecr_authorization_token(&access).await?;

        Ok(CredentialBundle {
            username: ECR_USERNAME.to_string(),
            password: decode_ecr_token(&token)?,
            server: server.to_string(),
            auth: None,
        })
    }
}

/// Secrets Manager entries are JSON objects stored as the secret string.
pub struct AwsSecretStore {
    api: Arc<dyn AwsApi>,
}

impl AwsSecretStore {
    #[must_use]
    pub fn new(api: Arc<dyn AwsApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn fetch(
        &self,
        secret_name: &str,
        credentials: &ProviderCredentials,
    ) -> Result<HashMap<String, String>, CredentialError> {
        let secret_name = require(SECRETS_MANAGER, "secretName", secret_name)?;
        let aws = &credentials.aws_secrets;
        let region = if aws.region.trim().is_empty() {
            &credentials.cloud_region
        } else {
            &aws.region
        };

        let access = AwsAccess::new(&aws.access_key, &aws.secret_key, region);
        let raw = self.api.secret_string(&access, secret_name).await?;
        parse_string_map(SECRETS_MANAGER, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{AwsSecretCredentials, EcrCredentials};
    use mockall::predicate::{always, eq};

    fn ecr_credentials() -> ProviderCredentials {
        ProviderCredentials {
            ecr: EcrCredentials {
                access_key: "AKIA".to_string(),
                secret_key: "shh".to_string(),
                registry_url: "1234.dkr.ecr.eu-west-1.amazonaws.com".to_string(),
                region: String::new(),
            },
            ..ProviderCredentials::default()
        }
    }

    #[tokio::test]
    async fn ecr_uses_explicit_keys_and_fallback_region() {
        let mut api = MockAwsApi::new();
        api.expect_ecr_authorization_token()
            .with(eq(AwsAccess::new("AKIA", "shh", "eu-west-1")))
            .times(1)
            .returning(|_| Ok(STANDARD.encode("AWS:registry-password")));

        let strategy = EcrStrategy::new(Arc::new(api));
        let bundle = strategy
            .resolve(&ecr_credentials(), "eu-west-1", &CredentialResolver::new())
            .await
            .unwrap();

        assert_eq!(bundle.username, "AWS");
        assert_eq!(bundle.password, "registry-password");
        assert_eq!(bundle.server, "1234.dkr.ecr.eu-west-1.amazonaws.com");
    }

    #[tokio::test]
    async fn ecr_without_keys_uses_ambient_identity() {
        let mut api = MockAwsApi::new();
        api.expect_ecr_authorization_token()
            .withf(|access| !access.has_static_keys() && access.region == "us-east-2")
            .returning(|_| Ok(STANDARD.encode("AWS:pw")));

        let mut credentials = ecr_credentials();
        credentials.ecr.access_key.clear();
        credentials.ecr.secret_key.clear();
        credentials.ecr.region = "us-east-2".to_string();

        let strategy = EcrStrategy::new(Arc::new(api));
        let bundle = strategy
            .resolve(&credentials, "eu-west-1", &CredentialResolver::new())
            .await
            .unwrap();
        assert_eq!(bundle.password, "pw");
    }

    #[tokio::test]
    async fn ecr_requires_registry_url() {
        let api = MockAwsApi::new();
        let mut credentials = ecr_credentials();
        credentials.ecr.registry_url.clear();

        let err = EcrStrategy::new(Arc::new(api))
            .resolve(&credentials, "eu-west-1", &CredentialResolver::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::MissingCredentials { field: "registryUrl", .. }
        ));
    }

    #[tokio::test]
    async fn ecr_provider_errors_propagate() {
        let mut api = MockAwsApi::new();
        api.expect_ecr_authorization_token().returning(|_| {
            Err(CredentialError::ProviderRequestFailed {
                provider: "ecr",
                status: 403,
            })
        });

        let err = EcrStrategy::new(Arc::new(api))
            .resolve(&ecr_credentials(), "eu-west-1", &CredentialResolver::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ProviderRequestFailed { status: 403, .. }));
    }

    #[test]
    fn ecr_token_must_be_user_password() {
        assert_eq!(decode_ecr_token(&STANDARD.encode("AWS:a:b")).unwrap(), "a:b");
        assert!(matches!(
            decode_ecr_token(&STANDARD.encode("no-separator")),
            Err(CredentialError::MalformedResponse { .. })
        ));
        assert!(matches!(
            decode_ecr_token("%%%"),
            Err(CredentialError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn secrets_manager_returns_map_and_falls_back_to_cloud_region() {
        let mut api = MockAwsApi::new();
        api.expect_secret_string()
            .with(eq(AwsAccess::new("", "", "ap-south-1")), eq("app/prod"))
            .times(1)
            .returning(|_, _| Ok(r#"{"DATABASE_URL":"postgres://db","dockerhub":"tok"}"#.to_string()));

        let credentials = ProviderCredentials {
            aws_secrets: AwsSecretCredentials::default(),
            cloud_region: "ap-south-1".to_string(),
            ..ProviderCredentials::default()
        };

        let values = AwsSecretStore::new(Arc::new(api))
            .fetch("app/prod", &credentials)
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["DATABASE_URL"], "postgres://db");
    }

    #[tokio::test]
    async fn secrets_manager_rejects_non_json_secret() {
        let mut api = MockAwsApi::new();
        api.expect_secret_string()
            .with(always(), always())
            .returning(|_, _| Ok("plain-text".to_string()));

        let err = AwsSecretStore::new(Arc::new(api))
            .fetch("app/prod", &ProviderCredentials::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MalformedResponse { .. }));
    }
}
