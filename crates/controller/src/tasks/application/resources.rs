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

use super::manifests::{parse_deployment, parse_ingress, parse_service};
use crate::credentials::{CredentialError, CredentialResolver, ProviderCredentials};
use crate::crds::ApplicationDeployment;
use crate::tasks::naming::{
    DeploymentIdentity, ResourceNaming, LABEL_IDENTIFIER, PART_OF_APPLICATION,
    RESOURCE_TYPE_APP_SECRET,
};
use crate::tasks::store::{upsert, ObjectStore};
use crate::tasks::types::{Error, Result};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Secret, Service},
    networking::v1::Ingress,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Api, Client, Resource, ResourceExt};
use notify::{Phase, StatusTracker};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Namespaced access to an application's own object and its children
#[derive(Clone)]
pub struct ApplicationStores {
    pub applications: Arc<dyn ObjectStore<ApplicationDeployment>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub ingresses: Arc<dyn ObjectStore<Ingress>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
}

impl ApplicationStores {
    #[must_use]
    pub fn namespaced(client: &Client, namespace: &str) -> Self {
        Self {
            applications: Arc::new(Api::<ApplicationDeployment>::namespaced(client.clone(), namespace)),
            deployments: Arc::new(Api::<Deployment>::namespaced(client.clone(), namespace)),
            services: Arc::new(Api::<Service>::namespaced(client.clone(), namespace)),
            ingresses: Arc::new(Api::<Ingress>::namespaced(client.clone(), namespace)),
            secrets: Arc::new(Api::<Secret>::namespaced(client.clone(), namespace)),
        }
    }
}

/// Desired children of one `ApplicationDeployment`, in apply order.
pub struct DesiredChildren {
    pub secrets: Vec<Secret>,
    pub deployment: Deployment,
    pub service: Service,
    pub ingress: Ingress,
}

pub struct ApplicationResourceManager<'a> {
    pub stores: &'a ApplicationStores,
    pub resolver: &'a CredentialResolver,
}

impl<'a> ApplicationResourceManager<'a> {
    pub fn new(stores: &'a ApplicationStores, resolver: &'a CredentialResolver) -> Self {
        Self { stores, resolver }
    }

    /// Build every desired child. Secrets that cannot be fetched are reported and skipped.
    pub async fn desired_children(
        &self,
        app: &ApplicationDeployment,
        tracker: &mut StatusTracker,
    ) -> Result<DesiredChildren> {
        let namespace = child_namespace(app);
        let default_name = ResourceNaming::sanitize_dns_label(&app.spec.k8s_resources_identifier);
        let default_name = if default_name.is_empty() {
            app.name_any()
        } else {
            default_name
        };

        let deployment = parse_deployment(&app.spec.deployment_yaml_manifest, &default_name, &namespace)?;
        let service = parse_service(&app.spec.service_yaml_manifest, &default_name, &namespace)?;
        let ingress = parse_ingress(&app.spec.ingress_yaml_manifest, &default_name, &namespace)?;

        let mut secrets = Vec::with_capacity(app.spec.application_secrets_config.len());
        if !app.spec.application_secrets_config.is_empty() {
            let credentials = secret_store_credentials(app);

            for config in &app.spec.application_secrets_config {
                match self.fetch_secret(&credentials, &config.name).await {
                    Ok(values) => {
                        secrets.push(self.runtime_secret(app, &namespace, &config.name, values.into_iter().collect()));
                    }
                    Err(e) => {
                        warn!(
                            secret = %config.name,
                            error = %e,
                            "Failed to fetch application secret, skipping it"
                        );
                        tracker.record(Phase::CreatedKubernetesResources, false).await;
                    }
                }
            }
        }

        Ok(DesiredChildren {
            secrets,
            deployment,
            service,
            ingress,
        })
    }

    async fn fetch_secret(
        &self,
        credentials: &ProviderCredentials,
        secret_name: &str,
    ) -> std::result::Result<HashMap<String, String>, CredentialError> {
        let provider = credentials.secrets_provider()?;
        self.resolver
            .resolve_secret(provider, secret_name, credentials)
            .await
    }

    fn runtime_secret(
        &self,
        app: &ApplicationDeployment,
        namespace: &str,
        secret_name: &str,
        string_data: BTreeMap<String, String>,
    ) -> Secret {
        let identity = DeploymentIdentity {
            managed_by: app.spec.managed_by.clone(),
            deployment_id: app.spec.deployment_id.clone(),
            pipeline_id: app.spec.pipeline_id.clone(),
            commit_id: String::new(),
        };
        let mut labels = identity.labels(PART_OF_APPLICATION, RESOURCE_TYPE_APP_SECRET);
        let identifier = ResourceNaming::sanitize_label_value(&app.spec.k8s_resources_identifier);
        if !identifier.is_empty() {
            labels.insert(LABEL_IDENTIFIER.to_string(), identifier);
        }

        Secret {
            metadata: ObjectMeta {
                name: Some(ResourceNaming::sanitize_secret_name(secret_name)),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            string_data: Some(string_data),
            ..Secret::default()
        }
    }

    /// Upsert every child in order, stopping at the first failure.
    pub async fn apply_children(&self, app: &ApplicationDeployment, children: DesiredChildren) -> Result<()> {
        let owner = controller_owner(app)?;

        for secret in children.secrets {
            upsert_child(self.stores.secrets.as_ref(), secret, &owner).await?;
        }
        upsert_child(self.stores.deployments.as_ref(), children.deployment, &owner).await?;
        upsert_child(self.stores.services.as_ref(), children.service, &owner).await?;
        upsert_child(self.stores.ingresses.as_ref(), children.ingress, &owner).await?;

        info!(application = %app.name_any(), "All children reconciled");
        Ok(())
    }
}

async fn upsert_child<K>(store: &dyn ObjectStore<K>, child: K, owner: &OwnerReference) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let name = child.name_any();
    let kind = K::kind(&()).to_string();
    match upsert(store, child, Some(owner.clone())).await {
        Ok(outcome) => {
            info!(kind = %kind, name = %name, ?outcome, "Child reconciled");
            Ok(())
        }
        Err(e) => {
            error!(kind = %kind, name = %name, error = %e, "Failed to reconcile child");
            Err(e)
        }
    }
}

/// Children live next to their owner; owner references cannot cross namespaces.
pub(crate) fn child_namespace(app: &ApplicationDeployment) -> String {
    app.namespace().unwrap_or_else(|| app.spec.namespace.clone())
}

fn controller_owner(app: &ApplicationDeployment) -> Result<OwnerReference> {
    app.controller_owner_ref(&()).ok_or(Error::MissingObjectKey)
}

pub(crate) fn secret_store_credentials(app: &ApplicationDeployment) -> ProviderCredentials {
    ProviderCredentials {
        aws_secrets: app.spec.aws_secret_credentials.clone(),
        azure_vault: app.spec.azure_vault_credentials.clone(),
        secrets_provider: app.spec.secrets_provider.clone(),
        cloud_provider: app.spec.cloud_provider.clone(),
        cloud_region: app.spec.cloud_region.clone(),
        ..ProviderCredentials::default()
    }
}
