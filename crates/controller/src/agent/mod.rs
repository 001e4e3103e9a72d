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

//! The build agent: builds one commit's image and hands the result to the
//! `ApplicationDeployment` loop.
//!
//! Each step reports its phase before the next one starts. The first failing
//! step halts the run; build artifacts created so far are removed either way.

pub mod args;
pub mod build_job;
pub mod watch;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ObjectMeta;
use kube::{Api, Client};
use notify::{mark_status, Phase, StatusTracker};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::credentials::{CredentialResolver, ProviderCredentials, RegistryProvider};
use crate::crds::{ApplicationDeployment, ApplicationDeploymentSpec, BuildRequestSpec};
use crate::tasks::application::manifests::rewrite_image_pull_secrets;
use crate::tasks::build::controller::identity_of;
use crate::tasks::config::BuildConfig;
use crate::tasks::naming::{
    DeploymentIdentity, ResourceNaming, ARTIFACT_SECRET_TAG, BUILD_JOB_TAG, DOCKERFILE_CONFIG_TAG,
    LABEL_APP, PART_OF_APPLICATION, PART_OF_BUILD,
};
use crate::tasks::store::{upsert, ObjectStore};
use crate::tasks::types::{Error, Result, APPLICATION_FINALIZER_NAME};

pub use args::{agent_args, AgentArgs};
pub use build_job::{synthesize_build_job, BuildJobRecord};
pub use watch::{JobMonitor, JobOutcome, KubeJobMonitor};

const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const DOCKERFILE_KEY: &str = "Dockerfile";
const DOCKERFILE_LINE_SEPARATOR: &str = "\r\n";

/// How one agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Image built and the application handed over.
    Succeeded,
    /// The build job ran and failed.
    BuildFailed,
    /// A step before or after the build failed.
    Halted,
}

/// Cluster access for one agent run
#[derive(Clone)]
pub struct AgentCluster {
    /// Build namespace
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    /// Build namespace
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    /// Build namespace
    pub jobs: Arc<dyn ObjectStore<Job>>,
    /// Target namespace of the request
    pub applications: Arc<dyn ObjectStore<ApplicationDeployment>>,
    pub monitor: Arc<dyn JobMonitor>,
}

impl AgentCluster {
    #[must_use]
    pub fn from_client(client: &Client, build_namespace: &str, target_namespace: &str) -> Self {
        let jobs: Api<Job> = Api::namespaced(client.clone(), build_namespace);
        Self {
            secrets: Arc::new(Api::<Secret>::namespaced(client.clone(), build_namespace)),
            config_maps: Arc::new(Api::<ConfigMap>::namespaced(client.clone(), build_namespace)),
            jobs: Arc::new(jobs.clone()),
            applications: Arc::new(Api::<ApplicationDeployment>::namespaced(
                client.clone(),
                target_namespace,
            )),
            monitor: Arc::new(KubeJobMonitor::new(jobs)),
        }
    }
}

/// Credential blobs of a request in resolver form.
#[must_use]
pub fn request_credentials(request: &BuildRequestSpec) -> ProviderCredentials {
    ProviderCredentials {
        ecr: request.ecr_credentials.clone(),
        acr: request.acr_credentials.clone(),
        docker_hub: request.docker_hub_credentials.clone(),
        aws_secrets: request.aws_secret_credentials.clone(),
        azure_vault: request.azure_vault_credentials.clone(),
        secrets_provider: request.secrets_provider.clone(),
        cloud_provider: request.cloud_provider.clone(),
        cloud_region: request.cloud_region.clone(),
    }
}

fn check_required(request: &BuildRequestSpec) -> Result<()> {
    for (field, value) in [
        ("commitId", &request.commit_id),
        ("sourceCodeRepositoryName", &request.source_code_repository_name),
        ("artifactsRepositoryName", &request.artifacts_repository_name),
        ("deploymentId", &request.deployment_id),
    ] {
        if value.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{field} is required")));
        }
    }
    if !request.use_docker_from_code_flag && request.docker_manifest.is_empty() {
        return Err(Error::InvalidInput(
            "dockerManifest is empty and useDockerFromCodeFlag is false".to_string(),
        ));
    }
    Ok(())
}

/// Create `object`, or take over the one already stored under its name.
async fn create_or_adopt<K>(store: &dyn ObjectStore<K>, object: &K, name: &str) -> Result<()>
where
    K: Clone + Send + Sync + 'static,
{
    match store.create_object(object).await {
        Ok(_) => {
            info!(name, "Created build object");
            Ok(())
        }
        Err(Error::KubeError(kube::Error::Api(response))) if response.code == 409 => {
            info!(name, "Build object already exists, reusing it");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Sequences one build for one request
pub struct BuildAgent {
    cluster: AgentCluster,
    resolver: CredentialResolver,
    config: BuildConfig,
}

impl BuildAgent {
    #[must_use]
    pub fn new(cluster: AgentCluster, resolver: CredentialResolver, config: BuildConfig) -> Self {
        Self {
            cluster,
            resolver,
            config,
        }
    }

    #[instrument(skip_all, fields(deployment_id = %request.deployment_id, commit_id = %request.commit_id))]
    pub async fn run(&self, request: &BuildRequestSpec, tracker: &mut StatusTracker) -> BuildOutcome {
        let identity = identity_of(request);
        let mut record = BuildJobRecord {
            job_name: identity.name(BUILD_JOB_TAG),
            ..BuildJobRecord::default()
        };

        if let Err(e) = self.prepare_and_submit(request, &identity, &mut record).await {
            error!(error = %e, "Failed to submit build job");
            tracker.record(Phase::CreatedKanikoJob, false).await;
            self.cleanup(&record).await;
            return BuildOutcome::Halted;
        }
        tracker.record(Phase::CreatedKanikoJob, true).await;

        match self.cluster.monitor.wait_for_completion(&record.job_name).await {
            Ok(JobOutcome::Succeeded) => {
                info!(job = %record.job_name, "Build job succeeded");
                tracker.record(Phase::KanikoJobExecuted, true).await;
            }
            Ok(JobOutcome::Failed) => {
                warn!(job = %record.job_name, "Build job failed");
                tracker.record(Phase::KanikoJobExecuted, false).await;
                self.cleanup(&record).await;
                return BuildOutcome::BuildFailed;
            }
            Err(e) => {
                error!(job = %record.job_name, error = %e, "Lost track of build job");
                tracker.record(Phase::KanikoJobExecuted, false).await;
                self.cleanup(&record).await;
                return BuildOutcome::Halted;
            }
        }

        let handed_over = self
            .upsert_application(request, &identity, &record, tracker.payload())
            .await;
        self.cleanup(&record).await;

        match handed_over {
            Ok(name) => {
                info!(application = %name, "Application handed over");
                tracker.record(Phase::CreatedApplicationCrd, true).await;
                BuildOutcome::Succeeded
            }
            Err(e) => {
                error!(error = %e, "Failed to create application");
                tracker.record(Phase::CreatedApplicationCrd, false).await;
                BuildOutcome::Halted
            }
        }
    }

    /// Stage the registry secret and Dockerfile, then submit the build job.
    async fn prepare_and_submit(
        &self,
        request: &BuildRequestSpec,
        identity: &DeploymentIdentity,
        record: &mut BuildJobRecord,
    ) -> Result<()> {
        check_required(request)?;
        let credentials = request_credentials(request);

        record.artifact_secret_name = self.create_artifact_secret(request, identity, &credentials).await?;
        record.dockerfile_config_name = self.create_dockerfile_config(request, identity).await?;
        let build_secrets = self.resolve_build_secrets(request, &credentials).await?;

        let job = synthesize_build_job(request, record, &build_secrets, &self.config)?;
        create_or_adopt(self.cluster.jobs.as_ref(), &job, &record.job_name).await
    }

    async fn create_artifact_secret(
        &self,
        request: &BuildRequestSpec,
        identity: &DeploymentIdentity,
        credentials: &ProviderCredentials,
    ) -> Result<String> {
        let provider: RegistryProvider = request.artifacts_registry_provider.parse()?;
        let bundle = self
            .resolver
            .resolve_registry_credentials(provider, credentials, &request.cloud_region)
            .await?;

        let name = identity.name(ARTIFACT_SECRET_TAG);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(identity.labels(PART_OF_BUILD, "artifact-secret")),
                ..ObjectMeta::default()
            },
            type_: Some(DOCKER_CONFIG_SECRET_TYPE.to_string()),
            string_data: Some(BTreeMap::from([(
                DOCKER_CONFIG_KEY.to_string(),
                bundle.docker_config_json(),
            )])),
            ..Secret::default()
        };

        create_or_adopt(self.cluster.secrets.as_ref(), &secret, &name).await?;
        Ok(name)
    }

    async fn create_dockerfile_config(
        &self,
        request: &BuildRequestSpec,
        identity: &DeploymentIdentity,
    ) -> Result<String> {
        if request.use_docker_from_code_flag {
            return Ok(String::new());
        }

        let name = identity.name(DOCKERFILE_CONFIG_TAG);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                labels: Some(identity.labels(PART_OF_BUILD, "dockerfile-config")),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                DOCKERFILE_KEY.to_string(),
                request.docker_manifest.join(DOCKERFILE_LINE_SEPARATOR),
            )])),
            ..ConfigMap::default()
        };

        create_or_adopt(self.cluster.config_maps.as_ref(), &config_map, &name).await?;
        Ok(name)
    }

    /// Every configured build secret merged into one map; later entries win.
    async fn resolve_build_secrets(
        &self,
        request: &BuildRequestSpec,
        credentials: &ProviderCredentials,
    ) -> Result<BTreeMap<String, String>> {
        let mut merged = BTreeMap::new();
        if request.build_secrets_config.is_empty() {
            return Ok(merged);
        }

        let provider = credentials.secrets_provider()?;
        for config in &request.build_secrets_config {
            let values = self
                .resolver
                .resolve_secret(provider, &config.name, credentials)
                .await?;
            merged.extend(values);
        }
        Ok(merged)
    }

    async fn upsert_application(
        &self,
        request: &BuildRequestSpec,
        identity: &DeploymentIdentity,
        record: &BuildJobRecord,
        payload: &str,
    ) -> Result<String> {
        let mut deployment_manifest = request.deployment_yaml_manifest.clone();
        rewrite_image_pull_secrets(&mut deployment_manifest, &record.artifact_secret_name)?;

        let name = application_name(request);
        let mut labels = identity.labels(PART_OF_APPLICATION, "application");
        labels.insert(LABEL_APP.to_string(), ResourceNaming::sanitize_label_value(&name));

        let webhook_data = mark_status(payload, Phase::CreatedApplicationCrd.as_str(), true);

        let mut application = ApplicationDeployment::new(
            &name,
            ApplicationDeploymentSpec {
                secrets_provider: request.secrets_provider.clone(),
                aws_secret_credentials: request.aws_secret_credentials.clone(),
                azure_vault_credentials: request.azure_vault_credentials.clone(),
                cloud_region: request.cloud_region.clone(),
                cloud_provider: request.cloud_provider.clone(),
                k8s_resources_identifier: request.k8s_resources_identifier.clone(),
                deployment_yaml_manifest: deployment_manifest,
                service_yaml_manifest: request.service_yaml_manifest.clone(),
                ingress_yaml_manifest: request.ingress_yaml_manifest.clone(),
                build_secrets_config: request.build_secrets_config.clone(),
                application_secrets_config: request.application_secrets_config.clone(),
                managed_by: request.managed_by.clone(),
                namespace: request.namespace.clone(),
                deployment_id: request.deployment_id.clone(),
                pipeline_id: request.pipeline_id.clone(),
                webhook_endpoint: request.webhook_endpoint.clone(),
                webhook_data,
            },
        );
        application.metadata.namespace = Some(request.namespace.clone());
        application.metadata.labels = Some(labels);
        application.metadata.finalizers = Some(vec![APPLICATION_FINALIZER_NAME.to_string()]);

        upsert(self.cluster.applications.as_ref(), application, None).await?;
        Ok(name)
    }

    /// Delete the staged secret and Dockerfile. Failures are logged only.
    async fn cleanup(&self, record: &BuildJobRecord) {
        if !record.artifact_secret_name.is_empty() {
            if let Err(e) = self
                .cluster
                .secrets
                .delete_foreground(&record.artifact_secret_name)
                .await
            {
                warn!(secret = %record.artifact_secret_name, error = %e, "Failed to delete artifact secret");
            }
        }
        if !record.dockerfile_config_name.is_empty() {
            if let Err(e) = self
                .cluster
                .config_maps
                .delete_foreground(&record.dockerfile_config_name)
                .await
            {
                warn!(config_map = %record.dockerfile_config_name, error = %e, "Failed to delete Dockerfile config");
            }
        }
    }
}

/// `k8sAppName`, else the resource identifier, as a DNS label.
#[must_use]
pub fn application_name(request: &BuildRequestSpec) -> String {
    let name = ResourceNaming::sanitize_dns_label(&request.k8s_app_name);
    if name.is_empty() {
        ResourceNaming::sanitize_dns_label(&request.k8s_resources_identifier)
    } else {
        name
    }
}
