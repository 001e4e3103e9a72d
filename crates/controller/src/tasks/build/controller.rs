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

use crate::agent::args::agent_args;
use crate::crds::{BuildRequest, BuildRequestSpec};
use crate::tasks::config::{
    ControllerConfig, AZURE_MANAGEMENT_URL_ENV, AZURE_VAULT_URL_TEMPLATE_ENV, BUILD_NAMESPACE_ENV,
    BUILD_SERVICE_ACCOUNT_ENV, GIT_IMAGE_ENV, KANIKO_IMAGE_ENV,
};
use crate::tasks::finalizer::{handle_finalizer, FinalizerStep};
use crate::tasks::naming::{DeploymentIdentity, ResourceNaming, DEPLOY_JOB_TAG, LABEL_APP, PART_OF_BUILD};
use crate::tasks::status::{update_phase, PHASE_FAILED, PHASE_JOB_SUBMITTED};
use crate::tasks::store::ObjectStore;
use crate::tasks::types::{Context, Error, Result, BUILD_REQUEST_FINALIZER_NAME};
use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec},
};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use notify::{mark_status, Phase, StatusReporter, StatusTracker};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const AGENT_CONTAINER_NAME: &str = "build-agent";
const DEPLOY_JOB_RESOURCE_TYPE: &str = "deploy-job";

/// Cluster access for the `BuildRequest` loop
#[derive(Clone)]
pub struct BuildStores {
    pub requests: Arc<dyn ObjectStore<BuildRequest>>,
    /// Jobs in the build namespace
    pub jobs: Arc<dyn ObjectStore<Job>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildRequestPass {
    Finalized { released: bool },
    /// A deploy job with this name already exists
    JobExists(String),
    JobCreated(String),
    Rejected(String),
}

#[derive(Debug)]
pub struct BuildPassReport {
    pub pass: BuildRequestPass,
    pub webhook_data: String,
}

#[instrument(skip(request, ctx), fields(build_request = %request.name_any(), namespace = ?request.namespace()))]
pub async fn reconcile_build_request(request: Arc<BuildRequest>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = request.namespace().ok_or(Error::MissingObjectKey)?;
    let requests: Api<BuildRequest> = Api::namespaced(ctx.client.clone(), &namespace);
    let stores = BuildStores {
        requests: Arc::new(requests.clone()),
        jobs: Arc::new(Api::<Job>::namespaced(ctx.client.clone(), &ctx.config.build.namespace)),
    };
    let reporter = StatusReporter::for_endpoint(&request.spec.webhook_endpoint);

    let report = reconcile_build_request_with(&request, &stores, &ctx.config, reporter).await?;

    match report.pass {
        BuildRequestPass::Finalized { .. } => {}
        BuildRequestPass::JobExists(job_name) | BuildRequestPass::JobCreated(job_name) => {
            update_phase(
                &requests,
                &request,
                request.status.as_ref(),
                PHASE_JOB_SUBMITTED,
                &format!("Build agent job {job_name} submitted"),
            )
            .await?;
        }
        BuildRequestPass::Rejected(message) => {
            update_phase(&requests, &request, request.status.as_ref(), PHASE_FAILED, &message).await?;
        }
    }

    Ok(Action::await_change())
}

/// One pass: ensure exactly one deploy job exists for the request.
pub async fn reconcile_build_request_with(
    request: &BuildRequest,
    stores: &BuildStores,
    config: &ControllerConfig,
    reporter: StatusReporter,
) -> Result<BuildPassReport> {
    let name = request.name_any();

    let request = match handle_finalizer(stores.requests.as_ref(), request, BUILD_REQUEST_FINALIZER_NAME).await? {
        FinalizerStep::Deleting { released } => {
            info!(build_request = %name, released, "BuildRequest is being deleted");
            return Ok(BuildPassReport {
                pass: BuildRequestPass::Finalized { released },
                webhook_data: request.spec.webhook_data.clone(),
            });
        }
        FinalizerStep::Apply(request) => request,
    };

    let spec = &request.spec;
    let identity = identity_of(spec);
    let job_name = identity.name(DEPLOY_JOB_TAG);

    if stores.jobs.fetch(&job_name).await?.is_some() {
        info!(job = %job_name, "Deploy job already exists, skipping creation");
        return Ok(BuildPassReport {
            pass: BuildRequestPass::JobExists(job_name),
            webhook_data: spec.webhook_data.clone(),
        });
    }

    let mut tracker = StatusTracker::with_reporter(reporter, &spec.webhook_data);
    let accepted = accepted_payload(&spec.webhook_data);

    let args = match agent_args(spec, &accepted) {
        Ok(args) => args,
        Err(e) => {
            warn!(build_request = %name, error = %e, "Failed to render build agent arguments");
            tracker.record(Phase::DeploymentJobCreated, false).await;
            return Ok(BuildPassReport {
                pass: BuildRequestPass::Rejected(e.to_string()),
                webhook_data: tracker.payload().to_string(),
            });
        }
    };

    let job = deploy_job(&identity, &job_name, args, config);
    match stores.jobs.create_object(&job).await {
        Ok(_) => {
            info!(job = %job_name, namespace = %config.build.namespace, "Created deploy job");
            tracker.record(Phase::DeploymentJobCreated, true).await;
            Ok(BuildPassReport {
                pass: BuildRequestPass::JobCreated(job_name),
                webhook_data: tracker.payload().to_string(),
            })
        }
        Err(Error::KubeError(kube::Error::Api(response))) if response.code == 409 => {
            info!(job = %job_name, "Deploy job was created concurrently");
            Ok(BuildPassReport {
                pass: BuildRequestPass::JobExists(job_name),
                webhook_data: spec.webhook_data.clone(),
            })
        }
        Err(e) => {
            error!(job = %job_name, error = %e, "Failed to create deploy job");
            tracker.record(Phase::DeploymentJobCreated, false).await;
            Err(e)
        }
    }
}

pub(crate) fn identity_of(spec: &BuildRequestSpec) -> DeploymentIdentity {
    DeploymentIdentity {
        managed_by: spec.managed_by.clone(),
        deployment_id: spec.deployment_id.clone(),
        pipeline_id: spec.pipeline_id.clone(),
        commit_id: spec.commit_id.clone(),
    }
}

/// Payload handed to the agent, already marked as accepted.
fn accepted_payload(webhook_data: &str) -> String {
    mark_status(webhook_data, Phase::DeploymentJobCreated.as_str(), true)
}

/// Settings handed to the agent, read back by `BuildSettings` and `ResolverSettings`.
fn agent_env(config: &ControllerConfig) -> Vec<EnvVar> {
    let build = &config.build;
    [
        (BUILD_NAMESPACE_ENV, &build.namespace),
        (BUILD_SERVICE_ACCOUNT_ENV, &build.service_account_name),
        (KANIKO_IMAGE_ENV, &build.kaniko_image),
        (GIT_IMAGE_ENV, &build.git_image),
        (AZURE_MANAGEMENT_URL_ENV, &config.azure.management_url),
        (AZURE_VAULT_URL_TEMPLATE_ENV, &config.azure.vault_url_template),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.clone()),
        ..EnvVar::default()
    })
    .collect()
}

/// The job that runs the build agent for one request.
pub fn deploy_job(identity: &DeploymentIdentity, job_name: &str, args: Vec<String>, config: &ControllerConfig) -> Job {
    let mut labels = identity.labels(PART_OF_BUILD, DEPLOY_JOB_RESOURCE_TYPE);
    labels.insert(LABEL_APP.to_string(), ResourceNaming::sanitize_label_value(job_name));

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(config.build.namespace.clone()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: AGENT_CONTAINER_NAME.to_string(),
                        image: Some(config.agent_image()),
                        image_pull_policy: Some("Always".to_string()),
                        args: Some(args),
                        env: Some(agent_env(config)),
                        ..Container::default()
                    }],
                    restart_policy: Some("Never".to_string()),
                    service_account_name: Some(config.build.service_account_name.clone()),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        status: None,
    }
}
