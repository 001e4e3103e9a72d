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

use crate::credentials::CredentialResolver;
use crate::crds::{ApplicationDeployment, BuildRequest};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub mod application;
pub mod build;
pub mod config;
pub mod finalizer;
pub mod naming;
pub mod status;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

// Re-export commonly used items
pub use application::reconcile_application;
pub use build::reconcile_build_request;
pub use config::ControllerConfig;
pub use types::{Error, Result};

// Context is crate-internal only
use types::Context;

/// Load the mounted configuration, falling back to defaults when the file is unreadable.
pub fn load_config(config_path: &str) -> Result<ControllerConfig> {
    let config = match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            debug!(path = config_path, "Loaded controller configuration");
            cfg
        }
        Err(e) => {
            warn!("Failed to load configuration, using defaults: {}", e);
            ControllerConfig::default()
        }
    };

    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }
    Ok(config)
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the `BuildRequest` and `ApplicationDeployment` control loops until either stops.
#[instrument(skip(client, config, resolver), fields(watch_namespace = ?config.watch_namespace))]
pub async fn run_deploy_controller(
    client: Client,
    config: ControllerConfig,
    resolver: CredentialResolver,
) -> Result<()> {
    info!("Starting deployment controllers");

    let context = Arc::new(Context {
        client: client.clone(),
        config: Arc::new(config),
        resolver,
    });

    let build_handle = tokio::spawn({
        let context = context.clone();
        async move { run_build_request_controller(context).await }
    });

    let application_handle = tokio::spawn({
        let context = context.clone();
        async move { run_application_controller(context).await }
    });

    match tokio::try_join!(build_handle, application_handle) {
        Ok((build_result, application_result)) => {
            if let Err(e) = build_result {
                error!("BuildRequest controller failed: {:?}", e);
            }
            if let Err(e) = application_result {
                error!("ApplicationDeployment controller failed: {:?}", e);
            }
        }
        Err(e) => {
            error!("Controller task join error: {:?}", e);
        }
    }

    info!("Deployment controllers shutting down");
    Ok(())
}

async fn run_build_request_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting BuildRequest controller");

    let api: Api<BuildRequest> =
        scoped_api(&context.client, context.config.watch_namespace.as_deref());

    Controller::new(api, Config::default().any_semantic())
        .run(reconcile_build_request, error_policy_build, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("build_request_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(object) => info!(resource = ?object, "BuildRequest reconciliation successful"),
                    Err(err) => error!(error = ?err, "BuildRequest reconciliation error"),
                }
            }
            .instrument(span)
        })
        .await;

    info!("BuildRequest controller shutting down");
    Ok(())
}

async fn run_application_controller(context: Arc<Context>) -> Result<()> {
    info!("Starting ApplicationDeployment controller");

    let namespace = context.config.watch_namespace.as_deref();
    let api: Api<ApplicationDeployment> = scoped_api(&context.client, namespace);
    let deployments: Api<Deployment> = scoped_api(&context.client, namespace);
    let services: Api<Service> = scoped_api(&context.client, namespace);
    let ingresses: Api<Ingress> = scoped_api(&context.client, namespace);
    let secrets: Api<Secret> = scoped_api(&context.client, namespace);

    let watcher_config = Config::default().any_semantic();

    Controller::new(api, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(ingresses, watcher_config.clone())
        .owns(secrets, watcher_config)
        .run(reconcile_application, error_policy_application, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("application_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok(object) => {
                        info!(resource = ?object, "ApplicationDeployment reconciliation successful");
                    }
                    Err(err) => error!(error = ?err, "ApplicationDeployment reconciliation error"),
                }
            }
            .instrument(span)
        })
        .await;

    info!("ApplicationDeployment controller shutting down");
    Ok(())
}

fn requeue_after_error(ctx: &Context) -> Action {
    Action::requeue(Duration::from_secs(ctx.config.reconcile.error_requeue_seconds))
}

#[allow(clippy::needless_pass_by_value)]
fn error_policy_build(request: Arc<BuildRequest>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(build_request = %request.name_any(), error = ?err, "BuildRequest reconciliation failed, requeueing");
    requeue_after_error(&ctx)
}

#[allow(clippy::needless_pass_by_value)]
fn error_policy_application(
    app: Arc<ApplicationDeployment>,
    err: &Error,
    ctx: Arc<Context>,
) -> Action {
    error!(application = %app.name_any(), error = ?err, "ApplicationDeployment reconciliation failed, requeueing");
    requeue_after_error(&ctx)
}
