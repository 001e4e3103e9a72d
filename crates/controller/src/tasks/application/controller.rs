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

use super::resources::{ApplicationResourceManager, ApplicationStores};
use crate::credentials::CredentialResolver;
use crate::crds::ApplicationDeployment;
use crate::tasks::finalizer::{handle_finalizer, FinalizerStep};
use crate::tasks::status::{is_current, update_phase, PHASE_DEPLOYED, PHASE_FAILED};
use crate::tasks::types::{Context, Error, Result, APPLICATION_FINALIZER_NAME};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use notify::{Phase, StatusReporter, StatusTracker};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of one pass over an `ApplicationDeployment`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationPass {
    /// Deletion in progress; `released` when our finalizer was stripped
    Finalized { released: bool },
    /// Children re-converged for a generation that was already reported
    UpToDate,
    Applied,
    /// The manifests or inputs cannot be turned into children
    Rejected(String),
}

#[derive(Debug)]
pub struct PassReport {
    pub pass: ApplicationPass,
    /// Status payload after every phase report of this pass
    pub webhook_data: String,
}

#[instrument(skip(app, ctx), fields(application = %app.name_any(), namespace = ?app.namespace()))]
pub async fn reconcile_application(app: Arc<ApplicationDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let namespace = app.namespace().ok_or(Error::MissingObjectKey)?;
    let stores = ApplicationStores::namespaced(&ctx.client, &namespace);
    let reporter = StatusReporter::for_endpoint(&app.spec.webhook_endpoint);

    let report = reconcile_application_with(&app, &stores, &ctx.resolver, reporter).await?;
    let applications: Api<ApplicationDeployment> = Api::namespaced(ctx.client.clone(), &namespace);

    match report.pass {
        ApplicationPass::Finalized { .. } | ApplicationPass::UpToDate => {}
        ApplicationPass::Applied => {
            update_phase(
                &applications,
                &app,
                app.status.as_ref(),
                PHASE_DEPLOYED,
                "Application resources reconciled",
            )
            .await?;
        }
        ApplicationPass::Rejected(message) => {
            update_phase(&applications, &app, app.status.as_ref(), PHASE_FAILED, &message).await?;
        }
    }

    Ok(Action::await_change())
}

/// One reconciliation pass against explicit stores.
///
/// Input errors are reported and returned as [`ApplicationPass::Rejected`];
/// cluster errors are reported and returned as `Err` for the caller to retry.
pub async fn reconcile_application_with(
    app: &ApplicationDeployment,
    stores: &ApplicationStores,
    resolver: &CredentialResolver,
    reporter: StatusReporter,
) -> Result<PassReport> {
    let name = app.name_any();

    let app = match handle_finalizer(stores.applications.as_ref(), app, APPLICATION_FINALIZER_NAME).await? {
        FinalizerStep::Deleting { released } => {
            info!(application = %name, released, "Application is being deleted");
            return Ok(PassReport {
                pass: ApplicationPass::Finalized { released },
                webhook_data: app.spec.webhook_data.clone(),
            });
        }
        FinalizerStep::Apply(app) => app,
    };

    let already_reported = is_current(app.status.as_ref(), app.metadata.generation, PHASE_DEPLOYED);
    let reporter = if already_reported {
        debug!(application = %name, "Generation already reported, re-converging children silently");
        StatusReporter::disabled()
    } else {
        reporter
    };

    let mut tracker = StatusTracker::with_reporter(reporter, &app.spec.webhook_data);
    let manager = ApplicationResourceManager::new(stores, resolver);

    let children = match manager.desired_children(&app, &mut tracker).await {
        Ok(children) => children,
        Err(e) if e.is_input_error() => {
            warn!(application = %name, error = %e, "Rejecting application spec");
            tracker.record(Phase::CreatedKubernetesResources, false).await;
            return Ok(PassReport {
                pass: ApplicationPass::Rejected(e.to_string()),
                webhook_data: tracker.payload().to_string(),
            });
        }
        Err(e) => {
            tracker.record(Phase::CreatedKubernetesResources, false).await;
            return Err(e);
        }
    };

    if let Err(e) = manager.apply_children(&app, children).await {
        tracker.record(Phase::CreatedKubernetesResources, false).await;
        return Err(e);
    }

    if already_reported {
        return Ok(PassReport {
            pass: ApplicationPass::UpToDate,
            webhook_data: app.spec.webhook_data.clone(),
        });
    }

    tracker.record(Phase::CreatedKubernetesResources, true).await;
    tracker.record(Phase::DeploymentCompleted, true).await;
    info!(application = %name, "Application reconciled");

    Ok(PassReport {
        pass: ApplicationPass::Applied,
        webhook_data: tracker.payload().to_string(),
    })
}
