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

use crate::crds::DeploymentStatus;
use crate::tasks::types::Result;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::{debug, info};

pub const PHASE_JOB_SUBMITTED: &str = "JobSubmitted";
pub const PHASE_DEPLOYED: &str = "Deployed";
pub const PHASE_FAILED: &str = "Failed";

/// True when `status` already records `phase` for the object's current generation.
#[must_use]
pub fn is_current(status: Option<&DeploymentStatus>, generation: Option<i64>, phase: &str) -> bool {
    status.is_some_and(|s| s.phase == phase && s.observed_generation.is_some() && s.observed_generation == generation)
}

/// Merge-patch the status subresource, skipping writes that would change nothing.
pub(crate) async fn update_phase<K>(
    api: &Api<K>,
    object: &K,
    current: Option<&DeploymentStatus>,
    phase: &str,
    message: &str,
) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let name = object.name_any();
    let generation = object.meta().generation;

    if let Some(status) = current {
        if status.phase == phase
            && status.message.as_deref() == Some(message)
            && status.observed_generation == generation
        {
            debug!(name = %name, phase, "Status unchanged, skipping update");
            return Ok(());
        }
    }

    let status_patch = json!({
        "status": {
            "phase": phase,
            "message": message,
            "lastUpdate": chrono::Utc::now().to_rfc3339(),
            "observedGeneration": generation,
        }
    });

    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status_patch))
        .await?;
    info!(name = %name, phase, "Updated status");
    Ok(())
}
