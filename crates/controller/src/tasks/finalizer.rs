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

//! Finalizer bookkeeping shared by both control loops

use kube::{Resource, ResourceExt};
use tracing::info;

use super::store::ObjectStore;
use super::types::{Error, Result};

/// What the caller should do after finalizer handling.
#[derive(Debug)]
pub enum FinalizerStep<K> {
    /// The object is being deleted. `released` is true when our marker was removed.
    Deleting { released: bool },
    /// Reconcile this (possibly updated) copy of the object.
    Apply(K),
}

/// Strip `finalizer` from an object under deletion, or add it to a live one.
///
/// Only the object itself is written; children are left to garbage collection.
pub async fn handle_finalizer<K, S>(store: &S, object: &K, finalizer: &str) -> Result<FinalizerStep<K>>
where
    K: Resource + Clone + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let name = object.meta().name.clone().ok_or(Error::MissingObjectKey)?;
    let present = object.finalizers().iter().any(|f| f == finalizer);

    if object.meta().deletion_timestamp.is_some() {
        if !present {
            return Ok(FinalizerStep::Deleting { released: false });
        }

        let mut released = object.clone();
        released.finalizers_mut().retain(|f| f != finalizer);
        store
            .replace_object(&name, &released)
            .await
            .map_err(|e| Error::FinalizerError(format!("failed to remove {finalizer} from {name}: {e}")))?;
        info!(name = %name, finalizer, "Removed finalizer");
        return Ok(FinalizerStep::Deleting { released: true });
    }

    if present {
        return Ok(FinalizerStep::Apply(object.clone()));
    }

    let mut marked = object.clone();
    marked.finalizers_mut().push(finalizer.to_string());
    let stored = store
        .replace_object(&name, &marked)
        .await
        .map_err(|e| Error::FinalizerError(format!("failed to add {finalizer} to {name}: {e}")))?;
    info!(name = %name, finalizer, "Added finalizer");
    Ok(FinalizerStep::Apply(stored))
}
