//! Name-keyed object access and the lookup-before-create upsert

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, PostParams, PropagationPolicy};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, info};

use super::types::{Error, Result};

/// The cluster operations the control loops and build agent need, scoped to one namespace.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// `None` when the object does not exist.
    async fn fetch(&self, name: &str) -> Result<Option<K>>;

    async fn create_object(&self, object: &K) -> Result<K>;

    async fn replace_object(&self, name: &str, object: &K) -> Result<K>;

    /// Delete with foreground propagation. Missing objects are not an error.
    async fn delete_foreground(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl<K> ObjectStore<K> for Api<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch(&self, name: &str) -> Result<Option<K>> {
        Ok(self.get_opt(name).await?)
    }

    async fn create_object(&self, object: &K) -> Result<K> {
        Ok(self.create(&PostParams::default(), object).await?)
    }

    async fn replace_object(&self, name: &str, object: &K) -> Result<K> {
        Ok(self.replace(name, &PostParams::default(), object).await?)
    }

    async fn delete_foreground(&self, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..DeleteParams::default()
        };

        match self.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(name, "Object already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Converge one object toward `desired`, keyed by its name.
///
/// Absent objects are created with `owner` appended. Present objects get
/// `desired` deep-merged over their current state with the existing
/// `resourceVersion` preserved, then replaced.
pub async fn upsert<K, S>(store: &S, desired: K, owner: Option<OwnerReference>) -> Result<UpsertOutcome>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: ObjectStore<K> + ?Sized,
{
    let name = desired.meta().name.clone().ok_or(Error::MissingObjectKey)?;

    match store.fetch(&name).await? {
        None => {
            let mut object = desired;
            if let Some(owner) = owner {
                attach_owner(&mut object, owner);
            }
            store.create_object(&object).await?;
            info!(name = %name, "Created object");
            Ok(UpsertOutcome::Created)
        }
        Some(existing) => {
            let mut merged = merge_objects(&existing, &desired)?;
            merged.meta_mut().resource_version = existing.resource_version();
            if let Some(owner) = owner {
                attach_owner(&mut merged, owner);
            }
            store.replace_object(&name, &merged).await?;
            info!(name = %name, "Updated existing object");
            Ok(UpsertOutcome::Updated)
        }
    }
}

fn attach_owner<K: Resource>(object: &mut K, owner: OwnerReference) {
    let owners = object.meta_mut().owner_references.get_or_insert_with(Vec::new);
    if !owners.iter().any(|existing| existing.uid == owner.uid) {
        owners.push(owner);
    }
}

/// `desired` laid over `existing`: objects merge recursively, everything else is replaced.
pub fn merge_objects<K>(existing: &K, desired: &K) -> Result<K>
where
    K: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(existing)?;
    let overlay = serde_json::to_value(desired)?;
    merge_value(&mut base, overlay);
    Ok(serde_json::from_value(base)?)
}

fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::test_utils::MemoryStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..ConfigMap::default()
        }
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "deployments.platform/v1".to_string(),
            kind: "ApplicationDeployment".to_string(),
            name: "app".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    #[tokio::test]
    async fn creates_missing_object_with_owner() {
        let store = MemoryStore::<ConfigMap>::new();
        let outcome = upsert(&store, config_map("cm", &[("a", "1")]), Some(owner()))
            .await
            .unwrap();

        assert_eq!(outcome, UpsertOutcome::Created);
        let stored = store.get("cm").unwrap();
        assert_eq!(stored.owner_references().len(), 1);
        assert_eq!(stored.owner_references()[0].uid, "uid-1");
    }

    #[tokio::test]
    async fn updates_existing_object_preserving_version() {
        let store = MemoryStore::<ConfigMap>::new();
        store.insert(config_map("cm", &[("a", "1"), ("keep", "x")]));
        let version_before = store.get("cm").unwrap().resource_version();

        let outcome = upsert(&store, config_map("cm", &[("a", "2")]), Some(owner()))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let replaced = store.last_replaced().unwrap();
        assert_eq!(replaced.resource_version(), version_before);

        let stored = store.get("cm").unwrap();
        let data = stored.data.unwrap();
        assert_eq!(data["a"], "2");
        assert_eq!(data["keep"], "x");
    }

    #[tokio::test]
    async fn repeated_upserts_do_not_duplicate() {
        let store = MemoryStore::<ConfigMap>::new();
        for _ in 0..3 {
            upsert(&store, config_map("cm", &[("a", "1")]), Some(owner()))
                .await
                .unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.create_count(), 1);
        assert_eq!(store.get("cm").unwrap().owner_references().len(), 1);
    }

    #[tokio::test]
    async fn unnamed_object_is_rejected() {
        let store = MemoryStore::<ConfigMap>::new();
        let err = upsert(&store, ConfigMap::default(), None).await.unwrap_err();
        assert!(matches!(err, Error::MissingObjectKey));
    }

    #[test]
    fn merge_replaces_arrays_and_keeps_unset_fields() {
        let mut base = serde_json::json!({"a": {"b": 1, "c": [1, 2]}, "d": "keep"});
        merge_value(&mut base, serde_json::json!({"a": {"c": [3]}, "d": null}));
        assert_eq!(base, serde_json::json!({"a": {"b": 1, "c": [3]}, "d": "keep"}));
    }
}
