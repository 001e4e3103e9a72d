//! In-memory stand-ins for cluster access, used by unit and integration tests

use async_trait::async_trait;
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::store::ObjectStore;
use super::types::{Error, Result};

/// Name-keyed object map that behaves like a single namespace of the API server.
pub struct MemoryStore<K> {
    objects: Mutex<BTreeMap<String, K>>,
    replaced: Mutex<Vec<K>>,
    deleted: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    creates: AtomicUsize,
    version: AtomicUsize,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            replaced: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            creates: AtomicUsize::new(0),
            version: AtomicUsize::new(0),
        }
    }
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Seed an object as if it already existed in the cluster.
    pub fn insert(&self, mut object: K) {
        object.meta_mut().resource_version = Some(self.next_version());
        let name = object.name_any();
        self.objects.lock().unwrap().insert(name, object);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<K> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    #[must_use]
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn replace_count(&self) -> usize {
        self.replaced.lock().unwrap().len()
    }

    /// Object as it was sent on the most recent replace.
    #[must_use]
    pub fn last_replaced(&self) -> Option<K> {
        self.replaced.lock().unwrap().last().cloned()
    }

    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Make every write to `name` fail with a server error.
    pub fn fail_writes_to(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    fn check_failing(&self, name: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(name) {
            Err(api_error(500, "InternalError", format!("injected failure for {name}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, name: &str) -> Result<Option<K>> {
        Ok(self.get(name))
    }

    async fn create_object(&self, object: &K) -> Result<K> {
        let name = object.meta().name.clone().ok_or(Error::MissingObjectKey)?;
        self.check_failing(&name)?;

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists", format!("{name} already exists")));
        }

        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(self.next_version());
        stored.meta_mut().uid.get_or_insert_with(|| format!("uid-{name}"));
        objects.insert(name, stored.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn replace_object(&self, name: &str, object: &K) -> Result<K> {
        self.check_failing(name)?;

        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(name)
            .ok_or_else(|| api_error(404, "NotFound", format!("{name} not found")))?;
        if current.meta().resource_version != object.meta().resource_version {
            return Err(api_error(409, "Conflict", format!("{name} was modified")));
        }

        self.replaced.lock().unwrap().push(object.clone());
        let mut stored = object.clone();
        stored.meta_mut().resource_version = Some(self.next_version());
        objects.insert(name.to_string(), stored.clone());
        Ok(stored)
    }

    async fn delete_foreground(&self, name: &str) -> Result<()> {
        self.check_failing(name)?;
        self.deleted.lock().unwrap().push(name.to_string());
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}
