//! In-process store
//!
//! Mimics the API server closely enough for the engine: uids and resource
//! versions are assigned on write, status replacement checks the resource
//! version, and Deployments never become ready on their own (call
//! [`MemoryStore::set_ready_replicas`] or [`MemoryStore::complete_rollouts`]).

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use orion_models::Application;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{ClusterStore, CreateOutcome, ManagedObject, ObjectKey, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    applications: DashMap<ObjectKey, Application>,
    objects: DashMap<(&'static str, ObjectKey), ManagedObject>,
    next_version: AtomicU64,
    mutations: AtomicUsize,
    failing_kinds: Mutex<HashSet<&'static str>>,
    failing_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self, meta: &mut ObjectMeta) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        meta.resource_version = Some(version.to_string());
    }

    fn stamp_new(&self, meta: &mut ObjectMeta) {
        meta.uid.get_or_insert_with(|| Uuid::new_v4().to_string());
        meta.generation.get_or_insert(1);
        self.bump_version(meta);
    }

    /// Add (or overwrite) an application as a user would with `kubectl apply`
    pub fn insert_application(&self, mut app: Application) -> Application {
        let key = ObjectKey::of(&app);
        if let Some(existing) = self.applications.get(&key) {
            app.metadata.uid = existing.metadata.uid.clone();
            app.metadata.generation = existing.metadata.generation.map(|g| g + 1);
            app.status = existing.status.clone();
        }
        self.stamp_new(&mut app.metadata);
        self.applications.insert(key, app.clone());
        app
    }

    /// Edit an application's spec; bumps `metadata.generation`
    pub fn update_application<F>(&self, key: &ObjectKey, edit: F) -> Option<Application>
    where
        F: FnOnce(&mut Application),
    {
        let mut entry = self.applications.get_mut(key)?;
        edit(&mut *entry);
        entry.metadata.generation = Some(entry.metadata.generation.unwrap_or(0) + 1);
        self.bump_version(&mut entry.metadata);
        Some(entry.value().clone())
    }

    pub fn remove_application(&self, key: &ObjectKey) -> Option<Application> {
        self.applications.remove(key).map(|(_, app)| app)
    }

    pub fn application(&self, key: &ObjectKey) -> Option<Application> {
        self.applications.get(key).map(|a| a.value().clone())
    }

    pub fn object(&self, kind: &'static str, key: &ObjectKey) -> Option<ManagedObject> {
        self.objects.get(&(kind, key.clone())).map(|o| o.value().clone())
    }

    pub fn deployment(&self, key: &ObjectKey) -> Option<Deployment> {
        match self.object("Deployment", key)? {
            ManagedObject::Deployment(d) => Some(d),
            _ => None,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of object creates and replaces performed (status writes excluded)
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Report `ready` ready replicas on the named Deployment
    pub fn set_ready_replicas(&self, key: &ObjectKey, ready: i32) -> bool {
        let Some(mut entry) = self.objects.get_mut(&("Deployment", key.clone())) else {
            return false;
        };
        if let ManagedObject::Deployment(deployment) = entry.value_mut() {
            let status = deployment.status.get_or_insert_with(DeploymentStatus::default);
            status.ready_replicas = Some(ready);
            status.replicas = Some(ready);
            return true;
        }
        false
    }

    /// Pretend every Deployment finished rolling out
    pub fn complete_rollouts(&self) {
        for mut entry in self.objects.iter_mut() {
            if let ManagedObject::Deployment(deployment) = entry.value_mut() {
                let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
                let status = deployment.status.get_or_insert_with(DeploymentStatus::default);
                status.ready_replicas = Some(desired);
                status.replicas = Some(desired);
            }
        }
    }

    /// Make every create of `kind` fail until cleared
    pub fn fail_creates_of(&self, kind: &'static str) {
        if let Ok(mut kinds) = self.failing_kinds.lock() {
            kinds.insert(kind);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut kinds) = self.failing_kinds.lock() {
            kinds.clear();
        }
        self.failing_reads.store(false, Ordering::SeqCst);
    }

    /// Make Deployment reads fail until cleared
    pub fn fail_deployment_reads(&self) {
        self.failing_reads.store(true, Ordering::SeqCst);
    }

    fn create_fails(&self, kind: &'static str) -> bool {
        self.failing_kinds
            .lock()
            .map(|kinds| kinds.contains(kind))
            .unwrap_or(false)
    }

    fn reads_fail(&self) -> bool {
        self.failing_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get_application(&self, key: &ObjectKey) -> Result<Option<Application>, StoreError> {
        Ok(self.application(key))
    }

    async fn replace_application_status(&self, app: &Application) -> Result<Application, StoreError> {
        let key = ObjectKey::of(app);
        let mut entry = self
            .applications
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Application",
                key: key.clone(),
            })?;

        if app.resource_version().is_some() && app.resource_version() != entry.resource_version() {
            return Err(StoreError::Conflict {
                key,
                message: format!(
                    "resource version {:?} is stale (current {:?})",
                    app.resource_version(),
                    entry.resource_version()
                ),
            });
        }

        entry.status = app.status.clone();
        self.bump_version(&mut entry.metadata);
        Ok(entry.value().clone())
    }

    async fn create_if_absent(
        &self,
        namespace: &str,
        mut object: ManagedObject,
    ) -> Result<CreateOutcome, StoreError> {
        let kind = object.kind();
        if object.name().is_empty() {
            return Err(StoreError::Invalid(format!("{} has no name", kind)));
        }
        if self.create_fails(kind) {
            return Err(StoreError::Unavailable(format!("injected failure creating {}", kind)));
        }

        let key = ObjectKey::new(namespace, object.name());
        if self.objects.contains_key(&(kind, key.clone())) {
            return Ok(CreateOutcome::AlreadyExists);
        }

        let meta = object.metadata_mut();
        meta.namespace = Some(namespace.to_string());
        self.stamp_new(meta);
        self.objects.insert((kind, key), object);
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(CreateOutcome::Created)
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>, StoreError> {
        if self.reads_fail() {
            return Err(StoreError::Unavailable(format!("injected failure reading Deployment {}", key)));
        }
        Ok(self.deployment(key))
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = ObjectKey::new(deployment.namespace().unwrap_or_default(), deployment.name_any());
        let mut entry = self
            .objects
            .get_mut(&("Deployment", key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                kind: "Deployment",
                key: key.clone(),
            })?;

        let ManagedObject::Deployment(current) = entry.value_mut() else {
            return Err(StoreError::Invalid(format!("{} is not a Deployment", key)));
        };
        if deployment.resource_version() != current.resource_version() {
            return Err(StoreError::Conflict {
                key,
                message: "stale Deployment".to_string(),
            });
        }

        let mut replaced = deployment.clone();
        replaced.status = current.status.clone();
        self.bump_version(&mut replaced.metadata);
        *current = replaced.clone();
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use orion_models::{ApplicationSpec, ApplicationStatus, Phase};

    fn app(name: &str) -> Application {
        let mut app = Application::new(name, ApplicationSpec::default());
        app.metadata.namespace = Some("default".to_string());
        app
    }

    fn service(name: &str) -> ManagedObject {
        ManagedObject::Service(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_insert_assigns_identity() {
        let store = MemoryStore::new();
        let stored = store.insert_application(app("shop"));
        assert!(stored.metadata.uid.is_some());
        assert_eq!(stored.metadata.generation, Some(1));
        assert!(stored.resource_version().is_some());
    }

    #[tokio::test]
    async fn test_status_replace_rejects_stale_version() {
        let store = MemoryStore::new();
        let stored = store.insert_application(app("shop"));

        let mut first = stored.clone();
        first.status = Some(ApplicationStatus {
            phase: Phase::Deploying,
            ..Default::default()
        });
        store.replace_application_status(&first).await.unwrap();

        // Second writer still holds the old resource version
        let mut second = stored;
        second.status = Some(ApplicationStatus::default());
        let err = store.replace_application_status(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_create_if_absent_is_idempotent() {
        let store = MemoryStore::new();
        assert_eq!(
            store.create_if_absent("default", service("shop")).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_if_absent("default", service("shop")).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_create_failure() {
        let store = MemoryStore::new();
        store.fail_creates_of("Service");
        assert!(store.create_if_absent("default", service("shop")).await.is_err());
        store.clear_failures();
        assert!(store.create_if_absent("default", service("shop")).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_bumps_generation() {
        let store = MemoryStore::new();
        let key = ObjectKey::of(&store.insert_application(app("shop")));
        let updated = store
            .update_application(&key, |a| a.spec.image = "nginx:1.27".to_string())
            .unwrap();
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(updated.spec.image, "nginx:1.27");
    }
}
