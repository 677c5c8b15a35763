//! Access to the cluster's object store
//!
//! The engine only ever reads applications and Deployments, replaces
//! application status, creates objects if absent and replaces a drifted
//! Deployment. [`KubeStore`] talks to the API server; [`MemoryStore`] keeps
//! everything in process for tests and the `simulate` command.

mod k8s_client;
mod memory;

pub use k8s_client::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use orion_models::Application;
use std::fmt;

/// Namespace-qualified object identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(app: &Application) -> Self {
        Self::new(app.namespace().unwrap_or_default(), app.name_any())
    }

    /// Same namespace, different name
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An object the controller creates on behalf of an application
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedObject {
    PersistentVolumeClaim(PersistentVolumeClaim),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    Service(Service),
}

impl ManagedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ManagedObject::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            ManagedObject::StatefulSet(_) => "StatefulSet",
            ManagedObject::Deployment(_) => "Deployment",
            ManagedObject::Service(_) => "Service",
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedObject::PersistentVolumeClaim(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::PersistentVolumeClaim(o) => &mut o.metadata,
            ManagedObject::StatefulSet(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Mark the object as controlled by its application so that deleting the
    /// application garbage-collects it
    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        if let Some(owner) = owner {
            self.metadata_mut().owner_references = Some(vec![owner]);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("conflicting write to {key}: {message}")]
    Conflict { key: ObjectKey, message: String },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("failed to encode object: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// Operations the reconciliation engine needs from the cluster
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_application(&self, key: &ObjectKey) -> Result<Option<Application>, StoreError>;

    /// Replace the whole status subresource. The write is rejected with
    /// [`StoreError::Conflict`] if `app` carries a stale resource version.
    async fn replace_application_status(&self, app: &Application) -> Result<Application, StoreError>;

    /// Create `object` in `namespace`; an existing object with the same name is
    /// left untouched and reported as [`CreateOutcome::AlreadyExists`].
    async fn create_if_absent(
        &self,
        namespace: &str,
        object: ManagedObject,
    ) -> Result<CreateOutcome, StoreError>;

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>, StoreError>;

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_models::ApplicationSpec;

    #[test]
    fn test_object_key_display() {
        let key = ObjectKey::new("default", "shop");
        assert_eq!(key.to_string(), "default/shop");
        assert_eq!(key.sibling("shop-redis"), ObjectKey::new("default", "shop-redis"));
    }

    #[test]
    fn test_object_key_of_application() {
        let mut app = Application::new("shop", ApplicationSpec::default());
        app.metadata.namespace = Some("prod".to_string());
        assert_eq!(ObjectKey::of(&app), ObjectKey::new("prod", "shop"));
    }

    #[test]
    fn test_with_owner_sets_reference() {
        let svc = Service {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let owner = OwnerReference {
            api_version: "platform.orion.io/v1alpha1".to_string(),
            kind: "Application".to_string(),
            name: "shop".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let object = ManagedObject::Service(svc).with_owner(Some(owner.clone()));
        assert_eq!(object.kind(), "Service");
        assert_eq!(object.name(), "shop");
        assert_eq!(object.metadata().owner_references, Some(vec![owner]));
    }
}
