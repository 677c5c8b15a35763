//! Kubernetes API-backed store

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use orion_models::Application;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use super::{ClusterStore, CreateOutcome, ManagedObject, ObjectKey, StoreError};

/// [`ClusterStore`] on top of a kube [`Client`]
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn create<K>(&self, namespace: &str, object: &K) -> Result<CreateOutcome, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);

        match api.create(&PostParams::default(), object).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(StoreError::Kube(e)),
        }
    }
}

fn key_of<K: Resource>(object: &K) -> Result<ObjectKey, StoreError> {
    let namespace = object
        .namespace()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", object.name_any())))?;
    Ok(ObjectKey::new(namespace, object.name_any()))
}

fn map_write_error(key: ObjectKey, kind: &'static str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            key,
            message: response.message,
        },
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound { kind, key },
        e => StoreError::Kube(e),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_application(&self, key: &ObjectKey) -> Result<Option<Application>, StoreError> {
        let api: Api<Application> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn replace_application_status(&self, app: &Application) -> Result<Application, StoreError> {
        let key = key_of(app)?;
        let api: Api<Application> = Api::namespaced(self.client.clone(), &key.namespace);
        let body = serde_json::to_vec(app)?;

        api.replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_write_error(key, "Application", e))
    }

    async fn create_if_absent(
        &self,
        namespace: &str,
        object: ManagedObject,
    ) -> Result<CreateOutcome, StoreError> {
        match &object {
            ManagedObject::PersistentVolumeClaim(o) => self.create(namespace, o).await,
            ManagedObject::StatefulSet(o) => self.create(namespace, o).await,
            ManagedObject::Deployment(o) => self.create(namespace, o).await,
            ManagedObject::Service(o) => self.create(namespace, o).await,
        }
    }

    async fn get_deployment(&self, key: &ObjectKey) -> Result<Option<Deployment>, StoreError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, StoreError> {
        let key = key_of(deployment)?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);

        api.replace(&key.name, &PostParams::default(), deployment)
            .await
            .map_err(|e| map_write_error(key, "Deployment", e))
    }
}
