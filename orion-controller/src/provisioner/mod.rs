//! Infrastructure provisioning
//!
//! One entry point per kind. Each call decides a placement, makes sure the
//! backing resource exists there, records the endpoint in the caller's status
//! and returns it. Nothing here persists status.

mod cloud;
mod local;

pub use cloud::CloudSettings;
pub use local::{database_name, LocalTemplates};

use kube::{Resource, ResourceExt};
use orion_models::{Application, ApplicationStatus, InfraKind, Placement, ResourceEndpoint};
use std::sync::Arc;
use tracing::{debug, info};

use crate::names;
use crate::placement::PlacementResolver;
use crate::secrets::{Credentials, SecretProvider};
use crate::store::{ClusterStore, CreateOutcome, ManagedObject, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("failed to render {template} template: {source}")]
    Template {
        template: String,
        #[source]
        source: tera::Error,
    },

    #[error("invalid {template} manifest: {source}")]
    Manifest {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to create {kind} {name}: {source}")]
    Create {
        kind: &'static str,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("no credentials available for {0} ({1} placement)")]
    MissingCredentials(InfraKind, Placement),

    #[error("{0} was not requested")]
    NotRequested(InfraKind),
}

pub struct Provisioner {
    resolver: PlacementResolver,
    secrets: Arc<dyn SecretProvider>,
    cloud: CloudSettings,
    templates: LocalTemplates,
}

impl Provisioner {
    pub fn new(
        resolver: PlacementResolver,
        secrets: Arc<dyn SecretProvider>,
        cloud: CloudSettings,
    ) -> Result<Self, tera::Error> {
        Ok(Self {
            resolver,
            secrets,
            cloud,
            templates: LocalTemplates::load()?,
        })
    }

    /// Placement for `kind`. A placement already recorded in status is kept so
    /// that a resource never moves between local and cloud.
    pub fn placement_for(&self, app: &Application, status: &ApplicationStatus, kind: InfraKind) -> Placement {
        if let Some(recorded) = status.placement(kind) {
            return recorded;
        }
        let infra = &app.spec.infrastructure;
        self.resolver.resolve(infra.environment_for(kind), infra.environment)
    }

    /// Provision every requested kind in order, stopping at the first error
    pub async fn provision_all<S>(
        &self,
        store: &S,
        app: &Application,
        status: &mut ApplicationStatus,
    ) -> Result<(), ProvisionError>
    where
        S: ClusterStore + ?Sized,
    {
        info!(
            "Provisioning infrastructure for {}: {}",
            app.name_any(),
            app.spec.infrastructure.summary()
        );

        for kind in app.spec.infrastructure.requested_kinds() {
            let endpoint = match kind {
                InfraKind::Database => self.provision_database(store, app, status).await?,
                InfraKind::Cache => self.provision_cache(store, app, status).await?,
                InfraKind::ObjectStore => self.provision_object_store(store, app, status).await?,
            };
            info!(
                kind = %kind,
                placement = %endpoint.placement,
                endpoint = %endpoint.endpoint,
                "Infrastructure provisioned"
            );
        }
        Ok(())
    }

    pub async fn provision_database<S>(
        &self,
        store: &S,
        app: &Application,
        status: &mut ApplicationStatus,
    ) -> Result<ResourceEndpoint, ProvisionError>
    where
        S: ClusterStore + ?Sized,
    {
        let kind = InfraKind::Database;
        if !app.spec.infrastructure.requests(kind) {
            return Err(ProvisionError::NotRequested(kind));
        }

        let placement = self.placement_for(app, status, kind);
        let (name, namespace) = identity(app);

        let endpoint = match placement {
            Placement::Local => {
                let credentials = self.credentials(kind, placement)?;
                let objects = self.templates.database(app, &namespace, &credentials)?;
                self.create_all(store, app, &namespace, objects).await?;
                format!("{}:{}", names::infra_name(&name, kind), names::POSTGRES_PORT)
            }
            Placement::Cloud => self.cloud.database_endpoint(&name, &namespace),
        };

        Ok(record(status, kind, endpoint, placement, None))
    }

    pub async fn provision_cache<S>(
        &self,
        store: &S,
        app: &Application,
        status: &mut ApplicationStatus,
    ) -> Result<ResourceEndpoint, ProvisionError>
    where
        S: ClusterStore + ?Sized,
    {
        let kind = InfraKind::Cache;
        if !app.spec.infrastructure.requests(kind) {
            return Err(ProvisionError::NotRequested(kind));
        }

        let placement = self.placement_for(app, status, kind);
        let (name, namespace) = identity(app);

        let endpoint = match placement {
            Placement::Local => {
                let objects = self.templates.cache(app, &namespace)?;
                self.create_all(store, app, &namespace, objects).await?;
                format!("{}:{}", names::infra_name(&name, kind), names::REDIS_PORT)
            }
            Placement::Cloud => self.cloud.cache_endpoint(&name, &namespace),
        };

        Ok(record(status, kind, endpoint, placement, None))
    }

    pub async fn provision_object_store<S>(
        &self,
        store: &S,
        app: &Application,
        status: &mut ApplicationStatus,
    ) -> Result<ResourceEndpoint, ProvisionError>
    where
        S: ClusterStore + ?Sized,
    {
        let kind = InfraKind::ObjectStore;
        if !app.spec.infrastructure.requests(kind) {
            return Err(ProvisionError::NotRequested(kind));
        }

        let placement = self.placement_for(app, status, kind);
        let (name, namespace) = identity(app);

        let (endpoint, bucket) = match placement {
            Placement::Local => {
                let credentials = self.credentials(kind, placement)?;
                let objects = self.templates.object_store(app, &namespace, &credentials)?;
                self.create_all(store, app, &namespace, objects).await?;
                debug!(
                    "MinIO console available at {}:{}",
                    names::infra_name(&name, kind),
                    names::MINIO_CONSOLE_PORT
                );
                (
                    format!("{}:{}", names::infra_name(&name, kind), names::MINIO_API_PORT),
                    local::local_bucket_name(app),
                )
            }
            Placement::Cloud => (self.cloud.object_store_endpoint(), cloud::bucket_name(app)),
        };

        Ok(record(status, kind, endpoint, placement, Some(bucket)))
    }

    fn credentials(&self, kind: InfraKind, placement: Placement) -> Result<Credentials, ProvisionError> {
        let credentials = match kind {
            InfraKind::ObjectStore => self.secrets.object_store_credentials(placement),
            _ => self.secrets.database_credentials(placement),
        };
        credentials.ok_or(ProvisionError::MissingCredentials(kind, placement))
    }

    async fn create_all<S>(
        &self,
        store: &S,
        app: &Application,
        namespace: &str,
        objects: Vec<ManagedObject>,
    ) -> Result<(), ProvisionError>
    where
        S: ClusterStore + ?Sized,
    {
        let owner = app.controller_owner_ref(&());

        for object in objects {
            let object = object.with_owner(owner.clone());
            let kind = object.kind();
            let name = object.name().to_string();

            match store.create_if_absent(namespace, object).await {
                Ok(CreateOutcome::Created) => debug!("Created {} {}/{}", kind, namespace, name),
                Ok(CreateOutcome::AlreadyExists) => debug!("{} {}/{} already exists", kind, namespace, name),
                Err(source) => return Err(ProvisionError::Create { kind, name, source }),
            }
        }
        Ok(())
    }
}

fn identity(app: &Application) -> (String, String) {
    (app.name_any(), app.namespace().unwrap_or_else(|| "default".to_string()))
}

fn record(
    status: &mut ApplicationStatus,
    kind: InfraKind,
    endpoint: String,
    placement: Placement,
    bucket: Option<String>,
) -> ResourceEndpoint {
    let endpoint = ResourceEndpoint {
        endpoint,
        placement,
        bucket,
    };
    status.set_endpoint(kind, endpoint.clone());
    endpoint
}
