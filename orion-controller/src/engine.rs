//! Reconciliation engine
//!
//! One call to [`Engine::reconcile`] is one pass over one application. A pass
//! reads the application, does at most one phase step and tells the caller
//! when to come back. Every phase change is persisted before the work it
//! announces, so a pass that is interrupted can be resumed from status alone.
//!
//! ```text
//! Pending -> ProvisioningInfrastructure -> Deploying -> Ready
//!     \______________\__________________\_____________-> Failed
//! ```

use kube::ResourceExt;
use orion_models::{Application, ApplicationStatus, Phase};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{requeue, PhaseError, ReconcileError};
use crate::locks::KeyedLocks;
use crate::placement::PlacementResolver;
use crate::provisioner::{CloudSettings, Provisioner};
use crate::secrets::SecretProvider;
use crate::store::{ClusterStore, CreateOutcome, ManagedObject, ObjectKey, StoreError};
use crate::synthesizer::{self, Synthesizer};

pub type ReconcileResult = Result<Option<Duration>, ReconcileError>;

pub struct Engine<S: ClusterStore> {
    store: Arc<S>,
    provisioner: Provisioner,
    synthesizer: Synthesizer,
    locks: KeyedLocks,
}

impl<S: ClusterStore> Engine<S> {
    pub fn new(
        store: Arc<S>,
        resolver: PlacementResolver,
        secrets: Arc<dyn SecretProvider>,
        cloud: CloudSettings,
    ) -> Result<Self, tera::Error> {
        Ok(Self {
            store,
            provisioner: Provisioner::new(resolver, secrets.clone(), cloud)?,
            synthesizer: Synthesizer::new(secrets),
            locks: KeyedLocks::new(),
        })
    }

    /// Run one pass for `key`. `Ok(None)` means nothing is scheduled; the
    /// next change to the application will trigger another pass.
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let _guard = self.locks.lock(key).await;

        let app = self
            .store
            .get_application(key)
            .await
            .map_err(|source| ReconcileError::Load {
                key: key.clone(),
                source,
            })?;

        let Some(mut app) = app else {
            tracing::debug!("Application {} is gone", key);
            self.locks.forget(key);
            return Ok(None);
        };

        let mut status = app.status_or_default();

        if let Err(e) = app.spec.validate() {
            return self.reject(key, &mut app, status, PhaseError::Validation(e)).await;
        }

        let generation = app.metadata.generation;
        let stale = generation.is_some() && status.observed_generation != generation;
        let restart = match status.phase {
            Phase::Ready | Phase::Failed => stale,
            // An edit mid-flight; an attempt that never recorded its
            // generation is resumed instead
            Phase::ProvisioningInfrastructure | Phase::Deploying => {
                stale && status.observed_generation.is_some()
            }
            Phase::Pending | Phase::Unknown => false,
        };
        if restart {
            tracing::info!(
                "Application {} changed (generation {:?} -> {:?}), restarting from {}",
                key,
                status.observed_generation,
                generation,
                Phase::Pending
            );
            status.transition(Phase::Pending, "Desired state changed");
        }

        tracing::debug!(phase = %status.phase, "Reconciling {}", key);

        match status.phase {
            Phase::Pending => self.begin_provisioning(key, &mut app, status).await,
            Phase::ProvisioningInfrastructure if status.infrastructure_ready => {
                self.begin_deploying(key, &mut app, status).await
            }
            // Interrupted between announcing provisioning and recording it
            Phase::ProvisioningInfrastructure => self.provision(key, &mut app, status).await,
            Phase::Deploying => self.check_rollout(key, &mut app, status).await,
            Phase::Ready => Ok(Some(requeue::READY_RESYNC)),
            Phase::Failed => Ok(None),
            Phase::Unknown => {
                let error = PhaseError::UnrecognizedPhase(status.phase);
                tracing::warn!("Application {}: {}, leaving status untouched", key, error);
                Ok(error.requeue_after())
            }
        }
    }

    async fn begin_provisioning(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
    ) -> ReconcileResult {
        status.transition(Phase::ProvisioningInfrastructure, "Provisioning infrastructure");
        status.observed_generation = app.metadata.generation;
        status.infrastructure_ready = false;
        status.ready_replicas = 0;
        status.retain_requested(&app.spec.infrastructure);
        self.persist(key, app, &status).await?;

        self.provision(key, app, status).await
    }

    async fn provision(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
    ) -> ReconcileResult {
        let result = self
            .provisioner
            .provision_all(self.store.as_ref(), app, &mut status)
            .await;

        if let Err(e) = result {
            return self.reject(key, app, status, PhaseError::Provisioning(e)).await;
        }

        status.infrastructure_ready = status.infrastructure_complete(&app.spec.infrastructure);
        if status.observed_generation.is_none() {
            status.observed_generation = app.metadata.generation;
        }
        status.transition(Phase::ProvisioningInfrastructure, "Infrastructure ready");
        self.persist(key, app, &status).await?;

        tracing::info!("✓ Infrastructure ready for {}", key);
        Ok(Some(requeue::AFTER_PROVISIONING))
    }

    async fn begin_deploying(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
    ) -> ReconcileResult {
        status.transition(Phase::Deploying, "Creating Kubernetes resources");
        self.persist(key, app, &status).await?;

        if let Err(e) = self.apply_workload(key, app, &status).await {
            return self.reject(key, app, status, PhaseError::Synthesis(e)).await;
        }

        Ok(Some(requeue::ROLLOUT_POLL))
    }

    /// Create the Deployment and Service, replacing a Deployment whose
    /// controller-owned fields no longer match
    async fn apply_workload(
        &self,
        key: &ObjectKey,
        app: &Application,
        status: &ApplicationStatus,
    ) -> Result<(), StoreError> {
        let namespace = key.namespace.as_str();
        let desired = self.synthesizer.build_deployment(app, status);

        match self
            .store
            .create_if_absent(namespace, ManagedObject::Deployment(desired.clone()))
            .await?
        {
            CreateOutcome::Created => {
                tracing::info!(
                    replicas = app.spec.resolved_replicas(),
                    "Created Deployment {}",
                    key
                );
            }
            CreateOutcome::AlreadyExists => {
                if let Some(live) = self.store.get_deployment(key).await? {
                    if synthesizer::deployment_drifted(&live, &desired) {
                        let updated = synthesizer::apply_desired(&live, &desired);
                        self.store.replace_deployment(&updated).await?;
                        tracing::info!("Updated drifted Deployment {}", key);
                    } else {
                        tracing::debug!("Deployment {} is up to date", key);
                    }
                }
            }
        }

        let service = self.synthesizer.build_service(app);
        if self
            .store
            .create_if_absent(namespace, ManagedObject::Service(service))
            .await?
            == CreateOutcome::Created
        {
            tracing::info!(port = app.spec.resolved_port(), "Created Service {}", key);
        }

        Ok(())
    }

    async fn check_rollout(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
    ) -> ReconcileResult {
        let desired = app.spec.resolved_replicas();

        let deployment = match self.store.get_deployment(key).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => {
                let error = PhaseError::ReadinessCheck(StoreError::NotFound {
                    kind: "Deployment",
                    key: key.clone(),
                });
                return self.retry_later(key, app, status, error).await;
            }
            Err(e) => {
                return self
                    .retry_later(key, app, status, PhaseError::ReadinessCheck(e))
                    .await;
            }
        };

        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
            .clamp(0, desired);

        if ready == desired {
            status.ready_replicas = ready;
            status.transition(Phase::Ready, "Application is ready");
            self.persist(key, app, &status).await?;
            tracing::info!("✓ Application {} is ready ({} replicas)", key, ready);
            return Ok(None);
        }

        if ready != status.ready_replicas {
            status.ready_replicas = ready;
            status.transition(
                Phase::Deploying,
                format!("Waiting for replicas ({}/{} ready)", ready, desired),
            );
            self.persist(key, app, &status).await?;
        }

        tracing::debug!("Application {}: {}/{} replicas ready", key, ready, desired);
        Ok(Some(requeue::ROLLOUT_POLL))
    }

    /// Record a terminal failure
    async fn reject(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
        error: PhaseError,
    ) -> ReconcileResult {
        let message = error.to_string();
        let requeue = error.requeue_after();

        if let PhaseError::Validation(_) = error {
            // Unchanged invalid spec: nothing new to say
            if status.phase == Phase::Failed
                && status.message == message
                && status.observed_generation == app.metadata.generation
            {
                return Ok(None);
            }
            status.observed_generation = app.metadata.generation;
        }

        tracing::error!("Application {} failed: {}", key, message);
        status.transition(Phase::Failed, message);
        self.persist(key, app, &status).await?;
        Ok(requeue)
    }

    /// Leave the phase alone, surface the problem in `message`
    async fn retry_later(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        mut status: ApplicationStatus,
        error: PhaseError,
    ) -> ReconcileResult {
        tracing::warn!("Application {}: {}", key, error);

        let message = error.to_string();
        if status.message != message {
            status.message = message;
            status.last_updated = Some(chrono::Utc::now());
            self.persist(key, app, &status).await?;
        }
        Ok(error.requeue_after())
    }

    /// Replace the whole status subresource and carry the new resource
    /// version forward for later writes in the same pass
    async fn persist(
        &self,
        key: &ObjectKey,
        app: &mut Application,
        status: &ApplicationStatus,
    ) -> Result<(), ReconcileError> {
        app.status = Some(status.clone());

        let stored = self
            .store
            .replace_application_status(app)
            .await
            .map_err(|source| ReconcileError::Persist {
                key: key.clone(),
                source,
            })?;

        app.metadata.resource_version = stored.resource_version();
        Ok(())
    }
}
