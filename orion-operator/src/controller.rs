use anyhow::{Context as _, Result};
use futures_util::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::api::ListParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use orion_controller::names::{CONTROLLER_NAME, MANAGED_BY};
use orion_controller::{requeue, Engine, KubeStore, ObjectKey, ReconcileError};
use orion_models::Application;
use std::sync::Arc;

use crate::health::Readiness;

/// Shared state handed to every reconcile call
pub struct Context {
    engine: Engine<KubeStore>,
}

impl Context {
    pub fn new(engine: Engine<KubeStore>) -> Self {
        Self { engine }
    }
}

async fn reconcile(app: Arc<Application>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let key = ObjectKey::of(&app);
    match ctx.engine.reconcile(&key).await? {
        Some(after) => Ok(Action::requeue(after)),
        None => Ok(Action::await_change()),
    }
}

fn error_policy(app: Arc<Application>, error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        tracing::debug!("Status of {} changed underneath us, retrying: {}", app.name_any(), error);
    } else {
        tracing::warn!("Reconcile of {} failed: {}", app.name_any(), error);
    }
    Action::requeue(requeue::READINESS_RETRY)
}

/// Watch applications and the objects created for them until a shutdown
/// signal arrives
pub async fn run(client: Client, ctx: Context, readiness: Readiness) -> Result<()> {
    let applications: Api<Application> = Api::all(client.clone());
    applications
        .list(&ListParams::default().limit(1))
        .await
        .context("Application CRD is not installed (try `orion-operator crd | kubectl apply -f -`)")?;

    let owned = || watcher::Config::default().labels(&format!("managed-by={}", MANAGED_BY));

    tracing::info!("Starting {}", CONTROLLER_NAME);
    readiness.mark_ready();

    Controller::new(applications, watcher::Config::default().any_semantic())
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client.clone()), owned())
        .owns(Api::<StatefulSet>::all(client.clone()), owned())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), owned())
        .shutdown_on_signal()
        .run(reconcile, error_policy, Arc::new(ctx))
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => tracing::debug!("Reconciled {}: {:?}", object, action),
                Err(e) => tracing::warn!("Controller error: {}", e),
            }
        })
        .await;

    readiness.mark_not_ready();
    tracing::info!("{} stopped", CONTROLLER_NAME);
    Ok(())
}
