//! `simulate`: drive the engine against the in-memory store, completing
//! rollouts instantly, and print the resulting status

use anyhow::{bail, Result};
use orion_controller::{CloudSettings, Engine, MemoryStore, ObjectKey, PlacementResolver, StaticSecretProvider};
use orion_models::{
    Application, ApplicationSpec, ApplicationStatus, CacheSpec, DatabaseSpec, Environment,
    InfrastructureSpec, ObjectStoreSpec,
};
use std::sync::Arc;

/// Upper bound on passes; a healthy application settles in three
const MAX_PASSES: usize = 10;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub name: String,
    pub image: String,
    pub replicas: i32,
    pub database: bool,
    pub cache: bool,
    pub object_store: bool,
}

impl SimulateOptions {
    fn application(&self) -> Application {
        let mut app = Application::new(
            &self.name,
            ApplicationSpec {
                image: self.image.clone(),
                replicas: self.replicas,
                infrastructure: InfrastructureSpec {
                    environment: Some(Environment::Local),
                    database: self.database.then(DatabaseSpec::default),
                    cache: self.cache.then(CacheSpec::default),
                    object_store: self.object_store.then(ObjectStoreSpec::default),
                },
                ..Default::default()
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app
    }
}

pub async fn run(options: SimulateOptions) -> Result<ApplicationStatus> {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        store.clone(),
        PlacementResolver::new(true),
        Arc::new(StaticSecretProvider::new()),
        CloudSettings::default(),
    )?;

    let app = store.insert_application(options.application());
    let key = ObjectKey::of(&app);
    tracing::info!("Simulating {} ({})", key, app.spec.infrastructure.summary());

    for pass in 1..=MAX_PASSES {
        let next = engine.reconcile(&key).await?;
        let status = store
            .application(&key)
            .map(|a| a.status_or_default())
            .unwrap_or_default();

        tracing::info!(
            "Pass {}: {} - {} (next: {:?})",
            pass,
            status.phase,
            status.message,
            next
        );

        if next.is_none() {
            tracing::info!("Created {} objects", store.object_count());
            return Ok(status);
        }
        store.complete_rollouts();
    }

    bail!("{} did not settle after {} passes", key, MAX_PASSES)
}
