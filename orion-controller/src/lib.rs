//! Orion Controller - reconciliation of `Application` resources
//!
//! Converges each application toward its declared state: supporting
//! infrastructure is provisioned in the placement the policy picks (in-cluster
//! or managed cloud), then the workload Deployment and Service are synthesized
//! with connection details injected as environment variables.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use orion_controller::{CloudSettings, Engine, MemoryStore, ObjectKey, PlacementResolver, StaticSecretProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let engine = Engine::new(
//!     store,
//!     PlacementResolver::new(true),
//!     Arc::new(StaticSecretProvider::new()),
//!     CloudSettings::default(),
//! )?;
//!
//! let requeue = engine.reconcile(&ObjectKey::new("default", "simple-nginx")).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod locks;
pub mod names;
pub mod placement;
pub mod provisioner;
pub mod secrets;
pub mod store;
pub mod synthesizer;

pub use engine::Engine;
pub use error::{requeue, PhaseError, ReconcileError};
pub use placement::{resolve_placement, PlacementResolver};
pub use provisioner::{CloudSettings, ProvisionError, Provisioner};
pub use secrets::{Credentials, SecretProvider, StaticSecretProvider};
pub use store::{ClusterStore, KubeStore, MemoryStore, ObjectKey, StoreError};
pub use synthesizer::Synthesizer;
