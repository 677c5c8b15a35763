//! Errors raised while reconciling and the retry delay each one maps to

use orion_models::{Phase, ValidationError};
use std::time::Duration;

use crate::provisioner::ProvisionError;
use crate::store::{ObjectKey, StoreError};

/// Fixed requeue delays
pub mod requeue {
    use std::time::Duration;

    /// Infrastructure recorded, come back to start the deployment
    pub const AFTER_PROVISIONING: Duration = Duration::from_secs(10);
    /// Deployment created or still rolling out
    pub const ROLLOUT_POLL: Duration = Duration::from_secs(15);
    /// Readiness could not be observed, or a store error escaped a pass
    pub const READINESS_RETRY: Duration = Duration::from_secs(30);
    pub const UNRECOGNIZED_PHASE: Duration = Duration::from_secs(60);
    pub const SYNTHESIS_FAILURE: Duration = Duration::from_secs(2 * 60);
    pub const PROVISIONING_FAILURE: Duration = Duration::from_secs(5 * 60);
    /// Periodic resync of a Ready application
    pub const READY_RESYNC: Duration = Duration::from_secs(5 * 60);
}

/// Failure of a single phase step. These never escape a pass; the engine
/// records them in status and schedules the next attempt.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Infrastructure provisioning failed: {0}")]
    Provisioning(#[from] ProvisionError),

    #[error("Failed to create application resources: {0}")]
    Synthesis(#[source] StoreError),

    #[error("Failed to check application readiness: {0}")]
    ReadinessCheck(#[source] StoreError),

    #[error("Unrecognized phase {0}")]
    UnrecognizedPhase(Phase),
}

impl PhaseError {
    /// Delay before the next pass; `None` means wait for the next change
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            PhaseError::Validation(_) => None,
            PhaseError::Provisioning(_) => Some(requeue::PROVISIONING_FAILURE),
            PhaseError::Synthesis(_) => Some(requeue::SYNTHESIS_FAILURE),
            PhaseError::ReadinessCheck(_) => Some(requeue::READINESS_RETRY),
            PhaseError::UnrecognizedPhase(_) => Some(requeue::UNRECOGNIZED_PHASE),
        }
    }
}

/// Store I/O failure that aborted a pass
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to load application {key}: {source}")]
    Load {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to persist status of {key}: {source}")]
    Persist {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
}

impl ReconcileError {
    /// A concurrent writer got there first; the next pass will see its result
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileError::Persist {
                source: StoreError::Conflict { .. },
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_delays() {
        assert_eq!(PhaseError::Validation(ValidationError::MissingImage).requeue_after(), None);
        assert_eq!(
            PhaseError::Provisioning(ProvisionError::MissingCredentials(
                orion_models::InfraKind::Database,
                orion_models::Placement::Local
            ))
            .requeue_after(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            PhaseError::Synthesis(StoreError::Unavailable("down".into())).requeue_after(),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            PhaseError::ReadinessCheck(StoreError::Unavailable("down".into())).requeue_after(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            PhaseError::UnrecognizedPhase(Phase::Unknown).requeue_after(),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = PhaseError::from(ValidationError::PortOutOfRange(70000));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_conflict_detection() {
        let key = ObjectKey::new("default", "shop");
        let err = ReconcileError::Persist {
            key: key.clone(),
            source: StoreError::Conflict {
                key: key.clone(),
                message: "stale".into(),
            },
        };
        assert!(err.is_conflict());
        assert!(!ReconcileError::Load {
            key: key.clone(),
            source: StoreError::Unavailable("down".into()),
        }
        .is_conflict());
    }
}
