//! Orion Models - the `Application` custom resource and its status
//!
//! An `Application` declares a container image to run plus the supporting
//! infrastructure (database, cache, object store) it needs. The controller owns
//! the status half and is the only writer of it.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Container port used when `port` is unset
pub const DEFAULT_PORT: i32 = 8080;

/// Replica count used when `replicas` is unset
pub const DEFAULT_REPLICAS: i32 = 1;

// ============================================================================
// Desired state
// ============================================================================

/// Application is the Schema for the applications API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "platform.orion.io",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    shortname = "app",
    namespaced,
    status = "ApplicationStatus",
    printcolumn = r#"{"name":"Image", "type":"string", "jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Container image to run (required)
    pub image: String,

    /// Container port (default: 8080)
    #[serde(default)]
    pub port: i32,

    /// Desired replica count (default: 1)
    #[serde(default)]
    pub replicas: i32,

    /// Extra environment variables for the application container
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Supporting infrastructure the application needs
    #[serde(default)]
    pub infrastructure: InfrastructureSpec,
}

/// Where a piece of infrastructure should live
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// In-cluster container
    Local,
    /// Managed cloud service
    #[serde(alias = "aws")]
    Cloud,
    /// Decide from the operator's ambient environment
    #[default]
    Auto,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    /// Application-wide default placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default, alias = "postgresql", skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseSpec>,

    #[serde(default, alias = "redis", skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,

    #[serde(default, alias = "s3", skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreSpec>,
}

/// Relational database (PostgreSQL)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    /// PostgreSQL version, used as the image tag for local placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Managed instance class (cloud placement only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,

    /// Allocated storage in GB (cloud placement only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_size: Option<i32>,

    /// Database name (default: "webapp")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,

    /// Volume size for local placement (default: "2Gi")
    #[serde(default, alias = "localStorage", skip_serializing_if = "Option::is_none")]
    pub local_storage_size: Option<String>,
}

/// Key-value cache (Redis)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Managed node class (cloud placement only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

/// S3-compatible object store (MinIO locally)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,

    #[serde(default)]
    pub versioning: bool,
}

/// The three kinds of supporting infrastructure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InfraKind {
    Database,
    Cache,
    ObjectStore,
}

impl InfraKind {
    pub const ALL: [InfraKind; 3] = [InfraKind::Database, InfraKind::Cache, InfraKind::ObjectStore];

    /// Suffix used in derived object names (`<app>-<suffix>`)
    pub fn suffix(&self) -> &'static str {
        match self {
            InfraKind::Database => "postgres",
            InfraKind::Cache => "redis",
            InfraKind::ObjectStore => "s3",
        }
    }

    /// Value of the `component` label on objects of this kind
    pub fn component(&self) -> &'static str {
        match self {
            InfraKind::Database => "database",
            InfraKind::Cache => "cache",
            InfraKind::ObjectStore => "storage",
        }
    }
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfraKind::Database => write!(f, "database"),
            InfraKind::Cache => write!(f, "cache"),
            InfraKind::ObjectStore => write!(f, "object store"),
        }
    }
}

impl InfrastructureSpec {
    /// Whether the given kind was requested at all
    pub fn requests(&self, kind: InfraKind) -> bool {
        match kind {
            InfraKind::Database => self.database.is_some(),
            InfraKind::Cache => self.cache.is_some(),
            InfraKind::ObjectStore => self.object_store.is_some(),
        }
    }

    /// Requested kinds in provisioning order
    pub fn requested_kinds(&self) -> Vec<InfraKind> {
        InfraKind::ALL.into_iter().filter(|k| self.requests(*k)).collect()
    }

    /// Per-resource placement override, if any
    pub fn environment_for(&self, kind: InfraKind) -> Option<Environment> {
        match kind {
            InfraKind::Database => self.database.as_ref().and_then(|d| d.environment),
            InfraKind::Cache => self.cache.as_ref().and_then(|c| c.environment),
            InfraKind::ObjectStore => self.object_store.as_ref().and_then(|s| s.environment),
        }
    }

    /// One-line description for logs, e.g. `database(local), cache(auto)`
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .requested_kinds()
            .into_iter()
            .map(|kind| {
                let env = self
                    .environment_for(kind)
                    .or(self.environment)
                    .unwrap_or_default();
                format!("{}({:?})", kind.component(), env).to_lowercase()
            })
            .collect();

        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Reasons an application spec is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("image is required")]
    MissingImage,
    #[error("port must be between 1 and 65535, got {0}")]
    PortOutOfRange(i32),
    #[error("replicas cannot be negative, got {0}")]
    NegativeReplicas(i32),
}

impl ApplicationSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.trim().is_empty() {
            return Err(ValidationError::MissingImage);
        }
        if self.port != 0 && !(1..=65535).contains(&self.port) {
            return Err(ValidationError::PortOutOfRange(self.port));
        }
        if self.replicas < 0 {
            return Err(ValidationError::NegativeReplicas(self.replicas));
        }
        Ok(())
    }

    pub fn resolved_replicas(&self) -> i32 {
        if self.replicas <= 0 {
            DEFAULT_REPLICAS
        } else {
            self.replicas
        }
    }

    pub fn resolved_port(&self) -> i32 {
        if self.port <= 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }
}

// ============================================================================
// Observed state
// ============================================================================

/// Lifecycle phase of an application
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    ProvisioningInfrastructure,
    Deploying,
    Ready,
    Failed,
    /// A value this controller never writes
    #[serde(other)]
    Unknown,
}

impl Phase {
    /// Position along the forward path; `Failed` and `Unknown` sit outside it
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Phase::Pending => Some(0),
            Phase::ProvisioningInfrastructure => Some(1),
            Phase::Deploying => Some(2),
            Phase::Ready => Some(3),
            Phase::Failed | Phase::Unknown => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Pending => "Pending",
            Phase::ProvisioningInfrastructure => "ProvisioningInfrastructure",
            Phase::Deploying => "Deploying",
            Phase::Ready => "Ready",
            Phase::Failed => "Failed",
            Phase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Where a provisioned resource actually lives
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Local,
    Cloud,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Local => write!(f, "local"),
            Placement::Cloud => write!(f, "cloud"),
        }
    }
}

/// Connection details of one provisioned resource
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEndpoint {
    /// `host:port` (or host) the application connects to
    pub endpoint: String,
    pub placement: Placement,
    /// Resolved bucket name (object store only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub phase: Phase,

    /// Human-readable summary of the last action
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default)]
    pub infrastructure_ready: bool,

    /// `metadata.generation` this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<ResourceEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<ResourceEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ResourceEndpoint>,
}

impl ApplicationStatus {
    /// Move to `phase` with a new message and bump `last_updated`
    pub fn transition(&mut self, phase: Phase, message: impl Into<String>) {
        self.phase = phase;
        self.message = message.into();
        self.last_updated = Some(Utc::now());
    }

    pub fn endpoint(&self, kind: InfraKind) -> Option<&ResourceEndpoint> {
        match kind {
            InfraKind::Database => self.database.as_ref(),
            InfraKind::Cache => self.cache.as_ref(),
            InfraKind::ObjectStore => self.object_store.as_ref(),
        }
    }

    pub fn set_endpoint(&mut self, kind: InfraKind, endpoint: ResourceEndpoint) {
        match kind {
            InfraKind::Database => self.database = Some(endpoint),
            InfraKind::Cache => self.cache = Some(endpoint),
            InfraKind::ObjectStore => self.object_store = Some(endpoint),
        }
    }

    /// Drop endpoints of kinds that are no longer requested
    pub fn retain_requested(&mut self, infra: &InfrastructureSpec) {
        if !infra.requests(InfraKind::Database) {
            self.database = None;
        }
        if !infra.requests(InfraKind::Cache) {
            self.cache = None;
        }
        if !infra.requests(InfraKind::ObjectStore) {
            self.object_store = None;
        }
    }

    /// Placement already recorded for `kind`, if any
    pub fn placement(&self, kind: InfraKind) -> Option<Placement> {
        self.endpoint(kind).map(|e| e.placement)
    }

    /// True iff every requested kind has a non-empty endpoint
    pub fn infrastructure_complete(&self, infra: &InfrastructureSpec) -> bool {
        infra.requested_kinds().into_iter().all(|kind| {
            self.endpoint(kind)
                .map(|e| !e.endpoint.is_empty())
                .unwrap_or(false)
        })
    }
}

impl Application {
    /// Current status, or an empty one on first sight
    pub fn status_or_default(&self) -> ApplicationStatus {
        self.status.clone().unwrap_or_default()
    }
}
