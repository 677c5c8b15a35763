//! Managed-cloud placement
//!
//! No provider API is called. Endpoints are derived deterministically from the
//! application identity so that repeated passes agree with each other.

use orion_models::Application;

use crate::names::{self, defaults};

/// Settings for the cloud stand-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSettings {
    pub region: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            region: defaults::CLOUD_REGION.to_string(),
        }
    }
}

impl CloudSettings {
    pub fn new(region: impl Into<String>) -> Self {
        Self { region: region.into() }
    }

    pub fn database_endpoint(&self, app_name: &str, namespace: &str) -> String {
        format!(
            "{}-postgres.{}.{}.rds.amazonaws.com:{}",
            app_name, namespace, self.region, names::POSTGRES_PORT
        )
    }

    pub fn cache_endpoint(&self, app_name: &str, namespace: &str) -> String {
        format!(
            "{}-redis.{}.{}.cache.amazonaws.com:{}",
            app_name, namespace, self.region, names::REDIS_PORT
        )
    }

    pub fn object_store_endpoint(&self) -> String {
        format!("s3.{}.amazonaws.com", self.region)
    }
}

/// Bucket name for a cloud-placed object store
pub fn bucket_name(app: &Application) -> String {
    app.spec
        .infrastructure
        .object_store
        .as_ref()
        .and_then(|s| s.bucket_name.clone())
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| format!("{}-storage", app.metadata.name.as_deref().unwrap_or_default()))
}
