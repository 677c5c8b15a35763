//! Object names, labels and well-known constants
//!
//! Every object the controller creates for an application is named either
//! `<app>` (workload and its Service) or `<app>-<kind>` (infrastructure, where
//! kind is `postgres`, `redis` or `s3`).

use orion_models::InfraKind;
use std::collections::BTreeMap;

/// Value of the `managed-by` label on every created object
pub const MANAGED_BY: &str = "orion-platform";

/// Field manager / controller name used in logs and events
pub const CONTROLLER_NAME: &str = "orion-application-controller";

pub const POSTGRES_PORT: i32 = 5432;
pub const REDIS_PORT: i32 = 6379;
pub const MINIO_API_PORT: i32 = 9000;
pub const MINIO_CONSOLE_PORT: i32 = 9001;

/// Port the application Service exposes inside the cluster
pub const SERVICE_PORT: i32 = 80;

pub mod defaults {
    pub const POSTGRES_VERSION: &str = "16";
    pub const REDIS_VERSION: &str = "7";
    pub const LOCAL_STORAGE_SIZE: &str = "2Gi";
    pub const DATABASE_NAME: &str = "webapp";
    pub const LOCAL_BUCKET: &str = "default-bucket";
    pub const MINIO_IMAGE: &str = "minio/minio:latest";
    pub const CLOUD_REGION: &str = "us-west-2";
}

/// Name of the infrastructure objects of `kind` for `app_name`
pub fn infra_name(app_name: &str, kind: InfraKind) -> String {
    format!("{}-{}", app_name, kind.suffix())
}

/// Name of the PersistentVolumeClaim backing a local database
pub fn database_claim_name(app_name: &str) -> String {
    format!("{}-pvc", infra_name(app_name, InfraKind::Database))
}

/// `component` label of the application's own pods. Infrastructure pods
/// share the `app` label, so selectors must include this.
pub const WORKLOAD_COMPONENT: &str = "application";

/// Labels for the application workload and its Service
pub fn workload_labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = workload_selector(app_name);
    labels.insert("managed-by".to_string(), MANAGED_BY.to_string());
    labels
}

/// Pod selector for the application workload
pub fn workload_selector(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), app_name.to_string()),
        ("component".to_string(), WORKLOAD_COMPONENT.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infra_names() {
        assert_eq!(infra_name("shop", InfraKind::Database), "shop-postgres");
        assert_eq!(infra_name("shop", InfraKind::Cache), "shop-redis");
        assert_eq!(infra_name("shop", InfraKind::ObjectStore), "shop-s3");
        assert_eq!(database_claim_name("shop"), "shop-postgres-pvc");
    }

    #[test]
    fn test_workload_selector_excludes_infrastructure() {
        let selector = workload_selector("shop");
        assert_eq!(selector.get("component").map(String::as_str), Some("application"));
        for kind in InfraKind::ALL {
            assert_ne!(kind.component(), WORKLOAD_COMPONENT);
        }
    }

    #[test]
    fn test_selector_is_subset_of_labels() {
        let labels = workload_labels("shop");
        for (k, v) in workload_selector("shop") {
            assert_eq!(labels.get(&k), Some(&v));
        }
    }
}
