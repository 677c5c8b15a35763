//! Credential material for infrastructure connections
//!
//! Local placements use fixed development credentials shared by the container
//! that gets provisioned and the application that connects to it. Cloud
//! placements use whatever the operator was configured with.

use orion_models::Placement;
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for provisioned infrastructure
pub trait SecretProvider: Send + Sync {
    /// Database login for the given placement, `None` if the application is
    /// expected to obtain it elsewhere
    fn database_credentials(&self, placement: Placement) -> Option<Credentials>;

    /// Object store access key pair for the given placement
    fn object_store_credentials(&self, placement: Placement) -> Option<Credentials>;
}

pub const LOCAL_DATABASE_USER: &str = "appuser";
pub const LOCAL_DATABASE_PASSWORD: &str = "localpassword";
pub const LOCAL_OBJECT_STORE_KEY: &str = "minioadmin";

/// Fixed local development credentials plus optional configured cloud ones
#[derive(Debug, Clone, Default)]
pub struct StaticSecretProvider {
    cloud_database: Option<Credentials>,
}

impl StaticSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cloud_database(mut self, credentials: Credentials) -> Self {
        self.cloud_database = Some(credentials);
        self
    }
}

impl SecretProvider for StaticSecretProvider {
    fn database_credentials(&self, placement: Placement) -> Option<Credentials> {
        match placement {
            Placement::Local => Some(Credentials::new(LOCAL_DATABASE_USER, LOCAL_DATABASE_PASSWORD)),
            Placement::Cloud => self.cloud_database.clone(),
        }
    }

    fn object_store_credentials(&self, placement: Placement) -> Option<Credentials> {
        match placement {
            Placement::Local => Some(Credentials::new(LOCAL_OBJECT_STORE_KEY, LOCAL_OBJECT_STORE_KEY)),
            // Cloud buckets are reached through the workload's own identity
            Placement::Cloud => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_provider() {
        let provider = StaticSecretProvider::new();
        assert_eq!(
            provider.database_credentials(Placement::Local),
            Some(Credentials::new("appuser", "localpassword"))
        );
        assert_eq!(provider.database_credentials(Placement::Cloud), None);
        assert!(provider.object_store_credentials(Placement::Cloud).is_none());

        let provider = provider.with_cloud_database(Credentials::new("svc", "s3cret"));
        assert_eq!(
            provider.database_credentials(Placement::Cloud),
            Some(Credentials::new("svc", "s3cret"))
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("svc", "s3cret"));
        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("s3cret"));
    }
}
