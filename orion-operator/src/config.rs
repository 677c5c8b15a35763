use anyhow::{bail, Context, Result};
use orion_controller::names::defaults;
use orion_controller::{CloudSettings, Credentials, StaticSecretProvider};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Where the operator itself is running, which decides `auto` placements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientEnvironment {
    Local,
    Cloud,
}

impl AmbientEnvironment {
    /// Cloud when provider credentials are present, or when running in a
    /// cluster that advertises a provider region/project. Local otherwise.
    pub fn detect(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).map(|v| !v.is_empty()).unwrap_or(false);

        if set("AWS_ACCESS_KEY_ID") && set("AWS_SECRET_ACCESS_KEY") {
            return AmbientEnvironment::Cloud;
        }
        if set("KUBERNETES_SERVICE_HOST") && (set("AWS_REGION") || set("GCP_PROJECT")) {
            return AmbientEnvironment::Cloud;
        }
        AmbientEnvironment::Local
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AmbientEnvironment::Local)
    }

    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(AmbientEnvironment::Local),
            "cloud" | "aws" => Ok(AmbientEnvironment::Cloud),
            other => bail!("ORION_AMBIENT must be 'local' or 'cloud', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ambient: AmbientEnvironment,
    pub cloud_region: String,
    pub cloud_database: Option<Credentials>,
    pub health_addr: SocketAddr,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ambient = match lookup("ORION_AMBIENT").filter(|v| !v.is_empty() && v.as_str() != "auto") {
            Some(value) => AmbientEnvironment::parse(&value)?,
            None => AmbientEnvironment::detect(&lookup),
        };

        let cloud_database = match (lookup("ORION_CLOUD_DB_USER"), lookup("ORION_CLOUD_DB_PASSWORD")) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            (Some(_), None) => bail!("ORION_CLOUD_DB_PASSWORD must be set with ORION_CLOUD_DB_USER"),
            _ => None,
        };

        Ok(Self {
            ambient,
            cloud_region: lookup("ORION_CLOUD_REGION")
                .or_else(|| lookup("AWS_REGION"))
                .unwrap_or_else(|| defaults::CLOUD_REGION.to_string()),
            cloud_database,
            health_addr: lookup("ORION_HEALTH_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8081".to_string())
                .parse()
                .context("ORION_HEALTH_ADDR must be a socket address")?,
            log_dir: lookup("ORION_LOG_DIR").map(PathBuf::from),
        })
    }

    pub fn cloud_settings(&self) -> CloudSettings {
        CloudSettings::new(self.cloud_region.clone())
    }

    pub fn secret_provider(&self) -> StaticSecretProvider {
        match &self.cloud_database {
            Some(credentials) => StaticSecretProvider::new().with_cloud_database(credentials.clone()),
            None => StaticSecretProvider::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_detect_ambient() {
        assert_eq!(AmbientEnvironment::detect(lookup(&[])), AmbientEnvironment::Local);
        assert_eq!(
            AmbientEnvironment::detect(lookup(&[("AWS_ACCESS_KEY_ID", "a"), ("AWS_SECRET_ACCESS_KEY", "b")])),
            AmbientEnvironment::Cloud
        );
        // Region alone is not enough outside a cluster
        assert_eq!(
            AmbientEnvironment::detect(lookup(&[("AWS_REGION", "eu-west-1")])),
            AmbientEnvironment::Local
        );
        assert_eq!(
            AmbientEnvironment::detect(lookup(&[("KUBERNETES_SERVICE_HOST", "10.0.0.1"), ("GCP_PROJECT", "p")])),
            AmbientEnvironment::Cloud
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.ambient, AmbientEnvironment::Local);
        assert_eq!(config.cloud_region, "us-west-2");
        assert_eq!(config.health_addr, "0.0.0.0:8081".parse::<SocketAddr>().unwrap());
        assert!(config.cloud_database.is_none());
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ORION_AMBIENT", "cloud"),
            ("ORION_CLOUD_REGION", "eu-central-1"),
            ("ORION_CLOUD_DB_USER", "admin"),
            ("ORION_CLOUD_DB_PASSWORD", "s3cret"),
            ("ORION_HEALTH_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(config.ambient, AmbientEnvironment::Cloud);
        assert_eq!(config.cloud_settings().object_store_endpoint(), "s3.eu-central-1.amazonaws.com");
        assert_eq!(config.cloud_database.unwrap().username, "admin");
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("ORION_AMBIENT", "mars")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ORION_HEALTH_ADDR", "nope")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ORION_CLOUD_DB_USER", "admin")])).is_err());
    }
}
