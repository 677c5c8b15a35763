//! In-cluster infrastructure rendered from YAML templates

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use orion_models::{Application, InfraKind};
use serde::de::DeserializeOwned;
use tera::{Context as TeraContext, Tera};

use super::ProvisionError;
use crate::names::{self, defaults};
use crate::secrets::Credentials;
use crate::store::ManagedObject;

const POSTGRES_PVC: &str = "postgres-pvc";
const POSTGRES_STATEFULSET: &str = "postgres-statefulset";
const POSTGRES_SERVICE: &str = "postgres-service";
const REDIS_DEPLOYMENT: &str = "redis-deployment";
const REDIS_SERVICE: &str = "redis-service";
const MINIO_DEPLOYMENT: &str = "minio-deployment";
const MINIO_SERVICE: &str = "minio-service";

/// Manifest templates for local infrastructure, parsed once
pub struct LocalTemplates {
    tera: Tera,
}

impl LocalTemplates {
    pub fn load() -> Result<Self, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (POSTGRES_PVC, include_str!("../../templates/postgres-pvc.yaml")),
            (POSTGRES_STATEFULSET, include_str!("../../templates/postgres-statefulset.yaml")),
            (POSTGRES_SERVICE, include_str!("../../templates/postgres-service.yaml")),
            (REDIS_DEPLOYMENT, include_str!("../../templates/redis-deployment.yaml")),
            (REDIS_SERVICE, include_str!("../../templates/redis-service.yaml")),
            (MINIO_DEPLOYMENT, include_str!("../../templates/minio-deployment.yaml")),
            (MINIO_SERVICE, include_str!("../../templates/minio-service.yaml")),
        ])?;
        Ok(Self { tera })
    }

    fn render<K: DeserializeOwned>(&self, template: &str, ctx: &TeraContext) -> Result<K, ProvisionError> {
        let yaml = self
            .tera
            .render(template, ctx)
            .map_err(|source| ProvisionError::Template {
                template: template.to_string(),
                source,
            })?;

        serde_yaml::from_str(&yaml).map_err(|source| ProvisionError::Manifest {
            template: template.to_string(),
            source,
        })
    }

    /// Context shared by every template of one kind
    fn base_context(&self, app: &Application, namespace: &str, kind: InfraKind) -> TeraContext {
        let app_name = app.metadata.name.clone().unwrap_or_default();

        let mut ctx = TeraContext::new();
        ctx.insert("name", &names::infra_name(&app_name, kind));
        ctx.insert("app", &app_name);
        ctx.insert("namespace", namespace);
        ctx.insert("component", kind.component());
        ctx.insert("managed_by", names::MANAGED_BY);
        ctx
    }

    /// PVC, StatefulSet and Service for a single-instance PostgreSQL
    pub fn database(
        &self,
        app: &Application,
        namespace: &str,
        credentials: &Credentials,
    ) -> Result<Vec<ManagedObject>, ProvisionError> {
        let spec = app.spec.infrastructure.database.clone().unwrap_or_default();
        let app_name = app.metadata.name.clone().unwrap_or_default();

        let mut ctx = self.base_context(app, namespace, InfraKind::Database);
        ctx.insert("claim_name", &names::database_claim_name(&app_name));
        ctx.insert("port", &names::POSTGRES_PORT);
        let version = non_empty(spec.version.as_deref()).unwrap_or(defaults::POSTGRES_VERSION);
        ctx.insert("image", &format!("postgres:{}", version));
        ctx.insert(
            "storage_size",
            non_empty(spec.local_storage_size.as_deref()).unwrap_or(defaults::LOCAL_STORAGE_SIZE),
        );
        ctx.insert("database", &database_name(app));
        ctx.insert("username", &credentials.username);
        ctx.insert("password", &credentials.password);

        let pvc: PersistentVolumeClaim = self.render(POSTGRES_PVC, &ctx)?;
        let statefulset: StatefulSet = self.render(POSTGRES_STATEFULSET, &ctx)?;
        let service: Service = self.render(POSTGRES_SERVICE, &ctx)?;

        Ok(vec![
            ManagedObject::PersistentVolumeClaim(pvc),
            ManagedObject::StatefulSet(statefulset),
            ManagedObject::Service(service),
        ])
    }

    /// Deployment and Service for a single Redis
    pub fn cache(&self, app: &Application, namespace: &str) -> Result<Vec<ManagedObject>, ProvisionError> {
        let spec = app.spec.infrastructure.cache.clone().unwrap_or_default();

        let mut ctx = self.base_context(app, namespace, InfraKind::Cache);
        ctx.insert("port", &names::REDIS_PORT);
        let version = non_empty(spec.version.as_deref()).unwrap_or(defaults::REDIS_VERSION);
        ctx.insert("image", &format!("redis:{}", version));

        let deployment: Deployment = self.render(REDIS_DEPLOYMENT, &ctx)?;
        let service: Service = self.render(REDIS_SERVICE, &ctx)?;

        Ok(vec![ManagedObject::Deployment(deployment), ManagedObject::Service(service)])
    }

    /// Deployment and Service for a MinIO server with its console exposed
    pub fn object_store(
        &self,
        app: &Application,
        namespace: &str,
        credentials: &Credentials,
    ) -> Result<Vec<ManagedObject>, ProvisionError> {
        let mut ctx = self.base_context(app, namespace, InfraKind::ObjectStore);
        ctx.insert("image", defaults::MINIO_IMAGE);
        ctx.insert("port", &names::MINIO_API_PORT);
        ctx.insert("console_port", &names::MINIO_CONSOLE_PORT);
        ctx.insert("access_key", &credentials.username);
        ctx.insert("secret_key", &credentials.password);

        let deployment: Deployment = self.render(MINIO_DEPLOYMENT, &ctx)?;
        let service: Service = self.render(MINIO_SERVICE, &ctx)?;

        Ok(vec![ManagedObject::Deployment(deployment), ManagedObject::Service(service)])
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Database name the application connects to
pub fn database_name(app: &Application) -> String {
    app.spec
        .infrastructure
        .database
        .as_ref()
        .and_then(|d| non_empty(d.database_name.as_deref()))
        .unwrap_or(defaults::DATABASE_NAME)
        .to_string()
}

/// Bucket name for a locally placed object store
pub fn local_bucket_name(app: &Application) -> String {
    app.spec
        .infrastructure
        .object_store
        .as_ref()
        .and_then(|s| non_empty(s.bucket_name.as_deref()))
        .unwrap_or(defaults::LOCAL_BUCKET)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use orion_models::{ApplicationSpec, CacheSpec, DatabaseSpec, InfrastructureSpec, ObjectStoreSpec};

    fn app() -> Application {
        let mut app = Application::new(
            "shop",
            ApplicationSpec {
                image: "shop:1.0".to_string(),
                infrastructure: InfrastructureSpec {
                    database: Some(DatabaseSpec {
                        version: Some("14.9".to_string()),
                        database_name: Some("orders".to_string()),
                        ..Default::default()
                    }),
                    cache: Some(CacheSpec::default()),
                    object_store: Some(ObjectStoreSpec::default()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        app.metadata.namespace = Some("default".to_string());
        app
    }

    #[test]
    fn test_database_manifests() {
        let templates = LocalTemplates::load().unwrap();
        let objects = templates
            .database(&app(), "default", &Credentials::new("appuser", "localpassword"))
            .unwrap();

        let kinds: Vec<_> = objects.iter().map(|o| (o.kind(), o.name().to_string())).collect();
        assert_eq!(
            kinds,
            vec![
                ("PersistentVolumeClaim", "shop-postgres-pvc".to_string()),
                ("StatefulSet", "shop-postgres".to_string()),
                ("Service", "shop-postgres".to_string()),
            ]
        );

        let ManagedObject::PersistentVolumeClaim(pvc) = &objects[0] else {
            panic!("expected a PVC");
        };
        let requests = pvc
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("2Gi".to_string())));

        let ManagedObject::StatefulSet(sts) = &objects[1] else {
            panic!("expected a StatefulSet");
        };
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("postgres:14.9"));
        let env = container.env.as_ref().unwrap();
        assert!(env
            .iter()
            .any(|e| e.name == "POSTGRES_DB" && e.value.as_deref() == Some("orders")));
        assert!(env
            .iter()
            .any(|e| e.name == "POSTGRES_USER" && e.value.as_deref() == Some("appuser")));
    }

    #[test]
    fn test_cache_uses_default_version() {
        let templates = LocalTemplates::load().unwrap();
        let objects = templates.cache(&app(), "default").unwrap();
        let ManagedObject::Deployment(deployment) = &objects[0] else {
            panic!("expected a Deployment");
        };
        let pod = deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers[0].image.as_deref(), Some("redis:7"));
        assert_eq!(objects[1].name(), "shop-redis");
    }

    #[test]
    fn test_object_store_exposes_console() {
        let templates = LocalTemplates::load().unwrap();
        let objects = templates
            .object_store(&app(), "default", &Credentials::new("minioadmin", "minioadmin"))
            .unwrap();
        let ManagedObject::Service(service) = &objects[1] else {
            panic!("expected a Service");
        };
        let ports: Vec<i32> = service
            .spec
            .as_ref()
            .unwrap()
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.port)
            .collect();
        assert_eq!(ports, vec![9000, 9001]);
    }

    #[test]
    fn test_user_values_cannot_add_fields() {
        let mut app = app();
        app.spec.infrastructure.database = Some(DatabaseSpec {
            version: Some("16\"\n          securityContext:\n            privileged: true\n          x: \"".to_string()),
            database_name: Some(
                "webapp\"\n            - name: INJECTED\n              value: \"pwned".to_string(),
            ),
            local_storage_size: Some("1Gi\"\n  storageClassName: \"evil".to_string()),
            ..Default::default()
        });
        app.spec.infrastructure.cache = Some(CacheSpec {
            version: Some("7\"\n          command: [\"sh\"]\n          x: \"".to_string()),
            ..Default::default()
        });

        let templates = LocalTemplates::load().unwrap();
        let objects = templates
            .database(&app, "default", &Credentials::new("appuser", "localpassword"))
            .unwrap();

        let ManagedObject::PersistentVolumeClaim(pvc) = &objects[0] else {
            panic!("expected a PVC");
        };
        let pvc_spec = pvc.spec.as_ref().unwrap();
        assert!(pvc_spec.storage_class_name.is_none());
        let requests = pvc_spec.resources.as_ref().and_then(|r| r.requests.as_ref()).unwrap();
        assert_eq!(
            requests.get("storage"),
            Some(&Quantity("1Gi\"\n  storageClassName: \"evil".to_string()))
        );

        let ManagedObject::StatefulSet(sts) = &objects[1] else {
            panic!("expected a StatefulSet");
        };
        let container = &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert!(container.security_context.is_none());
        let env: Vec<&str> = container
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(env, vec!["POSTGRES_DB", "POSTGRES_USER", "POSTGRES_PASSWORD", "PGDATA"]);
        assert_eq!(
            container.env.as_ref().unwrap()[0].value.as_deref(),
            Some("webapp\"\n            - name: INJECTED\n              value: \"pwned")
        );

        let objects = templates.cache(&app, "default").unwrap();
        let ManagedObject::Deployment(deployment) = &objects[0] else {
            panic!("expected a Deployment");
        };
        let container = &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert!(container.command.is_none());
        assert!(container.image.as_deref().unwrap().starts_with("redis:7\""));
    }

    #[test]
    fn test_names_and_defaults() {
        let mut app = app();
        assert_eq!(database_name(&app), "orders");
        assert_eq!(local_bucket_name(&app), "default-bucket");

        app.spec.infrastructure.object_store = Some(ObjectStoreSpec {
            bucket_name: Some("uploads".to_string()),
            ..Default::default()
        });
        app.spec.infrastructure.database = None;
        assert_eq!(local_bucket_name(&app), "uploads");
        assert_eq!(database_name(&app), "webapp");
    }
}
