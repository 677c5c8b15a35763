//! Workload objects for an application: its Deployment, its Service and the
//! environment that wires the container to its infrastructure.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use orion_models::{Application, ApplicationStatus, Placement};
use std::sync::Arc;

use crate::names;
use crate::provisioner::database_name;
use crate::secrets::SecretProvider;

pub struct Synthesizer {
    secrets: Arc<dyn SecretProvider>,
}

impl Synthesizer {
    pub fn new(secrets: Arc<dyn SecretProvider>) -> Self {
        Self { secrets }
    }

    /// Container environment: user entries in key order, then one block per
    /// provisioned resource recorded in `status`
    pub fn build_environment(&self, app: &Application, status: &ApplicationStatus) -> Vec<EnvVar> {
        let mut env: Vec<EnvVar> = app
            .spec
            .env
            .iter()
            .map(|(name, value)| env_var(name, value))
            .collect();

        if let Some(database) = status.database.as_ref().filter(|e| !e.endpoint.is_empty()) {
            let userinfo = self
                .secrets
                .database_credentials(database.placement)
                .map(|c| format!("{}:{}@", c.username, c.password))
                .unwrap_or_default();
            env.push(env_var(
                "DATABASE_URL",
                &format!("postgres://{}{}/{}", userinfo, database.endpoint, database_name(app)),
            ));
        }

        if let Some(cache) = status.cache.as_ref().filter(|e| !e.endpoint.is_empty()) {
            env.push(env_var("REDIS_URL", &format!("redis://{}", cache.endpoint)));
        }

        if let Some(storage) = status.object_store.as_ref() {
            if let Some(bucket) = storage.bucket.as_deref().filter(|b| !b.is_empty()) {
                env.push(env_var("S3_BUCKET", bucket));
            }
            if storage.placement == Placement::Local {
                env.push(env_var("S3_ENDPOINT", &format!("http://{}", storage.endpoint)));
                if let Some(keys) = self.secrets.object_store_credentials(Placement::Local) {
                    env.push(env_var("S3_ACCESS_KEY", &keys.username));
                    env.push(env_var("S3_SECRET_KEY", &keys.password));
                }
            }
        }

        env
    }

    pub fn build_deployment(&self, app: &Application, status: &ApplicationStatus) -> Deployment {
        let name = app.name_any();

        Deployment {
            metadata: self.metadata(app),
            spec: Some(DeploymentSpec {
                replicas: Some(app.spec.resolved_replicas()),
                selector: LabelSelector {
                    match_labels: Some(names::workload_selector(&name)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(names::workload_selector(&name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.clone(),
                            image: Some(app.spec.image.clone()),
                            ports: Some(vec![ContainerPort {
                                container_port: app.spec.resolved_port(),
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            }]),
                            env: Some(self.build_environment(app, status)),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn build_service(&self, app: &Application) -> Service {
        Service {
            metadata: self.metadata(app),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(names::workload_selector(&app.name_any())),
                ports: Some(vec![ServicePort {
                    port: names::SERVICE_PORT,
                    target_port: Some(IntOrString::Int(app.spec.resolved_port())),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn metadata(&self, app: &Application) -> ObjectMeta {
        ObjectMeta {
            name: Some(app.name_any()),
            namespace: app.namespace(),
            labels: Some(names::workload_labels(&app.name_any())),
            owner_references: app.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        }
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// The parts of a workload the controller owns
#[derive(Debug, PartialEq)]
struct WorkloadShape<'a> {
    replicas: Option<i32>,
    image: Option<&'a str>,
    ports: Vec<i32>,
    env: Vec<(&'a str, Option<&'a str>)>,
}

fn shape(deployment: &Deployment) -> Option<WorkloadShape<'_>> {
    let spec = deployment.spec.as_ref()?;
    let container = spec.template.spec.as_ref()?.containers.first()?;

    Some(WorkloadShape {
        replicas: spec.replicas,
        image: container.image.as_deref(),
        ports: container
            .ports
            .iter()
            .flatten()
            .map(|p| p.container_port)
            .collect(),
        env: container
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.as_str(), e.value.as_deref()))
            .collect(),
    })
}

/// Whether `live` differs from `desired` in replicas, image, port or env
pub fn deployment_drifted(live: &Deployment, desired: &Deployment) -> bool {
    shape(live) != shape(desired)
}

/// `live` with the controller-owned parts of `desired` written over it
pub fn apply_desired(live: &Deployment, desired: &Deployment) -> Deployment {
    let mut updated = live.clone();
    updated.spec = desired.spec.clone();
    let labels = updated.metadata.labels.get_or_insert_with(Default::default);
    labels.extend(desired.metadata.labels.clone().unwrap_or_default());
    updated
}
