//! Local-vs-cloud placement policy

use orion_models::{Environment, Placement};

/// Decides where each piece of infrastructure lives.
///
/// Precedence: per-resource setting, then the application-wide setting, then
/// the operator's ambient environment. `auto` at either level defers to the
/// next one. The ambient flag is decided once by the caller and injected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementResolver {
    ambient_is_local: bool,
}

impl PlacementResolver {
    pub fn new(ambient_is_local: bool) -> Self {
        Self { ambient_is_local }
    }

    pub fn resolve(&self, resource_env: Option<Environment>, app_env: Option<Environment>) -> Placement {
        resolve_placement(resource_env, app_env, self.ambient_is_local)
    }
}

pub fn resolve_placement(
    resource_env: Option<Environment>,
    app_env: Option<Environment>,
    ambient_is_local: bool,
) -> Placement {
    let explicit = |env: Option<Environment>| match env {
        Some(Environment::Local) => Some(Placement::Local),
        Some(Environment::Cloud) => Some(Placement::Cloud),
        Some(Environment::Auto) | None => None,
    };

    explicit(resource_env)
        .or_else(|| explicit(app_env))
        .unwrap_or(if ambient_is_local {
            Placement::Local
        } else {
            Placement::Cloud
        })
}
