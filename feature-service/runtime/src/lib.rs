#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use feature_service_core as core;
pub use feature_service_grpc as grpc;
pub use feature_service_k8s as k8s;

mod args;

pub use self::args::Args;

use self::core::{
    application, config::ApplicationConfig, InMemory, Notifier, Notifying, SharedPersistence,
    StorageKind,
};
use std::sync::Arc;

/// Builds an application's backend, wrapped so that committed mutations reach `notifier`.
fn mk_store(
    app: &ApplicationConfig,
    client: &k8s::Client,
    notifier: &Arc<dyn Notifier>,
) -> Result<SharedPersistence, application::Error> {
    match app.storage {
        StorageKind::InMemory => {
            tracing::info!(application = %app.name, "Using in-memory storage");
            Ok(Arc::new(Notifying::new(InMemory::new(), notifier.clone())))
        }
        StorageKind::ConfigMap => {
            let Some(name) = app.config_map_name.as_deref() else {
                return Err(application::Error::Config(format!(
                    "configmap name is required for application {}",
                    app.name
                )));
            };
            tracing::info!(
                application = %app.name,
                namespace = %app.namespace,
                configmap = %name,
                "Using ConfigMap storage"
            );
            let store = k8s::ConfigMapStore::namespaced(client.clone(), &app.namespace, name);
            Ok(Arc::new(Notifying::new(store, notifier.clone())))
        }
    }
}
