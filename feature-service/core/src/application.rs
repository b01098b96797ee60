use crate::{
    config::{ApplicationConfig, Config},
    persistence, EditableFields, KeyValue, SharedPersistence,
};
use ahash::AHashMap as HashMap;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// An independent key space with its own store and edit policy.
///
/// Applications are built once at start-up and never change; only the contents of their store
/// do.
pub struct Application {
    pub name: String,
    pub namespace: String,
    pub storage: StorageKind,
    pub config_map_name: Option<String>,
    pub presets: Vec<String>,
    pub editable: EditableFields,
    pub restart: RestartConfig,
    pub persistence: SharedPersistence,
}

/// The application table.
///
/// Lookups with an empty name resolve to the default application.
pub struct Applications {
    apps: Vec<Arc<Application>>,
    by_name: HashMap<String, usize>,
    default: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum StorageKind {
    #[default]
    InMemory,
    ConfigMap,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    #[default]
    Deployment,
    StatefulSet,
    DaemonSet,
}

/// Identifies the workload to restart after features change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestartConfig {
    pub enabled: bool,
    pub kind: WorkloadKind,
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to pre-set key-value for application {application}: {source}")]
    Persistence {
        application: String,
        #[source]
        source: persistence::Error,
    },
}

#[derive(Debug, Error)]
#[error("invalid {kind}: {value}")]
pub struct InvalidKind {
    kind: &'static str,
    value: String,
}

// === impl Application ===

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("storage", &self.storage)
            .field("config_map_name", &self.config_map_name)
            .field("editable", &self.editable)
            .field("restart", &self.restart)
            .finish_non_exhaustive()
    }
}

// === impl Applications ===

impl Applications {
    /// Builds the table from a validated configuration, creating each application's store with
    /// `mk_store`.
    pub fn build<F>(config: Config, mut mk_store: F) -> Result<Self, Error>
    where
        F: FnMut(&ApplicationConfig) -> Result<SharedPersistence, Error>,
    {
        let Config {
            applications,
            default,
        } = config;

        let mut apps = Vec::with_capacity(applications.len());
        let mut by_name = HashMap::with_capacity(applications.len());
        for config in applications {
            let persistence = mk_store(&config)?;
            let ApplicationConfig {
                name,
                namespace,
                storage,
                config_map_name,
                presets,
                editable,
                restart,
            } = config;
            tracing::info!(
                application = %name,
                %namespace,
                %storage,
                configmap = ?config_map_name,
                "Loaded application"
            );

            if by_name.insert(name.clone(), apps.len()).is_some() {
                return Err(Error::Config(format!("application {name} is listed twice")));
            }
            apps.push(Arc::new(Application {
                name,
                namespace,
                storage,
                config_map_name,
                presets,
                editable,
                restart,
                persistence,
            }));
        }

        if !by_name.contains_key(&default) {
            return Err(Error::Config(format!(
                "default application {default} is not configured"
            )));
        }
        tracing::info!(count = apps.len(), %default, "Application configuration complete");

        Ok(Self {
            apps,
            by_name,
            default,
        })
    }

    /// Resolves an application by name. An empty name selects the default application.
    pub fn get(&self, name: &str) -> Result<&Arc<Application>, Error> {
        let name = if name.is_empty() {
            self.default.as_str()
        } else {
            name
        };
        self.by_name
            .get(name)
            .map(|&i| &self.apps[i])
            .ok_or_else(|| Error::ApplicationNotFound(name.to_string()))
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Iterates over the applications in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Application>> {
        self.apps.iter()
    }

    /// Seeds an application's store with its configured presets.
    ///
    /// Malformed pairs are skipped. The first store failure aborts seeding.
    pub async fn preset(&self, name: &str) -> Result<(), Error> {
        let app = self.get(name)?;
        for pair in &app.presets {
            let Some(kv) = KeyValue::parse_pair(pair) else {
                tracing::warn!(
                    application = %app.name,
                    preset = %pair,
                    "Invalid preset format, expected key=value"
                );
                continue;
            };

            tracing::info!(application = %app.name, key = %kv.key, value = %kv.value, "Pre-setting");
            let key = kv.key.clone();
            if let Err(source) = app.persistence.pre_set(kv).await {
                tracing::error!(application = %app.name, %key, error = %source, "Failed to pre-set");
                return Err(Error::Persistence {
                    application: app.name.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Seeds every application, in configuration order.
    pub async fn preset_all(&self) -> Result<(), Error> {
        for app in &self.apps {
            self.preset(&app.name).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Applications {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Applications")
            .field("apps", &self.apps)
            .field("default", &self.default)
            .finish()
    }
}

// === impl StorageKind ===

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "inmemory",
            Self::ConfigMap => "configmap",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = InvalidKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inmemory" => Ok(Self::InMemory),
            "configmap" => Ok(Self::ConfigMap),
            s => Err(InvalidKind {
                kind: "storage type",
                value: s.to_string(),
            }),
        }
    }
}

// === impl WorkloadKind ===

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::StatefulSet => "statefulset",
            Self::DaemonSet => "daemonset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = InvalidKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deployment" => Ok(Self::Deployment),
            "statefulset" => Ok(Self::StatefulSet),
            "daemonset" => Ok(Self::DaemonSet),
            s => Err(InvalidKind {
                kind: "workload type",
                value: s.to_string(),
            }),
        }
    }
}
