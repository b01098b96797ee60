//! Start-up configuration for the application table.
//!
//! Two mutually exclusive modes are supported. When `APPLICATIONS` is unset (or blank) a single
//! application named [`DEFAULT_APPLICATION`](crate::DEFAULT_APPLICATION) is built from the flat
//! [`LegacyConfig`]. Otherwise each listed application is described by variables prefixed with
//! its upper-cased name, e.g. `MY_APP_STORAGE_TYPE` for `my-app`.
//!
//! The loader reads an explicit variable map rather than the process environment.

use crate::{
    application::{Error, RestartConfig, StorageKind, WorkloadKind},
    EditableFields, DEFAULT_APPLICATION, DEFAULT_NAMESPACE,
};
use std::collections::HashMap;

/// Describes one application before its store is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationConfig {
    pub name: String,
    pub namespace: String,
    pub storage: StorageKind,
    /// Set whenever `storage` is [`StorageKind::ConfigMap`].
    pub config_map_name: Option<String>,
    /// Unparsed `key=value` pairs, in configuration order.
    pub presets: Vec<String>,
    pub editable: EditableFields,
    pub restart: RestartConfig,
}

/// The flat, single-application settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LegacyConfig {
    pub namespace: Option<String>,
    pub storage: StorageKind,
    pub config_map_name: Option<String>,
    pub presets: Vec<String>,
    pub editable: EditableFields,
    pub restart: RestartConfig,
}

/// A validated application table description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Applications in configuration order. Never empty.
    pub applications: Vec<ApplicationConfig>,
    /// Always names one of `applications`.
    pub default: String,
}

// === impl Config ===

impl Config {
    /// Selects the loading mode from `env` and validates the result.
    pub fn load(legacy: LegacyConfig, env: &HashMap<String, String>) -> Result<Self, Error> {
        match var(env, "APPLICATIONS") {
            None => Self::legacy(legacy),
            Some(names) => Self::multi(names, env),
        }
    }

    fn legacy(legacy: LegacyConfig) -> Result<Self, Error> {
        tracing::info!("Loading single-application configuration");
        let LegacyConfig {
            namespace,
            storage,
            config_map_name,
            presets,
            editable,
            restart,
        } = legacy;

        let app = ApplicationConfig {
            name: DEFAULT_APPLICATION.to_string(),
            namespace: namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            storage,
            config_map_name: config_map_name.filter(|n| !n.is_empty()),
            presets,
            editable,
            restart,
        };
        app.validate()?;

        Ok(Self {
            default: app.name.clone(),
            applications: vec![app],
        })
    }

    fn multi(names: &str, env: &HashMap<String, String>) -> Result<Self, Error> {
        tracing::info!("Loading multi-application configuration");

        let mut applications = Vec::<ApplicationConfig>::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if applications.iter().any(|a| a.name == name) {
                return Err(Error::Config(format!("application {name} is listed twice")));
            }
            let app = ApplicationConfig::from_env(name, env)?;
            app.validate()?;
            applications.push(app);
        }

        let Some(first) = applications.first() else {
            return Err(Error::Config("no applications configured".to_string()));
        };
        let default = match var(env, "DEFAULT_APPLICATION") {
            Some(name) => name.trim().to_string(),
            None => first.name.clone(),
        };
        if !applications.iter().any(|a| a.name == default) {
            return Err(Error::Config(format!(
                "default application {default} is not configured"
            )));
        }

        Ok(Self {
            applications,
            default,
        })
    }
}

// === impl ApplicationConfig ===

impl ApplicationConfig {
    fn from_env(name: &str, env: &HashMap<String, String>) -> Result<Self, Error> {
        let prefix = env_prefix(name);
        let get = |suffix: &str| var(env, &format!("{prefix}_{suffix}"));

        let storage = match get("STORAGE_TYPE") {
            None => StorageKind::default(),
            Some(s) => s.parse().map_err(|_| {
                Error::Config(format!("invalid storage type for application {name}: {s}"))
            })?,
        };

        let kind = match get("RESTART_TYPE") {
            None => WorkloadKind::default(),
            Some(s) => s.parse().map_err(|_| {
                Error::Config(format!("invalid restart type for application {name}: {s}"))
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            namespace: get("NAMESPACE").unwrap_or(DEFAULT_NAMESPACE).to_string(),
            storage,
            config_map_name: get("CONFIGMAP_NAME").map(ToString::to_string),
            presets: get("PRESET").map(split_presets).unwrap_or_default(),
            editable: get("EDITABLE")
                .map(EditableFields::parse)
                .unwrap_or_default(),
            restart: RestartConfig {
                enabled: get("RESTART_ENABLED") == Some("true"),
                kind,
                name: get("RESTART_NAME").map(ToString::to_string),
            },
        })
    }

    fn validate(&self) -> Result<(), Error> {
        if self.storage == StorageKind::ConfigMap && self.config_map_name.is_none() {
            return Err(Error::Config(format!(
                "configmap name is required for application {} when using configmap storage",
                self.name
            )));
        }
        Ok(())
    }
}

/// Derives the variable prefix for an application: upper-cased, with `-` replaced by `_`.
pub fn env_prefix(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

/// Splits a comma-separated preset list, dropping empty entries.
pub fn split_presets(list: &str) -> Vec<String> {
    list.split(',')
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Empty values are treated as unset.
fn var<'e>(env: &'e HashMap<String, String>, key: &str) -> Option<&'e str> {
    env.get(key).map(String::as_str).filter(|v| !v.is_empty())
}
