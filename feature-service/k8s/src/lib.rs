//! A [`Persistence`] backed by a single Kubernetes ConfigMap.
//!
//! The ConfigMap's `data` holds an application's entire key space. It is fetched (and created
//! empty when absent) on every call, and each mutation rewrites the whole object. Writes are
//! unconditional, so concurrent writers race and the last one wins.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use feature_service_core::persistence::{Error, KeyValue, Persistence, Result};
use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use kube::api::PostParams;
use std::collections::BTreeMap;

pub use kube::{Api, Client};

/// The subset of the Kubernetes API used by [`ConfigMapStore`].
#[async_trait::async_trait]
pub trait ConfigMapClient: Send + Sync {
    /// Returns `None` when the ConfigMap does not exist.
    async fn get_config_map(&self, name: &str) -> kube::Result<Option<ConfigMap>>;

    async fn create_config_map(&self, cm: &ConfigMap) -> kube::Result<ConfigMap>;

    async fn replace_config_map(&self, name: &str, cm: &ConfigMap) -> kube::Result<ConfigMap>;
}

#[derive(Clone, Debug)]
pub struct ConfigMapStore<C = Api<ConfigMap>> {
    client: C,
    name: String,
}

// === impl ConfigMapClient ===

#[async_trait::async_trait]
impl ConfigMapClient for Api<ConfigMap> {
    async fn get_config_map(&self, name: &str) -> kube::Result<Option<ConfigMap>> {
        self.get_opt(name).await
    }

    async fn create_config_map(&self, cm: &ConfigMap) -> kube::Result<ConfigMap> {
        self.create(&PostParams::default(), cm).await
    }

    async fn replace_config_map(&self, name: &str, cm: &ConfigMap) -> kube::Result<ConfigMap> {
        self.replace(name, &PostParams::default(), cm).await
    }
}

// === impl ConfigMapStore ===

impl ConfigMapStore {
    /// Stores an application's features in the named ConfigMap in `namespace`.
    pub fn namespaced(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self::new(Api::namespaced(client, namespace), name)
    }
}

impl<C: ConfigMapClient> ConfigMapStore<C> {
    pub fn new(client: C, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    /// Fetches the ConfigMap, creating it empty if it does not exist.
    async fn get_or_create(&self) -> Result<ConfigMap> {
        if let Some(cm) = self
            .client
            .get_config_map(&self.name)
            .await
            .map_err(Error::backend)?
        {
            return Ok(cm);
        }

        tracing::info!(configmap = %self.name, "Creating ConfigMap");
        let empty = ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..Default::default()
            },
            data: Some(BTreeMap::new()),
            ..Default::default()
        };
        match self.client.create_config_map(&empty).await {
            Ok(cm) => Ok(cm),
            // Another writer created it first.
            Err(kube::Error::Api(rsp)) if rsp.code == 409 => self
                .client
                .get_config_map(&self.name)
                .await
                .map_err(Error::backend)?
                .ok_or_else(|| Error::backend(format!("ConfigMap {} disappeared", self.name))),
            Err(error) => Err(Error::backend(error)),
        }
    }

    /// Applies `update` to the ConfigMap's data and writes the result back when `update` reports
    /// a change.
    async fn modify<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool + Send,
    {
        let mut cm = self.get_or_create().await?;
        if !update(cm.data.get_or_insert_with(BTreeMap::new)) {
            return Ok(());
        }

        // Drop the version so the write is unconditional.
        cm.metadata.resource_version = None;
        self.client
            .replace_config_map(&self.name, &cm)
            .await
            .map_err(Error::backend)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: ConfigMapClient> Persistence for ConfigMapStore<C> {
    async fn get_all(&self) -> Result<Vec<KeyValue>> {
        let cm = self.get_or_create().await?;
        Ok(cm
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<KeyValue> {
        let cm = self.get_or_create().await?;
        cm.data
            .and_then(|mut data| data.remove(key))
            .map(|value| KeyValue::new(key, value))
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    async fn set(&self, KeyValue { key, value }: KeyValue) -> Result<()> {
        tracing::debug!(configmap = %self.name, %key, "Setting");
        self.modify(move |data| {
            data.insert(key, value);
            true
        })
        .await
    }

    async fn pre_set(&self, KeyValue { key, value }: KeyValue) -> Result<()> {
        self.modify(move |data| {
            if data.contains_key(&key) {
                return false;
            }
            data.insert(key, value);
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::debug!(configmap = %self.name, %key, "Deleting");
        self.modify(|data| data.remove(key).is_some()).await
    }

    async fn count(&self) -> Result<usize> {
        let cm = self.get_or_create().await?;
        Ok(cm.data.map(|d| d.len()).unwrap_or(0))
    }
}
