//! Change notifications.
//!
//! [`Notifying`] decorates any [`Persistence`] so that every committed `set` and `delete` is
//! reported to a [`Notifier`]. Delivery is synchronous with the mutating call: when the notifier
//! fails the call fails, although the store has already been changed. Seeding through `pre_set`
//! and reads are never reported.

use crate::persistence::{BoxError, Error, KeyValue, Persistence, Result};
use std::{fmt, str::FromStr, sync::Arc};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Update,
    Delete,
}

/// Describes a committed mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub action: Action,
    pub key: String,
    /// Absent for deletions.
    pub value: Option<String>,
}

/// A sink for notifications.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), BoxError>;
}

/// Discards every notification.
#[derive(Clone, Debug, Default)]
pub struct NoneNotifier(());

/// Emits each notification as a log event.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier(());

/// Selects a [`Notifier`] implementation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NotifierKind {
    None,
    #[default]
    Log,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid notifier type: {0}")]
pub struct InvalidNotifierKind(String);

/// Wraps a store so that each committed mutation is reported.
#[derive(Clone)]
pub struct Notifying<P> {
    inner: P,
    notifier: Arc<dyn Notifier>,
}

// === impl Action ===

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

// === impl Notification ===

impl Notification {
    pub fn create(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: Action::Create,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn update(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: Action::Update,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            action: Action::Delete,
            key: key.into(),
            value: None,
        }
    }
}

// === impl NoneNotifier ===

#[async_trait::async_trait]
impl Notifier for NoneNotifier {
    async fn notify(&self, _: Notification) -> Result<(), BoxError> {
        Ok(())
    }
}

// === impl LogNotifier ===

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        Notification { action, key, value }: Notification,
    ) -> Result<(), BoxError> {
        tracing::info!(%action, %key, ?value, "Notification");
        Ok(())
    }
}

// === impl NotifierKind ===

impl NotifierKind {
    /// Builds the configured notifier. Disabled notifications always use a no-op sink.
    pub fn build(self, enabled: bool) -> Arc<dyn Notifier> {
        match (enabled, self) {
            (false, _) | (true, Self::None) => {
                tracing::info!("Notifications disabled");
                Arc::new(NoneNotifier::default())
            }
            (true, Self::Log) => {
                tracing::info!("Log notifier selected");
                Arc::new(LogNotifier::default())
            }
        }
    }
}

impl FromStr for NotifierKind {
    type Err = InvalidNotifierKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "log" => Ok(Self::Log),
            s => Err(InvalidNotifierKind(s.to_string())),
        }
    }
}

// === impl Notifying ===

impl<P> Notifying<P> {
    pub fn new(inner: P, notifier: Arc<dyn Notifier>) -> Self {
        Self { inner, notifier }
    }
}

impl<P: fmt::Debug> fmt::Debug for Notifying<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifying")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<P: Persistence> Persistence for Notifying<P> {
    async fn get_all(&self) -> Result<Vec<KeyValue>> {
        self.inner.get_all().await
    }

    async fn get(&self, key: &str) -> Result<KeyValue> {
        self.inner.get(key).await
    }

    async fn set(&self, kv: KeyValue) -> Result<()> {
        let notification = Notification::update(kv.key.clone(), kv.value.clone());
        self.inner.set(kv).await?;
        self.notifier
            .notify(notification)
            .await
            .map_err(Error::Notify)
    }

    async fn pre_set(&self, kv: KeyValue) -> Result<()> {
        self.inner.pre_set(kv).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await?;
        self.notifier
            .notify(Notification::delete(key))
            .await
            .map_err(Error::Notify)
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
