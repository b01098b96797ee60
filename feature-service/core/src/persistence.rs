use std::sync::Arc;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single feature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The backing store could not be reached or returned a malformed object.
    #[error("storage backend failed: {0}")]
    Backend(#[source] BoxError),

    /// The mutation was committed but the notifier failed to deliver it.
    #[error("failed to deliver notification: {0}")]
    Notify(#[source] BoxError),
}

/// Models a single application's key space.
///
/// Implementations must be safe to call concurrently. No ordering is implied among the keys
/// returned by [`Persistence::get_all`].
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn get_all(&self) -> Result<Vec<KeyValue>>;

    /// Fails with [`Error::KeyNotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<KeyValue>;

    /// Inserts or overwrites `kv.key`.
    async fn set(&self, kv: KeyValue) -> Result<()>;

    /// Inserts `kv.key` only if it is absent. An existing value is never replaced.
    async fn pre_set(&self, kv: KeyValue) -> Result<()>;

    /// Removes the key. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

pub type SharedPersistence = Arc<dyn Persistence>;

// === impl KeyValue ===

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses a `key=value` pair, splitting on the first `=`.
    pub fn parse_pair(pair: &str) -> Option<Self> {
        let (key, value) = pair.split_once('=')?;
        Some(Self::new(key, value))
    }
}

// === impl Error ===

impl Error {
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Self::Backend(error.into())
    }

    pub fn notify(error: impl Into<BoxError>) -> Self {
        Self::Notify(error.into())
    }
}
