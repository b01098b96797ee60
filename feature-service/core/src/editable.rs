use ahash::AHashSet as HashSet;
use thiserror::Error;

/// Restricts which existing keys may be changed through the live-edit path.
///
/// An empty set places no restrictions. A non-empty set permits edits only to member keys that
/// already exist, and forbids creating or deleting any key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditableFields(HashSet<String>);

/// An edit rejected by an application's [`EditableFields`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Denied {
    #[error("creating new fields is not allowed when editable restrictions are active")]
    CreateNotAllowed,

    #[error("field '{0}' is not editable")]
    NotEditable(String),

    #[error("deleting fields is not allowed when editable restrictions are active")]
    DeleteNotAllowed,
}

// === impl EditableFields ===

impl EditableFields {
    /// Parses a comma-separated list of keys, ignoring surrounding whitespace and blank entries.
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    pub fn is_restricted(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn is_editable(&self, key: &str) -> bool {
        !self.is_restricted() || self.0.contains(key)
    }

    /// Checks a `set`, given whether the key is present in the store.
    pub fn check_set(&self, key: &str, exists: bool) -> Result<(), Denied> {
        if !self.is_restricted() {
            return Ok(());
        }
        if !exists {
            return Err(Denied::CreateNotAllowed);
        }
        if !self.0.contains(key) {
            return Err(Denied::NotEditable(key.to_string()));
        }
        Ok(())
    }

    pub fn check_delete(&self) -> Result<(), Denied> {
        if self.is_restricted() {
            return Err(Denied::DeleteNotAllowed);
        }
        Ok(())
    }

    /// Returns the member keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = self.0.iter().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }
}

impl FromIterator<String> for EditableFields {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
