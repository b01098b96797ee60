//! Feature store core
//!
//! A feature is a named string value. Features are grouped into applications, each of which owns
//! an independent key space stored in a [`Persistence`] backend:
//!
//! - [`InMemory`] keeps the key space in a process-local map.
//! - Remote backends (e.g. a Kubernetes ConfigMap) implement the same trait in other crates.
//!
//! Every backend is wrapped by [`Notifying`], which reports committed mutations to a
//! [`Notifier`]. An application's [`EditableFields`] decide which keys may be changed through the
//! live-edit path; the [`Applications`] table resolves a request's application name (or the
//! default application) to its store and policy.
//!
//! ```text
//! [ Applications ] -> [ Application ] -> [ Notifying ] -> [ Persistence ]
//!                                             |
//!                                             +-> [ Notifier ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod application;
pub mod config;
pub mod editable;
mod inmemory;
pub mod notify;
pub mod persistence;

pub use self::{
    application::{Application, Applications, RestartConfig, StorageKind, WorkloadKind},
    editable::EditableFields,
    inmemory::InMemory,
    notify::{Notification, Notifier, NotifierKind, Notifying},
    persistence::{KeyValue, Persistence, SharedPersistence},
};

/// The name of the only application in single-application mode.
pub const DEFAULT_APPLICATION: &str = "default";

/// The namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";
