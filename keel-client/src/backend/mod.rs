//! Collaborator abstraction for Keel.
//!
//! The client facade does not store records, probe the network, retry writes
//! or speak a sync protocol. It consumes four collaborators through the
//! traits in this module and only decides *when* each is built and released:
//!
//! - [`Store`]: acquired asynchronously, exposes its outbox collection
//! - [`NetworkMonitor`]: built synchronously, reports reachability
//! - [`Outbox`]: built over the store's outbox collection
//! - [`Synchronizer`]: built over store + outbox when a sync target exists
//!
//! A [`Backend`] bundles the four factories. Use [`MemoryBackend`] in tests
//! and demos.
//!
//! # Example
//!
//! ```ignore
//! let backend = MemoryBackend::new();
//! let store = backend.acquire_store(&StoreConfig::default()).await?;
//! let outbox = backend.create_outbox(store.actions(), &OutboxConfig::default())?;
//! outbox.enqueue(PendingAction::new("notes", json!({"title": "hi"}))).await?;
//! ```

mod memory;

pub use memory::{
    ActionCollection, LifecycleEvent, MemoryBackend, MemoryNetwork, MemoryOutbox, MemoryStore,
    MemorySynchronizer,
};

use async_trait::async_trait;
use keel_core::{NetworkConfig, OutboxConfig, StoreConfig, SyncTarget};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by collaborators.
///
/// The client passes these through untouched.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The store could not be opened or created.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A collaborator rejected its configuration.
    #[error("invalid {collaborator} config: {reason}")]
    InvalidConfig {
        /// Which collaborator rejected it.
        collaborator: &'static str,
        /// Why.
        reason: String,
    },

    /// Releasing resources failed.
    #[error("release failed: {0}")]
    ReleaseFailed(String),

    /// Outbox operation failed.
    #[error("outbox error: {0}")]
    Outbox(String),

    /// A sync pass failed.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other collaborator-specific failure.
    #[error("{0}")]
    Other(String),
}

/// A local write waiting to be sent to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Unique identifier.
    pub id: Uuid,
    /// Collection the write targets.
    pub collection: String,
    /// The write itself.
    pub payload: serde_json::Value,
}

impl PendingAction {
    /// Create a new pending action with a random id.
    pub fn new(collection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection: collection.into(),
            payload,
        }
    }
}

/// Local persistent store handle.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Reference to the collection that backs the outbox.
    type Actions: Send + Sync;

    /// The outbox collection.
    fn actions(&self) -> Self::Actions;

    /// Release the store's resources (close files, flush).
    async fn release(&self) -> Result<(), CollaboratorError>;
}

/// Network reachability monitor handle.
///
/// Updated on the monitor's own schedule; reads are side-effect free.
pub trait NetworkMonitor: Send + Sync + 'static {
    /// Current reachability.
    fn is_online(&self) -> bool;
}

/// Pending-writes outbox handle.
#[async_trait]
pub trait Outbox: Send + Sync + 'static {
    /// Queue a local write for transmission.
    async fn enqueue(&self, action: PendingAction) -> Result<(), CollaboratorError>;

    /// Writes not yet transmitted, oldest first.
    async fn pending(&self) -> Result<Vec<PendingAction>, CollaboratorError>;
}

/// Background synchronizer handle.
#[async_trait]
pub trait Synchronizer: Send + Sync + 'static {
    /// Run one sync pass.
    async fn sync(&self) -> Result<(), CollaboratorError>;

    /// Stop background work and release resources.
    async fn release(&self) -> Result<(), CollaboratorError>;
}

/// Factories for the four collaborators.
///
/// Only [`Backend::acquire_store`] may perform I/O. The network monitor is
/// built at client construction, the rest during `init`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Store handle type.
    type Store: Store;
    /// Network monitor handle type.
    type Network: NetworkMonitor;
    /// Outbox handle type.
    type Outbox: Outbox;
    /// Synchronizer handle type.
    type Synchronizer: Synchronizer;

    /// Open or create the store.
    async fn acquire_store(&self, config: &StoreConfig) -> Result<Self::Store, CollaboratorError>;

    /// Build the network monitor. Must not block or perform I/O.
    fn create_network(&self, config: &NetworkConfig) -> Self::Network;

    /// Build the outbox over the store's outbox collection.
    fn create_outbox(
        &self,
        actions: <Self::Store as Store>::Actions,
        config: &OutboxConfig,
    ) -> Result<Self::Outbox, CollaboratorError>;

    /// Build the synchronizer. Called only when a sync target is configured.
    fn create_synchronizer(
        &self,
        store: Arc<Self::Store>,
        outbox: Arc<Self::Outbox>,
        target: &SyncTarget,
    ) -> Result<Self::Synchronizer, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pending_action_ids_are_unique() {
        let a = PendingAction::new("notes", json!({"n": 1}));
        let b = PendingAction::new("notes", json!({"n": 1}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.collection, "notes");
    }

    #[test]
    fn pending_action_round_trips_through_json() {
        let action = PendingAction::new("todos", json!({"title": "milk", "done": false}));
        let encoded = serde_json::to_string(&action).unwrap();
        let decoded: PendingAction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, action);
    }

    #[test]
    fn collaborator_errors_are_human_readable() {
        let err = CollaboratorError::InvalidConfig {
            collaborator: "store",
            reason: "name must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid store config: name must not be empty"
        );

        let err = CollaboratorError::StoreUnavailable("disk full".to_string());
        assert_eq!(err.to_string(), "store unavailable: disk full");
    }

    #[test]
    fn io_errors_pass_through() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked");
        let err: CollaboratorError = io.into();
        assert_eq!(err.to_string(), "locked");
    }
}
