//! # keel-client
//!
//! Composition root and lifecycle controller for a local-first client.
//!
//! Applications embed this crate to get one coherent handle over four
//! independently-owned collaborators: a local store, a network monitor, a
//! pending-writes outbox and a background synchronizer.
//!
//! ## Features
//!
//! - **Ordered lifecycle**: store → outbox → synchronizer on init,
//!   synchronizer → store on destroy
//! - **Idempotent**: `init` builds collaborators at most once, `destroy` is
//!   always safe
//! - **Guarded accessors**: store and outbox only after `init`
//! - **Pluggable collaborators**: anything implementing [`Backend`]
//! - **Shared instance**: [`ClientRegistry`] memoizes one client and resets
//!   it on demand
//!
//! ## Example
//!
//! ```ignore
//! use keel_client::{ClientRegistry, MemoryBackend, PartialConfig};
//!
//! let registry = ClientRegistry::new(MemoryBackend::new());
//! let client = registry.get_client(Some(PartialConfig::default())).await?;
//!
//! let outbox = client.outbox()?;
//! outbox.enqueue(PendingAction::new("notes", json!({"title": "hi"}))).await?;
//! client.sync_now().await?;
//!
//! registry.reset_client().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod client;
pub mod registry;

pub use backend::{
    ActionCollection, Backend, CollaboratorError, LifecycleEvent, MemoryBackend, MemoryNetwork,
    MemoryOutbox, MemoryStore, MemorySynchronizer, NetworkMonitor, Outbox, PendingAction, Store,
    Synchronizer,
};
pub use client::{Client, ClientError, SyncSlot};
pub use registry::ClientRegistry;

pub use keel_core::{ClientState, PartialConfig, ResolvedConfig};
