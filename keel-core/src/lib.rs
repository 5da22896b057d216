//! # keel-core
//!
//! Pure logic for Keel (no I/O, instant tests).
//!
//! Keel is the composition root of a local-first client: it wires a local
//! store, a network monitor, a pending-writes outbox and a background
//! synchronizer together and controls their lifecycle. This crate holds the
//! parts of that job that need no I/O:
//!
//! - [`config`]: the configuration schema and the defaults merge
//! - [`lifecycle`]: client states and the ordered init/destroy plans
//!
//! The collaborators themselves and the client facade that interprets the
//! plans live in `keel-client`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod lifecycle;

pub use config::{
    merge, ConfigError, Credentials, NetworkConfig, OutboxConfig, Overlay, PartialConfig,
    PartialNetworkConfig, PartialOutboxConfig, PartialStoreConfig, PartialSyncConfig,
    ResolvedConfig, StoreConfig, SyncConfig, SyncTarget,
};
pub use lifecycle::{destroy_steps, init_steps, ClientState, DestroyStep, Held, InitStep};
