//! Lifecycle planning for the client facade.
//!
//! This module is pure: given the client state and which collaborator
//! handles it currently holds, it returns the ordered steps for `init` and
//! `destroy`. The actual I/O (opening the store, releasing the synchronizer)
//! is performed by keel-client, which interprets the steps in order.
//!
//! Ordering rules encoded here:
//! - init: store, then outbox (needs the store), then synchronizer (needs both)
//! - destroy: synchronizer before store
//! - init on an initialized client plans nothing
//! - handles left over from a failed init are reused, never rebuilt

use std::fmt;

/// Lifecycle state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Constructed, collaborators not built yet.
    #[default]
    Uninitialized,
    /// `init` completed; guarded accessors succeed.
    Initialized,
    /// Torn down by `destroy`. Guards exactly like `Uninitialized`.
    Destroyed,
}

impl ClientState {
    /// Create a new client state.
    pub fn new() -> Self {
        Self::Uninitialized
    }

    /// Whether guarded accessors may hand out handles.
    pub fn is_initialized(self) -> bool {
        matches!(self, Self::Initialized)
    }

    /// State after a successful `init`.
    pub fn after_init(self) -> Self {
        Self::Initialized
    }

    /// State after a successful `destroy`.
    ///
    /// Only an initialized client becomes `Destroyed`; destroying a client
    /// that never finished `init` leaves its state as it was.
    pub fn after_destroy(self) -> Self {
        match self {
            Self::Initialized => Self::Destroyed,
            other => other,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Which collaborator handles a client currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Held {
    /// Store handle present.
    pub store: bool,
    /// Outbox handle present.
    pub outbox: bool,
    /// Synchronizer handle present.
    pub synchronizer: bool,
}

/// A unit of collaborator work during `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Open or create the persistent store (may suspend on I/O).
    AcquireStore,
    /// Build the outbox over the store's outbox collection.
    CreateOutbox,
    /// Build the synchronizer over the store and outbox.
    CreateSynchronizer,
}

/// A unit of collaborator work during `destroy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyStep {
    /// Release the synchronizer and wait for it.
    ReleaseSynchronizer,
    /// Release the store and wait for it.
    ReleaseStore,
}

/// Plan `init`.
///
/// `sync_configured` is whether the resolved config names a sync target.
pub fn init_steps(state: ClientState, held: Held, sync_configured: bool) -> Vec<InitStep> {
    if state.is_initialized() {
        return Vec::new();
    }

    let mut steps = Vec::with_capacity(3);
    if !held.store {
        steps.push(InitStep::AcquireStore);
    }
    if !held.outbox {
        steps.push(InitStep::CreateOutbox);
    }
    if sync_configured && !held.synchronizer {
        steps.push(InitStep::CreateSynchronizer);
    }
    steps
}

/// Plan `destroy`. Absent handles are skipped, so this is always safe.
pub fn destroy_steps(held: Held) -> Vec<DestroyStep> {
    let mut steps = Vec::with_capacity(2);
    if held.synchronizer {
        steps.push(DestroyStep::ReleaseSynchronizer);
    }
    if held.store {
        steps.push(DestroyStep::ReleaseStore);
    }
    steps
}
