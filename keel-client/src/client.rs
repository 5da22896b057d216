//! Client - the lifecycle controller for Keel.
//!
//! [`Client`] owns the four collaborators of a local-first client and is the
//! only place that knows in which order they are built and torn down.
//!
//! # Architecture
//!
//! The ordering rules live in keel-core as pure plans; the client interprets
//! them and performs the actual I/O through a [`Backend`].
//!
//! ```text
//! Application → Client → Backend → store / network / outbox / synchronizer
//!                  ↓
//!          keel-core (config merge + lifecycle plans)
//! ```
//!
//! # Lifecycle
//!
//! - construction resolves the config and builds the network monitor
//! - [`Client::init`] acquires the store, builds the outbox, and builds the
//!   synchronizer when a sync target is configured; a second call is a no-op
//! - [`Client::destroy`] releases the synchronizer, then the store; it is
//!   safe to call at any time and any number of times
//!
//! # Example
//!
//! ```ignore
//! use keel_client::{Client, MemoryBackend, PartialConfig};
//!
//! let client = Client::new(MemoryBackend::new(), PartialConfig::default());
//! client.init().await?;
//! let outbox = client.outbox()?;
//! client.destroy().await?;
//! ```

use keel_core::{
    destroy_steps, init_steps, merge, ClientState, DestroyStep, Held, InitStep, PartialConfig,
    ResolvedConfig,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{Backend, CollaboratorError, NetworkMonitor, Store, Synchronizer};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A guarded accessor was called outside the initialized state.
    #[error("client not initialized: call init() before {accessor}()")]
    NotInitialized {
        /// The accessor that was called.
        accessor: &'static str,
    },

    /// A collaborator failed; passed through unchanged.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// The synchronizer slot: either no background sync, or its handle.
pub enum SyncSlot<S> {
    /// Sync disabled, no target URL, or not built yet.
    NoSync,
    /// Synchronizer handle.
    Sync(Arc<S>),
}

impl<S> SyncSlot<S> {
    /// Whether a synchronizer is present.
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync(_))
    }

    /// The handle, if present.
    pub fn handle(&self) -> Option<&Arc<S>> {
        match self {
            Self::Sync(handle) => Some(handle),
            Self::NoSync => None,
        }
    }

    /// Convert into an `Option`.
    pub fn into_option(self) -> Option<Arc<S>> {
        match self {
            Self::Sync(handle) => Some(handle),
            Self::NoSync => None,
        }
    }
}

impl<S> Clone for SyncSlot<S> {
    fn clone(&self) -> Self {
        match self {
            Self::NoSync => Self::NoSync,
            Self::Sync(handle) => Self::Sync(Arc::clone(handle)),
        }
    }
}

impl<S> fmt::Debug for SyncSlot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSync => f.write_str("NoSync"),
            Self::Sync(_) => f.write_str("Sync(..)"),
        }
    }
}

/// Handles built during `init`, plus the state they belong to.
struct Handles<B: Backend> {
    state: ClientState,
    store: Option<Arc<B::Store>>,
    outbox: Option<Arc<B::Outbox>>,
    sync: SyncSlot<B::Synchronizer>,
}

impl<B: Backend> Handles<B> {
    fn new() -> Self {
        Self {
            state: ClientState::new(),
            store: None,
            outbox: None,
            sync: SyncSlot::NoSync,
        }
    }

    fn held(&self) -> Held {
        Held {
            store: self.store.is_some(),
            outbox: self.outbox.is_some(),
            synchronizer: self.sync.is_sync(),
        }
    }
}

/// The lifecycle controller.
///
/// Share it as `Arc<Client<B>>`. `init` and `destroy` on one instance are
/// serialized; accessors are synchronous and never wait on them.
pub struct Client<B: Backend> {
    backend: B,
    config: ResolvedConfig,
    network: Arc<B::Network>,
    handles: RwLock<Handles<B>>,
    lifecycle: Mutex<()>,
}

impl<B: Backend> Client<B> {
    /// Create a client from a partial config merged onto the defaults.
    ///
    /// Builds the network monitor immediately; nothing else is built until
    /// [`Client::init`].
    pub fn new(backend: B, config: PartialConfig) -> Self {
        Self::with_resolved(backend, merge(ResolvedConfig::default(), config))
    }

    /// Create a client from an already-resolved config.
    pub fn with_resolved(backend: B, config: ResolvedConfig) -> Self {
        let network = Arc::new(backend.create_network(&config.network));
        Self {
            backend,
            config,
            network,
            handles: RwLock::new(Handles::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Build the store, outbox and (if configured) synchronizer.
    ///
    /// A no-op when already initialized. On failure the state is not
    /// advanced; handles built before the failure are kept, reused by the
    /// next `init` and released by `destroy`.
    pub async fn init(&self) -> Result<(), ClientError> {
        let _lifecycle = self.lifecycle.lock().await;

        let (state, held) = {
            let handles = self.handles.read();
            (handles.state, handles.held())
        };
        if state.is_initialized() {
            tracing::debug!("init skipped: client already initialized");
            return Ok(());
        }

        let target = self.config.sync_target();
        for step in init_steps(state, held, target.is_some()) {
            match step {
                InitStep::AcquireStore => {
                    tracing::debug!("acquiring store '{}'", self.config.store.name);
                    let store = self.backend.acquire_store(&self.config.store).await?;
                    self.handles.write().store = Some(Arc::new(store));
                }
                InitStep::CreateOutbox => {
                    tracing::debug!("creating outbox");
                    let store = self.held_store("outbox")?;
                    let outbox = self
                        .backend
                        .create_outbox(store.actions(), &self.config.outbox)?;
                    self.handles.write().outbox = Some(Arc::new(outbox));
                }
                InitStep::CreateSynchronizer => {
                    let Some(target) = target.as_ref() else {
                        continue;
                    };
                    tracing::debug!("creating synchronizer for {}", target.url);
                    let store = self.held_store("sync_manager")?;
                    let outbox = self.held_outbox("sync_manager")?;
                    let sync = self.backend.create_synchronizer(store, outbox, target)?;
                    self.handles.write().sync = SyncSlot::Sync(Arc::new(sync));
                }
            }
        }

        let mut handles = self.handles.write();
        handles.state = handles.state.after_init();
        tracing::info!(
            store = %self.config.store.name,
            sync = handles.sync.is_sync(),
            "client initialized"
        );
        Ok(())
    }

    /// Release the synchronizer, then the store, and return to the
    /// pre-init state.
    ///
    /// Safe before `init` and when called repeatedly. A failing release is
    /// returned as-is; that handle is kept so a later `destroy` retries it.
    pub async fn destroy(&self) -> Result<(), ClientError> {
        let _lifecycle = self.lifecycle.lock().await;

        let held = self.handles.read().held();
        for step in destroy_steps(held) {
            match step {
                DestroyStep::ReleaseSynchronizer => {
                    let sync = self.handles.read().sync.clone();
                    if let SyncSlot::Sync(sync) = sync {
                        tracing::debug!("releasing synchronizer");
                        sync.release().await?;
                    }
                    self.handles.write().sync = SyncSlot::NoSync;
                }
                DestroyStep::ReleaseStore => {
                    let store = self.handles.read().store.clone();
                    if let Some(store) = store {
                        tracing::debug!("releasing store '{}'", self.config.store.name);
                        store.release().await?;
                    }
                    self.handles.write().store = None;
                }
            }
        }

        let mut handles = self.handles.write();
        let previous = handles.state;
        handles.outbox = None;
        handles.state = previous.after_destroy();
        if previous.is_initialized() {
            tracing::info!(store = %self.config.store.name, "client destroyed");
        } else {
            tracing::debug!("destroy on {} client", previous);
        }
        Ok(())
    }

    /// The store handle.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotInitialized`] unless the client is initialized.
    pub fn database(&self) -> Result<Arc<B::Store>, ClientError> {
        let handles = self.handles.read();
        match (handles.state.is_initialized(), &handles.store) {
            (true, Some(store)) => Ok(Arc::clone(store)),
            _ => Err(ClientError::NotInitialized {
                accessor: "database",
            }),
        }
    }

    /// The outbox handle.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotInitialized`] unless the client is initialized.
    pub fn outbox(&self) -> Result<Arc<B::Outbox>, ClientError> {
        let handles = self.handles.read();
        match (handles.state.is_initialized(), &handles.outbox) {
            (true, Some(outbox)) => Ok(Arc::clone(outbox)),
            _ => Err(ClientError::NotInitialized { accessor: "outbox" }),
        }
    }

    /// The network monitor. Available in every state.
    pub fn network(&self) -> Arc<B::Network> {
        Arc::clone(&self.network)
    }

    /// The synchronizer slot. Never fails; `NoSync` is a normal answer.
    pub fn sync_manager(&self) -> SyncSlot<B::Synchronizer> {
        self.handles.read().sync.clone()
    }

    /// Current reachability as reported by the network monitor.
    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Run one sync pass now.
    ///
    /// Returns `Ok(false)` when there is no synchronizer.
    pub async fn sync_now(&self) -> Result<bool, ClientError> {
        if !self.state().is_initialized() {
            return Err(ClientError::NotInitialized {
                accessor: "sync_now",
            });
        }
        match self.sync_manager() {
            SyncSlot::NoSync => Ok(false),
            SyncSlot::Sync(sync) => {
                sync.sync().await?;
                Ok(true)
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.handles.read().state
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The backend this client builds collaborators with.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // Used between init steps, where the previous step guarantees presence.
    fn held_store(&self, accessor: &'static str) -> Result<Arc<B::Store>, ClientError> {
        self.handles
            .read()
            .store
            .clone()
            .ok_or(ClientError::NotInitialized { accessor })
    }

    fn held_outbox(&self, accessor: &'static str) -> Result<Arc<B::Outbox>, ClientError> {
        self.handles
            .read()
            .outbox
            .clone()
            .ok_or(ClientError::NotInitialized { accessor })
    }
}

impl<B: Backend> fmt::Debug for Client<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handles = self.handles.read();
        f.debug_struct("Client")
            .field("state", &handles.state)
            .field("held", &handles.held())
            .field("sync", &handles.sync)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LifecycleEvent, MemoryBackend, Outbox, PendingAction};
    use keel_core::{PartialStoreConfig, PartialSyncConfig};
    use serde_json::json;

    fn sync_config(url: &str) -> PartialConfig {
        PartialConfig {
            sync: Some(PartialSyncConfig {
                enabled: Some(true),
                url: Some(url.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // ===========================================
    // Construction Tests
    // ===========================================

    #[test]
    fn construction_builds_only_the_network() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());

        assert_eq!(client.state(), ClientState::Uninitialized);
        assert_eq!(backend.events(), vec![LifecycleEvent::NetworkCreated]);
        assert!(client.is_online());
    }

    #[test]
    fn config_is_resolved_at_construction() {
        let partial = PartialConfig {
            store: Some(PartialStoreConfig {
                name: Some("notes".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let client = Client::new(MemoryBackend::new(), partial);
        assert_eq!(client.config().store.name, "notes");
        assert_eq!(client.config().outbox, ResolvedConfig::default().outbox);
    }

    #[test]
    fn network_is_available_before_init() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());

        let network = client.network();
        backend.set_online(false);
        assert!(!network.is_online());
        assert!(!client.is_online());
    }

    // ===========================================
    // Guard Tests
    // ===========================================

    #[test]
    fn guarded_accessors_fail_before_init() {
        let client = Client::new(MemoryBackend::new(), PartialConfig::default());

        let err = client.database().unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotInitialized {
                accessor: "database"
            }
        ));
        assert_eq!(
            err.to_string(),
            "client not initialized: call init() before database()"
        );
        assert!(matches!(
            client.outbox(),
            Err(ClientError::NotInitialized { accessor: "outbox" })
        ));
        assert!(!client.sync_manager().is_sync());
    }

    #[tokio::test]
    async fn sync_now_requires_init() {
        let client = Client::new(MemoryBackend::new(), sync_config("http://x/api"));
        assert!(matches!(
            client.sync_now().await,
            Err(ClientError::NotInitialized {
                accessor: "sync_now"
            })
        ));
    }

    // ===========================================
    // Init Tests
    // ===========================================

    #[tokio::test]
    async fn init_builds_store_and_outbox() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());

        client.init().await.unwrap();

        assert_eq!(client.state(), ClientState::Initialized);
        assert_eq!(client.database().unwrap().name(), "keel");
        assert!(client.outbox().is_ok());
        assert!(!client.sync_manager().is_sync());
        assert_eq!(
            backend.events(),
            vec![
                LifecycleEvent::NetworkCreated,
                LifecycleEvent::StoreOpened {
                    name: "keel".to_string()
                },
                LifecycleEvent::OutboxCreated,
            ]
        );
    }

    #[tokio::test]
    async fn init_builds_synchronizer_last() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), sync_config("http://x/api"));

        client.init().await.unwrap();

        let sync = client.sync_manager().into_option().unwrap();
        assert_eq!(sync.target().url, "http://x/api");
        assert_eq!(
            backend.events().last(),
            Some(&LifecycleEvent::SynchronizerCreated {
                url: "http://x/api".to_string()
            })
        );
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());

        client.init().await.unwrap();
        let first = client.database().unwrap();
        client.init().await.unwrap();

        assert_eq!(backend.stores_opened(), 1);
        assert!(Arc::ptr_eq(&first, &client.database().unwrap()));
    }

    #[tokio::test]
    async fn store_failure_propagates_and_keeps_state() {
        let backend = MemoryBackend::new();
        backend.fail_next_open("disk full");
        let client = Client::new(backend.clone(), PartialConfig::default());

        let err = client.init().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Collaborator(CollaboratorError::StoreUnavailable(_))
        ));
        assert_eq!(err.to_string(), "store unavailable: disk full");
        assert_eq!(client.state(), ClientState::Uninitialized);
        assert!(client.database().is_err());
    }

    #[tokio::test]
    async fn retry_after_partial_failure_reuses_store() {
        let backend = MemoryBackend::new();
        backend.fail_next_outbox("bad retry policy");
        let client = Client::new(backend.clone(), PartialConfig::default());

        assert!(client.init().await.is_err());
        assert_eq!(client.state(), ClientState::Uninitialized);
        assert_eq!(backend.stores_opened(), 1);

        client.init().await.unwrap();
        assert_eq!(backend.stores_opened(), 1);
        assert!(client.outbox().is_ok());
    }

    #[tokio::test]
    async fn destroy_releases_partially_built_store() {
        let backend = MemoryBackend::new();
        backend.fail_next_synchronizer("unsupported scheme");
        let client = Client::new(backend.clone(), sync_config("ftp://x"));

        assert!(client.init().await.is_err());
        assert!(!client.sync_manager().is_sync());

        client.destroy().await.unwrap();
        assert_eq!(backend.stores_released(), 1);
        assert_eq!(client.state(), ClientState::Uninitialized);
    }

    // ===========================================
    // Destroy Tests
    // ===========================================

    #[tokio::test]
    async fn destroy_before_init_is_noop() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());

        client.destroy().await.unwrap();
        client.destroy().await.unwrap();

        assert_eq!(client.state(), ClientState::Uninitialized);
        assert_eq!(backend.events(), vec![LifecycleEvent::NetworkCreated]);
    }

    #[tokio::test]
    async fn destroy_releases_in_order_and_guards_again() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), sync_config("http://x/api"));
        client.init().await.unwrap();

        client.destroy().await.unwrap();

        let events = backend.events();
        let sync_released = events
            .iter()
            .position(|e| *e == LifecycleEvent::SynchronizerReleased)
            .unwrap();
        let store_released = events
            .iter()
            .position(|e| matches!(e, LifecycleEvent::StoreReleased { .. }))
            .unwrap();
        assert!(sync_released < store_released);

        assert_eq!(client.state(), ClientState::Destroyed);
        assert!(client.database().is_err());
        assert!(client.outbox().is_err());
        assert!(!client.sync_manager().is_sync());
    }

    #[tokio::test]
    async fn destroy_twice_releases_once() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());
        client.init().await.unwrap();

        client.destroy().await.unwrap();
        client.destroy().await.unwrap();

        assert_eq!(backend.stores_released(), 1);
    }

    #[tokio::test]
    async fn failed_release_is_retried_by_next_destroy() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), sync_config("http://x/api"));
        client.init().await.unwrap();
        backend.fail_next_sync_release("still flushing");

        let err = client.destroy().await.unwrap_err();
        assert!(err.to_string().contains("still flushing"));
        assert_eq!(client.state(), ClientState::Initialized);
        assert_eq!(backend.stores_released(), 0);

        client.destroy().await.unwrap();
        assert_eq!(backend.synchronizers_released(), 1);
        assert_eq!(backend.stores_released(), 1);
        assert_eq!(client.state(), ClientState::Destroyed);
    }

    #[tokio::test]
    async fn init_after_destroy_builds_fresh_collaborators() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), PartialConfig::default());
        client.init().await.unwrap();
        client.destroy().await.unwrap();

        client.init().await.unwrap();

        assert_eq!(client.state(), ClientState::Initialized);
        assert_eq!(backend.stores_opened(), 2);
    }

    // ===========================================
    // Sync Tests
    // ===========================================

    #[tokio::test]
    async fn disabled_sync_stays_absent() {
        let partial = PartialConfig {
            sync: Some(PartialSyncConfig {
                enabled: Some(false),
                url: Some("http://x/api".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let client = Client::new(MemoryBackend::new(), partial);
        assert!(!client.sync_manager().is_sync());

        client.init().await.unwrap();
        assert!(!client.sync_manager().is_sync());
        assert!(!client.sync_now().await.unwrap());
    }

    #[tokio::test]
    async fn sync_now_drains_outbox() {
        let client = Client::new(MemoryBackend::new(), sync_config("http://x/api"));
        client.init().await.unwrap();

        let outbox = client.outbox().unwrap();
        outbox
            .enqueue(PendingAction::new("notes", json!({"title": "hi"})))
            .await
            .unwrap();

        assert!(client.sync_now().await.unwrap());
        assert!(outbox.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_failure_propagates() {
        let backend = MemoryBackend::new();
        let client = Client::new(backend.clone(), sync_config("http://x/api"));
        client.init().await.unwrap();
        backend.set_online(false);

        assert!(matches!(
            client.sync_now().await,
            Err(ClientError::Collaborator(CollaboratorError::SyncFailed(_)))
        ));
    }

    #[tokio::test]
    async fn injected_sync_failure_keeps_writes_queued() {
        let client = Client::new(MemoryBackend::new(), sync_config("http://x/api"));
        client.init().await.unwrap();

        let outbox = client.outbox().unwrap();
        outbox
            .enqueue(PendingAction::new("notes", json!({"title": "hi"})))
            .await
            .unwrap();

        client.backend().fail_next_sync("remote returned 503");
        let err = client.sync_now().await.unwrap_err();
        assert_eq!(err.to_string(), "sync failed: remote returned 503");
        assert_eq!(outbox.pending().await.unwrap().len(), 1);

        // One-shot: the next pass goes through.
        assert!(client.sync_now().await.unwrap());
        assert!(outbox.pending().await.unwrap().is_empty());
    }

    // ===========================================
    // Debug Tests
    // ===========================================

    #[tokio::test]
    async fn debug_shows_state_not_secrets() {
        let partial = PartialConfig::from_toml_str(
            "[store.credentials]\nusername = \"app\"\npassword = \"hunter2\"\n",
        )
        .unwrap();
        let client = Client::new(MemoryBackend::new(), partial);
        client.init().await.unwrap();

        let debug = format!("{:?}", client);
        assert!(debug.contains("Initialized"));
        assert!(!debug.contains("hunter2"));
    }
}
