//! In-memory backend for tests and demos.
//!
//! Stores keep their outbox collections in memory, keyed by store name, so a
//! store reopened under the same name sees writes queued before it was
//! released. Every factory call and release is recorded as a
//! [`LifecycleEvent`] so tests can assert construction and teardown order,
//! and each step can be made to fail once.

use super::{Backend, CollaboratorError, NetworkMonitor, Outbox, PendingAction, Store, Synchronizer};
use async_trait::async_trait;
use keel_core::{NetworkConfig, OutboxConfig, StoreConfig, SyncTarget};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Something the backend or one of its handles did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Network monitor built.
    NetworkCreated,
    /// Store opened.
    StoreOpened {
        /// Store name.
        name: String,
    },
    /// Outbox built.
    OutboxCreated,
    /// Synchronizer built.
    SynchronizerCreated {
        /// Sync endpoint.
        url: String,
    },
    /// A sync pass finished.
    SyncCompleted {
        /// Actions drained from the outbox.
        pushed: usize,
    },
    /// Synchronizer released.
    SynchronizerReleased,
    /// Store released.
    StoreReleased {
        /// Store name.
        name: String,
    },
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkCreated => write!(f, "network created"),
            Self::StoreOpened { name } => write!(f, "store '{}' opened", name),
            Self::OutboxCreated => write!(f, "outbox created"),
            Self::SynchronizerCreated { url } => write!(f, "synchronizer created ({})", url),
            Self::SyncCompleted { pushed } => write!(f, "sync completed ({} pushed)", pushed),
            Self::SynchronizerReleased => write!(f, "synchronizer released"),
            Self::StoreReleased { name } => write!(f, "store '{}' released", name),
        }
    }
}

/// Shared reference to a store's outbox collection.
#[derive(Debug, Clone, Default)]
pub struct ActionCollection {
    entries: Arc<Mutex<VecDeque<PendingAction>>>,
}

impl ActionCollection {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn push(&self, action: PendingAction) {
        self.entries.lock().push_back(action);
    }

    fn snapshot(&self) -> Vec<PendingAction> {
        self.entries.lock().iter().cloned().collect()
    }

    fn drain(&self) -> Vec<PendingAction> {
        self.entries.lock().drain(..).collect()
    }
}

/// In-memory backend.
///
/// Cheap to clone; clones share events, stores and the online flag.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryBackendInner>>,
    online: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct MemoryBackendInner {
    events: Vec<LifecycleEvent>,
    stores: HashMap<String, ActionCollection>,
    fail_next_open: Option<String>,
    fail_next_outbox: Option<String>,
    fail_next_synchronizer: Option<String>,
    fail_next_sync: Option<String>,
    fail_next_store_release: Option<String>,
    fail_next_sync_release: Option<String>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new backend. The network starts online.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryBackendInner::default())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flip reachability for every monitor built by this backend.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.inner.lock().events.clone()
    }

    /// How many stores were opened.
    pub fn stores_opened(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::StoreOpened { .. }))
    }

    /// How many store releases completed.
    pub fn stores_released(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::StoreReleased { .. }))
    }

    /// How many synchronizer releases completed.
    pub fn synchronizers_released(&self) -> usize {
        self.count(|e| matches!(e, LifecycleEvent::SynchronizerReleased))
    }

    /// Cause the next `acquire_store()` to fail.
    pub fn fail_next_open(&self, error: &str) {
        self.inner.lock().fail_next_open = Some(error.to_string());
    }

    /// Cause the next `create_outbox()` to fail.
    pub fn fail_next_outbox(&self, error: &str) {
        self.inner.lock().fail_next_outbox = Some(error.to_string());
    }

    /// Cause the next `create_synchronizer()` to fail.
    pub fn fail_next_synchronizer(&self, error: &str) {
        self.inner.lock().fail_next_synchronizer = Some(error.to_string());
    }

    /// Cause the next sync pass to fail.
    pub fn fail_next_sync(&self, error: &str) {
        self.inner.lock().fail_next_sync = Some(error.to_string());
    }

    /// Cause the next store release to fail.
    pub fn fail_next_store_release(&self, error: &str) {
        self.inner.lock().fail_next_store_release = Some(error.to_string());
    }

    /// Cause the next synchronizer release to fail.
    pub fn fail_next_sync_release(&self, error: &str) {
        self.inner.lock().fail_next_sync_release = Some(error.to_string());
    }

    /// Clear events, stores and pending failures. Reachability is kept.
    pub fn reset(&self) {
        *self.inner.lock() = MemoryBackendInner::default();
    }

    fn record(&self, event: LifecycleEvent) {
        self.inner.lock().events.push(event);
    }

    fn count(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> usize {
        self.inner.lock().events.iter().filter(|e| predicate(e)).count()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Store = MemoryStore;
    type Network = MemoryNetwork;
    type Outbox = MemoryOutbox;
    type Synchronizer = MemorySynchronizer;

    async fn acquire_store(&self, config: &StoreConfig) -> Result<MemoryStore, CollaboratorError> {
        // Opening is asynchronous for real stores; keep the suspension point.
        tokio::task::yield_now().await;

        let actions = {
            let mut inner = self.inner.lock();

            if let Some(error) = inner.fail_next_open.take() {
                return Err(CollaboratorError::StoreUnavailable(error));
            }
            if config.name.trim().is_empty() {
                return Err(CollaboratorError::InvalidConfig {
                    collaborator: "store",
                    reason: "name must not be empty".to_string(),
                });
            }

            let actions = inner.stores.entry(config.name.clone()).or_default().clone();
            inner.events.push(LifecycleEvent::StoreOpened {
                name: config.name.clone(),
            });
            actions
        };

        Ok(MemoryStore {
            name: config.name.clone(),
            actions,
            backend: self.clone(),
        })
    }

    fn create_network(&self, config: &NetworkConfig) -> MemoryNetwork {
        self.record(LifecycleEvent::NetworkCreated);
        MemoryNetwork {
            online: Arc::clone(&self.online),
            ping_url: config.ping_url.clone(),
            ping_interval: config.ping_interval(),
        }
    }

    fn create_outbox(
        &self,
        actions: ActionCollection,
        config: &OutboxConfig,
    ) -> Result<MemoryOutbox, CollaboratorError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_outbox.take() {
            return Err(CollaboratorError::InvalidConfig {
                collaborator: "outbox",
                reason: error,
            });
        }
        inner.events.push(LifecycleEvent::OutboxCreated);

        Ok(MemoryOutbox {
            actions,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    fn create_synchronizer(
        &self,
        store: Arc<MemoryStore>,
        outbox: Arc<MemoryOutbox>,
        target: &SyncTarget,
    ) -> Result<MemorySynchronizer, CollaboratorError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_synchronizer.take() {
            return Err(CollaboratorError::InvalidConfig {
                collaborator: "synchronizer",
                reason: error,
            });
        }
        inner.events.push(LifecycleEvent::SynchronizerCreated {
            url: target.url.clone(),
        });

        Ok(MemorySynchronizer {
            store,
            outbox,
            target: target.clone(),
            backend: self.clone(),
            pushed: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }
}

/// In-memory store handle.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    actions: ActionCollection,
    backend: MemoryBackend,
}

impl MemoryStore {
    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Actions = ActionCollection;

    fn actions(&self) -> ActionCollection {
        self.actions.clone()
    }

    async fn release(&self) -> Result<(), CollaboratorError> {
        let mut inner = self.backend.inner.lock();
        if let Some(error) = inner.fail_next_store_release.take() {
            return Err(CollaboratorError::ReleaseFailed(error));
        }
        inner.events.push(LifecycleEvent::StoreReleased {
            name: self.name.clone(),
        });
        Ok(())
    }
}

/// In-memory network monitor. Reachability is whatever the backend says.
#[derive(Debug)]
pub struct MemoryNetwork {
    online: Arc<AtomicBool>,
    ping_url: Option<String>,
    ping_interval: Duration,
}

impl MemoryNetwork {
    /// Configured probe endpoint.
    pub fn ping_url(&self) -> Option<&str> {
        self.ping_url.as_deref()
    }

    /// Configured probe interval.
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }
}

impl NetworkMonitor for MemoryNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// In-memory FIFO outbox.
#[derive(Debug)]
pub struct MemoryOutbox {
    actions: ActionCollection,
    max_retries: u32,
    retry_delay: Duration,
}

impl MemoryOutbox {
    /// Configured retry limit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Configured retry delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn enqueue(&self, action: PendingAction) -> Result<(), CollaboratorError> {
        self.actions.push(action);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<PendingAction>, CollaboratorError> {
        Ok(self.actions.snapshot())
    }
}

/// In-memory synchronizer. A sync pass drains the outbox.
#[derive(Debug)]
pub struct MemorySynchronizer {
    store: Arc<MemoryStore>,
    outbox: Arc<MemoryOutbox>,
    target: SyncTarget,
    backend: MemoryBackend,
    pushed: AtomicUsize,
    released: AtomicBool,
}

impl MemorySynchronizer {
    /// The target this synchronizer was built with.
    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    /// Name of the store this synchronizer works on.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Total actions pushed over this synchronizer's lifetime.
    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::SeqCst)
    }

    /// Whether `release()` has completed.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synchronizer for MemorySynchronizer {
    async fn sync(&self) -> Result<(), CollaboratorError> {
        if self.is_released() {
            return Err(CollaboratorError::SyncFailed(
                "synchronizer released".to_string(),
            ));
        }
        if let Some(error) = self.backend.inner.lock().fail_next_sync.take() {
            return Err(CollaboratorError::SyncFailed(error));
        }
        if !self.backend.online.load(Ordering::SeqCst) {
            return Err(CollaboratorError::SyncFailed(
                "network unreachable".to_string(),
            ));
        }

        let drained = self.outbox.actions.drain();
        self.pushed.fetch_add(drained.len(), Ordering::SeqCst);
        self.backend.record(LifecycleEvent::SyncCompleted {
            pushed: drained.len(),
        });
        Ok(())
    }

    async fn release(&self) -> Result<(), CollaboratorError> {
        let mut inner = self.backend.inner.lock();
        if let Some(error) = inner.fail_next_sync_release.take() {
            return Err(CollaboratorError::ReleaseFailed(error));
        }
        self.released.store(true, Ordering::SeqCst);
        inner.events.push(LifecycleEvent::SynchronizerReleased);
        Ok(())
    }
}
