//! Shared client registry.
//!
//! A [`ClientRegistry`] lazily creates one initialized [`Client`] and hands
//! the same instance to every caller until [`ClientRegistry::reset_client`].
//! The registry is an ordinary value: put one in application state (or a
//! `static` with `OnceLock`) for process-wide use, or create one per test so
//! tests never see each other's clients.
//!
//! The slot lock is held across construction and `init`, so concurrent
//! first calls to [`ClientRegistry::get_client`] build a single client and
//! all of them receive it.

use keel_core::PartialConfig;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::client::{Client, ClientError};

/// Lazily-initialized, resettable holder of one shared [`Client`].
pub struct ClientRegistry<B: Backend + Clone> {
    backend: B,
    slot: Mutex<Option<Arc<Client<B>>>>,
}

impl<B: Backend + Clone> ClientRegistry<B> {
    /// Create an empty registry that builds clients with `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            slot: Mutex::new(None),
        }
    }

    /// Get the shared client, creating and initializing it on first use.
    ///
    /// `config` is only used when a new client is created; later calls
    /// ignore it and return the existing instance. If `init` fails the
    /// error is returned, whatever was partially built is released, and the
    /// slot stays empty.
    pub async fn get_client(
        &self,
        config: Option<PartialConfig>,
    ) -> Result<Arc<Client<B>>, ClientError> {
        let mut slot = self.slot.lock().await;

        if let Some(client) = slot.as_ref() {
            if config.is_some() {
                tracing::debug!("registry already holds a client; ignoring supplied config");
            }
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(Client::new(self.backend.clone(), config.unwrap_or_default()));
        if let Err(err) = client.init().await {
            if let Err(cleanup) = client.destroy().await {
                tracing::warn!("releasing partially initialized client failed: {}", cleanup);
            }
            return Err(err);
        }

        tracing::info!("registry created client");
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Destroy the shared client (if any) and empty the slot.
    ///
    /// If `destroy` fails the error is returned and the client stays in the
    /// slot, so the reset can be retried.
    pub async fn reset_client(&self) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;

        if let Some(client) = slot.as_ref() {
            client.destroy().await?;
            tracing::info!("registry reset");
        }
        *slot = None;
        Ok(())
    }

    /// The current client without creating one.
    pub async fn current(&self) -> Option<Arc<Client<B>>> {
        self.slot.lock().await.clone()
    }

    /// The backend new clients are built with.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend + Clone> std::fmt::Debug for ClientRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.slot.try_lock().map(|slot| slot.is_some()).ok();
        f.debug_struct("ClientRegistry")
            .field("occupied", &occupied)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use keel_core::{ClientState, PartialStoreConfig};

    fn named(name: &str) -> PartialConfig {
        PartialConfig {
            store: Some(PartialStoreConfig {
                name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_call_creates_initialized_client() {
        let registry = ClientRegistry::new(MemoryBackend::new());
        assert!(registry.current().await.is_none());

        let client = registry.get_client(None).await.unwrap();

        assert_eq!(client.state(), ClientState::Initialized);
        assert!(registry.current().await.is_some());
    }

    #[tokio::test]
    async fn later_calls_return_same_instance_and_ignore_config() {
        let registry = ClientRegistry::new(MemoryBackend::new());

        let first = registry.get_client(Some(named("first"))).await.unwrap();
        let second = registry.get_client(Some(named("second"))).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().store.name, "first");
        assert_eq!(registry.backend().stores_opened(), 1);
    }

    #[tokio::test]
    async fn reset_on_empty_registry_is_ok() {
        let registry = ClientRegistry::new(MemoryBackend::new());
        registry.reset_client().await.unwrap();
        registry.reset_client().await.unwrap();
        assert!(registry.current().await.is_none());
    }

    #[tokio::test]
    async fn reset_then_get_builds_fresh_client() {
        let backend = MemoryBackend::new();
        let registry = ClientRegistry::new(backend.clone());

        let old = registry.get_client(None).await.unwrap();
        registry.reset_client().await.unwrap();
        assert!(registry.current().await.is_none());
        assert_eq!(old.state(), ClientState::Destroyed);

        let new = registry.get_client(None).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(new.state(), ClientState::Initialized);
        assert_eq!(backend.stores_opened(), 2);
        assert_eq!(backend.stores_released(), 1);
    }

    #[tokio::test]
    async fn failed_init_leaves_slot_empty_and_releases_store() {
        let backend = MemoryBackend::new();
        backend.fail_next_outbox("bad config");
        let registry = ClientRegistry::new(backend.clone());

        assert!(registry.get_client(None).await.is_err());
        assert!(registry.current().await.is_none());
        assert_eq!(backend.stores_released(), 1);

        assert!(registry.get_client(None).await.is_ok());
    }

    #[tokio::test]
    async fn failed_reset_keeps_client() {
        let backend = MemoryBackend::new();
        let registry = ClientRegistry::new(backend.clone());
        let client = registry.get_client(None).await.unwrap();
        backend.fail_next_store_release("locked");

        assert!(registry.reset_client().await.is_err());
        let current = registry.current().await.unwrap();
        assert!(Arc::ptr_eq(&client, &current));

        registry.reset_client().await.unwrap();
        assert!(registry.current().await.is_none());
    }

    #[tokio::test]
    async fn registries_are_independent() {
        let a = ClientRegistry::new(MemoryBackend::new());
        let b = ClientRegistry::new(MemoryBackend::new());

        let client_a = a.get_client(None).await.unwrap();
        let client_b = b.get_client(None).await.unwrap();
        assert!(!Arc::ptr_eq(&client_a, &client_b));

        a.reset_client().await.unwrap();
        assert_eq!(client_b.state(), ClientState::Initialized);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_client() {
        let backend = MemoryBackend::new();
        let registry = Arc::new(ClientRegistry::new(backend.clone()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.get_client(None).await.unwrap()
            }));
        }

        let mut clients = Vec::new();
        for task in tasks {
            clients.push(task.await.unwrap());
        }

        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(backend.stores_opened(), 1);
    }
}
