// ABOUTME: Bounded in-memory cache of tool sessions with per-key single flight
// ABOUTME: LRU eviction, idle expiry and a background sweep; removed sessions are closed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, info};

use super::ToolSessionKey;
use crate::config::SessionCacheConfig;
use crate::errors::AppResult;
use crate::tools::ToolSession;

/// Resident slot for one key
///
/// The `OnceCell` is shared by every caller that looked the key up while the
/// session was being established, so they all await the same establishment.
struct CacheEntry {
    slot: Arc<OnceCell<Arc<ToolSession>>>,
    last_used: Instant,
}

impl CacheEntry {
    fn new() -> Self {
        Self {
            slot: Arc::new(OnceCell::new()),
            last_used: Instant::now(),
        }
    }

    /// In-flight establishments never expire
    fn is_idle(&self, idle_ttl: Duration) -> bool {
        self.slot.initialized() && self.last_used.elapsed() >= idle_ttl
    }
}

type SessionStore = Arc<Mutex<LruCache<ToolSessionKey, CacheEntry>>>;

/// Process-wide cache of established tool sessions
///
/// Uses `Arc<Mutex<LruCache>>` so the background sweep shares the store.
/// The mutex is never held across a remote call: establishment runs on the
/// per-key `OnceCell`, and sessions leaving the cache are closed after the
/// lock is released.
pub struct ToolSessionCache {
    store: SessionStore,
    idle_ttl: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ToolSessionCache {
    /// Capacity used when the configuration asks for zero entries
    const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
        Some(n) => n,
        None => unreachable!(),
    };

    /// Create the cache and, when enabled, its background expiry sweep
    ///
    /// Must be called inside a tokio runtime when background cleanup is enabled.
    #[must_use]
    pub fn new(config: &SessionCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(Self::DEFAULT_CAPACITY);
        let store: SessionStore = Arc::new(Mutex::new(LruCache::new(capacity)));
        let idle_ttl = config.idle_ttl;

        let shutdown_tx = if config.enable_background_cleanup {
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            let store_clone = Arc::clone(&store);
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cleanup_interval);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            Self::cleanup_expired(&store_clone, idle_ttl).await;
                        }
                        _ = shutdown_rx.recv() => {
                            debug!("Tool session cleanup task received shutdown signal");
                            break;
                        }
                    }
                }
            });

            Some(shutdown_tx)
        } else {
            None
        };

        Self {
            store,
            idle_ttl,
            shutdown_tx,
        }
    }

    /// Return the session for `key`, establishing it on a miss
    ///
    /// Concurrent misses for one key run `establish` once and share its
    /// result. A failed establishment is not cached.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `establish`.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &ToolSessionKey,
        establish: F,
    ) -> AppResult<Arc<ToolSession>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<ToolSession>>,
    {
        let (slot, retired) = {
            let mut store = self.store.lock().await;
            let mut retired = Self::take_idle(&mut store, self.idle_ttl);

            let slot = if let Some(entry) = store.get_mut(key) {
                entry.last_used = Instant::now();
                Arc::clone(&entry.slot)
            } else {
                let entry = CacheEntry::new();
                let slot = Arc::clone(&entry.slot);
                if let Some((evicted_key, evicted)) = store.push(key.clone(), entry) {
                    if evicted_key != *key {
                        debug!(key = %evicted_key, "Evicting least recently used tool session");
                        retired.push(evicted);
                    }
                }
                slot
            };
            drop(store);
            (slot, retired)
        };
        Self::release_all(retired).await;

        let result = slot
            .get_or_try_init(|| async { establish().await.map(Arc::new) })
            .await
            .map(Arc::clone);

        match result {
            Ok(session) => Ok(session),
            Err(e) => {
                self.discard_failed_slot(key, slot).await;
                Err(e)
            }
        }
    }

    /// Drop the entry of a failed establishment once nobody else holds its slot
    ///
    /// Other callers may still be waiting on the slot or running their own
    /// attempt; the entry stays resident for them. Each caller releases its
    /// handle under the store lock, so the last one out removes the entry.
    async fn discard_failed_slot(
        &self,
        key: &ToolSessionKey,
        slot: Arc<OnceCell<Arc<ToolSession>>>,
    ) {
        let mut store = self.store.lock().await;
        let resident = store
            .peek(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.slot, &slot));
        drop(slot);

        let abandoned = resident
            && store.peek(key).is_some_and(|entry| {
                !entry.slot.initialized() && Arc::strong_count(&entry.slot) == 1
            });
        if abandoned {
            debug!(key = %key, "Discarding failed tool session establishment");
            store.pop(key);
        }
    }

    /// Remove and close the session for `key`; returns whether one was resident
    pub async fn invalidate(&self, key: &ToolSessionKey) -> bool {
        let entry = self.store.lock().await.pop(key);
        match entry {
            Some(entry) => {
                Self::release(entry).await;
                true
            }
            None => false,
        }
    }

    /// Number of resident keys, including in-flight establishments
    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Whether nothing is resident
    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    /// Whether `key` is resident; does not refresh recency
    pub async fn contains(&self, key: &ToolSessionKey) -> bool {
        self.store.lock().await.contains(key)
    }

    /// Stop the sweep and close every resident session
    pub async fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            if let Err(e) = tx.try_send(()) {
                debug!(error = ?e, "Tool session cleanup shutdown signal not delivered");
            }
        }

        let drained: Vec<CacheEntry> = {
            let mut store = self.store.lock().await;
            let mut drained = Vec::with_capacity(store.len());
            while let Some((_, entry)) = store.pop_lru() {
                drained.push(entry);
            }
            drained
        };

        let count = drained.len();
        for entry in drained {
            if let Some(session) = entry.slot.get() {
                session.close().await;
            }
        }
        info!(closed = count, "Tool session cache shut down");
    }

    /// Remove idle entries; caller releases them after unlocking
    fn take_idle(
        store: &mut LruCache<ToolSessionKey, CacheEntry>,
        idle_ttl: Duration,
    ) -> Vec<CacheEntry> {
        let idle_keys: Vec<ToolSessionKey> = store
            .iter()
            .filter_map(|(k, v)| v.is_idle(idle_ttl).then(|| k.clone()))
            .collect();

        idle_keys
            .iter()
            .filter_map(|key| {
                debug!(key = %key, "Tool session idle, expiring");
                store.pop(key)
            })
            .collect()
    }

    async fn cleanup_expired(store: &SessionStore, idle_ttl: Duration) {
        let mut store_guard = store.lock().await;
        let expired = Self::take_idle(&mut store_guard, idle_ttl);
        drop(store_guard);

        let removed = expired.len();
        Self::release_all(expired).await;
        if removed > 0 {
            debug!("Cleaned up {} idle tool sessions", removed);
        }
    }

    async fn release_all(entries: Vec<CacheEntry>) {
        for entry in entries {
            Self::release(entry).await;
        }
    }

    /// Close a removed session now, or on its last release if a turn still uses it
    async fn release(entry: CacheEntry) {
        let Some(session) = entry.slot.get().cloned() else {
            return;
        };
        drop(entry);

        match Arc::try_unwrap(session) {
            Ok(session) => session.close().await,
            Err(shared) => {
                debug!(key = %shared.key(), "Tool session still in use; closing on last release");
            }
        }
    }
}

impl Drop for ToolSessionCache {
    fn drop(&mut self) {
        if let Some(tx) = &self.shutdown_tx {
            if let Err(e) = tx.try_send(()) {
                debug!(error = ?e, "Tool session cleanup shutdown signal send failed (channel likely closed)");
            }
        }
    }
}
