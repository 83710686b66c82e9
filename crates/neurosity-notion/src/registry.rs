//! # Subscription Registry
//!
//! Deduplicates and reference-counts logical subscriptions so that any number
//! of listeners on the same stream share one transport subscription.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   SubscriptionRegistry                       │
//! │                                                              │
//! │  entries: SubscriptionKey ─► Entry { transport_id,           │
//! │                                      listeners: [(id, fn)] } │
//! │  by_transport: transport_id ─► SubscriptionKey               │
//! │                                                              │
//! │  acquire  ── 0→1 listeners ──► start transport subscription   │
//! │  release  ── 1→0 listeners ──► stop transport subscription    │
//! │  dispatch ── transport_id ───► every listener, in order       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! An entry's reference count *is* the length of its listener list, so the
//! two can never drift apart. Entries are removed the moment their last
//! listener goes; payloads that arrive for a removed transport id are
//! dropped.
//!
//! ## Locking
//!
//! Entry state sits behind a synchronous mutex so the transport's reader
//! task can dispatch without awaiting. `acquire`/`release` additionally
//! hold an async lifecycle lock across the transport start/stop call, which
//! serializes subscription management: a key is never started twice and a
//! failed start leaves nothing behind.
//!
//! `dispatch` snapshots the listener list and calls it with the lock
//! released, so a listener may subscribe or unsubscribe from inside its
//! callback. A listener released mid-dispatch can still see that one
//! in-flight payload.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::NotionResult;
use crate::protocol::subscription::{OperationKind, SubscriptionRequest};

/// Callback invoked with every payload of a subscription.
pub type Listener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Identifies one listener within the registry. Never reused.
pub type HandleId = u64;

/// Canonical identity of a logical subscription.
///
/// Built from the operation kind, the metric name, the sorted and
/// deduplicated labels, and the atomic flag, e.g.
/// `metric:awareness[calm,focus]:atomic`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    /// Build a key, canonicalizing the labels.
    pub fn new<S: AsRef<str>>(kind: OperationKind, name: &str, labels: &[S], atomic: bool) -> Self {
        let mut labels: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        labels.sort_unstable();
        labels.dedup();

        let mut key = format!("{kind}:{name}[{}]", labels.join(","));
        if atomic {
            key.push_str(":atomic");
        }
        Self(key)
    }

    /// The key of a subscription request.
    pub fn from_request(request: &SubscriptionRequest) -> Self {
        Self::new(request.kind, &request.metric, &request.labels, request.atomic)
    }

    /// The canonical key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    transport_id: String,
    listeners: Vec<(HandleId, Listener)>,
}

impl Entry {
    fn ref_count(&self) -> usize {
        self.listeners.len()
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<SubscriptionKey, Entry>,
    by_transport: HashMap<String, SubscriptionKey>,
}

/// Tracks live subscriptions, their listeners, and their transport ids.
pub struct SubscriptionRegistry {
    state: Mutex<State>,
    lifecycle: tokio::sync::Mutex<()>,
    next_handle: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach `listener` to the subscription for `key`.
    ///
    /// If no entry exists, `start` is awaited to open the transport
    /// subscription and the entry is created with this single listener.
    /// Otherwise the listener joins the existing entry and `start` is never
    /// called.
    ///
    /// Not cancel-safe: dropping the future while `start` is pending loses
    /// whatever transport subscription `start` opens. Callers that may be
    /// cancelled should drive it to completion on a task of their own.
    ///
    /// # Errors
    /// Returns the error from `start` unchanged; the registry is left as it
    /// was before the call.
    pub async fn acquire<F, Fut>(
        &self,
        key: &SubscriptionKey,
        listener: Listener,
        start: F,
    ) -> NotionResult<HandleId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = NotionResult<String>>,
    {
        self.acquire_checked(key, listener, || Ok(()), start).await
    }

    /// [`acquire`](Self::acquire), refusing with the error from `ready`
    /// unless it passes.
    ///
    /// `ready` runs once the lifecycle lock is held, so it is evaluated
    /// after any `teardown` that was in progress when the call began.
    ///
    /// # Errors
    /// The error from `ready` or `start`; the registry is left unchanged.
    pub async fn acquire_checked<R, F, Fut>(
        &self,
        key: &SubscriptionKey,
        listener: Listener,
        ready: R,
        start: F,
    ) -> NotionResult<HandleId>
    where
        R: FnOnce() -> NotionResult<()>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = NotionResult<String>>,
    {
        let _lifecycle = self.lifecycle.lock().await;
        ready()?;
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state();
            if let Some(entry) = state.entries.get_mut(key) {
                entry.listeners.push((handle, listener));
                tracing::debug!(
                    key = %key,
                    handle,
                    ref_count = entry.ref_count(),
                    "Joined existing subscription"
                );
                return Ok(handle);
            }
        }

        let transport_id = start().await?;

        let mut state = self.state();
        if let Some(previous) = state
            .by_transport
            .insert(transport_id.clone(), key.clone())
        {
            tracing::warn!(
                transport_id = %transport_id,
                previous = %previous,
                key = %key,
                "Transport reused a live subscription id"
            );
        }
        state.entries.insert(
            key.clone(),
            Entry {
                transport_id: transport_id.clone(),
                listeners: vec![(handle, listener)],
            },
        );
        tracing::info!(key = %key, transport_id = %transport_id, handle, "Subscription started");

        Ok(handle)
    }

    /// Detach the listener identified by `handle` from `key`.
    ///
    /// When the last listener goes, the entry is removed and `stop` is
    /// awaited with its transport id. Returns `false` without side effects if
    /// the handle is not registered (already released or torn down).
    ///
    /// # Errors
    /// Returns the error from `stop`. The entry has been removed by then.
    pub async fn release<F, Fut>(
        &self,
        key: &SubscriptionKey,
        handle: HandleId,
        stop: F,
    ) -> NotionResult<bool>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = NotionResult<()>>,
    {
        let _lifecycle = self.lifecycle.lock().await;

        let transport_id = {
            let mut state = self.state();
            let remaining = match state.entries.get_mut(key) {
                Some(entry) => {
                    let before = entry.ref_count();
                    entry.listeners.retain(|(id, _)| *id != handle);
                    if entry.ref_count() == before {
                        return Ok(false);
                    }
                    entry.ref_count()
                }
                None => return Ok(false),
            };

            if remaining > 0 {
                tracing::debug!(key = %key, handle, ref_count = remaining, "Listener released");
                return Ok(true);
            }

            match state.entries.remove(key) {
                Some(entry) => {
                    state.by_transport.remove(&entry.transport_id);
                    entry.transport_id
                }
                None => return Ok(true),
            }
        };

        tracing::info!(key = %key, transport_id = %transport_id, "Subscription stopped");
        stop(transport_id).await?;
        Ok(true)
    }

    /// Deliver `payload` to every listener of the subscription that owns
    /// `transport_id`, in registration order.
    ///
    /// Returns the number of listeners invoked. Payloads for unknown or
    /// already torn-down subscriptions are dropped.
    pub fn dispatch(&self, transport_id: &str, payload: &serde_json::Value) -> usize {
        let listeners: Vec<Listener> = {
            let state = self.state();
            let Some(entry) = state
                .by_transport
                .get(transport_id)
                .and_then(|key| state.entries.get(key))
            else {
                tracing::trace!(transport_id, "Dropping payload for inactive subscription");
                return 0;
            };
            entry
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        for listener in &listeners {
            listener(payload);
        }
        listeners.len()
    }

    /// Remove every entry at once, returning their transport ids.
    ///
    /// Outstanding handles become inert: releasing them is a no-op.
    pub async fn teardown(&self) -> Vec<String> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut state = self.state();
        state.by_transport.clear();
        let ids: Vec<String> = state
            .entries
            .drain()
            .map(|(_, entry)| entry.transport_id)
            .collect();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Tore down all subscriptions");
        }
        ids
    }

    /// Number of listeners attached to `key` (0 if there is no entry).
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.state().entries.get(key).map_or(0, Entry::ref_count)
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Whether `handle` is still attached to `key`.
    pub fn is_registered(&self, key: &SubscriptionKey, handle: HandleId) -> bool {
        self.state()
            .entries
            .get(key)
            .is_some_and(|entry| entry.listeners.iter().any(|(id, _)| *id == handle))
    }

    /// Transport subscription id backing `key`.
    pub fn transport_id(&self, key: &SubscriptionKey) -> Option<String> {
        self.state()
            .entries
            .get(key)
            .map(|entry| entry.transport_id.clone())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }
}
