//! # Observable streams
//!
//! An [`ObservableStream`] is an authorized, not-yet-started request for a
//! metric (or status/settings) stream. Nothing reaches the transport until
//! it is subscribed:
//!
//! - [`ObservableStream::subscribe`] attaches a callback and returns a
//!   [`Subscription`] handle
//! - [`ObservableStream::subscribe_stream`] returns a [`PayloadStream`]
//!   implementing [`futures_core::Stream`]
//!
//! Every subscribe call adds exactly one listener. Listeners on the same
//! logical stream share one transport subscription, which is stopped when
//! the last of them unsubscribes.
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use neurosity_notion::{NotionClient, NotionConfig};
//!
//! # async fn demo() -> neurosity_notion::NotionResult<()> {
//! let client = NotionClient::new(NotionConfig::new("device-id")).await?;
//!
//! let kinesis = client.metrics().kinesis(["push"])?;
//! let sub = kinesis
//!     .subscribe(|payload| println!("push: {payload}"))
//!     .await?;
//!
//! let mut calm = client.metrics().calm()?.subscribe_stream().await?;
//! if let Some(score) = calm.next().await {
//!     println!("calm: {score}");
//! }
//!
//! sub.unsubscribe().await?;
//! calm.unsubscribe().await?;
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::client::ClientInner;
use crate::error::NotionResult;
use crate::protocol::SubscriptionRequest;
use crate::registry::{HandleId, Listener, SubscriptionKey};
use crate::transport::Transport;

/// Channel buffer size for [`PayloadStream`]s.
const STREAM_CHANNEL_BUFFER: usize = 1024;

/// An authorized request for a stream of payloads.
pub struct ObservableStream<T: Transport> {
    inner: Arc<ClientInner<T>>,
    request: SubscriptionRequest,
    key: SubscriptionKey,
}

impl<T: Transport> ObservableStream<T> {
    pub(crate) fn new(inner: Arc<ClientInner<T>>, request: SubscriptionRequest) -> Self {
        let key = SubscriptionKey::from_request(&request);
        Self {
            inner,
            request,
            key,
        }
    }

    /// The request this stream subscribes to.
    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    /// The registry key shared by every subscriber of this stream.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Attach `callback`, starting the transport subscription if this is
    /// the first listener on the stream.
    ///
    /// The callback runs on the transport's reader task for every payload.
    ///
    /// # Errors
    /// [`NotConnected`](crate::NotionError::NotConnected) if the client is
    /// not connected, or the transport's error if starting the subscription
    /// fails.
    pub async fn subscribe<F>(&self, callback: F) -> NotionResult<Subscription<T>>
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(callback);
        let handle = self.inner.acquire(&self.request, &self.key, listener).await?;

        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            key: self.key.clone(),
            handle,
            released: AtomicBool::new(false),
        })
    }

    /// Subscribe and receive payloads as a [`Stream`].
    ///
    /// Payloads that arrive while the stream's buffer is full are dropped.
    ///
    /// # Errors
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn subscribe_stream(&self) -> NotionResult<PayloadStream<T>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_BUFFER);
        let key = self.key.clone();
        let subscription = self
            .subscribe(move |payload: &serde_json::Value| {
                if tx.try_send(payload.clone()).is_err() {
                    tracing::trace!(key = %key, "Stream buffer full or closed, dropping payload");
                }
            })
            .await?;

        Ok(PayloadStream {
            rx,
            subscription: Some(subscription),
        })
    }
}

impl<T: Transport> Clone for ObservableStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            request: self.request.clone(),
            key: self.key.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ObservableStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableStream")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// ─── Subscription ───────────────────────────────────────────────────────

/// Handle to one listener on a stream.
///
/// Holds no strong reference to the client: once the client is dropped or
/// disconnected, [`unsubscribe`](Self::unsubscribe) does nothing.
pub struct Subscription<T: Transport> {
    inner: Weak<ClientInner<T>>,
    key: SubscriptionKey,
    handle: HandleId,
    released: AtomicBool,
}

impl<T: Transport> Subscription<T> {
    /// Detach this listener. Stops the transport subscription if it was the
    /// last one. Calling this more than once is a no-op.
    ///
    /// # Errors
    /// Returns the transport's error if stopping the subscription fails.
    /// The listener is detached regardless.
    pub async fn unsubscribe(&self) -> NotionResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        inner.release(&self.key, self.handle).await
    }

    /// Whether this listener is still receiving payloads.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
            && self
                .inner
                .upgrade()
                .is_some_and(|inner| inner.registry.is_registered(&self.key, self.handle))
    }

    /// The registry key this listener is attached to.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Listener id, unique for the life of the client.
    pub fn handle(&self) -> HandleId {
        self.handle
    }
}

impl<T: Transport> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("handle", &self.handle)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ─── PayloadStream ──────────────────────────────────────────────────────

/// A subscription delivered as a [`Stream`] of payloads.
///
/// Dropping the stream unsubscribes in the background when a tokio runtime
/// is available; call [`unsubscribe`](Self::unsubscribe) to wait for it.
pub struct PayloadStream<T: Transport> {
    rx: mpsc::Receiver<serde_json::Value>,
    subscription: Option<Subscription<T>>,
}

impl<T: Transport> PayloadStream<T> {
    /// The underlying listener handle.
    pub fn subscription(&self) -> Option<&Subscription<T>> {
        self.subscription.as_ref()
    }

    /// Detach from the stream. Payloads already buffered can still be read.
    ///
    /// # Errors
    /// Same as [`Subscription::unsubscribe`].
    pub async fn unsubscribe(&mut self) -> NotionResult<()> {
        match self.subscription.take() {
            Some(subscription) => subscription.unsubscribe().await,
            None => Ok(()),
        }
    }
}

impl<T: Transport> Stream for PayloadStream<T> {
    type Item = serde_json::Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T: Transport> Drop for PayloadStream<T> {
    fn drop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        if !subscription.is_active() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = subscription.unsubscribe().await {
                        tracing::warn!(key = %subscription.key, error = %e, "Background unsubscribe failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(key = %subscription.key, "Stream dropped outside a runtime; listener left attached");
            }
        }
    }
}
