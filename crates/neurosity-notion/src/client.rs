//! # Notion client
//!
//! [`NotionClient`] is the entry point: it owns the session claims, the
//! transport and the subscription registry, and exposes metrics, actions
//! and device functions.
//!
//! Every entry point is authorized against the session's scopes *before*
//! anything else happens. A denied call returns
//! [`NotionError::ScopeDenied`] and never touches the registry or the
//! transport. Calls that need the device then require
//! [`ConnectionState::Connected`].
//!
//! If the device or relay drops the connection, the client moves to
//! [`ConnectionState::Disconnected`] on its own and discards every
//! subscription; outstanding handles become inert and
//! [`connect`](NotionClient::connect) opens a fresh connection.
//!
//! ```no_run
//! use neurosity_notion::{NotionClient, NotionConfig};
//!
//! # async fn demo() -> neurosity_notion::NotionResult<()> {
//! let client = NotionClient::new(NotionConfig::from_env()?).await?;
//!
//! let info = client.get_info().await?;
//! println!("{} ({:?})", info.device_id, info.model_name);
//!
//! client.actions().add_marker("eyes-closed").await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, oneshot, watch};

use crate::auth::{AuthRequest, Authorizer, Claims};
use crate::config::NotionConfig;
use crate::error::{NotionError, NotionResult};
use crate::observable::ObservableStream;
use crate::protocol::constants::{SETTINGS, STATUS};
use crate::protocol::{Action, DeviceInfo, Metric, OperationKind, SubscriptionRequest};
use crate::registry::{HandleId, Listener, SubscriptionKey, SubscriptionRegistry};
use crate::scopes::ScopeMatrix;
use crate::transport::{CloseSink, DeviceTransport, PayloadSink, Transport, TransportKind};

/// Connection lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

// ─── Shared internals ───────────────────────────────────────────────────

/// State shared between the client, its streams and subscription handles.
pub(crate) struct ClientInner<T: Transport> {
    config: NotionConfig,
    claims: Claims,
    authorizer: Authorizer,
    transport: T,
    pub(crate) registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    /// Serializes connect/disconnect.
    connection: Mutex<()>,
    /// Bumped on every connect and disconnect; identifies the live connection.
    generation: AtomicU64,
    /// Generation of the last connection the remote side dropped.
    lost: AtomicU64,
}

impl<T: Transport> ClientInner<T> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn authorize(&self, request: &AuthRequest<'_>) -> NotionResult<()> {
        self.authorizer.authorize(&self.claims, request)
    }

    fn ensure_connected(&self) -> NotionResult<()> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(NotionError::NotConnected)
        }
    }

    /// Attach `listener` to `key`, starting the transport subscription if
    /// needed.
    ///
    /// The work runs on its own task: if the caller stops waiting while the
    /// transport start is in flight, the listener is released again once the
    /// start completes instead of leaking a live transport subscription.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        request: &SubscriptionRequest,
        key: &SubscriptionKey,
        listener: Listener,
    ) -> NotionResult<HandleId> {
        let inner = Arc::clone(self);
        let request = request.clone();
        let key = key.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let result = inner
                .registry
                .acquire_checked(
                    &key,
                    listener,
                    || inner.ensure_connected(),
                    || inner.transport.start_subscription(&request),
                )
                .await;
            if let Err(Ok(handle)) = tx.send(result) {
                tracing::debug!(key = %key, handle, "Subscriber gone before start finished, releasing");
                if let Err(e) = inner.release(&key, handle).await {
                    tracing::warn!(key = %key, error = %e, "Failed to release abandoned subscription");
                }
            }
        });

        rx.await.map_err(|_| NotionError::ConnectionLost {
            reason: "subscription task ended without a result".into(),
        })?
    }

    pub(crate) async fn release(&self, key: &SubscriptionKey, handle: HandleId) -> NotionResult<()> {
        self.registry
            .release(key, handle, |transport_id| async move {
                self.transport.stop_subscription(&transport_id).await
            })
            .await
            .map(|_| ())
    }

    /// Forget entries whose transport ids died with a lost connection.
    async fn discard_stale(&self) {
        let stale = self.registry.teardown().await;
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "Discarded subscriptions of a lost connection");
        }
    }

    /// Runs on the transport's reader task when connection `generation`
    /// is closed by the remote side.
    fn connection_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.lost.store(generation, Ordering::SeqCst);

        let was_connected = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if !was_connected {
            // still connecting; `connect` sees `lost` and fails
            return;
        }

        tracing::warn!(device_id = %self.config.device_id, reason, "Connection lost");
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = inner.connection.lock().await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            inner.discard_stale().await;
            if let Err(e) = inner.transport.disconnect().await {
                tracing::debug!(error = %e, "Closing lost transport failed");
            }
        });
    }
}

// ─── NotionClient ───────────────────────────────────────────────────────

/// Client for one device.
///
/// Claims are fixed at construction from [`NotionConfig::oauth`]. Dropping
/// the client makes every outstanding [`Subscription`](crate::Subscription)
/// inert but does not close the transport; call
/// [`disconnect`](Self::disconnect) for that.
pub struct NotionClient<T: Transport = DeviceTransport> {
    inner: Arc<ClientInner<T>>,
}

impl NotionClient<DeviceTransport> {
    /// Create a client using the transport selected by `config.cloud`.
    ///
    /// Connects immediately when `config.auto_connect` is set.
    ///
    /// # Errors
    /// Returns the transport's error if auto-connect fails.
    pub async fn new(config: NotionConfig) -> NotionResult<Self> {
        let claims = Claims::from_oauth(config.oauth.as_ref());
        let transport = DeviceTransport::from_config(&config, &claims);
        Self::with_transport(config, transport).await
    }
}

impl<T: Transport> NotionClient<T> {
    /// Create a client over any [`Transport`].
    ///
    /// # Errors
    /// Returns the transport's error if auto-connect fails.
    pub async fn with_transport(config: NotionConfig, transport: T) -> NotionResult<Self> {
        let claims = Claims::from_oauth(config.oauth.as_ref());
        let authorizer = Authorizer::new(ScopeMatrix::new(config.auth.unknown_scope));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        tracing::debug!(
            device_id = %config.device_id,
            transport = %transport.kind(),
            authenticated = claims.is_authenticated(),
            "Creating Notion client"
        );

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                claims,
                authorizer,
                transport,
                registry: Arc::new(SubscriptionRegistry::new()),
                state_tx,
                connection: Mutex::new(()),
                generation: AtomicU64::new(0),
                lost: AtomicU64::new(0),
            }),
        };

        if client.inner.config.auto_connect {
            client.connect().await?;
        }
        Ok(client)
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &NotionConfig {
        &self.inner.config
    }

    /// The session's claims.
    pub fn claims(&self) -> &Claims {
        &self.inner.claims
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Which wire the transport speaks.
    pub fn transport_kind(&self) -> TransportKind {
        self.inner.transport.kind()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of distinct live transport subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.len()
    }

    // ─── Connection ─────────────────────────────────────────────────────

    /// Connect the transport. Does nothing if already connected.
    ///
    /// Subscriptions left over from a lost connection are discarded first.
    ///
    /// # Errors
    /// Returns the transport's error, or [`NotionError::ConnectionLost`] if
    /// the connection closed before connecting finished. The state goes
    /// back to [`ConnectionState::Disconnected`].
    pub async fn connect(&self) -> NotionResult<()> {
        let _guard = self.inner.connection.lock().await;
        if self.inner.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.inner.discard_stale().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_state(ConnectionState::Connecting);

        let registry = Arc::clone(&self.inner.registry);
        let sink: PayloadSink = Arc::new(move |transport_id: &str, payload: &serde_json::Value| {
            registry.dispatch(transport_id, payload);
        });
        let weak = Arc::downgrade(&self.inner);
        let on_close: CloseSink = Arc::new(move |reason: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.connection_lost(generation, reason);
            }
        });

        match self.inner.transport.connect(sink, on_close).await {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Connected);
                if self.inner.lost.load(Ordering::SeqCst) == generation {
                    self.inner.set_state(ConnectionState::Disconnected);
                    if let Err(e) = self.inner.transport.disconnect().await {
                        tracing::debug!(error = %e, "Closing lost transport failed");
                    }
                    tracing::warn!("Connection closed while connecting");
                    return Err(NotionError::ConnectionLost {
                        reason: "connection closed while connecting".into(),
                    });
                }
                tracing::info!(
                    device_id = %self.inner.config.device_id,
                    transport = %self.inner.transport.kind(),
                    "Connected"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                tracing::warn!(error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// [`connect`](Self::connect), then call `callback` with the result.
    pub async fn connect_with<F>(&self, callback: F) -> NotionResult<()>
    where
        F: FnOnce(&NotionResult<()>),
    {
        let result = self.connect().await;
        callback(&result);
        result
    }

    /// Tear down every subscription and disconnect the transport.
    ///
    /// The state turns [`ConnectionState::Disconnected`] first, so
    /// subscribe calls racing the disconnect fail with
    /// [`NotionError::NotConnected`]. Transport subscriptions are then
    /// stopped best-effort; failures are logged. Outstanding
    /// [`Subscription`](crate::Subscription)s become inert. Does nothing if
    /// already disconnected.
    ///
    /// # Errors
    /// Returns the transport's disconnect error. The client is
    /// [`ConnectionState::Disconnected`] afterwards either way.
    pub async fn disconnect(&self) -> NotionResult<()> {
        let _guard = self.inner.connection.lock().await;
        if self.inner.state() == ConnectionState::Disconnected {
            self.inner.discard_stale().await;
            return Ok(());
        }

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);

        for transport_id in self.inner.registry.teardown().await {
            if let Err(e) = self.inner.transport.stop_subscription(&transport_id).await {
                tracing::warn!(transport_id = %transport_id, error = %e, "Failed to stop subscription during disconnect");
            }
        }

        let result = self.inner.transport.disconnect().await;
        tracing::info!(device_id = %self.inner.config.device_id, "Disconnected");
        result
    }

    /// [`disconnect`](Self::disconnect), then call `callback` with the
    /// result.
    pub async fn disconnect_with<F>(&self, callback: F) -> NotionResult<()>
    where
        F: FnOnce(&NotionResult<()>),
    {
        let result = self.disconnect().await;
        callback(&result);
        result
    }

    // ─── Views ──────────────────────────────────────────────────────────

    /// Metric streams.
    pub fn metrics(&self) -> Metrics<'_, T> {
        Metrics { client: self }
    }

    /// Device actions.
    pub fn actions(&self) -> Actions<'_, T> {
        Actions { client: self }
    }

    // ─── Device functions ───────────────────────────────────────────────

    /// Fetch device metadata.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:devices-info`,
    /// [`NotionError::NotConnected`], or the transport's error.
    pub async fn get_info(&self) -> NotionResult<DeviceInfo> {
        self.inner.authorize(&AuthRequest::Function("getInfo"))?;
        self.inner.ensure_connected()?;
        self.inner.transport.get_info().await
    }

    /// The device status stream.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:devices-status`.
    pub fn status(&self) -> NotionResult<ObservableStream<T>> {
        self.inner.authorize(&AuthRequest::Function(STATUS))?;
        Ok(self.stream(SubscriptionRequest::new(
            OperationKind::Status,
            STATUS,
            Vec::<String>::new(),
            false,
        )))
    }

    /// The device settings stream.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:devices-settings`.
    pub fn settings(&self) -> NotionResult<ObservableStream<T>> {
        self.inner.authorize(&AuthRequest::Function(SETTINGS))?;
        Ok(self.stream(SubscriptionRequest::new(
            OperationKind::Settings,
            SETTINGS,
            Vec::<String>::new(),
            false,
        )))
    }

    /// Apply new device settings.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `write:devices-settings`,
    /// [`NotionError::NotConnected`], or the transport's error.
    pub async fn change_settings(&self, settings: &serde_json::Value) -> NotionResult<()> {
        self.inner.authorize(&AuthRequest::Function("changeSettings"))?;
        self.inner.ensure_connected()?;
        self.inner.transport.change_settings(settings).await
    }

    /// Current time in milliseconds since the Unix epoch, as the transport
    /// sees it.
    pub fn timestamp(&self) -> u64 {
        self.inner.transport.timestamp()
    }

    fn stream(&self, request: SubscriptionRequest) -> ObservableStream<T> {
        ObservableStream::new(Arc::clone(&self.inner), request)
    }
}

// ─── Metrics view ───────────────────────────────────────────────────────

/// Metric streams of a [`NotionClient`].
///
/// Each method authorizes and returns a cold [`ObservableStream`].
pub struct Metrics<'a, T: Transport> {
    client: &'a NotionClient<T>,
}

impl<T: Transport> Metrics<'_, T> {
    /// A stream of `metric` restricted to `labels`.
    ///
    /// Atomic requests are authorized per label (`metric/label`), others
    /// against the metric as a whole.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] listing every missing scope.
    pub fn subscribe<I, S>(
        &self,
        metric: &str,
        labels: I,
        atomic: bool,
    ) -> NotionResult<ObservableStream<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = SubscriptionRequest::metric(metric, labels, atomic);
        self.client.inner.authorize(&AuthRequest::metric(
            &request.metric,
            &request.labels,
            request.atomic,
        ))?;
        Ok(self.client.stream(request))
    }

    /// Brainwave data for one label (`raw`, `psd`, `powerByBand`, ...).
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:brainwaves`.
    pub fn brainwaves(&self, label: &str) -> NotionResult<ObservableStream<T>> {
        self.subscribe(Metric::BRAINWAVES, [label], false)
    }

    /// Accelerometer samples.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:accelerometer`.
    pub fn accelerometer(&self) -> NotionResult<ObservableStream<T>> {
        self.subscribe(Metric::ACCELEROMETER, Vec::<String>::new(), false)
    }

    /// Calm score.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:calm`.
    pub fn calm(&self) -> NotionResult<ObservableStream<T>> {
        self.subscribe(Metric::AWARENESS, ["calm"], true)
    }

    /// Focus score.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:focus`.
    pub fn focus(&self) -> NotionResult<ObservableStream<T>> {
        self.subscribe(Metric::AWARENESS, ["focus"], true)
    }

    /// Trained kinesis thoughts.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:kinesis`.
    pub fn kinesis<I, S>(&self, labels: I) -> NotionResult<ObservableStream<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe(Metric::KINESIS, labels, false)
    }

    /// Kinesis predictions.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:kinesis`.
    pub fn predictions<I, S>(&self, labels: I) -> NotionResult<ObservableStream<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe(Metric::PREDICTIONS, labels, false)
    }

    /// Per-channel signal quality.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] without `read:signal-quality`.
    pub fn signal_quality(&self) -> NotionResult<ObservableStream<T>> {
        self.subscribe(Metric::SIGNAL_QUALITY, Vec::<String>::new(), false)
    }

    /// Frequency analysis of the given channels, e.g. `["FC1", "FC2"]`.
    ///
    /// The metric has no scope mapping, so OAuth sessions are governed by
    /// [`UnknownScopePolicy`](crate::UnknownScopePolicy).
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] under the `deny` policy.
    pub fn channel_analysis<I, S>(&self, channels: I) -> NotionResult<ObservableStream<T>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe(Metric::CHANNEL_ANALYSIS, channels, false)
    }
}

// ─── Actions view ───────────────────────────────────────────────────────

/// Device actions of a [`NotionClient`].
pub struct Actions<'a, T: Transport> {
    client: &'a NotionClient<T>,
}

impl<T: Transport> Actions<'_, T> {
    /// Authorize and send any action, returning the device's reply.
    ///
    /// # Errors
    /// [`NotionError::ScopeDenied`] if the action's scope is missing,
    /// [`NotionError::NotConnected`], or the transport's error.
    pub async fn dispatch(&self, action: Action) -> NotionResult<serde_json::Value> {
        let inner = &self.client.inner;
        inner.authorize(&AuthRequest::action(&action.command, &action.action))?;
        inner.ensure_connected()?;

        tracing::debug!(command = %action.command, action = %action.action, "Dispatching action");
        inner.transport.dispatch_action(&action).await
    }

    /// Add a marker at the current device time.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn add_marker(&self, label: &str) -> NotionResult<serde_json::Value> {
        let timestamp = self.client.timestamp();
        self.dispatch(Action::add_marker(label, timestamp)).await
    }

    /// Queue haptic effects per motor, e.g. `{"P7": ["tripleClick100"]}`.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn haptics(&self, effects: serde_json::Value) -> NotionResult<serde_json::Value> {
        self.dispatch(Action::queue_haptics(effects)).await
    }

    /// Record a kinesis training sample for `label`.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn train(&self, label: &str) -> NotionResult<serde_json::Value> {
        let timestamp = self.client.timestamp();
        self.dispatch(Action::record_training(
            Metric::KINESIS,
            label,
            true,
            timestamp,
        ))
        .await
    }

    /// Stop training `label`.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn stop_training(&self, label: &str) -> NotionResult<serde_json::Value> {
        self.dispatch(Action::stop_training(Metric::KINESIS, label))
            .await
    }

    /// Stop every training in progress.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn stop_all_training(&self) -> NotionResult<serde_json::Value> {
        self.dispatch(Action::stop_all_training()).await
    }

    /// Record raw brainwaves under `label` for `duration_ms`.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn record_brainwaves(
        &self,
        label: &str,
        duration_ms: u64,
    ) -> NotionResult<serde_json::Value> {
        self.dispatch(Action::record_brainwaves(label, duration_ms))
            .await
    }

    /// Reset the device's wifi settings.
    ///
    /// # Errors
    /// See [`dispatch`](Self::dispatch).
    pub async fn reset_wifi(&self) -> NotionResult<serde_json::Value> {
        self.dispatch(Action::reset_wifi()).await
    }
}
