//! # Transports
//!
//! A [`Transport`] carries subscriptions, actions and device calls to a
//! device. Two are shipped:
//!
//! - [`LocalTransport`]: a WebSocket straight to the device on the LAN
//! - [`CloudTransport`]: a WebSocket to the cloud relay
//!
//! [`DeviceTransport`] picks one of them from [`NotionConfig::cloud`] and
//! is what [`NotionClient::new`](crate::NotionClient::new) uses. Any other
//! `Transport` can be passed to
//! [`NotionClient::with_transport`](crate::NotionClient::with_transport).
//!
//! Inbound metric payloads are pushed through the [`PayloadSink`] handed to
//! [`Transport::connect`], tagged with the transport subscription id that
//! [`Transport::start_subscription`] returned. The [`CloseSink`] handed
//! alongside it is told when the device or relay drops the connection.

mod cloud;
mod local;
pub(crate) mod socket;
mod tls;

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use cloud::CloudTransport;
pub use local::LocalTransport;

use crate::auth::Claims;
use crate::config::NotionConfig;
use crate::error::{NotionError, NotionResult};
use crate::protocol::{Action, DeviceInfo, SubscriptionRequest};

/// Receives every inbound payload with its transport subscription id.
pub type PayloadSink = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;

/// Called once, with a reason, when the connection is closed by the remote
/// side or fails. Never called for [`Transport::disconnect`].
pub type CloseSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Which wire a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Cloud relay.
    Cloud,
    /// Direct device socket.
    Local,
}

impl TransportKind {
    /// Returns the `serverType` string sent with subscriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Cloud => "cloud",
            TransportKind::Local => "websocket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set every transport provides.
///
/// Implementations must be safe to call concurrently; the client never
/// holds its own locks across these calls except for subscription
/// start/stop, which it serializes.
pub trait Transport: Send + Sync + 'static {
    /// Which wire this transport speaks.
    fn kind(&self) -> TransportKind;

    /// Open the connection. `sink` receives every inbound payload until
    /// [`disconnect`](Self::disconnect); `on_close` fires if the connection
    /// is lost before that.
    fn connect(
        &self,
        sink: PayloadSink,
        on_close: CloseSink,
    ) -> impl Future<Output = NotionResult<()>> + Send;

    /// Close the connection. Closing an unopened transport is not an error.
    fn disconnect(&self) -> impl Future<Output = NotionResult<()>> + Send;

    /// Open a transport subscription, returning its id.
    fn start_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> impl Future<Output = NotionResult<String>> + Send;

    /// Close a transport subscription by id.
    fn stop_subscription(
        &self,
        subscription_id: &str,
    ) -> impl Future<Output = NotionResult<()>> + Send;

    /// Send an action, returning the device's reply (or `null`).
    fn dispatch_action(
        &self,
        action: &Action,
    ) -> impl Future<Output = NotionResult<serde_json::Value>> + Send;

    /// Fetch device metadata.
    fn get_info(&self) -> impl Future<Output = NotionResult<DeviceInfo>> + Send;

    /// Apply new device settings.
    fn change_settings(
        &self,
        settings: &serde_json::Value,
    ) -> impl Future<Output = NotionResult<()>> + Send;

    /// Current time in milliseconds since the Unix epoch, as the transport
    /// sees it.
    fn timestamp(&self) -> u64;
}

// ─── DeviceTransport ────────────────────────────────────────────────────

/// The shipped transport selected by configuration.
pub enum DeviceTransport {
    Cloud(CloudTransport),
    Local(LocalTransport),
}

impl DeviceTransport {
    /// Build the transport chosen by `config.cloud`.
    pub fn from_config(config: &NotionConfig, claims: &Claims) -> Self {
        if config.cloud {
            DeviceTransport::Cloud(CloudTransport::new(config, claims))
        } else {
            DeviceTransport::Local(LocalTransport::new(config))
        }
    }
}

impl Transport for DeviceTransport {
    fn kind(&self) -> TransportKind {
        match self {
            DeviceTransport::Cloud(t) => t.kind(),
            DeviceTransport::Local(t) => t.kind(),
        }
    }

    async fn connect(&self, sink: PayloadSink, on_close: CloseSink) -> NotionResult<()> {
        match self {
            DeviceTransport::Cloud(t) => t.connect(sink, on_close).await,
            DeviceTransport::Local(t) => t.connect(sink, on_close).await,
        }
    }

    async fn disconnect(&self) -> NotionResult<()> {
        match self {
            DeviceTransport::Cloud(t) => t.disconnect().await,
            DeviceTransport::Local(t) => t.disconnect().await,
        }
    }

    async fn start_subscription(&self, request: &SubscriptionRequest) -> NotionResult<String> {
        match self {
            DeviceTransport::Cloud(t) => t.start_subscription(request).await,
            DeviceTransport::Local(t) => t.start_subscription(request).await,
        }
    }

    async fn stop_subscription(&self, subscription_id: &str) -> NotionResult<()> {
        match self {
            DeviceTransport::Cloud(t) => t.stop_subscription(subscription_id).await,
            DeviceTransport::Local(t) => t.stop_subscription(subscription_id).await,
        }
    }

    async fn dispatch_action(&self, action: &Action) -> NotionResult<serde_json::Value> {
        match self {
            DeviceTransport::Cloud(t) => t.dispatch_action(action).await,
            DeviceTransport::Local(t) => t.dispatch_action(action).await,
        }
    }

    async fn get_info(&self) -> NotionResult<DeviceInfo> {
        match self {
            DeviceTransport::Cloud(t) => t.get_info().await,
            DeviceTransport::Local(t) => t.get_info().await,
        }
    }

    async fn change_settings(&self, settings: &serde_json::Value) -> NotionResult<()> {
        match self {
            DeviceTransport::Cloud(t) => t.change_settings(settings).await,
            DeviceTransport::Local(t) => t.change_settings(settings).await,
        }
    }

    fn timestamp(&self) -> u64 {
        match self {
            DeviceTransport::Cloud(t) => t.timestamp(),
            DeviceTransport::Local(t) => t.timestamp(),
        }
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────

/// Local wall clock in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Subscribe params shared by both wires.
fn subscribe_params(
    request: &SubscriptionRequest,
    kind: TransportKind,
) -> NotionResult<serde_json::Value> {
    let mut params = serde_json::to_value(request)?;
    if let Some(obj) = params.as_object_mut() {
        obj.insert("serverType".into(), kind.as_str().into());
    }
    Ok(params)
}

/// Pull the `subscriptionId` out of a subscribe reply.
fn subscription_id(result: &serde_json::Value) -> NotionResult<String> {
    result
        .get("subscriptionId")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| NotionError::ProtocolError {
            reason: "subscribe reply has no subscriptionId".into(),
        })
}

fn parse_device_info(result: serde_json::Value) -> NotionResult<DeviceInfo> {
    serde_json::from_value(result).map_err(|e| NotionError::ProtocolError {
        reason: format!("Failed to parse device info: {e}"),
    })
}
