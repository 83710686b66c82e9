//! Direct WebSocket to a device on the local network.
//!
//! Event frames look like `{"event": "metrics/<subscriptionId>", "data": ...}`.

use serde_json::json;

use super::socket::{RpcSocket, SocketOptions, SocketSlot};
use super::{CloseSink, PayloadSink, Transport, TransportKind};
use crate::config::NotionConfig;
use crate::error::NotionResult;
use crate::protocol::{Action, DeviceInfo, Methods, SubscriptionRequest};

/// Prefix of the `event` field on metric frames.
const METRICS_EVENT_PREFIX: &str = "metrics/";

/// Transport speaking to the device's own socket at
/// `{socket_url}/{device_id}`.
pub struct LocalTransport {
    url: String,
    options: SocketOptions,
    socket: SocketSlot,
}

impl LocalTransport {
    /// Build an unconnected transport from config.
    pub fn new(config: &NotionConfig) -> Self {
        Self {
            url: config.local_url(),
            options: SocketOptions {
                connect_timeout: config.timeouts.connect_timeout(),
                request_timeout: config.timeouts.request_timeout(),
                accept_invalid_certs: config.should_accept_invalid_certs(),
            },
            socket: SocketSlot::default(),
        }
    }

    /// URL this transport connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the socket is open.
    pub async fn is_connected(&self) -> bool {
        self.socket.is_open().await
    }

    async fn call(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> NotionResult<serde_json::Value> {
        self.socket.get().await?.call(method, params).await
    }
}

fn route_event(mut frame: serde_json::Value) -> Option<(String, serde_json::Value)> {
    let id = frame
        .get("event")?
        .as_str()?
        .strip_prefix(METRICS_EVENT_PREFIX)?
        .to_string();
    let data = frame.get_mut("data").map(serde_json::Value::take)?;
    Some((id, data))
}

impl Transport for LocalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn connect(&self, sink: PayloadSink, on_close: CloseSink) -> NotionResult<()> {
        let socket =
            RpcSocket::open(&self.url, &self.options, route_event, sink, on_close).await?;
        self.socket.replace(socket).await;
        Ok(())
    }

    async fn disconnect(&self) -> NotionResult<()> {
        if self.socket.close().await {
            tracing::info!(url = %self.url, "Local transport disconnected");
        }
        Ok(())
    }

    async fn start_subscription(&self, request: &SubscriptionRequest) -> NotionResult<String> {
        let params = super::subscribe_params(request, self.kind())?;
        let result = self.call(Methods::SUBSCRIBE, params).await?;
        super::subscription_id(&result)
    }

    async fn stop_subscription(&self, subscription_id: &str) -> NotionResult<()> {
        self.call(
            Methods::UNSUBSCRIBE,
            json!({ "subscriptionId": subscription_id }),
        )
        .await?;
        Ok(())
    }

    async fn dispatch_action(&self, action: &Action) -> NotionResult<serde_json::Value> {
        self.call(Methods::DISPATCH_ACTION, serde_json::to_value(action)?)
            .await
    }

    async fn get_info(&self) -> NotionResult<DeviceInfo> {
        let result = self.call(Methods::GET_INFO, json!({})).await?;
        super::parse_device_info(result)
    }

    async fn change_settings(&self, settings: &serde_json::Value) -> NotionResult<()> {
        self.call(Methods::CHANGE_SETTINGS, json!({ "settings": settings }))
            .await?;
        Ok(())
    }

    fn timestamp(&self) -> u64 {
        super::now_millis()
    }
}
