//! Cloud relay transport.
//!
//! Every request carries the target `deviceId` (and the OAuth `authId`, if
//! any). Event frames look like
//! `{"type": "metric", "subscriptionId": "...", "payload": ...}`.
//!
//! On connect the relay's clock is sampled once with `getServerTime`;
//! [`timestamp`](Transport::timestamp) reports local time corrected by that
//! offset.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::json;

use super::socket::{RpcSocket, SocketOptions, SocketSlot};
use super::{CloseSink, PayloadSink, Transport, TransportKind};
use crate::auth::Claims;
use crate::config::NotionConfig;
use crate::error::NotionResult;
use crate::protocol::{Action, DeviceInfo, Methods, SubscriptionRequest};

/// Transport routing through the relay at `relay_url`.
pub struct CloudTransport {
    url: String,
    device_id: String,
    auth_id: Option<String>,
    options: SocketOptions,
    socket: SocketSlot,
    /// Server clock minus local clock, in milliseconds.
    offset_ms: AtomicI64,
}

impl CloudTransport {
    /// Build an unconnected transport from config and session claims.
    pub fn new(config: &NotionConfig, claims: &Claims) -> Self {
        Self {
            url: config.relay_url.clone(),
            device_id: config.device_id.clone(),
            auth_id: claims.auth_id().map(str::to_string),
            options: SocketOptions {
                connect_timeout: config.timeouts.connect_timeout(),
                request_timeout: config.timeouts.request_timeout(),
                accept_invalid_certs: config.should_accept_invalid_certs(),
            },
            socket: SocketSlot::default(),
            offset_ms: AtomicI64::new(0),
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

    /// Last measured server clock offset in milliseconds.
    pub fn server_offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    fn with_target(&self, mut params: serde_json::Value) -> serde_json::Value {
        if let Some(obj) = params.as_object_mut() {
            obj.insert("deviceId".into(), self.device_id.clone().into());
            if let Some(auth_id) = &self.auth_id {
                obj.insert("authId".into(), auth_id.clone().into());
            }
        }
        params
    }

    async fn call(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> NotionResult<serde_json::Value> {
        let params = self.with_target(params);
        self.socket.get().await?.call(method, params).await
    }

    async fn sync_clock(&self) -> NotionResult<i64> {
        let sent = super::now_millis();
        let result = self.call(Methods::GET_SERVER_TIME, json!({})).await?;
        let received = super::now_millis();

        let server = result
            .get("timestamp")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| crate::NotionError::ProtocolError {
                reason: "getServerTime reply has no timestamp".into(),
            })?;
        let midpoint = i64::try_from(sent / 2 + received / 2).unwrap_or(i64::MAX);
        let offset = server - midpoint;
        self.offset_ms.store(offset, Ordering::SeqCst);
        Ok(offset)
    }
}

fn route_event(mut frame: serde_json::Value) -> Option<(String, serde_json::Value)> {
    if frame.get("type")?.as_str()? != "metric" {
        return None;
    }
    let id = frame.get("subscriptionId")?.as_str()?.to_string();
    let payload = frame.get_mut("payload").map(serde_json::Value::take)?;
    Some((id, payload))
}

impl Transport for CloudTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Cloud
    }

    async fn connect(&self, sink: PayloadSink, on_close: CloseSink) -> NotionResult<()> {
        let socket =
            RpcSocket::open(&self.url, &self.options, route_event, sink, on_close).await?;
        tracing::info!(url = %socket.url(), device_id = %self.device_id, "Connected to relay");
        self.socket.replace(socket).await;

        match self.sync_clock().await {
            Ok(offset_ms) => tracing::debug!(offset_ms, "Server clock offset measured"),
            Err(e) => tracing::warn!(error = %e, "Could not read server time, using local clock"),
        }
        Ok(())
    }

    async fn disconnect(&self) -> NotionResult<()> {
        if self.socket.close().await {
            tracing::info!(url = %self.url, "Cloud transport disconnected");
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
        self.call(Methods::DISPATCH_ACTION, json!({ "action": action }))
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
        super::now_millis().saturating_add_signed(self.server_offset_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OAuthClaims;

    fn config() -> NotionConfig {
        let mut config = NotionConfig::new("dev-9");
        config.cloud = true;
        config
    }

    #[test]
    fn test_params_carry_device_and_auth_id() {
        let claims = Claims::from_oauth(Some(&OAuthClaims {
            oauth: true,
            auth_id: Some("grant-1".into()),
            scopes: Some("read:kinesis".into()),
        }));
        let transport = CloudTransport::new(&config(), &claims);

        let params = transport.with_target(json!({"subscriptionId": "sub-1"}));
        assert_eq!(params["deviceId"], "dev-9");
        assert_eq!(params["authId"], "grant-1");
        assert_eq!(params["subscriptionId"], "sub-1");
    }

    #[test]
    fn test_params_without_auth_id() {
        let transport = CloudTransport::new(&config(), &Claims::unauthenticated());
        let params = transport.with_target(json!({}));
        assert_eq!(params["deviceId"], "dev-9");
        assert!(params.get("authId").is_none());
    }

    #[test]
    fn test_route_event() {
        let (id, payload) = route_event(json!({
            "type": "metric",
            "subscriptionId": "sub-4",
            "payload": {"calm": 0.4}
        }))
        .unwrap();
        assert_eq!(id, "sub-4");
        assert_eq!(payload["calm"], 0.4);

        assert!(route_event(json!({"type": "status", "subscriptionId": "sub-4"})).is_none());
        assert!(route_event(json!({"type": "metric", "payload": {}})).is_none());
    }

    #[test]
    fn test_timestamp_applies_offset() {
        let transport = CloudTransport::new(&config(), &Claims::unauthenticated());
        transport.offset_ms.store(60_000, Ordering::SeqCst);

        let local = super::super::now_millis();
        let remote = transport.timestamp();
        assert!(remote >= local + 60_000);
        assert!(remote < local + 61_000);
    }
}
