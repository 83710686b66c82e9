#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use neurosity_notion::protocol::SubscriptionRequest;
use neurosity_notion::{
    Action, CloseSink, DeviceInfo, NotionError, NotionResult, PayloadSink, Transport,
    TransportKind,
};
use serde_json::Value;

/// Every transport call, in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect,
    Disconnect,
    Start(SubscriptionRequest),
    Stop(String),
    Dispatch(Action),
    GetInfo,
    ChangeSettings(Value),
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    sink: Mutex<Option<PayloadSink>>,
    on_close: Mutex<Option<CloseSink>>,
    next_id: AtomicUsize,
    start_delay_ms: AtomicU64,
    stop_delay_ms: AtomicU64,
    fail_connect: AtomicBool,
    reject_starts: AtomicBool,
    fail_stops: AtomicBool,
}

/// In-memory transport that records calls and lets tests push payloads.
///
/// Clones share state, so a test can hand one clone to the client and keep
/// another for inspection.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> Vec<SubscriptionRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Start(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn stops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().unwrap().clear();
    }

    pub fn fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn reject_starts(&self, reject: bool) {
        self.shared.reject_starts.store(reject, Ordering::SeqCst);
    }

    pub fn fail_stops(&self, fail: bool) {
        self.shared.fail_stops.store(fail, Ordering::SeqCst);
    }

    /// Make every `start_subscription` take `delay` before answering.
    pub fn delay_starts(&self, delay: Duration) {
        self.shared
            .start_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Make every `stop_subscription` take `delay` before answering.
    pub fn delay_stops(&self, delay: Duration) {
        self.shared
            .stop_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    /// Drop the connection as if the device went away.
    ///
    /// Returns `false` if the transport is not connected.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.shared.sink.lock().unwrap().take();
        let on_close = self.shared.on_close.lock().unwrap().take();
        match on_close {
            Some(on_close) => {
                on_close(reason);
                true
            }
            None => false,
        }
    }

    /// Deliver `payload` as if it arrived for `transport_id`.
    ///
    /// Returns `false` if the transport is not connected.
    pub fn push(&self, transport_id: &str, payload: Value) -> bool {
        let sink = self.shared.sink.lock().unwrap().clone();
        match sink {
            Some(sink) => {
                sink(transport_id, &payload);
                true
            }
            None => false,
        }
    }

    fn record(&self, call: Call) {
        self.shared.calls.lock().unwrap().push(call);
    }

    async fn pause(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn connect(&self, sink: PayloadSink, on_close: CloseSink) -> NotionResult<()> {
        self.record(Call::Connect);
        if self.shared.fail_connect.load(Ordering::SeqCst) {
            return Err(NotionError::ConnectionFailed {
                url: "mock://device".into(),
                reason: "refused".into(),
            });
        }
        *self.shared.sink.lock().unwrap() = Some(sink);
        *self.shared.on_close.lock().unwrap() = Some(on_close);
        Ok(())
    }

    async fn disconnect(&self) -> NotionResult<()> {
        self.record(Call::Disconnect);
        self.shared.sink.lock().unwrap().take();
        self.shared.on_close.lock().unwrap().take();
        Ok(())
    }

    async fn start_subscription(&self, request: &SubscriptionRequest) -> NotionResult<String> {
        self.record(Call::Start(request.clone()));
        Self::pause(&self.shared.start_delay_ms).await;
        if self.shared.reject_starts.load(Ordering::SeqCst) {
            return Err(NotionError::SubscriptionRejected {
                reason: "mock rejected".into(),
            });
        }
        let n = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("sub-{n}"))
    }

    async fn stop_subscription(&self, subscription_id: &str) -> NotionResult<()> {
        self.record(Call::Stop(subscription_id.to_string()));
        Self::pause(&self.shared.stop_delay_ms).await;
        if self.shared.fail_stops.load(Ordering::SeqCst) {
            return Err(NotionError::ConnectionLost {
                reason: "mock stop failed".into(),
            });
        }
        Ok(())
    }

    async fn dispatch_action(&self, action: &Action) -> NotionResult<Value> {
        self.record(Call::Dispatch(action.clone()));
        Ok(serde_json::json!({"ok": true}))
    }

    async fn get_info(&self) -> NotionResult<DeviceInfo> {
        self.record(Call::GetInfo);
        Ok(serde_json::from_value(serde_json::json!({
            "deviceId": "mock-device",
            "modelName": "Crown",
        }))?)
    }

    async fn change_settings(&self, settings: &Value) -> NotionResult<()> {
        self.record(Call::ChangeSettings(settings.clone()));
        Ok(())
    }

    fn timestamp(&self) -> u64 {
        1_700_000_000_000
    }
}
