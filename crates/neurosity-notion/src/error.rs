//! # Error Types
//!
//! Semantic error types for the Notion client. Two families matter to callers:
//!
//! - **Scope errors** ([`NotionError::ScopeDenied`]) are local decisions made
//!   before any transport traffic. They are recoverable: re-authenticate with
//!   a broader OAuth grant and try again.
//! - **Transport errors** (everything connection- or protocol-shaped) come
//!   from the active transport and are surfaced unchanged. This layer never
//!   retries them.
//!
//! Double unsubscribes and payloads arriving for torn-down subscriptions are
//! not errors at all; they are silent no-ops.
//!
//! ## Error Code Mapping
//!
//! Device and relay endpoints reply with numeric error codes.
//! [`NotionError::from_api_error`] maps known codes to semantic variants.

use thiserror::Error;

use crate::protocol::constants::ErrorCodes;

/// Convenient Result alias for Notion operations.
pub type NotionResult<T> = std::result::Result<T, NotionError>;

/// All errors that can occur when talking to a Notion device.
#[derive(Error, Debug)]
pub enum NotionError {
    // ─── Authorization ──────────────────────────────────────────────
    /// The OAuth claims of this session lack one or more required scopes.
    #[error(
        "You are trying to access data with an OAuth token without access to the following scopes: {}.",
        .missing.join(", ")
    )]
    ScopeDenied { missing: Vec<String> },

    // ─── Connection ─────────────────────────────────────────────────
    /// Failed to establish a connection to the device or relay.
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The connection was lost after being established.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The client is not connected.
    #[error("Not connected to the device")]
    NotConnected,

    // ─── Subscriptions ──────────────────────────────────────────────
    /// The transport refused to start a subscription.
    #[error("Subscription rejected: {reason}")]
    SubscriptionRejected { reason: String },

    // ─── API ────────────────────────────────────────────────────────
    /// Raw API error that doesn't map to a more specific variant.
    #[error("Device API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// The requested method is not supported by the remote end.
    #[error("API method not found: {method}")]
    MethodNotFound { method: String },

    /// The device is offline (relay could reach no device).
    #[error("Device is offline")]
    DeviceOffline,

    // ─── Timeout ────────────────────────────────────────────────────
    /// An operation timed out waiting for a response.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // ─── Protocol ───────────────────────────────────────────────────
    /// Received an unexpected or malformed message.
    #[error("Protocol error: {reason}")]
    ProtocolError { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── WebSocket ──────────────────────────────────────────────────
    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    Tls(String),

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error (config file reading, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NotionError {
    /// Map an API error code + message to the most specific error variant.
    ///
    /// Known codes:
    /// - `-32601`: Method not found
    /// - `-32001`: Device offline
    /// - `-32016`: Invalid subscription (metric/labels rejected)
    pub fn from_api_error(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCodes::METHOD_NOT_FOUND => NotionError::MethodNotFound { method: message },
            ErrorCodes::DEVICE_OFFLINE => NotionError::DeviceOffline,
            ErrorCodes::INVALID_SUBSCRIPTION => NotionError::SubscriptionRejected { reason: message },
            _ => NotionError::ApiError { code, message },
        }
    }

    /// Returns `true` if this error came from the scope check rather than
    /// the transport.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, NotionError::ScopeDenied { .. })
    }

    /// Returns `true` if this error indicates the connection is dead.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            NotionError::ConnectionFailed { .. }
                | NotionError::ConnectionLost { .. }
                | NotionError::NotConnected
                | NotionError::WebSocket(_)
        )
    }

    /// Scopes named by a [`ScopeDenied`](NotionError::ScopeDenied) error.
    pub fn missing_scopes(&self) -> &[String] {
        match self {
            NotionError::ScopeDenied { missing } => missing,
            _ => &[],
        }
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for NotionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        NotionError::WebSocket(err.to_string())
    }
}

#[cfg(feature = "native-tls")]
impl From<native_tls::Error> for NotionError {
    fn from(err: native_tls::Error) -> Self {
        NotionError::Tls(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for NotionError {
    fn from(err: toml::de::Error) -> Self {
        NotionError::ConfigError {
            reason: err.to_string(),
        }
    }
}
