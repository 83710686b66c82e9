//! # neurosity-notion
//!
//! A Rust client for the Neurosity Notion headset.
//!
//! Device metrics (brainwaves, accelerometer, kinesis, calm/focus, signal
//! quality, predictions) are exposed as subscribable streams, and device
//! actions (markers, haptics, training, recording, wifi reset) as async
//! calls. Both travel over one of two interchangeable transports: the cloud
//! relay or a direct socket to the device on the local network.
//!
//! ## Quick Start
//!
//! ```ignore
//! use neurosity_notion::{NotionClient, NotionConfig};
//!
//! #[tokio::main]
//! async fn main() -> neurosity_notion::NotionResult<()> {
//!     // Load config from environment or notion.toml
//!     let config = NotionConfig::discover(None)?;
//!
//!     // Connects on construction unless auto_connect = false
//!     let client = NotionClient::new(config).await?;
//!
//!     let kinesis = client.metrics().kinesis(["push", "pull"])?;
//!     let sub = kinesis.subscribe(|payload| println!("{payload}")).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(4)).await;
//!     sub.unsubscribe().await?;
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Shared subscriptions
//!
//! Subscribing twice to the same logical stream (same metric, same label
//! set in any order, same atomicity) opens a single transport
//! subscription. Every listener gets every payload, in subscription order,
//! and the transport subscription closes when the last listener leaves.
//!
//! ## OAuth scopes
//!
//! Sessions created from a third-party OAuth token carry a scope list.
//! Every call is checked against it first; a denied call fails with
//! [`NotionError::ScopeDenied`] naming every missing scope and never
//! reaches the device. Sessions without OAuth claims are unrestricted.
//!
//! ## Configuration
//!
//! See [`NotionConfig`] for the full configuration reference.
//! The simplest setup uses environment variables:
//!
//! ```bash
//! export NEURO_DEVICE_ID="your-device-id"
//! export NEURO_CLOUD=true
//! ```
//!
//! Or a `notion.toml` file:
//!
//! ```toml
//! device_id = "your-device-id"
//! cloud = true
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod observable;
pub mod protocol;
pub mod registry;
pub mod scopes;
pub mod transport;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use auth::{Authorizer, Claims, OAuthClaims};
pub use client::{Actions, ConnectionState, Metrics, NotionClient};
pub use config::NotionConfig;
pub use error::{NotionError, NotionResult};
pub use observable::{ObservableStream, PayloadStream, Subscription};
pub use protocol::{Action, DeviceInfo, Metric};
pub use scopes::{ScopeMatrix, UnknownScopePolicy};
pub use transport::{CloseSink, DeviceTransport, PayloadSink, Transport, TransportKind};
