//! Device protocol domain modules.
//!
//! This namespace groups the wire structures the shipped transports exchange
//! with a device or relay:
//! - [`rpc`]: request/response/error envelope types.
//! - [`constants`]: method names, metric names and error codes.
//! - [`subscription`]: subscription descriptors handed to a transport.
//! - [`actions`]: device actions (markers, haptics, training, ...).
//! - [`device`]: device info payloads.

pub mod actions;
pub mod constants;
pub mod device;
pub mod rpc;
pub mod subscription;

pub use actions::Action;
pub use constants::{ErrorCodes, Methods, Metric};
pub use device::DeviceInfo;
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use subscription::{OperationKind, SubscriptionRequest};
