//! Request/response envelope structures.

use serde::{Deserialize, Serialize};

/// A request sent to a device or relay.
#[derive(Debug, Serialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Create a new request with the given method and params.
    ///
    /// An empty params object is omitted from the frame.
    pub fn new(id: u64, method: &'static str, params: serde_json::Value) -> Self {
        let params = if params.as_object().is_some_and(serde_json::Map::is_empty) {
            None
        } else {
            Some(params)
        };

        Self { id, method, params }
    }
}

/// A response frame correlated to a request by `id`.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
}

/// Raw error payload from the remote end.
///
/// Use [`NotionError::from_api_error`](crate::NotionError::from_api_error)
/// to convert to a semantic error type.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device API error {}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{ErrorCodes, Methods};

    #[test]
    fn test_serialize_request_no_params() {
        let req = RpcRequest::new(1, Methods::GET_INFO, serde_json::json!({}));

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"method\":\"getInfo\""));
        assert!(
            !json.contains("\"params\""),
            "empty params should be omitted: {json}"
        );
    }

    #[test]
    fn test_serialize_request_with_params() {
        let req = RpcRequest::new(
            7,
            Methods::UNSUBSCRIBE,
            serde_json::json!({"subscriptionId": "sub-1"}),
        );

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"subscriptionId\":\"sub-1\""));
    }

    #[test]
    fn test_deserialize_rpc_error() {
        let json = r#"{
            "id": 1,
            "error": {
                "code": -32016,
                "message": "unknown label"
            }
        }"#;

        let resp: RpcResponse = serde_json::from_str(json).unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, ErrorCodes::INVALID_SUBSCRIPTION);
        assert_eq!(error.to_string(), "Device API error -32016: unknown label");
    }
}
