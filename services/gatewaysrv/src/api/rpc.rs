//! JSON-RPC 2.0 dispatch
//!
//! Shared by the HTTP ingress and the MQTT bridge. Methods:
//! `writeSetPoint` and `readObject`.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{GatewaySrvError, Result};
use crate::model::{ObjectKey, ObjectSnapshot, ObjectType, PresentValue};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// Engine-side failure (unknown object, transport down)
pub const SERVER_ERROR: i64 = -32000;

/// Engine operations reachable from the RPC surface
#[async_trait]
pub trait ObjectAccess: Send + Sync {
    async fn read(&self, key: ObjectKey) -> Result<ObjectSnapshot>;

    async fn write_with_check(
        &self,
        key: ObjectKey,
        value: PresentValue,
        priority: u8,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// Object address accepted by both methods
#[derive(Debug, Deserialize)]
struct ObjectParams {
    device_id: u32,
    #[serde(deserialize_with = "object_type_param")]
    object_type: ObjectType,
    object_id: u32,
}

impl ObjectParams {
    fn key(&self) -> ObjectKey {
        ObjectKey::new(self.device_id, self.object_type, self.object_id)
    }
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    #[serde(flatten)]
    object: ObjectParams,
    value: Value,
    #[serde(default)]
    priority: Option<u8>,
}

/// Numeric type id or dashed name
fn object_type_param<'de, D>(deserializer: D) -> std::result::Result<ObjectType, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    let parsed = match &raw {
        Value::Number(n) => n
            .as_u64()
            .and_then(|id| u16::try_from(id).ok())
            .and_then(ObjectType::from_id)
            .ok_or_else(|| format!("Unknown object type id: {}", n)),
        Value::String(s) => s.parse::<ObjectType>(),
        other => Err(format!("Invalid object type: {}", other)),
    };
    parsed.map_err(serde::de::Error::custom)
}

/// Routes JSON-RPC requests to the engine
#[derive(Clone)]
pub struct RpcDispatcher {
    gateway: Arc<dyn ObjectAccess>,
    default_priority: u8,
}

impl std::fmt::Debug for RpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDispatcher")
            .field("default_priority", &self.default_priority)
            .finish()
    }
}

impl RpcDispatcher {
    pub fn new(gateway: Arc<dyn ObjectAccess>, default_priority: u8) -> Self {
        Self {
            gateway,
            default_priority,
        }
    }

    /// Parse and dispatch a raw request body
    pub async fn handle_bytes(&self, body: &[u8]) -> RpcResponse {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return RpcResponse::failure(Value::Null, PARSE_ERROR, e.to_string()),
        };
        self.handle_value(value).await
    }

    pub async fn handle_value(&self, value: Value) -> RpcResponse {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => RpcResponse::failure(id, INVALID_REQUEST, e.to_string()),
        }
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        if let Some(version) = request.jsonrpc.as_deref() {
            if version != "2.0" {
                debug!("JSON-RPC request with version {}", version);
            }
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "writeSetPoint" => self.write_set_point(request.params).await,
            "readObject" => self.read_object(request.params).await,
            other => {
                return RpcResponse::failure(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                )
            },
        };

        match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(RpcFailure::Params(message)) => RpcResponse::failure(id, INVALID_PARAMS, message),
            Err(RpcFailure::Engine(e)) => {
                warn!("JSON-RPC {} failed: {}", request.method, e);
                RpcResponse::failure(id, SERVER_ERROR, e.to_string())
            },
        }
    }

    async fn write_set_point(&self, params: Value) -> std::result::Result<Value, RpcFailure> {
        let params: WriteParams =
            serde_json::from_value(params).map_err(|e| RpcFailure::Params(e.to_string()))?;
        let value = PresentValue::from_json(&params.value)
            .ok_or_else(|| RpcFailure::Params(format!("Unsupported value: {}", params.value)))?;
        let priority = params.priority.unwrap_or(self.default_priority);
        if !(1..=16).contains(&priority) {
            return Err(RpcFailure::Params(format!(
                "priority must be 1..=16, got {}",
                priority
            )));
        }

        let success = self
            .gateway
            .write_with_check(params.object.key(), value, priority)
            .await?;
        Ok(json!({ "success": success }))
    }

    async fn read_object(&self, params: Value) -> std::result::Result<Value, RpcFailure> {
        let params: ObjectParams =
            serde_json::from_value(params).map_err(|e| RpcFailure::Params(e.to_string()))?;
        let snapshot = self.gateway.read(params.key()).await?;
        serde_json::to_value(snapshot).map_err(|e| RpcFailure::Engine(e.into()))
    }
}

enum RpcFailure {
    Params(String),
    Engine(GatewaySrvError),
}

impl From<GatewaySrvError> for RpcFailure {
    fn from(err: GatewaySrvError) -> Self {
        match err {
            GatewaySrvError::ValidationError(message) => RpcFailure::Params(message),
            other => RpcFailure::Engine(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records writes and answers reads with a fixed value
    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub writes: Mutex<Vec<(ObjectKey, PresentValue, u8)>>,
    }

    #[async_trait]
    impl ObjectAccess for FakeGateway {
        async fn read(&self, key: ObjectKey) -> Result<ObjectSnapshot> {
            if key.device_id != 1 {
                return Err(GatewaySrvError::device_not_found(key.device_id));
            }
            Ok(ObjectSnapshot {
                device_id: key.device_id,
                object_type: key.object_type.id(),
                object_id: key.object_id,
                name: "obj".into(),
                present_value: PresentValue::Real(21.5),
                status_flags: 0,
                reliability: None,
                priority_array: None,
                updated_at: None,
                changed_at: None,
                unreachable_in_row: 0,
                exists: true,
            })
        }

        async fn write_with_check(
            &self,
            key: ObjectKey,
            value: PresentValue,
            priority: u8,
        ) -> Result<bool> {
            let matched = value != PresentValue::Int(13);
            self.writes.lock().push((key, value, priority));
            Ok(matched)
        }
    }

    fn dispatcher() -> (Arc<FakeGateway>, RpcDispatcher) {
        let gateway = Arc::new(FakeGateway::default());
        (gateway.clone(), RpcDispatcher::new(gateway, 8))
    }

    #[tokio::test]
    async fn test_write_set_point_with_dashed_type_and_default_priority() {
        let (gateway, rpc) = dispatcher();
        let response = rpc
            .handle_value(json!({
                "jsonrpc": "2.0", "id": 4, "method": "writeSetPoint",
                "params": {"device_id": 1, "object_type": "analog-value", "object_id": 2, "value": 7}
            }))
            .await;

        assert_eq!(response.result, Some(json!({"success": true})));
        assert_eq!(response.id, json!(4));
        assert_eq!(
            gateway.writes.lock()[0],
            (
                ObjectKey::new(1, ObjectType::AnalogValue, 2),
                PresentValue::Int(7),
                8
            )
        );
    }

    #[tokio::test]
    async fn test_write_mismatch_reports_false() {
        let (gateway, rpc) = dispatcher();
        let response = rpc
            .handle_value(json!({
                "id": 1, "method": "writeSetPoint",
                "params": {"device_id": 1, "object_type": 2, "object_id": 2, "value": 13, "priority": 11}
            }))
            .await;
        assert_eq!(response.result, Some(json!({"success": false})));
        assert_eq!(gateway.writes.lock()[0].2, 11);
    }

    #[tokio::test]
    async fn test_errors() {
        let (_, rpc) = dispatcher();

        let unknown = rpc.handle_value(json!({"id": 1, "method": "reboot"})).await;
        assert_eq!(unknown.error.unwrap().code, METHOD_NOT_FOUND);

        let garbage = rpc.handle_bytes(b"{not json").await;
        assert_eq!(garbage.error.unwrap().code, PARSE_ERROR);

        let bad_type = rpc
            .handle_value(json!({
                "id": 1, "method": "readObject",
                "params": {"device_id": 1, "object_type": "pump", "object_id": 2}
            }))
            .await;
        assert_eq!(bad_type.error.unwrap().code, INVALID_PARAMS);

        let bad_priority = rpc
            .handle_value(json!({
                "id": 1, "method": "writeSetPoint",
                "params": {"device_id": 1, "object_type": 1, "object_id": 2, "value": 1, "priority": 17}
            }))
            .await;
        assert_eq!(bad_priority.error.unwrap().code, INVALID_PARAMS);

        let missing_device = rpc
            .handle_value(json!({
                "id": 1, "method": "readObject",
                "params": {"device_id": 9, "object_type": 0, "object_id": 2}
            }))
            .await;
        assert_eq!(missing_device.error.unwrap().code, SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_read_object_returns_snapshot() {
        let (_, rpc) = dispatcher();
        let response = rpc
            .handle_value(json!({
                "id": "r1", "method": "readObject",
                "params": {"device_id": 1, "object_type": 0, "object_id": 5}
            }))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["object_id"], json!(5));
        assert_eq!(result["present_value"], json!(21.5));
    }
}
