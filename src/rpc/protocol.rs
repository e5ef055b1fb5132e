//! JSON-RPC 2.0 messages shared by both control surfaces
//!
//! Requests carry positional parameters. Every call is a single HTTP POST
//! to `/` on the server's port.

use crate::config::parse_bool;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Value::from(id),
        }
    }

    pub fn params(&self) -> Params<'_> {
        Params(&self.params)
    }
}

/// JSON-RPC response, exactly one of `result` and `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn from_result(id: Value, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(error) => Self::error(id, error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method {:?} not found", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }
}

/// Typed access to positional parameters
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(pub &'a [Value]);

impl<'a> Params<'a> {
    fn required(&self, index: usize) -> Result<&'a Value, RpcError> {
        self.0
            .get(index)
            .ok_or_else(|| RpcError::invalid_params(format!("missing parameter {}", index)))
    }

    /// Integer; numeric strings are accepted too
    pub fn int(&self, index: usize) -> Result<i64, RpcError> {
        let value = self.required(index)?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| {
                RpcError::invalid_params(format!("parameter {} must be an integer, got {}", index, value))
            })
    }

    pub fn string(&self, index: usize) -> Result<String, RpcError> {
        match self.required(index)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(RpcError::invalid_params(format!(
                "parameter {} must be a string, got {}",
                index, other
            ))),
        }
    }

    /// Optional boolean; absent and `null` mean `None`
    pub fn opt_bool(&self, index: usize) -> Result<Option<bool>, RpcError> {
        match self.0.get(index) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => Ok(Some(n.as_i64() != Some(0))),
            Some(Value::String(s)) => parse_bool(s).map(Some).ok_or_else(|| {
                RpcError::invalid_params(format!("parameter {} must be a boolean, got {:?}", index, s))
            }),
            Some(other) => Err(RpcError::invalid_params(format!(
                "parameter {} must be a boolean, got {}",
                index, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest::new(7, "enqueue", vec![json!(10), json!("/c/a.yml")]);
        let text = serde_json::to_string(&request).unwrap();
        assert!(text.contains(r#""method":"enqueue""#));
        assert!(text.contains(r#""params":[10,"/c/a.yml"]"#));

        let parsed: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"queue_state","id":"x"}"#).unwrap();
        assert!(parsed.params.is_empty());
        assert_eq!(parsed.id, json!("x"));
    }

    #[test]
    fn test_response_shapes() {
        let ok = serde_json::to_value(RpcResponse::ok(json!(1), json!(true))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "result": true, "id": 1}));

        let err = RpcResponse::error(json!(2), RpcError::method_not_found("nope"));
        let value = serde_json::to_value(err).unwrap();
        assert_eq!(value["error"]["code"], json!(RpcError::METHOD_NOT_FOUND));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_params() {
        let values = vec![json!(3), json!("12"), json!("yes"), json!(null), json!([1])];
        let params = Params(&values);

        assert_eq!(params.int(0).unwrap(), 3);
        assert_eq!(params.int(1).unwrap(), 12);
        assert_eq!(params.string(1).unwrap(), "12");
        assert_eq!(params.opt_bool(2).unwrap(), Some(true));
        assert_eq!(params.opt_bool(3).unwrap(), None);
        assert_eq!(params.opt_bool(9).unwrap(), None);
        assert_eq!(params.int(9).unwrap_err().code, RpcError::INVALID_PARAMS);
        assert!(params.string(0).is_err());
        assert!(params.opt_bool(4).is_err());
    }
}
