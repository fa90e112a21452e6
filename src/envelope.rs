//! Request and response envelopes exchanged with clients.
//!
//! A request is `{"id": ..., "method": "...", "params": {...}}` and a
//! response is `{"id": ..., "result": ..., "error": bool}`. The `id` is
//! echoed back untouched.
//!
//! # Example
//!
//! ```
//! use molbridge::envelope::{RequestEnvelope, ResponseEnvelope};
//! use serde_json::json;
//!
//! let request = RequestEnvelope::parse(r#"{"id": 7, "method": "version"}"#).unwrap();
//! assert_eq!(request.method, "version");
//!
//! let response = ResponseEnvelope::success(request.id, json!("Open Babel 3.1.0"));
//! assert_eq!(
//!     response.to_json(),
//!     r#"{"id":7,"result":"Open Babel 3.1.0","error":false}"#
//! );
//! ```

use crate::operations::Params;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// One client request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Opaque request id, `null` when absent.
    pub id: Value,
    /// Operation name.
    pub method: String,
    /// Named arguments. Missing or `null` params become an empty map.
    pub params: Params,
}

/// A frame that could not be turned into a request.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRequest {
    /// The id, when the frame was an object carrying one.
    pub id: Value,
    pub reason: String,
}

impl fmt::Display for MalformedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed request: {}", self.reason)
    }
}

impl std::error::Error for MalformedRequest {}

impl RequestEnvelope {
    pub fn new(id: Value, method: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Parse one raw frame.
    pub fn parse(frame: &str) -> Result<Self, MalformedRequest> {
        let value: Value = serde_json::from_str(frame).map_err(|e| MalformedRequest {
            id: Value::Null,
            reason: format!("invalid JSON: {}", e),
        })?;
        Self::from_value(value)
    }

    /// Build a request from an already decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, MalformedRequest> {
        let Value::Object(mut object) = value else {
            return Err(MalformedRequest {
                id: Value::Null,
                reason: "expected a JSON object".to_string(),
            });
        };

        let id = object.remove("id").unwrap_or(Value::Null);
        let malformed = |reason: &str| MalformedRequest {
            id: id.clone(),
            reason: reason.to_string(),
        };

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => return Err(malformed("`method` must be a string")),
            None => return Err(malformed("missing `method`")),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => Params::new(),
            Some(Value::Object(params)) => params,
            Some(_) => return Err(malformed("`params` must be an object")),
        };

        Ok(Self { id, method, params })
    }
}

/// One reply, tagged with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub id: Value,
    /// The return value, or a diagnostic string when `error` is set.
    pub result: Value,
    pub error: bool,
}

impl ResponseEnvelope {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result,
            error: false,
        }
    }

    pub fn failure(id: Value, diagnostic: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::String(diagnostic.into()),
            error: true,
        }
    }

    /// Serialize to a single JSON line without a trailing newline.
    pub fn to_json(&self) -> String {
        // Serializing Values and a bool cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":null,"result":"Failed to encode response: {}","error":true}}"#,
                e
            )
        })
    }
}

impl From<MalformedRequest> for ResponseEnvelope {
    fn from(malformed: MalformedRequest) -> Self {
        let diagnostic = malformed.to_string();
        Self::failure(malformed.id, diagnostic)
    }
}
