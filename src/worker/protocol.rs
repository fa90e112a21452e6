//! IPC protocol for worker subprocess communication.
//!
//! Messages are JSON-serialized and newline-delimited. A worker announces
//! `ready` once after startup and then answers every `call` with exactly one
//! `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request from parent to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkRequest {
    /// Run a registered operation with named parameters.
    #[serde(rename = "call")]
    Call {
        /// Registered operation name.
        method: String,
        /// Named arguments for the operation.
        #[serde(default)]
        params: Map<String, Value>,
    },

    /// Graceful shutdown request.
    #[serde(rename = "exit")]
    Exit,
}

/// Response from worker to parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkResponse {
    /// Operation return value.
    #[serde(rename = "result")]
    Result { value: Value },

    /// The operation (or the request itself) failed.
    #[serde(rename = "error")]
    Error { message: String },

    /// Worker is ready for work.
    #[serde(rename = "ready")]
    Ready,
}

impl WorkRequest {
    /// Create a call request.
    pub fn call(method: impl Into<String>, params: Map<String, Value>) -> Self {
        Self::Call {
            method: method.into(),
            params,
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    /// Create an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_request_wire_format() {
        let mut params = Map::new();
        params.insert("from".into(), json!("smi"));
        let line = WorkRequest::call("convert", params).to_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "call");
        assert_eq!(value["method"], "convert");
        assert_eq!(value["params"]["from"], "smi");
    }

    #[test]
    fn test_call_without_params_defaults_to_empty() {
        let parsed = WorkRequest::from_line(r#"{"type":"call","method":"version"}"#).unwrap();
        match parsed {
            WorkRequest::Call { method, params } => {
                assert_eq!(method, "version");
                assert!(params.is_empty());
            }
            _ => panic!("Expected Call variant"),
        }
    }

    #[test]
    fn test_exit_request() {
        let line = WorkRequest::Exit.to_line().unwrap();
        assert!(matches!(
            WorkRequest::from_line(&line).unwrap(),
            WorkRequest::Exit
        ));
    }

    #[test]
    fn test_error_response() {
        let line = WorkResponse::error("something went wrong")
            .to_line()
            .unwrap();
        match WorkResponse::from_line(&line).unwrap() {
            WorkResponse::Error { message } => assert_eq!(message, "something went wrong"),
            _ => panic!("Expected Error variant"),
        }
    }

    #[test]
    fn test_result_response_keeps_structure() {
        let resp = WorkResponse::Result {
            value: json!([{"code": "smi", "description": "SMILES format"}]),
        };
        let parsed = WorkResponse::from_line(&resp.to_line().unwrap()).unwrap();
        match parsed {
            WorkResponse::Result { value } => assert_eq!(value[0]["code"], "smi"),
            _ => panic!("Expected Result variant"),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(WorkResponse::from_line(r#"{"type":"restart"}"#).is_err());
    }
}
