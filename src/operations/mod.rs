//! Registry of operations a worker can run.
//!
//! Operations are looked up by name at request time. Each one declares its
//! named arguments as a serde struct, so missing or misspelled parameters are
//! reported by the operation rather than discovered halfway through a run.

mod convert;

pub use convert::{ConverterConfig, register_conversions};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use thiserror::Error;

/// Named arguments of a call.
pub type Params = Map<String, Value>;

/// Failures raised while running an operation inside a worker.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Unknown operation '{0}': lookup failed, no operation with that name is registered")]
    UnknownOperation(String),

    #[error("Invalid parameters for '{operation}': {source}")]
    InvalidParams {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid format code '{0}': expected letters, digits or '_'")]
    InvalidFormat(String),

    #[error("Failed to run converter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Converter failed ({status}): {stderr}")]
    ConverterFailed { status: String, stderr: String },

    #[error("Operation '{0}' is registered twice")]
    DuplicateOperation(&'static str),

    #[error("Operation '{operation}' panicked: {message}")]
    Panicked { operation: String, message: String },
}

impl OperationError {
    /// Build an error from a caught panic payload.
    pub fn from_panic(operation: &str, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked {
            operation: operation.to_string(),
            message,
        }
    }
}

/// A named unit of work runnable inside a worker.
pub trait Operation: Send + Sync {
    /// Name clients use in the `method` field.
    fn name(&self) -> &'static str;

    /// Run the operation with its named arguments.
    fn invoke(&self, params: Params) -> Result<Value, OperationError>;
}

/// Deserialize named arguments into an operation's typed parameter struct.
pub fn parse_params<P: DeserializeOwned>(
    operation: &'static str,
    params: Params,
) -> Result<P, OperationError> {
    serde_json::from_value(Value::Object(params))
        .map_err(|source| OperationError::InvalidParams { operation, source })
}

/// Name-to-handler mapping, built once at startup and read-only afterwards.
#[derive(Default)]
pub struct OperationRegistry {
    operations: BTreeMap<&'static str, Box<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry served by worker processes.
    pub fn builtin(converter: ConverterConfig) -> Result<Self, OperationError> {
        let mut registry = Self::new();
        register_conversions(&mut registry, converter)?;
        Ok(registry)
    }

    /// Add an operation. Names must be unique.
    pub fn register(&mut self, operation: impl Operation + 'static) -> Result<(), OperationError> {
        let name = operation.name();
        if self.operations.contains_key(name) {
            return Err(OperationError::DuplicateOperation(name));
        }
        self.operations.insert(name, Box::new(operation));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn Operation, OperationError> {
        self.operations
            .get(name)
            .map(|op| op.as_ref())
            .ok_or_else(|| OperationError::UnknownOperation(name.to_string()))
    }

    /// Look up `name` and run it.
    pub fn invoke(&self, name: &str, params: Params) -> Result<Value, OperationError> {
        self.lookup(name)?.invoke(params)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    #[serde(deny_unknown_fields)]
    struct AddParams {
        a: i64,
        b: i64,
    }

    struct Add;

    impl Operation for Add {
        fn name(&self) -> &'static str {
            "add"
        }

        fn invoke(&self, params: Params) -> Result<Value, OperationError> {
            let p: AddParams = parse_params(self.name(), params)?;
            Ok(json!(p.a + p.b))
        }
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_register_and_invoke() {
        let mut registry = OperationRegistry::new();
        registry.register(Add).unwrap();
        let value = registry.invoke("add", params(json!({"a": 2, "b": 3}))).unwrap();
        assert_eq!(value, json!(5));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = OperationRegistry::new();
        registry.register(Add).unwrap();
        let err = registry.register(Add).unwrap_err();
        assert!(matches!(err, OperationError::DuplicateOperation("add")));
    }

    #[test]
    fn test_unknown_operation() {
        let registry = OperationRegistry::new();
        let err = registry.invoke("doesNotExist", Params::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Unknown operation"));
        assert!(msg.contains("lookup failed"));
    }

    #[test]
    fn test_missing_param() {
        let mut registry = OperationRegistry::new();
        registry.register(Add).unwrap();
        let err = registry.invoke("add", params(json!({"a": 2}))).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid parameters for 'add'"));
        assert!(msg.contains("missing field `b`"));
    }

    #[test]
    fn test_unknown_param_is_rejected() {
        let mut registry = OperationRegistry::new();
        registry.register(Add).unwrap();
        let err = registry
            .invoke("add", params(json!({"a": 1, "b": 2, "c": 3})))
            .unwrap_err();
        assert!(err.to_string().contains("unknown field `c`"));
    }

    #[test]
    fn test_panic_payloads() {
        let err = OperationError::from_panic("convert", &"boom");
        assert!(err.to_string().contains("boom"));
        let err = OperationError::from_panic("convert", &String::from("owned boom"));
        assert!(err.to_string().contains("owned boom"));
        let err = OperationError::from_panic("convert", &42_u8);
        assert!(err.to_string().contains("unknown panic payload"));
    }

    #[test]
    fn test_builtin_names() {
        let registry = OperationRegistry::builtin(ConverterConfig::default()).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["convert", "formats", "version"]);
    }
}
