use bytes::Bytes;
use grpcall_value::Value;

use crate::GrpcError;

/// Turns messages into wire bytes and back.
pub trait MessageCodec: Send + Sync + std::fmt::Debug {
    fn encode(&self, message: &Value) -> Result<Bytes, GrpcError>;
    fn decode(&self, bytes: Bytes) -> Result<Value, GrpcError>;
}

/// Default codec: JSON for structured values, raw bytes passed through as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode(&self, message: &Value) -> Result<Bytes, GrpcError> {
        if let Value::Bytes(b) = message {
            return Ok(b.clone());
        }
        serde_json::to_vec(&message.to_json())
            .map(Bytes::from)
            .map_err(|err| {
                GrpcError::internal(format!("failed to encode message: {err}")).with_cause(err)
            })
    }

    fn decode(&self, bytes: Bytes) -> Result<Value, GrpcError> {
        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(json) => Ok(Value::from_json(json)),
            Err(_) => Ok(Value::Bytes(bytes)),
        }
    }
}

/// Bytes in, bytes out. For callers that serialize messages themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl MessageCodec for RawCodec {
    fn encode(&self, message: &Value) -> Result<Bytes, GrpcError> {
        match message {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Value::Null => Ok(Bytes::new()),
            other => Err(GrpcError::internal(format!(
                "raw codec expects bytes, got {}",
                kind_name(other)
            ))),
        }
    }

    fn decode(&self, bytes: Bytes) -> Result<Value, GrpcError> {
        Ok(Value::Bytes(bytes))
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::I64(_) | Value::U64(_) => "integer",
        Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Array(_) => "array",
        Value::Object(_) | Value::Map(_) => "object",
    }
}
