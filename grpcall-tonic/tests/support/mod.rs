#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use grpcall_core::{
    Channel, ChannelCredentials, ChannelOptions, GrpcError, MessageCodec, MethodDescriptor,
    Transport,
};
use grpcall_testserver::echo;
use grpcall_tonic::TonicTransport;
use grpcall_value::Value;
use prost::Message as _;

/// Which request message a method takes. Every test method answers with `EchoResponse`.
#[derive(Debug, Clone, Copy)]
pub enum RequestShape {
    Echo,
    Count,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct EchoCodec(pub RequestShape);

fn field_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_i32(v: &Value, key: &str) -> i32 {
    v.get(key)
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or_default()
}

impl MessageCodec for EchoCodec {
    fn encode(&self, message: &Value) -> Result<Bytes, GrpcError> {
        let bytes = match self.0 {
            RequestShape::Echo => echo::EchoRequest {
                message: field_str(message, "message"),
            }
            .encode_to_vec(),
            RequestShape::Count => echo::CountRequest {
                count: field_i32(message, "count"),
                prefix: field_str(message, "prefix"),
            }
            .encode_to_vec(),
            RequestShape::Fail => echo::FailRequest {
                code: field_i32(message, "code"),
                message: field_str(message, "message"),
            }
            .encode_to_vec(),
        };
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, bytes: Bytes) -> Result<Value, GrpcError> {
        let msg = echo::EchoResponse::decode(bytes)
            .map_err(|err| GrpcError::internal(format!("bad echo response: {err}")))?;
        Ok(Value::object([
            ("message", msg.message),
            ("clientId", msg.client_id),
            ("authorization", msg.authorization),
        ]))
    }
}

pub fn method(path: &str, shape: RequestShape) -> MethodDescriptor {
    MethodDescriptor::parse(path)
        .unwrap_or_else(|err| panic!("method {path}: {err}"))
        .with_codec(Arc::new(EchoCodec(shape)))
}

pub fn echo_request(message: &str) -> Value {
    Value::object([("message", message)])
}

pub fn message(v: &Value) -> &str {
    v.get("message").and_then(Value::as_str).unwrap_or_default()
}

pub fn open(target: &str, credentials: &ChannelCredentials) -> (Arc<TonicTransport>, Channel) {
    let transport = Arc::new(TonicTransport::new());
    let channel = Channel::open(
        Arc::clone(&transport) as Arc<dyn Transport>,
        target,
        credentials,
        &ChannelOptions::default(),
    )
    .unwrap_or_else(|err| panic!("open channel: {err}"));
    (transport, channel)
}
