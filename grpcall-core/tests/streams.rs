mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use futures::StreamExt as _;
use grpcall_core::transport::{TransportError, TransportEvent};
use grpcall_core::{
    BidiStreamEvent, CallOptions, CallState, CancellationHandle, Client, ClientStreamEvent,
    LoggingInterceptor, MethodDescriptor, ServerStream, ServerStreamEvent, StatusCode,
};
use grpcall_value::Value;

use support::{MockTransport, connected};

fn method(name: &str) -> MethodDescriptor {
    MethodDescriptor::parse(&format!("/echo.Echo/{name}"))
        .unwrap_or_else(|err| panic!("method: {err}"))
}

async fn drain(stream: &mut ServerStream) -> Vec<ServerStreamEvent> {
    let mut out = Vec::new();
    while let Some(event) = stream.next().await {
        out.push(event);
    }
    out
}

fn kinds(events: &[ServerStreamEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            ServerStreamEvent::Metadata(_) => "metadata",
            ServerStreamEvent::Data(_) => "data",
            ServerStreamEvent::Status(_) => "status",
            ServerStreamEvent::Error(_) => "error",
            ServerStreamEvent::End => "end",
        })
        .collect()
}

#[tokio::test]
async fn server_stream_delivers_events_in_order() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream(&method("Count"), Value::object([("n", 2i64)]), CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));

    let opened = transport.take_stream();
    assert_eq!(opened.request.as_deref(), Some(&br#"{"n":2}"#[..]));
    opened.metadata(&[("x-server", "mock")]);
    opened.data(r#"{"i":0}"#);
    opened.data(r#"{"i":1}"#);
    opened.status(0, "");

    let events = drain(&mut stream).await;
    assert_eq!(kinds(&events), vec!["metadata", "data", "data", "status", "end"]);
    match &events[0] {
        ServerStreamEvent::Metadata(md) => assert_eq!(md.get_str("x-server"), Some("mock")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stream.state(), CallState::Ended);
    assert_eq!(stream.peer().as_deref(), Some("ipv4:127.0.0.1:50051"));
}

#[tokio::test]
async fn non_ok_status_errors_without_end() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));

    let opened = transport.take_stream();
    opened.data("1");
    opened.status(8, "quota");
    opened.data("2");

    let events = drain(&mut stream).await;
    assert_eq!(kinds(&events), vec!["data", "status", "error"]);
    match events.last() {
        Some(ServerStreamEvent::Error(err)) => {
            assert_eq!(err.code(), StatusCode::ResourceExhausted);
            assert_eq!(err.message(), "quota");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stream.state(), CallState::Errored);
}

#[tokio::test]
async fn transport_error_and_disconnect_are_errors() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));

    let mut failed = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    transport.take_stream().send(TransportEvent::Error("reset".to_string()));
    let events = drain(&mut failed).await;
    assert!(matches!(
        events.as_slice(),
        [ServerStreamEvent::Error(e)] if e.code() == StatusCode::Unknown
    ));

    let mut dropped = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    drop(transport.take_stream());
    let events = drain(&mut dropped).await;
    assert!(matches!(
        events.as_slice(),
        [ServerStreamEvent::Error(e)] if e.code() == StatusCode::Unknown
    ));
}

#[tokio::test]
async fn undecodable_message_fails_the_stream() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let strict = method("Count").with_codec(Arc::new(StrictCodec));
    let mut stream = client
        .server_stream(&strict, Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));

    let opened = transport.take_stream();
    opened.data("not json");
    let events = drain(&mut stream).await;
    match events.as_slice() {
        [ServerStreamEvent::Error(err)] => assert_eq!(err.code(), StatusCode::Internal),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(opened.handle.cancels.load(Ordering::SeqCst), 1);
}

#[derive(Debug)]
struct StrictCodec;

impl grpcall_core::MessageCodec for StrictCodec {
    fn encode(&self, _message: &Value) -> Result<Bytes, grpcall_core::GrpcError> {
        Ok(Bytes::new())
    }

    fn decode(&self, bytes: Bytes) -> Result<Value, grpcall_core::GrpcError> {
        serde_json::from_slice(&bytes)
            .map(Value::from_json)
            .map_err(|err| grpcall_core::GrpcError::internal(err.to_string()))
    }
}

#[tokio::test]
async fn cancel_emits_one_cancelled_error_and_drops_late_events() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();

    opened.data("1");
    match stream.next().await {
        Some(ServerStreamEvent::Data(v)) => assert_eq!(v, Value::I64(1)),
        other => panic!("unexpected {other:?}"),
    }

    stream.cancel();
    stream.cancel();
    opened.data("2");
    opened.status(0, "");

    let events = drain(&mut stream).await;
    match events.as_slice() {
        [ServerStreamEvent::Error(err)] => {
            assert_eq!(err.code(), StatusCode::Cancelled);
            assert_eq!(err.message(), "stream cancelled");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(stream.state(), CallState::Cancelled);
    assert_eq!(opened.handle.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn external_cancellation_handle_cancels_stream() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let handle = CancellationHandle::new();
    let mut stream = client
        .server_stream(
            &method("Count"),
            Value::Null,
            CallOptions::default().with_cancellation(handle.clone()),
        )
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();

    handle.cancel();
    let events = drain(&mut stream).await;
    match events.as_slice() {
        [ServerStreamEvent::Error(err)] => {
            assert_eq!(err.message(), "call cancelled via cancellation handle");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(opened.handle.cancels.load(Ordering::SeqCst), 1);

    // Signalled before creation: the transport is never asked.
    let out = client.bidi_stream(
        &method("Chat"),
        CallOptions::default().with_cancellation(handle),
    );
    assert!(matches!(out, Err(ref e) if e.code() == StatusCode::Cancelled));
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn pause_and_resume_reach_transport() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let stream = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();

    stream.pause();
    stream.resume();
    assert_eq!(opened.handle.pauses.load(Ordering::SeqCst), 1);
    assert_eq!(opened.handle.resumes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_stream_resolves_with_single_response() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .client_stream(&method("Sum"), CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();

    for n in 1..=3i64 {
        let ready = stream
            .write(&Value::I64(n))
            .unwrap_or_else(|err| panic!("write: {err}"));
        assert!(ready);
    }
    stream.end();
    stream.end();
    assert_eq!(opened.handle.writes_done.load(Ordering::SeqCst), 1);
    assert_eq!(opened.handle.written().len(), 3);

    let write_after_end = stream.write(&Value::I64(4));
    assert!(matches!(write_after_end, Err(ref e) if e.code() == StatusCode::FailedPrecondition));

    opened.data(r#"{"sum":6}"#);
    opened.status(0, "");
    let response = stream.response().await.unwrap_or_else(|err| panic!("response: {err}"));
    assert_eq!(response.get("sum"), Some(&Value::I64(6)));

    // The status was consumed while waiting for the response.
    let rest: Vec<ClientStreamEvent> = stream.collect().await;
    assert!(rest.is_empty());
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn client_stream_without_response_is_internal() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .client_stream(&method("Sum"), CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();
    opened.status(0, "");

    match stream.finish().await {
        Err(err) => {
            assert_eq!(err.code(), StatusCode::Internal);
            assert_eq!(err.message(), "stream completed without a response message");
        }
        Ok(v) => panic!("unexpected response {v:?}"),
    }
}

#[tokio::test]
async fn client_stream_cancel_rejects_response() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .client_stream(&method("Sum"), CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let _opened = transport.take_stream();

    stream.cancel();
    let out = stream.response().await;
    assert!(matches!(out, Err(ref e) if e.code() == StatusCode::Cancelled));
    let write = stream.write(&Value::Null);
    assert!(matches!(write, Err(ref e) if e.code() == StatusCode::Cancelled));
}

#[tokio::test]
async fn bidi_write_reports_back_pressure() {
    let transport = MockTransport::with_high_water(2);
    let client = Client::new(connected(&transport));
    let mut stream = client
        .bidi_stream(&method("Chat"), CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();

    assert_eq!(stream.write(&Value::from("a")).ok(), Some(true));
    assert_eq!(stream.write(&Value::from("b")).ok(), Some(false));

    opened.data(r#""a""#);
    stream.end();
    opened.data(r#""b""#);
    opened.status(0, "");

    let mut got = Vec::new();
    let mut ended = false;
    while let Some(event) = stream.next().await {
        match event {
            BidiStreamEvent::Data(v) => got.push(v),
            BidiStreamEvent::End => ended = true,
            BidiStreamEvent::Error(err) => panic!("unexpected error {err}"),
            BidiStreamEvent::Metadata(_) | BidiStreamEvent::Status(_) => {}
        }
    }
    assert_eq!(got, vec![Value::from("a"), Value::from("b")]);
    assert!(ended);
    assert!(stream.write(&Value::from("c")).is_err());
}

#[tokio::test]
async fn logging_interceptor_leaves_stream_events_intact() {
    let transport = MockTransport::new();
    let client = Client::with_interceptors(
        connected(&transport),
        vec![Arc::new(LoggingInterceptor::default())],
    );
    let stream = client
        .server_stream(&method("Count"), Value::Null, CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    let opened = transport.take_stream();
    opened.data("1");
    opened.data("2");
    opened.status(0, "");

    let values = stream
        .collect_messages()
        .await
        .unwrap_or_else(|err| panic!("collect: {err}"));
    assert_eq!(values, vec![Value::I64(1), Value::I64(2)]);
}

#[test]
fn sync_server_stream_iterates_until_end() {
    let transport = MockTransport::new();
    transport.script_sync_reads([
        Ok(Some(Bytes::from_static(b"1"))),
        Ok(Some(Bytes::from_static(b"2"))),
        Ok(None),
    ]);
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream_sync(&method("Count"), &Value::Null, &CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));

    let values: Vec<Value> = stream.by_ref().collect();
    assert_eq!(values, vec![Value::I64(1), Value::I64(2)]);
    assert!(stream.error().is_none());
    assert_eq!(transport.sync_calls()[0].method, "/echo.Echo/Count");
}

#[test]
fn sync_server_stream_error_is_checked_explicitly() {
    let transport = MockTransport::new();
    transport.script_sync_reads([
        Ok(Some(Bytes::from_static(b"1"))),
        Err(TransportError::status(14, "gone")),
    ]);
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream_sync(&method("Count"), &Value::Null, &CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));

    assert_eq!(stream.by_ref().count(), 1);
    assert_eq!(
        stream.error().map(grpcall_core::GrpcError::code),
        Some(StatusCode::Unavailable)
    );
}

#[test]
fn sync_client_and_bidi_streams() {
    let transport = MockTransport::new();
    let client = Client::new(connected(&transport));

    let mut upload = client
        .client_stream_sync(&method("Sum"), &CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    for n in 0..4i64 {
        upload
            .write(&Value::I64(n))
            .unwrap_or_else(|err| panic!("write: {err}"));
    }
    let response = upload.finish().unwrap_or_else(|err| panic!("finish: {err}"));
    assert_eq!(response.get("count"), Some(&Value::I64(4)));

    let mut chat = client
        .bidi_stream_sync(&method("Chat"), &CallOptions::default())
        .unwrap_or_else(|err| panic!("stream: {err}"));
    chat.write(&Value::from("hi"))
        .unwrap_or_else(|err| panic!("write: {err}"));
    assert_eq!(
        chat.read().unwrap_or_else(|err| panic!("read: {err}")),
        Some(Value::from("hi"))
    );
    chat.finish().unwrap_or_else(|err| panic!("finish: {err}"));
    assert_eq!(chat.next(), None);

    chat.cancel();
    assert_eq!(transport.sync_cancels.load(Ordering::SeqCst), 0);
}

#[test]
fn sync_server_stream_stops_when_handle_fires_mid_stream() {
    let transport = MockTransport::new();
    transport.script_sync_reads([
        Ok(Some(Bytes::from_static(b"1"))),
        Ok(Some(Bytes::from_static(b"2"))),
        Ok(None),
    ]);
    let handle = CancellationHandle::new();
    let client = Client::new(connected(&transport));
    let mut stream = client
        .server_stream_sync(
            &method("Count"),
            &Value::Null,
            &CallOptions::default().with_cancellation(handle.clone()),
        )
        .unwrap_or_else(|err| panic!("stream: {err}"));

    assert_eq!(stream.next(), Some(Value::I64(1)));
    handle.cancel();

    let rest: Vec<Value> = stream.by_ref().collect();
    assert!(rest.is_empty());
    assert_eq!(stream.state(), CallState::Cancelled);
    assert_eq!(
        stream.error().map(grpcall_core::GrpcError::code),
        Some(StatusCode::Cancelled)
    );
    assert_eq!(transport.sync_cancels.load(Ordering::SeqCst), 1);

    stream.cancel();
    assert_eq!(transport.sync_cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn sync_client_stream_rejects_writes_and_finish_after_handle_fires() {
    let transport = MockTransport::new();
    let handle = CancellationHandle::new();
    let client = Client::new(connected(&transport));
    let mut upload = client
        .client_stream_sync(
            &method("Sum"),
            &CallOptions::default().with_cancellation(handle.clone()),
        )
        .unwrap_or_else(|err| panic!("stream: {err}"));

    upload
        .write(&Value::I64(1))
        .unwrap_or_else(|err| panic!("write: {err}"));
    handle.cancel();

    let write = upload.write(&Value::I64(2));
    assert!(matches!(write, Err(ref e) if e.code() == StatusCode::Cancelled));
    let finish = upload.finish();
    assert!(matches!(finish, Err(ref e) if e.code() == StatusCode::Cancelled));
    assert_eq!(upload.state(), CallState::Cancelled);
    assert_eq!(transport.sync_cancels.load(Ordering::SeqCst), 1);
}
