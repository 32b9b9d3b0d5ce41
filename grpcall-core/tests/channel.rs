mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use grpcall_core::descriptor::{ChannelOptionsDescriptor, CredentialsDescriptor, CredentialsKind};
use grpcall_core::{
    CallOptions, Channel, ChannelCredentials, ChannelError, ChannelOptions, Client,
    ConnectivityState, Deadline, MethodDescriptor, StatusCode, Transport,
};
use grpcall_value::Value;

use support::{MockTransport, TARGET, connected};

fn method() -> MethodDescriptor {
    MethodDescriptor::parse("/echo.Echo/Unary").unwrap_or_else(|err| panic!("method: {err}"))
}

#[test]
fn connect_passes_descriptors_to_transport() {
    let transport = MockTransport::new();
    let options = ChannelOptions {
        primary_user_agent: Some("grpcall-tests".to_string()),
        keepalive_time: Some(Duration::from_secs(30)),
        ..ChannelOptions::default()
    };
    let channel = Channel::new(Arc::clone(&transport) as Arc<dyn Transport>);
    channel
        .connect(TARGET, &ChannelCredentials::insecure(), &options)
        .unwrap_or_else(|err| panic!("connect: {err}"));

    let connects = transport.connects();
    assert_eq!(connects.len(), 1);
    let (target, creds, opts) = &connects[0];
    assert_eq!(target, TARGET);

    let creds = CredentialsDescriptor::decode(creds).unwrap_or_else(|err| panic!("creds: {err}"));
    assert_eq!(creds.kind, CredentialsKind::Insecure);

    let opts = ChannelOptionsDescriptor::decode(opts).unwrap_or_else(|err| panic!("opts: {err}"));
    assert_eq!(opts.primary_user_agent.as_deref(), Some("grpcall-tests"));
    assert_eq!(opts.keepalive_time_ms, Some(30_000));
    assert_eq!(channel.target().as_deref(), Some(TARGET));
}

#[test]
fn connect_twice_fails() {
    let transport = MockTransport::new();
    let channel = connected(&transport);
    let again = channel.connect(
        TARGET,
        &ChannelCredentials::insecure(),
        &ChannelOptions::default(),
    );
    assert!(matches!(again, Err(ChannelError::AlreadyConnected)));
    assert_eq!(transport.connects().len(), 1);
}

#[test]
fn invalid_target_is_rejected() {
    let transport = MockTransport::new();
    let channel = Channel::new(Arc::clone(&transport) as Arc<dyn Transport>);
    let out = channel.connect(
        "not a target",
        &ChannelCredentials::insecure(),
        &ChannelOptions::default(),
    );
    assert!(matches!(out, Err(ChannelError::InvalidTarget(_))));
    assert!(transport.connects().is_empty());
}

#[test]
fn close_is_idempotent_and_reports_shutdown() {
    let transport = MockTransport::new();
    let channel = connected(&transport);
    transport.set_connectivity(ConnectivityState::Ready);
    assert_eq!(channel.connectivity_state(false), ConnectivityState::Ready);

    channel.close();
    channel.close();
    assert!(channel.is_closed());
    assert!(transport.is_closed());

    // The transport may report anything after close; the channel says shutdown.
    transport.set_connectivity(ConnectivityState::Ready);
    assert_eq!(channel.connectivity_state(true), ConnectivityState::Shutdown);

    let reconnect = channel.connect(
        TARGET,
        &ChannelCredentials::insecure(),
        &ChannelOptions::default(),
    );
    assert!(matches!(reconnect, Err(ChannelError::Closed)));
}

#[tokio::test]
async fn calls_on_closed_channel_never_reach_transport() {
    let transport = MockTransport::new();
    let channel = connected(&transport);
    let client = Client::new(channel.clone());
    channel.close();

    let out = client
        .unary_call(&method(), Value::from("hi"), CallOptions::default())
        .await;
    match out {
        Err(err) => {
            assert_eq!(err.code(), StatusCode::FailedPrecondition);
            assert_eq!(err.message(), "channel is closed");
        }
        Ok(v) => panic!("unexpected response {v:?}"),
    }

    let stream = client.server_stream(&method(), Value::Null, CallOptions::default());
    assert!(matches!(stream, Err(ref e) if e.code() == StatusCode::FailedPrecondition));
    assert!(transport.unary_calls().is_empty());
    assert_eq!(transport.stream_count(), 0);
}

#[tokio::test]
async fn calls_on_unconnected_channel_fail() {
    let transport = MockTransport::new();
    let client = Client::new(Channel::new(Arc::clone(&transport) as Arc<dyn Transport>));
    match client.unary_call(&method(), Value::Null, CallOptions::default()).await {
        Err(err) => assert_eq!(err.message(), "channel is not connected"),
        Ok(v) => panic!("unexpected response {v:?}"),
    }
}

#[tokio::test]
async fn watch_resolves_when_state_already_differs() {
    let transport = MockTransport::new();
    let channel = connected(&transport);
    transport.set_connectivity(ConnectivityState::Ready);
    let out = channel
        .watch_connectivity_state(ConnectivityState::Idle, Deadline::after(Duration::from_secs(1)))
        .await;
    assert!(out.is_ok());
}

#[tokio::test(start_paused = true)]
async fn watch_times_out_with_deadline_exceeded() {
    let transport = MockTransport::new();
    transport.watch_hangs.store(true, Ordering::SeqCst);
    let channel = connected(&transport);

    let out = channel
        .watch_connectivity_state(
            ConnectivityState::Idle,
            Deadline::after(Duration::from_millis(200)),
        )
        .await;
    match out {
        Err(err) => assert_eq!(err.code(), StatusCode::DeadlineExceeded),
        Ok(()) => panic!("watch should time out"),
    }
}
