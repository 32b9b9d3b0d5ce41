//! In-process tonic server used by the integration tests of the tonic transport.

use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::{Stream, StreamExt as _};
use tonic::{Code, Request, Response, Status, Streaming};

pub mod echo {
    tonic::include_proto!("grpcall.test");
}

pub const PATH_ECHO: &str = "/grpcall.test.EchoService/Echo";
pub const PATH_SLOW: &str = "/grpcall.test.EchoService/Slow";
pub const PATH_FAIL: &str = "/grpcall.test.EchoService/Fail";
pub const PATH_COUNT: &str = "/grpcall.test.EchoService/Count";
pub const PATH_COLLECT: &str = "/grpcall.test.EchoService/Collect";
pub const PATH_CHAT: &str = "/grpcall.test.EchoService/Chat";

const SLOW_DELAY: Duration = Duration::from_secs(5);

type ResponseStream = Pin<Box<dyn Stream<Item = Result<echo::EchoResponse, Status>> + Send>>;

fn header(request_md: &tonic::metadata::MetadataMap, key: &str) -> String {
    request_md
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn reply<T>(request: &Request<T>, message: String) -> echo::EchoResponse {
    echo::EchoResponse {
        message,
        client_id: header(request.metadata(), "x-client-id"),
        authorization: header(request.metadata(), "authorization"),
    }
}

#[derive(Debug, Default)]
struct EchoSvc;

#[tonic::async_trait]
impl echo::echo_service_server::EchoService for EchoSvc {
    async fn echo(
        &self,
        request: Request<echo::EchoRequest>,
    ) -> Result<Response<echo::EchoResponse>, Status> {
        let out = reply(&request, request.get_ref().message.clone());
        let mut response = Response::new(out);
        response.metadata_mut().insert(
            "x-served-by",
            tonic::metadata::MetadataValue::from_static("grpcall-testserver"),
        );
        Ok(response)
    }

    async fn slow(
        &self,
        request: Request<echo::EchoRequest>,
    ) -> Result<Response<echo::EchoResponse>, Status> {
        tokio::time::sleep(SLOW_DELAY).await;
        let out = reply(&request, request.get_ref().message.clone());
        Ok(Response::new(out))
    }

    async fn fail(
        &self,
        request: Request<echo::FailRequest>,
    ) -> Result<Response<echo::EchoResponse>, Status> {
        let req = request.into_inner();
        let mut status = Status::new(Code::from_i32(req.code), req.message);
        status
            .metadata_mut()
            .insert("x-failure", tonic::metadata::MetadataValue::from_static("scripted"));
        Err(status)
    }

    type CountStream = ResponseStream;

    async fn count(
        &self,
        request: Request<echo::CountRequest>,
    ) -> Result<Response<Self::CountStream>, Status> {
        let client_id = header(request.metadata(), "x-client-id");
        let req = request.into_inner();
        if req.count < 0 {
            return Err(Status::invalid_argument("count must not be negative"));
        }

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for i in 0..req.count {
                let item = echo::EchoResponse {
                    message: format!("{}{i}", req.prefix),
                    client_id: client_id.clone(),
                    authorization: String::new(),
                };
                if tx.send(Ok(item)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn collect(
        &self,
        request: Request<Streaming<echo::EchoRequest>>,
    ) -> Result<Response<echo::EchoResponse>, Status> {
        let client_id = header(request.metadata(), "x-client-id");
        let mut inbound = request.into_inner();
        let mut parts = Vec::new();
        while let Some(msg) = inbound.next().await {
            parts.push(msg?.message);
        }
        Ok(Response::new(echo::EchoResponse {
            message: parts.join(","),
            client_id,
            authorization: String::new(),
        }))
    }

    type ChatStream = ResponseStream;

    async fn chat(
        &self,
        request: Request<Streaming<echo::EchoRequest>>,
    ) -> Result<Response<Self::ChatStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            while let Some(msg) = inbound.next().await {
                let item = msg.map(|m| echo::EchoResponse {
                    message: m.message,
                    client_id: String::new(),
                    authorization: String::new(),
                });
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

/// A running `EchoService` on an ephemeral loopback port.
///
/// Dropping it without [`EchoServer::stop`] aborts the serving task.
pub struct EchoServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    serving: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl EchoServer {
    pub async fn spawn() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel();

        let serving = tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(echo::echo_service_server::EchoServiceServer::new(EchoSvc))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    stopped.await.ok();
                }),
        );

        Ok(Self {
            addr,
            stop: Some(stop),
            serving: Some(serving),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port`, suitable as a channel target.
    pub fn target(&self) -> String {
        self.addr.to_string()
    }

    /// Stop accepting calls and wait for in-flight ones to drain.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).ok();
        }
        if let Some(serving) = self.serving.take() {
            serving.await.ok();
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        if let Some(serving) = self.serving.take() {
            serving.abort();
        }
    }
}
