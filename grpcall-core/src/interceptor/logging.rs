//! Structured request/response logging with redaction and sampling.

use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt as _;
use serde_json::{Map, Value as Json};

use super::{
    BidiStreamingInterceptor, BidiStreamingNext, ClientStreamingInterceptor, ClientStreamingNext,
    Interceptor, ServerStreamingInterceptor, ServerStreamingNext, StreamingCall, UnaryCall,
    UnaryFuture, UnaryInterceptor, UnaryNext,
};
use crate::{
    BidiStream, BidiStreamEvent, ClientStream, ClientStreamEvent, GrpcError, Metadata,
    ServerStream, ServerStreamEvent,
};

const REDACTED: &str = "[REDACTED]";
const HIDDEN: &str = "[HIDDEN]";
const MAX_REDACT_DEPTH: usize = 5;

/// Severity threshold. `None` disables logging.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    None,
}

pub type LogFields = Map<String, Json>;

/// Sink for log records.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields);
}

/// Forwards records to `tracing` under the `grpcall` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &LogFields) {
        let fields = Json::Object(fields.clone());
        match level {
            LogLevel::Debug => tracing::debug!(target: "grpcall", %fields, "{message}"),
            LogLevel::Info => tracing::info!(target: "grpcall", %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "grpcall", %fields, "{message}"),
            LogLevel::Error => tracing::error!(target: "grpcall", %fields, "{message}"),
            LogLevel::None => {}
        }
    }
}

#[derive(Clone)]
pub struct LoggingOptions {
    pub level: LogLevel,
    /// Fraction of calls that are logged, in `[0, 1]`.
    pub sample_rate: f64,
    pub sensitive_headers: Vec<String>,
    /// Body keys or dotted paths replaced with `[REDACTED]`.
    pub sensitive_fields: Vec<String>,
    pub log_body: bool,
    pub logger: Arc<dyn Logger>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            sample_rate: 1.0,
            sensitive_headers: ["authorization", "cookie", "set-cookie"]
                .map(String::from)
                .to_vec(),
            sensitive_fields: ["password", "token", "secret", "apikey"]
                .map(String::from)
                .to_vec(),
            log_body: false,
            logger: Arc::new(TracingLogger),
        }
    }
}

impl std::fmt::Debug for LoggingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingOptions")
            .field("level", &self.level)
            .field("sample_rate", &self.sample_rate)
            .field("sensitive_headers", &self.sensitive_headers)
            .field("sensitive_fields", &self.sensitive_fields)
            .field("log_body", &self.log_body)
            .finish_non_exhaustive()
    }
}

impl LoggingOptions {
    #[must_use]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub fn with_body(mut self, log_body: bool) -> Self {
        self.log_body = log_body;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }
}

#[derive(Debug)]
struct Inner {
    options: LoggingOptions,
    headers: Vec<String>,
    fields: Vec<String>,
}

/// Logs call start, completion, failures and (for streams) each received message.
#[derive(Debug, Clone)]
pub struct LoggingInterceptor {
    inner: Arc<Inner>,
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(LoggingOptions::default())
    }
}

impl LoggingInterceptor {
    #[must_use]
    pub fn new(options: LoggingOptions) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_ascii_lowercase()).collect();
        Self {
            inner: Arc::new(Inner {
                headers: lower(&options.sensitive_headers),
                fields: lower(&options.sensitive_fields),
                options,
            }),
        }
    }

    fn sampled(&self) -> bool {
        let rate = self.inner.options.sample_rate;
        rate >= 1.0 || rand::random::<f64>() < rate
    }
}

fn request_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

fn elapsed_ms(started: Instant) -> String {
    format!("{:.2}ms", started.elapsed().as_secs_f64() * 1000.0)
}

fn fields<const N: usize>(pairs: [(&str, Json); N]) -> LogFields {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl Inner {
    fn enabled(&self, level: LogLevel) -> bool {
        self.options.level != LogLevel::None && level >= self.options.level
    }

    fn emit(&self, level: LogLevel, message: &str, fields: &LogFields) {
        if self.enabled(level) {
            self.options.logger.log(level, message, fields);
        }
    }

    fn redact_metadata(&self, metadata: &Metadata) -> Json {
        let mut map = metadata.to_flat_map();
        for (key, value) in &mut map {
            if self.headers.iter().any(|h| h == key) {
                *value = Json::String(REDACTED.to_string());
            }
        }
        Json::Object(map)
    }

    fn is_sensitive(&self, key: &str, path: &str) -> bool {
        let key = key.to_ascii_lowercase();
        let path = path.to_ascii_lowercase();
        self.fields.iter().any(|field| {
            key == *field
                || path == *field
                || path
                    .strip_suffix(field.as_str())
                    .is_some_and(|head| head.ends_with('.'))
        })
    }

    fn redact_body(&self, body: &Json, path: &str, depth: usize) -> Json {
        if depth > MAX_REDACT_DEPTH {
            return body.clone();
        }
        match body {
            Json::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.redact_body(item, path, depth + 1))
                    .collect(),
            ),
            Json::Object(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| {
                        let full = if path.is_empty() {
                            key.clone()
                        } else {
                            format!("{path}.{key}")
                        };
                        let value = if self.is_sensitive(key, &full) {
                            Json::String(REDACTED.to_string())
                        } else {
                            self.redact_body(value, &full, depth + 1)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn body(&self, value: &grpcall_value::Value) -> Json {
        if self.options.log_body {
            self.redact_body(&value.to_json(), "", 0)
        } else {
            Json::String(HIDDEN.to_string())
        }
    }

    fn call_started(
        &self,
        kind: &str,
        id: &str,
        method: &str,
        metadata: &Metadata,
        request: Option<&grpcall_value::Value>,
    ) {
        if self.enabled(LogLevel::Debug) {
            let mut record = fields([
                ("requestId", Json::from(id)),
                ("method", Json::from(method)),
                ("type", Json::from(kind)),
                ("metadata", self.redact_metadata(metadata)),
            ]);
            if let Some(request) = request {
                record.insert("body".to_string(), self.body(request));
            }
            self.emit(LogLevel::Debug, &format!("gRPC {kind} started: {method}"), &record);
        } else {
            self.emit(
                LogLevel::Info,
                &format!("gRPC {kind} started: {method}"),
                &fields([("requestId", Json::from(id)), ("type", Json::from(kind))]),
            );
        }
    }

    fn call_failed(&self, id: &str, method: &str, started: Instant, err: &GrpcError) {
        self.emit(
            LogLevel::Error,
            &format!("gRPC error: {method}"),
            &fields([
                ("requestId", Json::from(id)),
                ("duration", Json::from(elapsed_ms(started))),
                ("status", Json::from(err.code().to_string())),
                ("error", Json::from(err.message())),
            ]),
        );
    }

    fn message_received(&self, id: &str, method: &str, value: &grpcall_value::Value) {
        self.emit(
            LogLevel::Debug,
            &format!("gRPC stream data: {method}"),
            &fields([
                ("requestId", Json::from(id)),
                ("direction", Json::from("receive")),
                ("body", self.body(value)),
            ]),
        );
    }

    fn stream_ended(&self, id: &str, method: &str, started: Instant) {
        self.emit(
            LogLevel::Info,
            &format!("gRPC stream ended: {method}"),
            &fields([
                ("requestId", Json::from(id)),
                ("duration", Json::from(elapsed_ms(started))),
                ("status", Json::from("OK")),
            ]),
        );
    }
}

impl Interceptor for LoggingInterceptor {
    fn unary(&self) -> Option<&dyn UnaryInterceptor> {
        Some(self)
    }

    fn server_streaming(&self) -> Option<&dyn ServerStreamingInterceptor> {
        Some(self)
    }

    fn client_streaming(&self) -> Option<&dyn ClientStreamingInterceptor> {
        Some(self)
    }

    fn bidi_streaming(&self) -> Option<&dyn BidiStreamingInterceptor> {
        Some(self)
    }
}

impl UnaryInterceptor for LoggingInterceptor {
    fn intercept(&self, call: UnaryCall, next: UnaryNext) -> UnaryFuture {
        if !self.sampled() {
            return next.run(call);
        }
        let inner = Arc::clone(&self.inner);
        let id = request_id();
        let method = call.method.path().to_string();
        inner.call_started("request", &id, &method, &call.options.metadata, Some(&call.request));

        let started = Instant::now();
        let response = next.run(call);
        async move {
            match response.await {
                Ok(value) => {
                    // Completion is reported at the configured level.
                    inner.emit(
                        inner.options.level,
                        &format!("gRPC response: {method}"),
                        &fields([
                            ("requestId", Json::from(id)),
                            ("duration", Json::from(elapsed_ms(started))),
                            ("status", Json::from("OK")),
                            ("body", inner.body(&value)),
                        ]),
                    );
                    Ok(value)
                }
                Err(err) => {
                    inner.call_failed(&id, &method, started, &err);
                    Err(err)
                }
            }
        }
        .boxed()
    }
}

impl ServerStreamingInterceptor for LoggingInterceptor {
    fn intercept(
        &self,
        call: UnaryCall,
        next: ServerStreamingNext,
    ) -> Result<ServerStream, GrpcError> {
        if !self.sampled() {
            return next.run(call);
        }
        let inner = Arc::clone(&self.inner);
        let id = request_id();
        let method = call.method.path().to_string();
        inner.call_started(
            "server stream",
            &id,
            &method,
            &call.options.metadata,
            Some(&call.request),
        );

        let started = Instant::now();
        let stream = next
            .run(call)
            .inspect_err(|err| inner.call_failed(&id, &method, started, err))?;
        Ok(stream.inspect(move |event| match event {
            ServerStreamEvent::Data(value) => inner.message_received(&id, &method, value),
            ServerStreamEvent::Error(err) => inner.call_failed(&id, &method, started, err),
            ServerStreamEvent::End => inner.stream_ended(&id, &method, started),
            ServerStreamEvent::Metadata(_) | ServerStreamEvent::Status(_) => {}
        }))
    }
}

impl ClientStreamingInterceptor for LoggingInterceptor {
    fn intercept(
        &self,
        call: StreamingCall,
        next: ClientStreamingNext,
    ) -> Result<ClientStream, GrpcError> {
        if !self.sampled() {
            return next.run(call);
        }
        let inner = Arc::clone(&self.inner);
        let id = request_id();
        let method = call.method.path().to_string();
        inner.call_started("client stream", &id, &method, &call.options.metadata, None);

        let started = Instant::now();
        let stream = next
            .run(call)
            .inspect_err(|err| inner.call_failed(&id, &method, started, err))?;
        Ok(stream.inspect(move |event| match event {
            ClientStreamEvent::Error(err) => inner.call_failed(&id, &method, started, err),
            ClientStreamEvent::Status(status) if status.code.is_ok() => {
                inner.stream_ended(&id, &method, started);
            }
            ClientStreamEvent::Metadata(_) | ClientStreamEvent::Status(_) => {}
        }))
    }
}

impl BidiStreamingInterceptor for LoggingInterceptor {
    fn intercept(
        &self,
        call: StreamingCall,
        next: BidiStreamingNext,
    ) -> Result<BidiStream, GrpcError> {
        if !self.sampled() {
            return next.run(call);
        }
        let inner = Arc::clone(&self.inner);
        let id = request_id();
        let method = call.method.path().to_string();
        inner.call_started("bidi stream", &id, &method, &call.options.metadata, None);

        let started = Instant::now();
        let stream = next
            .run(call)
            .inspect_err(|err| inner.call_failed(&id, &method, started, err))?;
        Ok(stream.inspect(move |event| match event {
            BidiStreamEvent::Data(value) => inner.message_received(&id, &method, value),
            BidiStreamEvent::Error(err) => inner.call_failed(&id, &method, started, err),
            BidiStreamEvent::End => inner.stream_ended(&id, &method, started),
            BidiStreamEvent::Metadata(_) | BidiStreamEvent::Status(_) => {}
        }))
    }
}
