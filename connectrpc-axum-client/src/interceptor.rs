//! User-facing interceptor hooks and the chain that composes them with a
//! protocol interceptor.
//!
//! Two shapes exist because unary and streaming calls need different lifetimes:
//! a [`UnaryInterceptor`] sees one request and one response, while a
//! [`StreamInterceptor`] is instantiated once per stream and then sees every
//! frame that crosses it.
//!
//! Composition order (outgoing vs. incoming) matters and is fixed by
//! [`InterceptorChain::build`]: on the way out, user interceptors run in the
//! order they were configured and the protocol interceptor runs last, closest
//! to the wire; on the way in, the protocol interceptor runs first and user
//! interceptors run in reverse, closest to the caller.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use connectrpc_axum_core::{Code, ConnectError, Metadata};

use crate::config::InterceptorEntry;
use crate::error::ClientError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What one incoming frame (or the transport's terminal event) resolves to.
///
/// Plain gRPC never produces this from a frame (its status rides real HTTP
/// trailers, handled by [`StreamInterceptor::interpret_trailers`]); Connect
/// streaming and gRPC-Web both embed their own end-of-stream signal in the
/// frame itself, so they override [`StreamInterceptor::interpret_frame`]
/// instead.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// An ordinary message frame, ready for the codec to decode.
    Message(Bytes),
    /// The stream ended. Emitted at most once, and always last.
    Complete {
        code: Code,
        error: Option<ClientError>,
        trailers: Metadata,
    },
}

impl FrameOutcome {
    /// The default terminal mapping used by gRPC: read `grpc-status`/`grpc-message`
    /// (and, on failure, `grpc-status-details-bin`) out of real trailers.
    pub fn from_grpc_trailers(trailers: Metadata) -> Self {
        let status = trailers
            .get("grpc-status")
            .and_then(|s| s.parse::<i32>().ok())
            .and_then(Code::from_i32)
            .unwrap_or(Code::Unknown);
        let message = trailers.get("grpc-message").map(|s| s.to_string());
        let error = if status == Code::Ok {
            None
        } else {
            let err = match message {
                Some(msg) => ConnectError::new(status, msg),
                None => ConnectError::from_code(status),
            }
            .with_metadata(trailers.clone());
            Some(ClientError::Rpc(err))
        };
        FrameOutcome::Complete { code: status, error, trailers }
    }
}

/// Whether an RPC is safe to replay or reorder, used by the Connect
/// interceptor to decide whether a unary call may be sent as an HTTP GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Idempotency {
    #[default]
    Unknown,
    NoSideEffects,
    Idempotent,
}

/// An outgoing unary request, mutable in place by each interceptor.
///
/// `method`/`uri` start out as a plain `POST <host>/<procedure>` and may be
/// rewritten by a protocol interceptor (the Connect GET transform changes
/// both, moving `body` into query parameters).
#[derive(Debug, Clone)]
pub struct UnaryRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: Metadata,
    pub body: Bytes,
    pub idempotency: Idempotency,
}

/// An incoming unary response, mutable in place by each interceptor.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    pub status: http::StatusCode,
    pub headers: Metadata,
    pub body: Bytes,
    /// Real HTTP trailers, when the transport exposed any (gRPC over HTTP/2).
    pub trailers: Metadata,
}

/// Observes (and may rewrite) a single unary call.
pub trait UnaryInterceptor: Send {
    /// Called once before the request is handed to the next interceptor
    /// (and eventually the transport). May reject the call outright.
    fn on_request<'a>(&'a mut self, request: &'a mut UnaryRequest) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = request;
        Box::pin(async { Ok(()) })
    }

    /// Called once after a response (success or status error) comes back,
    /// before it's handed to the next interceptor up the chain.
    fn on_response<'a>(
        &'a mut self,
        response: &'a mut UnaryResponse,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = response;
        Box::pin(async { Ok(()) })
    }
}

/// Observes (and may rewrite) every frame of a streaming call.
pub trait StreamInterceptor: Send {
    /// Called once, before the stream is opened, to adjust request headers.
    fn on_start<'a>(&'a mut self, headers: &'a mut Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = headers;
        Box::pin(async { Ok(()) })
    }

    /// Called once the response headers arrive, before any frame.
    ///
    /// Protocol interceptors use this to negotiate the response compression
    /// pool from `Content-Encoding`/`Grpc-Encoding` before the first frame
    /// needs decompressing.
    fn on_headers<'a>(&'a mut self, headers: &'a Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = headers;
        Box::pin(async { Ok(()) })
    }

    /// Called for each outgoing message frame.
    fn on_input<'a>(&'a mut self, frame: &'a mut Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = frame;
        Box::pin(async { Ok(()) })
    }

    /// Called for each incoming message frame.
    fn on_output<'a>(&'a mut self, frame: &'a mut Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
        let _ = frame;
        Box::pin(async { Ok(()) })
    }

    /// Resolves one already-unframed incoming frame to a [`FrameOutcome`].
    ///
    /// The default (used by gRPC) treats every frame as a plain message;
    /// Connect and gRPC-Web override this to recognize their own embedded
    /// end-of-stream signal (Connect's `0x02` flag with a JSON trailer body,
    /// gRPC-Web's high-bit trailer frame).
    fn interpret_frame<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<FrameOutcome, ClientError>> {
        Box::pin(async move { Ok(FrameOutcome::Message(frame)) })
    }

    /// Resolves the transport's terminal `Complete{trailers}` event.
    ///
    /// The default reads `grpc-status`/`grpc-message` from real HTTP
    /// trailers, which is what gRPC relies on; Connect and gRPC-Web never see
    /// real trailers (their status arrives embedded in a frame instead, via
    /// `interpret_frame`), so for them this is only reached if the transport
    /// closes without ever producing that embedded signal — a premature
    /// disconnect, which is itself an error condition.
    fn interpret_trailers<'a>(&'a mut self, trailers: Metadata) -> BoxFuture<'a, FrameOutcome> {
        Box::pin(async move { FrameOutcome::from_grpc_trailers(trailers) })
    }
}

/// A no-op interceptor used where only the protocol interceptor should run.
pub struct NoopInterceptor;

impl UnaryInterceptor for NoopInterceptor {}
impl StreamInterceptor for NoopInterceptor {}

/// Runs every configured interceptor plus the protocol interceptor for one call.
///
/// Built fresh per-call from the client's [`InterceptorEntry`] factories so
/// stateful interceptors (e.g. ones that sign requests with a nonce) don't
/// leak state across concurrent calls.
pub struct UnaryChain {
    user: Vec<Box<dyn UnaryInterceptor>>,
    protocol: Box<dyn UnaryInterceptor>,
}

impl UnaryChain {
    pub fn build(entries: &[InterceptorEntry], protocol: Box<dyn UnaryInterceptor>) -> Self {
        Self {
            user: entries.iter().map(|e| (e.unary)()).collect(),
            protocol,
        }
    }

    /// Outgoing: user interceptors in configured order, protocol last.
    pub async fn start_request(&mut self, request: &mut UnaryRequest) -> Result<(), ClientError> {
        for interceptor in self.user.iter_mut() {
            interceptor.on_request(request).await?;
        }
        self.protocol.on_request(request).await
    }

    /// Incoming: protocol first, user interceptors in reverse order.
    pub async fn end_response(&mut self, response: &mut UnaryResponse) -> Result<(), ClientError> {
        self.protocol.on_response(response).await?;
        for interceptor in self.user.iter_mut().rev() {
            interceptor.on_response(response).await?;
        }
        Ok(())
    }
}

/// The streaming counterpart of [`UnaryChain`].
pub struct StreamChain {
    user: Vec<Box<dyn StreamInterceptor>>,
    protocol: Box<dyn StreamInterceptor>,
}

impl StreamChain {
    pub fn build(entries: &[InterceptorEntry], protocol: Box<dyn StreamInterceptor>) -> Self {
        Self {
            user: entries.iter().map(|e| (e.stream)()).collect(),
            protocol,
        }
    }

    pub async fn start(&mut self, headers: &mut Metadata) -> Result<(), ClientError> {
        for interceptor in self.user.iter_mut() {
            interceptor.on_start(headers).await?;
        }
        self.protocol.on_start(headers).await
    }

    /// Incoming: protocol first (it negotiates compression), user interceptors in reverse.
    pub async fn on_headers(&mut self, headers: &Metadata) -> Result<(), ClientError> {
        self.protocol.on_headers(headers).await?;
        for interceptor in self.user.iter_mut().rev() {
            interceptor.on_headers(headers).await?;
        }
        Ok(())
    }

    /// Outgoing frame: user interceptors in order, protocol last (closest to the wire).
    pub async fn on_input(&mut self, frame: &mut Bytes) -> Result<(), ClientError> {
        for interceptor in self.user.iter_mut() {
            interceptor.on_input(frame).await?;
        }
        self.protocol.on_input(frame).await
    }

    /// Incoming frame: protocol first (closest to the wire), user interceptors in reverse.
    pub async fn on_output(&mut self, frame: &mut Bytes) -> Result<(), ClientError> {
        self.protocol.on_output(frame).await?;
        for interceptor in self.user.iter_mut().rev() {
            interceptor.on_output(frame).await?;
        }
        Ok(())
    }

    /// Runs `on_output` then asks the protocol interceptor to resolve the
    /// frame to a [`FrameOutcome`]. Only the protocol interceptor interprets
    /// end-of-stream framing; user interceptors only ever see plain messages.
    pub async fn interpret_frame(&mut self, mut frame: Bytes) -> Result<FrameOutcome, ClientError> {
        self.protocol.on_output(&mut frame).await?;
        for interceptor in self.user.iter_mut().rev() {
            interceptor.on_output(&mut frame).await?;
        }
        self.protocol.interpret_frame(frame).await
    }

    pub async fn interpret_trailers(&mut self, trailers: Metadata) -> FrameOutcome {
        self.protocol.interpret_trailers(trailers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingInterceptor {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl UnaryInterceptor for RecordingInterceptor {
        fn on_request<'a>(&'a mut self, _request: &'a mut UnaryRequest) -> BoxFuture<'a, Result<(), ClientError>> {
            self.log.lock().unwrap().push(format!("{}:request", self.name));
            Box::pin(async { Ok(()) })
        }

        fn on_response<'a>(&'a mut self, _response: &'a mut UnaryResponse) -> BoxFuture<'a, Result<(), ClientError>> {
            self.log.lock().unwrap().push(format!("{}:response", self.name));
            Box::pin(async { Ok(()) })
        }
    }

    fn request() -> UnaryRequest {
        UnaryRequest {
            method: http::Method::POST,
            uri: http::Uri::from_static("https://example.com/svc/Method"),
            headers: Metadata::new(),
            body: Bytes::new(),
            idempotency: Idempotency::Unknown,
        }
    }

    fn response() -> UnaryResponse {
        UnaryResponse {
            status: http::StatusCode::OK,
            headers: Metadata::new(),
            body: Bytes::new(),
            trailers: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn outgoing_runs_user_order_then_protocol() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entries = vec![
            InterceptorEntry {
                unary: Arc::new({
                    let log = log.clone();
                    move || Box::new(RecordingInterceptor { name: "a", log: log.clone() }) as Box<dyn UnaryInterceptor>
                }),
                stream: Arc::new(|| Box::new(NoopInterceptor) as Box<dyn StreamInterceptor>),
            },
            InterceptorEntry {
                unary: Arc::new({
                    let log = log.clone();
                    move || Box::new(RecordingInterceptor { name: "b", log: log.clone() }) as Box<dyn UnaryInterceptor>
                }),
                stream: Arc::new(|| Box::new(NoopInterceptor) as Box<dyn StreamInterceptor>),
            },
        ];
        let protocol = Box::new(RecordingInterceptor { name: "protocol", log: log.clone() });
        let mut chain = UnaryChain::build(&entries, protocol);

        chain.start_request(&mut request()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a:request", "b:request", "protocol:request"]);
    }

    #[tokio::test]
    async fn incoming_runs_protocol_then_user_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entries = vec![
            InterceptorEntry {
                unary: Arc::new({
                    let log = log.clone();
                    move || Box::new(RecordingInterceptor { name: "a", log: log.clone() }) as Box<dyn UnaryInterceptor>
                }),
                stream: Arc::new(|| Box::new(NoopInterceptor) as Box<dyn StreamInterceptor>),
            },
            InterceptorEntry {
                unary: Arc::new({
                    let log = log.clone();
                    move || Box::new(RecordingInterceptor { name: "b", log: log.clone() }) as Box<dyn UnaryInterceptor>
                }),
                stream: Arc::new(|| Box::new(NoopInterceptor) as Box<dyn StreamInterceptor>),
            },
        ];
        let protocol = Box::new(RecordingInterceptor { name: "protocol", log: log.clone() });
        let mut chain = UnaryChain::build(&entries, protocol);

        chain.end_response(&mut response()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["protocol:response", "b:response", "a:response"]);
    }
}
