//! The pluggable transport boundary: how a call actually reaches the network.
//!
//! Everything above this module (protocol interceptors, the streaming state
//! machine, the `ProtocolClient` facade) is written against [`Transport`], not
//! against any particular HTTP client. `connectrpc-axum-client` ships one
//! implementation ([`crate::transport::HyperAdapter`]) built on the existing
//! hyper-based transport, but callers can supply their own (the fake transport
//! under `#[cfg(test)]` in this module is the other implementation in this
//! crate, used to drive the engine in tests without a socket).

use bytes::Bytes;
use connectrpc_axum_core::Metadata;

use crate::error::ClientError;
use crate::interceptor::BoxFuture;

/// A plain request/response exchange with no streaming semantics.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: Metadata,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: http::StatusCode,
    pub headers: Metadata,
    pub body: Bytes,
    /// Real HTTP/2 trailers, when the transport exposes them; empty for a
    /// trailers-only response (status and `grpc-status` both ride in `headers`).
    pub trailers: Metadata,
}

/// One event read off a streaming response body.
///
/// Framing (splitting the body into complete length-prefixed envelopes) is a
/// transport-level concern shared by all three protocols, so `Transport`
/// implementations emit whole frames, not raw body chunks. Interpreting a
/// frame's flags (is this the gRPC-Web trailer frame? the Connect end-stream
/// frame?) is left to the protocol interceptor.
#[derive(Debug, Clone)]
pub enum RawStreamEvent {
    /// Response headers, emitted once before any frame.
    Headers(Metadata),
    /// One complete envelope frame (header + payload), verbatim off the wire.
    Frame(Bytes),
    /// The response ended. `trailers` holds real HTTP trailers when the
    /// transport exposes them (gRPC over HTTP/2); empty otherwise.
    Complete { trailers: Metadata },
}

/// A handle used to push outgoing frames into an open stream's request body.
pub trait StreamSink: Send {
    fn send<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<(), ClientError>>;
    fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ClientError>>;
}

/// A handle used to cancel an in-flight stream (closes the connection / sends RST_STREAM).
pub trait CancelHandle: Send {
    fn cancel(&mut self);
}

/// A source of [`RawStreamEvent`]s, i.e. the read half of a streaming response.
pub trait StreamSource: Send {
    fn poll_next<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<RawStreamEvent, ClientError>>>;
}

/// The pluggable HTTP boundary. `perform_unary` drives a request/response
/// call to completion; `perform_stream` opens a duplex body and returns the
/// three handles needed to drive it independently of the caller's own task.
pub trait Transport: Send + Sync {
    fn perform_unary<'a>(
        &'a self,
        request: TransportRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, ClientError>>;

    fn perform_stream<'a>(
        &'a self,
        method: http::Method,
        uri: http::Uri,
        headers: Metadata,
    ) -> BoxFuture<
        'a,
        Result<
            (
                Box<dyn StreamSink + 'static>,
                Box<dyn StreamSource + 'static>,
                Box<dyn CancelHandle + 'static>,
            ),
            ClientError,
        >,
    >;
}

#[cfg(test)]
pub(crate) mod fake {
    //! An in-memory [`Transport`] used to drive the engine in tests without a socket.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A scripted unary response, or an error to return from `perform_unary`.
    pub struct ScriptedUnary {
        pub response: Result<TransportResponse, ClientError>,
    }

    /// A scripted stream: events emitted by the fake server, captured in order.
    pub struct ScriptedStream {
        pub events: Vec<RawStreamEvent>,
    }

    #[derive(Default)]
    pub struct FakeTransport {
        unary_responses: Mutex<VecDeque<ScriptedUnary>>,
        stream_scripts: Mutex<VecDeque<ScriptedStream>>,
        pub sent_frames: Arc<Mutex<Vec<Bytes>>>,
        pub last_unary_request: Mutex<Option<TransportRequest>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_unary(&self, response: Result<TransportResponse, ClientError>) {
            self.unary_responses.lock().unwrap().push_back(ScriptedUnary { response });
        }

        pub fn push_stream(&self, events: Vec<RawStreamEvent>) {
            self.stream_scripts.lock().unwrap().push_back(ScriptedStream { events });
        }
    }

    struct FakeSink {
        sent_frames: Arc<Mutex<Vec<Bytes>>>,
    }

    impl StreamSink for FakeSink {
        fn send<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
            self.sent_frames.lock().unwrap().push(frame);
            Box::pin(async { Ok(()) })
        }

        fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ClientError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct FakeSource {
        events: VecDeque<RawStreamEvent>,
    }

    impl StreamSource for FakeSource {
        fn poll_next<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<RawStreamEvent, ClientError>>> {
            let next = self.events.pop_front();
            Box::pin(async move { next.map(Ok) })
        }
    }

    struct FakeCancel;
    impl CancelHandle for FakeCancel {
        fn cancel(&mut self) {}
    }

    impl Transport for FakeTransport {
        fn perform_unary<'a>(
            &'a self,
            request: TransportRequest,
        ) -> BoxFuture<'a, Result<TransportResponse, ClientError>> {
            *self.last_unary_request.lock().unwrap() = Some(request);
            let scripted = self.unary_responses.lock().unwrap().pop_front();
            Box::pin(async move {
                match scripted {
                    Some(ScriptedUnary { response }) => response,
                    None => Err(ClientError::Transport("no scripted unary response left".into())),
                }
            })
        }

        fn perform_stream<'a>(
            &'a self,
            _method: http::Method,
            _uri: http::Uri,
            _headers: Metadata,
        ) -> BoxFuture<
            'a,
            Result<
                (Box<dyn StreamSink + 'static>, Box<dyn StreamSource + 'static>, Box<dyn CancelHandle + 'static>),
                ClientError,
            >,
        > {
            let script = self.stream_scripts.lock().unwrap().pop_front();
            let sent_frames = self.sent_frames.clone();
            Box::pin(async move {
                let events: VecDeque<RawStreamEvent> = script.map(|s| s.events.into()).unwrap_or_default();
                Ok((
                    Box::new(FakeSink { sent_frames }) as Box<dyn StreamSink>,
                    Box::new(FakeSource { events }) as Box<dyn StreamSource>,
                    Box::new(FakeCancel) as Box<dyn CancelHandle>,
                ))
            })
        }
    }
}
