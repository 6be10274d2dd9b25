//! The bidirectional streaming state machine.
//!
//! Every streaming call (client, server, or full-duplex) is driven by one
//! [`BidiStream`]. A background task owns the transport's read half and feeds
//! decoded [`StreamResult`]s into an internal queue; the handle itself owns
//! the write half, so `send`/`close_send`/`cancel` never have to wait on the
//! background task.
//!
//! Prefers `tokio::sync::Mutex` over a hand-rolled `poll`-based state machine
//! wherever a lock might be held across an await point, and exposes pull
//! consumption as a `futures::Stream` adapter alongside the plain `next()`
//! handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use connectrpc_axum_core::{Code, Metadata};
use futures::Stream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::codec::MessageCodec;
use crate::error::ClientError;
use crate::interceptor::{FrameOutcome, StreamChain};
use crate::transport::{CancelHandle, RawStreamEvent, StreamSink, StreamSource};

#[cfg(feature = "tracing")]
use tracing::Instrument;

/// One event delivered by a stream, in network arrival order.
#[derive(Debug)]
pub enum StreamResult<T> {
    /// Response headers, delivered once before any message.
    Headers(Metadata),
    /// One decoded message.
    Message(T),
    /// Terminal event. Delivered exactly once, always last.
    Complete {
        code: Code,
        error: Option<ClientError>,
        trailers: Metadata,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Open,
    HalfClosed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    Pending,
    Headers,
    Messaging,
    Terminal,
}

struct SharedState {
    send_state: SendState,
    recv_state: RecvState,
    response_headers: Option<Metadata>,
}

/// A live bidirectional RPC stream.
///
/// `Req`/`Resp` are the request/response message types for this call; a
/// [`BidiStream`] is built with one [`MessageCodec`] for each direction.
pub struct BidiStream<Req, Resp> {
    state: Arc<AsyncMutex<SharedState>>,
    sink: AsyncMutex<Box<dyn StreamSink>>,
    cancel: AsyncMutex<Box<dyn CancelHandle>>,
    chain: Arc<AsyncMutex<StreamChain>>,
    req_codec: Arc<dyn MessageCodec<Req>>,
    events_tx: mpsc::UnboundedSender<StreamResult<Resp>>,
    events: AsyncMutex<mpsc::UnboundedReceiver<StreamResult<Resp>>>,
}

impl<Req, Resp> BidiStream<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Wires a stream up to its transport handles and takes ownership of the
    /// source, spawning the background event pump.
    ///
    /// `initial_headers` is whatever the transport already delivered before
    /// this call was made (it always emits `Headers` first); callers
    /// constructing a stream from [`crate::transport::Transport::perform_stream`]
    /// pass that straight through.
    pub fn new(
        sink: Box<dyn StreamSink>,
        source: Box<dyn StreamSource>,
        cancel: Box<dyn CancelHandle>,
        chain: StreamChain,
        req_codec: Arc<dyn MessageCodec<Req>>,
        resp_codec: Arc<dyn MessageCodec<Resp>>,
    ) -> Self {
        let state = Arc::new(AsyncMutex::new(SharedState {
            send_state: SendState::Open,
            recv_state: RecvState::Pending,
            response_headers: None,
        }));
        let chain = Arc::new(AsyncMutex::new(chain));
        let (tx, rx) = mpsc::unbounded_channel();

        let pump_task = pump(source, state.clone(), chain.clone(), resp_codec, tx.clone());
        #[cfg(feature = "tracing")]
        let pump_task = pump_task.instrument(tracing::info_span!(
            "rpc.stream",
            rpc.type = "stream",
            otel.kind = "client",
        ));
        tokio::spawn(pump_task);

        Self {
            state,
            sink: AsyncMutex::new(sink),
            cancel: AsyncMutex::new(cancel),
            chain,
            req_codec,
            events_tx: tx,
            events: AsyncMutex::new(rx),
        }
    }

    /// Encodes and sends one message. A no-op (delivered as an error through
    /// the result stream, not a panic) once the stream is half-closed or
    /// canceled.
    pub async fn send(&self, message: &Req) -> Result<(), ClientError> {
        {
            let state = self.state.lock().await;
            match state.send_state {
                SendState::Open => {}
                SendState::HalfClosed => return Err(ClientError::new(Code::FailedPrecondition, "stream is half-closed")),
                SendState::Canceled => return Err(ClientError::canceled("stream was canceled")),
            }
        }
        let mut frame = self.req_codec.encode(message)?;
        self.chain.lock().await.on_input(&mut frame).await?;
        self.sink.lock().await.send(frame).await
    }

    /// Half-closes the send side. Further `send` calls fail without affecting
    /// the receive side.
    pub async fn close_send(&self) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if state.send_state == SendState::Open {
            state.send_state = SendState::HalfClosed;
        }
        drop(state);
        self.sink.lock().await.close().await
    }

    /// Aborts the stream. Idempotent; safe to call after `Complete` was
    /// already observed.
    ///
    /// Synthesizes `Complete{Canceled}` itself rather than relying on the
    /// transport's abort to surface one: aborting the pump's source just
    /// makes it observe `None`/an error, which would otherwise read as
    /// `Unavailable`, not `Canceled`.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        if state.send_state == SendState::Canceled || state.recv_state == RecvState::Terminal {
            return;
        }
        state.send_state = SendState::Canceled;
        state.recv_state = RecvState::Terminal;
        drop(state);
        self.cancel.lock().await.cancel();
        let _ = self.events_tx.send(StreamResult::Complete {
            code: Code::Canceled,
            error: Some(ClientError::canceled("stream was canceled")),
            trailers: Metadata::new(),
        });
    }

    /// Pulls the next stream event, if any are left. Returns `None` once
    /// `Complete` has been delivered.
    pub async fn next(&self) -> Option<StreamResult<Resp>> {
        self.events.lock().await.recv().await
    }

    /// Returns a `response_headers` snapshot once it has arrived.
    pub async fn response_headers(&self) -> Option<Metadata> {
        self.state.lock().await.response_headers.clone()
    }
}

/// Background task: drains `source`, decodes frames through `chain`, and
/// forwards [`StreamResult`]s. Owns `source` exclusively so the handle above
/// never has to coordinate with it directly.
async fn pump<Resp>(
    mut source: Box<dyn StreamSource>,
    state: Arc<AsyncMutex<SharedState>>,
    chain: Arc<AsyncMutex<StreamChain>>,
    resp_codec: Arc<dyn MessageCodec<Resp>>,
    tx: mpsc::UnboundedSender<StreamResult<Resp>>,
) where
    Resp: Send + Sync + 'static,
{
    loop {
        let event = source.poll_next().await;
        let mut guard = state.lock().await;
        if guard.recv_state == RecvState::Terminal {
            return;
        }
        match event {
            None => {
                guard.recv_state = RecvState::Terminal;
                drop(guard);
                let _ = tx.send(StreamResult::Complete {
                    code: Code::Unavailable,
                    error: Some(ClientError::unavailable("stream closed without a terminal event")),
                    trailers: Metadata::new(),
                });
                return;
            }
            Some(Err(err)) => {
                guard.recv_state = RecvState::Terminal;
                drop(guard);
                let code = err.code();
                let _ = tx.send(StreamResult::Complete { code, error: Some(err), trailers: Metadata::new() });
                return;
            }
            Some(Ok(RawStreamEvent::Headers(headers))) => {
                guard.recv_state = RecvState::Headers;
                guard.response_headers = Some(headers.clone());
                drop(guard);
                if let Err(err) = chain.lock().await.on_headers(&headers).await {
                    state.lock().await.recv_state = RecvState::Terminal;
                    let code = err.code();
                    let _ = tx.send(StreamResult::Complete { code, error: Some(err), trailers: Metadata::new() });
                    return;
                }
                if tx.send(StreamResult::Headers(headers)).is_err() {
                    return;
                }
            }
            Some(Ok(RawStreamEvent::Frame(frame))) => {
                guard.recv_state = RecvState::Messaging;
                drop(guard);
                let outcome = chain.lock().await.interpret_frame(frame).await;
                match outcome {
                    Ok(FrameOutcome::Message(bytes)) => match resp_codec.decode(&bytes) {
                        Ok(message) => {
                            if tx.send(StreamResult::Message(message)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            state.lock().await.recv_state = RecvState::Terminal;
                            let _ = tx.send(StreamResult::Complete {
                                code: err.code(),
                                error: Some(err),
                                trailers: Metadata::new(),
                            });
                            return;
                        }
                    },
                    Ok(FrameOutcome::Complete { code, error, trailers }) => {
                        state.lock().await.recv_state = RecvState::Terminal;
                        let _ = tx.send(StreamResult::Complete { code, error, trailers });
                        return;
                    }
                    Err(err) => {
                        // Decode failure mid-stream: emit Complete{Unknown} and stop,
                        // discarding whatever the transport sends afterwards.
                        state.lock().await.recv_state = RecvState::Terminal;
                        let _ = tx.send(StreamResult::Complete {
                            code: Code::Unknown,
                            error: Some(err),
                            trailers: Metadata::new(),
                        });
                        return;
                    }
                }
            }
            Some(Ok(RawStreamEvent::Complete { trailers })) => {
                drop(guard);
                let outcome = chain.lock().await.interpret_trailers(trailers).await;
                state.lock().await.recv_state = RecvState::Terminal;
                if let FrameOutcome::Complete { code, error, trailers } = outcome {
                    let _ = tx.send(StreamResult::Complete { code, error, trailers });
                } else {
                    let _ = tx.send(StreamResult::Complete { code: Code::Ok, error: None, trailers: Metadata::new() });
                }
                return;
            }
        }
    }
}

/// Adapts [`BidiStream::next`] into a [`futures::Stream`] for pull-based
/// consumption alongside the handle's plain `next()` method.
pub struct StreamResults<'a, Req, Resp> {
    stream: &'a BidiStream<Req, Resp>,
    future: Option<Pin<Box<dyn Future<Output = Option<StreamResult<Resp>>> + Send + 'a>>>,
}

impl<'a, Req, Resp> StreamResults<'a, Req, Resp> {
    pub fn new(stream: &'a BidiStream<Req, Resp>) -> Self {
        Self { stream, future: None }
    }
}

impl<'a, Req, Resp> Stream for StreamResults<'a, Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Item = StreamResult<Resp>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let fut = this.future.get_or_insert_with(|| Box::pin(this.stream.next()));
        match fut.as_mut().poll(cx) {
            Poll::Ready(item) => {
                this.future = None;
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterceptorEntry;
    use crate::interceptor::NoopInterceptor;
    use crate::transport::fake::FakeTransport;
    use crate::transport::Transport;

    struct BytesCodec;
    impl MessageCodec<Bytes> for BytesCodec {
        fn name(&self) -> &'static str {
            "raw"
        }
        fn encode(&self, message: &Bytes) -> Result<Bytes, ClientError> {
            Ok(message.clone())
        }
        fn decode(&self, bytes: &[u8]) -> Result<Bytes, ClientError> {
            Ok(Bytes::copy_from_slice(bytes))
        }
    }

    fn chain() -> StreamChain {
        StreamChain::build(&[], Box::new(NoopInterceptor))
    }

    #[tokio::test]
    async fn delivers_messages_then_terminal_complete() {
        let transport = FakeTransport::new();
        transport.push_stream(vec![
            RawStreamEvent::Headers(Metadata::new()),
            RawStreamEvent::Frame(Bytes::from_static(b"one")),
            RawStreamEvent::Frame(Bytes::from_static(b"two")),
            RawStreamEvent::Complete { trailers: Metadata::new() },
        ]);
        let (sink, source, cancel) = transport
            .perform_stream(http::Method::POST, http::Uri::from_static("https://example.com/svc/Method"), Metadata::new())
            .await
            .unwrap();

        let codec: Arc<dyn MessageCodec<Bytes>> = Arc::new(BytesCodec);
        let stream = BidiStream::new(sink, source, cancel, chain(), codec.clone(), codec);

        assert!(matches!(stream.next().await, Some(StreamResult::Headers(_))));
        assert!(matches!(stream.next().await, Some(StreamResult::Message(_))));
        assert!(matches!(stream.next().await, Some(StreamResult::Message(_))));
        match stream.next().await {
            Some(StreamResult::Complete { code, error, .. }) => {
                assert_eq!(code, Code::Ok);
                assert!(error.is_none());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_send_is_rejected_not_panicking() {
        let transport = FakeTransport::new();
        transport.push_stream(vec![RawStreamEvent::Complete { trailers: Metadata::new() }]);
        let (sink, source, cancel) = transport
            .perform_stream(http::Method::POST, http::Uri::from_static("https://example.com/svc/Method"), Metadata::new())
            .await
            .unwrap();
        let codec: Arc<dyn MessageCodec<Bytes>> = Arc::new(BytesCodec);
        let stream = BidiStream::new(sink, source, cancel, chain(), codec.clone(), codec);

        stream.close_send().await.unwrap();
        let err = stream.send(&Bytes::from_static(b"late")).await.unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn cancel_synthesizes_a_canceled_complete() {
        let transport = FakeTransport::new();
        transport.push_stream(vec![]);
        let (sink, source, cancel) = transport
            .perform_stream(http::Method::POST, http::Uri::from_static("https://example.com/svc/Method"), Metadata::new())
            .await
            .unwrap();
        let codec: Arc<dyn MessageCodec<Bytes>> = Arc::new(BytesCodec);
        let stream = BidiStream::new(sink, source, cancel, chain(), codec.clone(), codec);

        stream.cancel().await;

        match stream.next().await {
            Some(StreamResult::Complete { code, error, .. }) => {
                assert_eq!(code, Code::Canceled);
                assert!(error.is_some());
            }
            other => panic!("expected Complete{{Canceled}}, got {other:?}"),
        }
        // The pump's own terminal event must not follow the synthesized one.
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_after_natural_completion() {
        let transport = FakeTransport::new();
        transport.push_stream(vec![RawStreamEvent::Complete { trailers: Metadata::new() }]);
        let (sink, source, cancel) = transport
            .perform_stream(http::Method::POST, http::Uri::from_static("https://example.com/svc/Method"), Metadata::new())
            .await
            .unwrap();
        let codec: Arc<dyn MessageCodec<Bytes>> = Arc::new(BytesCodec);
        let stream = BidiStream::new(sink, source, cancel, chain(), codec.clone(), codec);

        match stream.next().await {
            Some(StreamResult::Complete { code, .. }) => assert_eq!(code, Code::Ok),
            other => panic!("expected Complete, got {other:?}"),
        }

        // Cancel after Complete was already observed is a no-op, not a second event.
        stream.cancel().await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn grpc_status_zero_is_ok_nonzero_is_error() {
        let transport = FakeTransport::new();
        let mut trailers = Metadata::new();
        trailers.insert("grpc-status", "5");
        trailers.insert("grpc-message", "missing");
        transport.push_stream(vec![RawStreamEvent::Complete { trailers }]);
        let (sink, source, cancel) = transport
            .perform_stream(http::Method::POST, http::Uri::from_static("https://example.com/svc/Method"), Metadata::new())
            .await
            .unwrap();
        let codec: Arc<dyn MessageCodec<Bytes>> = Arc::new(BytesCodec);
        let stream = BidiStream::new(sink, source, cancel, chain(), codec.clone(), codec);

        match stream.next().await {
            Some(StreamResult::Complete { code, error, .. }) => {
                assert_eq!(code, Code::NotFound);
                assert!(error.is_some());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}
