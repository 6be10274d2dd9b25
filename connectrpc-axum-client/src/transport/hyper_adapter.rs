//! Adapts [`HyperTransport`] to the generic [`Transport`] trait.
//!
//! This is where HTTP/2 trailers actually get read: `hyper`'s [`Incoming`]
//! body exposes trailer frames through its `Body::poll_frame`, unlike
//! `reqwest`, which never surfaces them to callers. gRPC status lives in
//! those trailers, so this adapter is the piece that makes a real gRPC
//! protocol interceptor possible.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use connectrpc_axum_core::{message_length, Metadata, ENVELOPE_HEADER_SIZE};
use futures::StreamExt;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::body::TransportBody;
use super::hyper::HyperTransport;
use crate::error::ClientError;
use crate::interceptor::BoxFuture;
use crate::transport::raw::{CancelHandle, RawStreamEvent, StreamSink, StreamSource, Transport, TransportRequest, TransportResponse};

/// Wraps [`HyperTransport`] so it can be used wherever a [`Transport`] is expected.
#[derive(Clone)]
pub struct HyperAdapter {
    inner: Arc<HyperTransport>,
}

impl HyperAdapter {
    pub fn new(inner: HyperTransport) -> Self {
        Self { inner: Arc::new(inner) }
    }
}

fn build_request(
    method: http::Method,
    uri: http::Uri,
    headers: &Metadata,
    body: TransportBody,
) -> Result<http::Request<TransportBody>, ClientError> {
    let mut builder = http::Request::builder().method(method).uri(uri);
    let header_map =
        http::HeaderMap::try_from(headers).map_err(|e| ClientError::Protocol(format!("invalid header: {e}")))?;
    if let Some(headers_mut) = builder.headers_mut() {
        *headers_mut = header_map;
    }
    builder
        .body(body)
        .map_err(|e| ClientError::Protocol(format!("failed to build request: {e}")))
}

impl Transport for HyperAdapter {
    fn perform_unary<'a>(
        &'a self,
        request: TransportRequest,
    ) -> BoxFuture<'a, Result<TransportResponse, ClientError>> {
        Box::pin(async move {
            let req = build_request(
                request.method,
                request.uri,
                &request.headers,
                TransportBody::full(request.body),
            )?;
            let response = self.inner.request(req).await?;
            let status = response.status();
            let headers = Metadata::from(response.headers());
            let collected = response
                .into_body()
                .collect()
                .await
                .map_err(|e| ClientError::Transport(format!("failed to read response body: {e}")))?;
            let trailers = collected.trailers().map(Metadata::from).unwrap_or_default();
            Ok(TransportResponse {
                status,
                headers,
                body: collected.to_bytes(),
                trailers,
            })
        })
    }

    fn perform_stream<'a>(
        &'a self,
        method: http::Method,
        uri: http::Uri,
        headers: Metadata,
    ) -> BoxFuture<
        'a,
        Result<
            (Box<dyn StreamSink + 'static>, Box<dyn StreamSource + 'static>, Box<dyn CancelHandle + 'static>),
            ClientError,
        >,
    > {
        Box::pin(async move {
            let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Bytes>();
            let outgoing_stream = UnboundedReceiverStream::new(outgoing_rx).map(Ok::<_, ClientError>);
            let body = TransportBody::streaming(outgoing_stream);
            let req = build_request(method, uri, &headers, body)?;

            let response = self.inner.request(req).await?;
            let response_headers = Metadata::from(response.headers());

            let (events_tx, events_rx) = mpsc::unbounded_channel::<Result<RawStreamEvent, ClientError>>();
            let _ = events_tx.send(Ok(RawStreamEvent::Headers(response_headers)));

            let pump = tokio::spawn(pump_response_body(response.into_body(), events_tx));

            Ok((
                Box::new(ChannelSink { sender: Some(outgoing_tx) }) as Box<dyn StreamSink>,
                Box::new(ChannelSource { receiver: events_rx }) as Box<dyn StreamSource>,
                Box::new(JoinHandleCancel { handle: Some(pump) }) as Box<dyn CancelHandle>,
            ))
        })
    }
}

/// Reads the response body to completion, splitting it into whole envelope
/// frames and forwarding them (plus a final `Complete`) over `events_tx`.
async fn pump_response_body(
    mut body: hyper::body::Incoming,
    events_tx: mpsc::UnboundedSender<Result<RawStreamEvent, ClientError>>,
) {
    let mut buffer = BytesMut::new();
    let mut trailers = Metadata::new();

    loop {
        match body.frame().await {
            None => break,
            Some(Ok(frame)) => {
                if frame.is_trailers() {
                    if let Ok(trailer_map) = frame.into_trailers() {
                        trailers = Metadata::from(&trailer_map);
                    }
                    continue;
                }
                if let Ok(data) = frame.into_data() {
                    buffer.extend_from_slice(&data);
                    while let Some(frame_len) = complete_frame_len(&buffer) {
                        let frame_bytes = buffer.split_to(frame_len).freeze();
                        if events_tx.send(Ok(RawStreamEvent::Frame(frame_bytes))).is_err() {
                            return;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                let _ = events_tx.send(Err(ClientError::Transport(format!("stream read failed: {e}"))));
                return;
            }
        }
    }

    let _ = events_tx.send(Ok(RawStreamEvent::Complete { trailers }));
}

/// If `buffer` holds at least one complete envelope, returns its total length
/// (header + payload); otherwise `None`, meaning more bytes must arrive first.
fn complete_frame_len(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < ENVELOPE_HEADER_SIZE {
        return None;
    }
    let payload_len = message_length(buffer).ok()? as usize;
    let total = ENVELOPE_HEADER_SIZE + payload_len;
    (buffer.len() >= total).then_some(total)
}

struct ChannelSink {
    sender: Option<mpsc::UnboundedSender<Bytes>>,
}

impl StreamSink for ChannelSink {
    fn send<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            match &self.sender {
                Some(tx) => tx
                    .send(frame)
                    .map_err(|_| ClientError::Transport("stream request body already closed".into())),
                None => Err(ClientError::Transport("stream request body already closed".into())),
            }
        })
    }

    fn close<'a>(&'a mut self) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            self.sender = None;
            Ok(())
        })
    }
}

struct ChannelSource {
    receiver: mpsc::UnboundedReceiver<Result<RawStreamEvent, ClientError>>,
}

impl StreamSource for ChannelSource {
    fn poll_next<'a>(&'a mut self) -> BoxFuture<'a, Option<Result<RawStreamEvent, ClientError>>> {
        Box::pin(async move { self.receiver.recv().await })
    }
}

struct JoinHandleCancel {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl CancelHandle for JoinHandleCancel {
    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
