//! The protocol-client facade: one entry point that speaks whichever wire
//! protocol its [`ProtocolClientConfig`] selects.

use std::sync::Arc;

use connectrpc_axum_core::Metadata;

use crate::codec::MessageCodec;
use crate::config::ProtocolClientConfig;
use crate::error::ClientError;
use crate::interceptor::{Idempotency, StreamChain, UnaryChain, UnaryRequest, UnaryResponse};
use crate::protocol;
use crate::stream::BidiStream;
use crate::transport::{Transport, TransportRequest};

#[cfg(feature = "tracing")]
use tracing::info_span;

/// A decoded unary response: the message plus whatever headers/trailers the
/// call produced.
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub message: T,
    pub headers: Metadata,
    pub trailers: Metadata,
}

/// Per-call overrides layered on top of the client-wide [`ProtocolClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub idempotency: Idempotency,
    pub headers: Metadata,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the call `NoSideEffects`, letting the Connect interceptor send
    /// it as an HTTP GET when `connect_get_requests` is enabled.
    pub fn idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// Speaks Connect, gRPC, or gRPC-Web to one host, per its [`ProtocolClientConfig`].
///
/// One client is built with one [`Transport`] and one set of interceptors,
/// then reused across every RPC method a service defines; each call supplies
/// its own [`MessageCodec`] pair since request/response types differ per method.
pub struct ProtocolClient {
    config: Arc<ProtocolClientConfig>,
    transport: Arc<dyn Transport>,
}

impl ProtocolClient {
    pub fn new(config: ProtocolClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config: Arc::new(config), transport }
    }

    fn protocol_name(&self) -> &'static str {
        match self.config.protocol {
            crate::config::Protocol::Connect => "connect",
            crate::config::Protocol::Grpc => "grpc",
            crate::config::Protocol::GrpcWeb => "grpc_web",
        }
    }

    fn procedure_uri(&self, procedure: &str) -> Result<http::Uri, ClientError> {
        format!(
            "{}/{}",
            self.config.host.trim_end_matches('/'),
            procedure.trim_start_matches('/')
        )
        .parse()
        .map_err(|e| ClientError::Protocol(format!("invalid procedure uri: {e}")))
    }

    /// Performs one unary call: encode, run the request through the
    /// interceptor chain, hand it to the transport, then run the response
    /// back through the chain and decode it.
    pub async fn unary<Req, Resp>(
        &self,
        procedure: &str,
        message: &Req,
        req_codec: &dyn MessageCodec<Req>,
        resp_codec: &dyn MessageCodec<Resp>,
        options: CallOptions,
    ) -> Result<Response<Resp>, ClientError> {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "unary",
            rpc.protocol = %self.protocol_name(),
            otel.kind = "client",
        )
        .entered();

        let mut chain = UnaryChain::build(&self.config.interceptors, protocol::build_unary(&self.config));

        let mut request = UnaryRequest {
            method: http::Method::POST,
            uri: self.procedure_uri(procedure)?,
            headers: options.headers,
            body: req_codec.encode(message)?,
            idempotency: options.idempotency,
        };
        chain.start_request(&mut request).await?;

        let transport_response = self
            .transport
            .perform_unary(TransportRequest {
                method: request.method,
                uri: request.uri,
                headers: request.headers,
                body: request.body,
            })
            .await?;

        let mut response = UnaryResponse {
            status: transport_response.status,
            headers: transport_response.headers,
            body: transport_response.body,
            trailers: transport_response.trailers,
        };
        chain.end_response(&mut response).await?;

        let message = resp_codec.decode(&response.body)?;
        Ok(Response { message, headers: response.headers, trailers: response.trailers })
    }

    /// A unary call declared `NoSideEffects`, eligible for the Connect GET transform.
    pub async fn cacheable_unary<Req, Resp>(
        &self,
        procedure: &str,
        message: &Req,
        req_codec: &dyn MessageCodec<Req>,
        resp_codec: &dyn MessageCodec<Resp>,
    ) -> Result<Response<Resp>, ClientError> {
        self.unary(
            procedure,
            message,
            req_codec,
            resp_codec,
            CallOptions::new().idempotency(Idempotency::NoSideEffects),
        )
        .await
    }

    /// Opens a streaming call. The same [`BidiStream`] handle serves client,
    /// server, and bidi streaming — callers just use `close_send` right away
    /// for a server-streaming call, or ignore incoming messages past the
    /// first for a client-streaming one.
    pub async fn stream<Req, Resp>(
        &self,
        procedure: &str,
        req_codec: Arc<dyn MessageCodec<Req>>,
        resp_codec: Arc<dyn MessageCodec<Resp>>,
        options: CallOptions,
    ) -> Result<BidiStream<Req, Resp>, ClientError>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
    {
        #[cfg(feature = "tracing")]
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "stream",
            rpc.protocol = %self.protocol_name(),
            otel.kind = "client",
        )
        .entered();

        let mut chain = StreamChain::build(&self.config.interceptors, protocol::build_stream(&self.config));

        let mut headers = options.headers;
        chain.start(&mut headers).await?;

        let (sink, source, cancel) = self
            .transport
            .perform_stream(http::Method::POST, self.procedure_uri(procedure)?, headers)
            .await?;

        Ok(BidiStream::new(sink, source, cancel, chain, req_codec, resp_codec))
    }
}
