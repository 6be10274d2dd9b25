//! Client-wide configuration: which wire protocol to speak, how to negotiate
//! compression, and which interceptors every call goes through.

use std::sync::Arc;
use std::time::Duration;

use connectrpc_axum_core::{BoxedCompression, CompressionEncoding};

use crate::interceptor::{StreamInterceptor, UnaryInterceptor};

/// Which of the three wire protocols a [`crate::ProtocolClient`] speaks.
///
/// All three carry the same procedure semantics (one envelope codec, one
/// error model) but differ in framing, headers and status transport — see
/// the `protocol` module for the concrete interceptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Connect,
    Grpc,
    GrpcWeb,
}

impl Protocol {
    /// The wire name used in `Content-Type: application/<name>...`.
    pub fn content_type_prefix(&self) -> &'static str {
        match self {
            Protocol::Connect => "application",
            Protocol::Grpc => "application/grpc",
            Protocol::GrpcWeb => "application/grpc-web",
        }
    }
}

/// Request-compression settings: which codec to use and the minimum payload
/// size before it's worth paying the compression cost.
#[derive(Debug, Clone)]
pub struct RequestCompressionConfig {
    pub encoding: CompressionEncoding,
    pub min_bytes: usize,
}

impl RequestCompressionConfig {
    pub fn new(encoding: CompressionEncoding) -> Self {
        Self { encoding, min_bytes: 0 }
    }

    pub fn min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }
}

/// A factory that builds one interceptor instance per call.
///
/// Interceptors are stateful across the lifetime of a single RPC (they see
/// every frame of a stream), so the chain asks for a fresh instance per call
/// rather than sharing one across concurrent calls.
pub type UnaryInterceptorFactory = Arc<dyn Fn() -> Box<dyn UnaryInterceptor> + Send + Sync>;
pub type StreamInterceptorFactory = Arc<dyn Fn() -> Box<dyn StreamInterceptor> + Send + Sync>;

/// One registered interceptor, in the order it was configured.
#[derive(Clone)]
pub struct InterceptorEntry {
    pub unary: UnaryInterceptorFactory,
    pub stream: StreamInterceptorFactory,
}

/// Client-wide configuration shared by every call a [`crate::ProtocolClient`] makes.
///
/// The codec used to (de)serialize a particular message type is deliberately
/// not part of this struct: one client config is shared across every RPC
/// method the service defines, and those methods each have distinct request
/// and response types. Callers pass a [`crate::codec::MessageCodec`] per call
/// instead (see [`crate::ProtocolClient::unary`]); `codec_name` here only
/// selects the wire name advertised in `Content-Type`.
#[derive(Clone)]
pub struct ProtocolClientConfig {
    pub host: String,
    pub protocol: Protocol,
    pub codec_name: &'static str,
    pub request_compression: Option<RequestCompressionConfig>,
    pub accept_compressions: Vec<CompressionEncoding>,
    pub interceptors: Vec<InterceptorEntry>,
    pub timeout: Option<Duration>,
    /// Whether a `NoSideEffects` unary call may be sent as an HTTP GET with
    /// the request message folded into the query string (Connect only).
    pub connect_get_requests: bool,
}

impl ProtocolClientConfig {
    pub fn new(host: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            protocol,
            codec_name: "proto",
            request_compression: None,
            accept_compressions: vec![CompressionEncoding::Identity],
            interceptors: Vec::new(),
            timeout: None,
            connect_get_requests: true,
        }
    }

    pub fn codec_name(mut self, name: &'static str) -> Self {
        self.codec_name = name;
        self
    }

    pub fn request_compression(mut self, config: RequestCompressionConfig) -> Self {
        self.request_compression = Some(config);
        self
    }

    pub fn accept_compressions(mut self, encodings: Vec<CompressionEncoding>) -> Self {
        self.accept_compressions = encodings;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_get_requests(mut self, enabled: bool) -> Self {
        self.connect_get_requests = enabled;
        self
    }

    pub fn with_interceptor<U, S>(mut self, unary: U, stream: S) -> Self
    where
        U: Fn() -> Box<dyn UnaryInterceptor> + Send + Sync + 'static,
        S: Fn() -> Box<dyn StreamInterceptor> + Send + Sync + 'static,
    {
        self.interceptors.push(InterceptorEntry {
            unary: Arc::new(unary),
            stream: Arc::new(stream),
        });
        self
    }

    /// Accept-Encoding-style header value advertising every accepted compression.
    pub fn accept_encoding_header(&self) -> String {
        self.accept_compressions
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Looks up the codec for a response's advertised compression, by wire
    /// name (`"gzip"`, `"br"`, ...), among the encodings this client accepts.
    ///
    /// Returns `None` both for `identity` and for a name the caller never
    /// advertised accepting; callers that see `None` for a non-identity name
    /// should treat it as a protocol violation, not silently pass the bytes
    /// through uncompressed.
    pub fn response_compression_pool(&self, name: &str) -> Option<BoxedCompression> {
        self.accept_compressions
            .iter()
            .find(|encoding| encoding.as_str() == name)
            .and_then(|encoding| encoding.codec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_accepts_identity_only() {
        let config = ProtocolClientConfig::new("https://example.com", Protocol::Connect);
        assert_eq!(config.accept_encoding_header(), "identity");
        assert!(config.interceptors.is_empty());
        assert!(config.timeout.is_none());
    }

    #[test]
    fn content_type_prefix_differs_per_protocol() {
        assert_eq!(Protocol::Connect.content_type_prefix(), "application");
        assert_eq!(Protocol::Grpc.content_type_prefix(), "application/grpc");
        assert_eq!(Protocol::GrpcWeb.content_type_prefix(), "application/grpc-web");
    }
}
