//! Builder for [`ProtocolClient`].

use std::sync::Arc;
use std::time::Duration;

use connectrpc_axum_core::CompressionEncoding;

use crate::client::ProtocolClient;
use crate::config::{Protocol, ProtocolClientConfig, RequestCompressionConfig};
use crate::error::ClientError;
use crate::interceptor::{StreamInterceptor, UnaryInterceptor};
use crate::transport::{HyperAdapter, HyperTransport, Transport};

/// Builds a [`ProtocolClient`], defaulting to a [`HyperAdapter`]-backed
/// transport unless [`ProtocolClientBuilder::transport`] overrides it.
pub struct ProtocolClientBuilder {
    config: ProtocolClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ProtocolClientBuilder {
    pub fn new(host: impl Into<String>, protocol: Protocol) -> Self {
        Self { config: ProtocolClientConfig::new(host, protocol), transport: None }
    }

    pub fn codec_name(mut self, name: &'static str) -> Self {
        self.config = self.config.codec_name(name);
        self
    }

    pub fn request_compression(mut self, compression: RequestCompressionConfig) -> Self {
        self.config = self.config.request_compression(compression);
        self
    }

    pub fn accept_compressions(mut self, encodings: Vec<CompressionEncoding>) -> Self {
        self.config = self.config.accept_compressions(encodings);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.timeout(timeout);
        self
    }

    /// Whether a `NoSideEffects` unary call may be sent as an HTTP GET
    /// (Connect only; a no-op for gRPC/gRPC-Web clients). Defaults to `true`.
    pub fn connect_get_requests(mut self, enabled: bool) -> Self {
        self.config = self.config.connect_get_requests(enabled);
        self
    }

    pub fn with_interceptor<U, S>(mut self, unary: U, stream: S) -> Self
    where
        U: Fn() -> Box<dyn UnaryInterceptor> + Send + Sync + 'static,
        S: Fn() -> Box<dyn StreamInterceptor> + Send + Sync + 'static,
    {
        self.config = self.config.with_interceptor(unary, stream);
        self
    }

    /// Supplies a transport other than the built-in hyper-based one, e.g. a
    /// test double or an alternate HTTP stack.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ProtocolClient, ClientError> {
        if self.config.host.is_empty() {
            return Err(ClientError::Protocol("client host must not be empty".into()));
        }
        let _ = self.config.host.parse::<http::Uri>().map_err(|e| ClientError::Protocol(format!("invalid host: {e}")))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperAdapter::new(HyperTransport::new()?)),
        };
        Ok(ProtocolClient::new(self.config, transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_is_rejected() {
        let err = ProtocolClientBuilder::new("", Protocol::Connect).build().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn malformed_host_is_rejected() {
        let err = ProtocolClientBuilder::new("not a uri", Protocol::Connect).build().unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
