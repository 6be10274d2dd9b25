//! A protocol-agnostic RPC client: speaks Connect (unary and streaming),
//! gRPC, and gRPC-Web against the same generated stub, picking the wire
//! protocol at client-construction time rather than at codegen time.
//!
//! ## Layout
//!
//! - [`config`]: client-wide configuration (protocol, compression, interceptors)
//! - [`interceptor`]: the [`UnaryInterceptor`]/[`StreamInterceptor`] hooks and their chains
//! - [`protocol`]: the three protocol interceptors (Connect, gRPC, gRPC-Web)
//! - [`codec`]: the [`MessageCodec`] trait callers implement to (de)serialize messages
//! - [`transport`]: the pluggable HTTP boundary, with a hyper-based default
//! - [`stream`]: the bidirectional streaming state machine
//! - [`client`]/[`builder`]: the [`ProtocolClient`] facade and its builder
//! - [`error`]: [`ClientError`], the single error type every call returns
//!
//! ## Example
//!
//! ```ignore
//! use connectrpc_axum_client::{CallOptions, Idempotency, Protocol, ProtocolClientBuilder};
//!
//! let client = ProtocolClientBuilder::new("https://api.example.com", Protocol::Connect)
//!     .timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! let response = client
//!     .unary("eliza.v1.ElizaService/Say", &request, &json_codec, &json_codec, CallOptions::new())
//!     .await?;
//! println!("{:?}", response.message);
//! ```

mod builder;
mod client;
pub mod codec;
pub mod config;
mod error;
pub mod interceptor;
mod protocol;
pub mod stream;
pub mod transport;

pub use builder::ProtocolClientBuilder;
pub use client::{CallOptions, ProtocolClient, Response};
pub use codec::{JsonCodec, MessageCodec, ProstCodec};
pub use config::{Protocol, ProtocolClientConfig, RequestCompressionConfig};
pub use error::ClientError;
pub use interceptor::{
    FrameOutcome, Idempotency, NoopInterceptor, StreamChain, StreamInterceptor, UnaryChain,
    UnaryInterceptor, UnaryRequest, UnaryResponse,
};
pub use stream::{BidiStream, StreamResult, StreamResults};
pub use transport::{HyperAdapter, HyperTransport, HyperTransportBuilder, Transport, TlsClientConfig};

// Re-export core types callers need at the top level.
pub use connectrpc_axum_core::{
    Code, CompressionConfig, CompressionEncoding, CompressionLevel, ConnectError, ErrorDetail, Metadata,
};

pub use bytes::Bytes;
