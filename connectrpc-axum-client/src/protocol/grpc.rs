//! The plain gRPC protocol interceptor: HTTP/2 framed, status riding real
//! trailers (or, for a trailers-only response, the headers frame itself).

use std::sync::Arc;

use bytes::Bytes;
use connectrpc_axum_core::{envelope, BoxedCompression, Metadata};

use crate::config::ProtocolClientConfig;
use crate::error::ClientError;
use crate::interceptor::{BoxFuture, FrameOutcome, UnaryInterceptor, UnaryRequest, UnaryResponse};
use crate::interceptor::StreamInterceptor;

use super::{code_from_grpc_http_status, encode_grpc_timeout, negotiate_response_pool, pack_with_compression, status_error_from_metadata};

pub struct GrpcInterceptor {
    config: Arc<ProtocolClientConfig>,
    response_compression: Option<BoxedCompression>,
}

impl GrpcInterceptor {
    pub fn new(config: Arc<ProtocolClientConfig>) -> Self {
        Self { config, response_compression: None }
    }

    fn content_type(&self) -> String {
        format!("application/grpc+{}", self.config.codec_name)
    }
}

impl UnaryInterceptor for GrpcInterceptor {
    fn on_request<'a>(&'a mut self, request: &'a mut UnaryRequest) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            request.headers.set("content-type", self.content_type());
            request.headers.set("te", "trailers");
            request.headers.set("grpc-accept-encoding", self.config.accept_encoding_header());
            if let Some(timeout) = self.config.timeout {
                request.headers.set("grpc-timeout", encode_grpc_timeout(timeout));
            }
            if let Some(compression) = &self.config.request_compression {
                request.headers.set("grpc-encoding", compression.encoding.as_str());
            }
            request.body = pack_with_compression(&request.body, self.config.request_compression.as_ref())?;
            Ok(())
        })
    }

    fn on_response<'a>(&'a mut self, response: &'a mut UnaryResponse) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            if response.status != http::StatusCode::OK {
                return Err(ClientError::new(
                    code_from_grpc_http_status(response.status.as_u16()),
                    format!("unexpected http status {}", response.status),
                ));
            }
            let source = if response.trailers.is_empty() { &response.headers } else { &response.trailers };
            if let Some(err) = status_error_from_metadata(source) {
                return Err(err);
            }
            let encoding_name = response.headers.get("grpc-encoding").unwrap_or("identity").to_string();
            let pool = negotiate_response_pool(&self.config, &encoding_name)?;
            let (_flags, payload) = envelope::unpack(&response.body, pool.as_ref())?;
            response.body = payload;
            Ok(())
        })
    }
}

impl StreamInterceptor for GrpcInterceptor {
    fn on_start<'a>(&'a mut self, headers: &'a mut Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            headers.set("content-type", self.content_type());
            headers.set("te", "trailers");
            headers.set("grpc-accept-encoding", self.config.accept_encoding_header());
            if let Some(timeout) = self.config.timeout {
                headers.set("grpc-timeout", encode_grpc_timeout(timeout));
            }
            if let Some(compression) = &self.config.request_compression {
                headers.set("grpc-encoding", compression.encoding.as_str());
            }
            Ok(())
        })
    }

    fn on_headers<'a>(&'a mut self, headers: &'a Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            let name = headers.get("grpc-encoding").unwrap_or("identity").to_string();
            self.response_compression = negotiate_response_pool(&self.config, &name)?;
            Ok(())
        })
    }

    fn on_input<'a>(&'a mut self, frame: &'a mut Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            *frame = pack_with_compression(frame, self.config.request_compression.as_ref())?;
            Ok(())
        })
    }

    fn on_output<'a>(&'a mut self, frame: &'a mut Bytes) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            let (_flags, payload) = envelope::unpack(frame, self.response_compression.as_ref())?;
            *frame = payload;
            Ok(())
        })
    }

    // `interpret_frame` default (every frame is a Message) and `interpret_trailers`
    // default (read `grpc-status`/`grpc-message` off real trailers) are both
    // exactly plain gRPC's behavior, so this interceptor doesn't override either.
}
