//! The gRPC-Web protocol interceptor.
//!
//! gRPC-Web speaks the same envelope framing as plain gRPC but has no real
//! HTTP trailers to carry `grpc-status` in: the status instead rides as the
//! payload of one more envelope frame, marked with the high bit
//! (`envelope_flags::END_STREAM`), formatted as an HTTP/1.1-style header
//! block. A unary call gets exactly two such frames back-to-back in one
//! response body: the message frame, then the trailer frame (or, if the
//! call failed before producing a message, just the trailer frame alone).

use std::sync::Arc;

use bytes::Bytes;
use connectrpc_axum_core::{envelope, envelope::envelope_flags, message_length, BoxedCompression, Metadata, ENVELOPE_HEADER_SIZE};

use crate::config::ProtocolClientConfig;
use crate::error::ClientError;
use crate::interceptor::{BoxFuture, FrameOutcome, UnaryInterceptor, UnaryRequest, UnaryResponse};
use crate::interceptor::StreamInterceptor;

use super::{code_from_grpc_http_status, encode_grpc_timeout, negotiate_response_pool, pack_with_compression, parse_trailer_block, status_error_from_metadata};

pub struct GrpcWebInterceptor {
    config: Arc<ProtocolClientConfig>,
    response_compression: Option<BoxedCompression>,
    pending_end_stream: bool,
}

impl GrpcWebInterceptor {
    pub fn new(config: Arc<ProtocolClientConfig>) -> Self {
        Self { config, response_compression: None, pending_end_stream: false }
    }

    fn content_type(&self) -> String {
        format!("application/grpc-web+{}", self.config.codec_name)
    }
}

impl UnaryInterceptor for GrpcWebInterceptor {
    fn on_request<'a>(&'a mut self, request: &'a mut UnaryRequest) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            request.headers.set("content-type", self.content_type());
            request.headers.set("x-grpc-web", "1");
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
            let body = response.body.clone();
            if body.len() < ENVELOPE_HEADER_SIZE {
                return Err(ClientError::Protocol("gRPC-Web response shorter than one envelope".into()));
            }
            if body[0] & envelope_flags::END_STREAM != 0 {
                // Trailers-only: the whole body is the synthesized trailer frame.
                let (_flags, trailer_payload) = envelope::unpack(&body, None)?;
                let trailers = parse_trailer_block(&trailer_payload);
                if let Some(err) = status_error_from_metadata(&trailers) {
                    return Err(err);
                }
                response.body = Bytes::new();
                response.trailers = trailers;
                return Ok(());
            }

            let message_total = ENVELOPE_HEADER_SIZE + message_length(&body)? as usize;
            if message_total > body.len() {
                return Err(ClientError::Protocol("gRPC-Web response truncated before trailer frame".into()));
            }
            let encoding_name = response.headers.get("grpc-encoding").unwrap_or("identity").to_string();
            let pool = negotiate_response_pool(&self.config, &encoding_name)?;
            let (_flags, message_payload) = envelope::unpack(&body[..message_total], pool.as_ref())?;

            let trailer_frame = body.slice(message_total..);
            let (_flags, trailer_payload) = envelope::unpack(&trailer_frame, None)?;
            let trailers = parse_trailer_block(&trailer_payload);
            if let Some(err) = status_error_from_metadata(&trailers) {
                return Err(err);
            }

            response.body = message_payload;
            response.trailers = trailers;
            Ok(())
        })
    }
}

impl StreamInterceptor for GrpcWebInterceptor {
    fn on_start<'a>(&'a mut self, headers: &'a mut Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            headers.set("content-type", self.content_type());
            headers.set("x-grpc-web", "1");
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
            let flags = *frame.first().ok_or(ClientError::Protocol("empty gRPC-Web frame".into()))?;
            self.pending_end_stream = flags & envelope_flags::END_STREAM != 0;
            let pool = if self.pending_end_stream { None } else { self.response_compression.as_ref() };
            let (_flags, payload) = envelope::unpack(frame, pool)?;
            *frame = payload;
            Ok(())
        })
    }

    fn interpret_frame<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<FrameOutcome, ClientError>> {
        Box::pin(async move {
            if self.pending_end_stream {
                let trailers = parse_trailer_block(&frame);
                Ok(FrameOutcome::from_grpc_trailers(trailers))
            } else {
                Ok(FrameOutcome::Message(frame))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Protocol, ProtocolClientConfig};

    fn config() -> Arc<ProtocolClientConfig> {
        Arc::new(ProtocolClientConfig::new("https://example.com", Protocol::GrpcWeb))
    }

    fn trailer_frame(text: &str) -> Bytes {
        let mut body = Vec::new();
        body.push(envelope_flags::END_STREAM);
        body.extend_from_slice(&(text.len() as u32).to_be_bytes());
        body.extend_from_slice(text.as_bytes());
        Bytes::from(body)
    }

    #[tokio::test]
    async fn unary_response_slices_message_then_trailer_frame() {
        let mut interceptor = GrpcWebInterceptor::new(config());
        let message = envelope::pack(b"hi", None).unwrap();
        let mut body = message.to_vec();
        body.extend_from_slice(&trailer_frame("grpc-status: 0\r\n"));
        let mut response = UnaryResponse {
            status: http::StatusCode::OK,
            headers: Metadata::new(),
            body: Bytes::from(body),
            trailers: Metadata::new(),
        };
        interceptor.on_response(&mut response).await.unwrap();
        assert_eq!(&response.body[..], b"hi");
        assert_eq!(response.trailers.get("grpc-status"), Some("0"));
    }

    #[tokio::test]
    async fn unary_trailers_only_response_surfaces_error_with_no_message() {
        let mut interceptor = GrpcWebInterceptor::new(config());
        let mut response = UnaryResponse {
            status: http::StatusCode::OK,
            headers: Metadata::new(),
            body: trailer_frame("grpc-status: 12\r\ngrpc-message: nope\r\n"),
            trailers: Metadata::new(),
        };
        let err = interceptor.on_response(&mut response).await.unwrap_err();
        assert_eq!(err.code(), connectrpc_axum_core::Code::Unimplemented);
    }

    #[tokio::test]
    async fn stream_end_stream_frame_resolves_to_complete() {
        let mut interceptor = GrpcWebInterceptor::new(config());
        let mut headers = Metadata::new();
        interceptor.on_headers(&mut headers).await.unwrap();
        let mut frame = trailer_frame("grpc-status: 0\r\n");
        interceptor.on_output(&mut frame).await.unwrap();
        let outcome = interceptor.interpret_frame(frame).await.unwrap();
        match outcome {
            FrameOutcome::Complete { code, error, .. } => {
                assert_eq!(code, connectrpc_axum_core::Code::Ok);
                assert!(error.is_none());
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }
}
