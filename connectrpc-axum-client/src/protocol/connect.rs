//! The Connect protocol interceptor.
//!
//! Unary calls ride plain HTTP POST/GET with a JSON error body on failure.
//! Streams never get real trailers either: the final frame carries the
//! `0x02` end-stream bit and its payload is a JSON object of
//! `{error, metadata}` instead of a protobuf-framed status.

use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use connectrpc_axum_core::{envelope, BoxedCompression, Code, ConnectError, Metadata};
use serde::Deserialize;

use crate::config::ProtocolClientConfig;
use crate::error::ClientError;
use crate::interceptor::{BoxFuture, FrameOutcome, Idempotency, UnaryInterceptor, UnaryRequest, UnaryResponse};
use crate::interceptor::StreamInterceptor;

use super::{code_from_http_status, negotiate_response_pool, pack_with_compression};

/// Connect streaming's own end-of-stream marker. Distinct from gRPC-Web's
/// `envelope_flags::END_STREAM` (the high bit) and not interpreted by the
/// generic envelope codec, so it stays a private constant here rather than
/// living in `envelope_flags`.
const CONNECT_END_STREAM: u8 = 0x02;

pub struct ConnectInterceptor {
    config: Arc<ProtocolClientConfig>,
    response_compression: Option<BoxedCompression>,
    pending_end_stream: bool,
}

impl ConnectInterceptor {
    pub fn new(config: Arc<ProtocolClientConfig>) -> Self {
        Self { config, response_compression: None, pending_end_stream: false }
    }

    fn unary_content_type(&self) -> String {
        format!("application/{}", self.config.codec_name)
    }

    fn streaming_content_type(&self) -> String {
        format!("application/connect+{}", self.config.codec_name)
    }

    /// Rewrites a unary `POST` into a `GET` whose query string carries the
    /// whole request: `connect=v1&encoding=<codec>&message=<body>&base64=1`,
    /// plus `compression=<name>` when the body was compressed.
    fn rewrite_as_get(&self, request: &mut UnaryRequest) -> Result<(), ClientError> {
        let (body, compression_name) = match &self.config.request_compression {
            Some(compression) if request.body.len() >= compression.min_bytes => {
                let codec = compression
                    .encoding
                    .codec()
                    .ok_or_else(|| ClientError::Protocol("request compression configured but codec unavailable".into()))?;
                let compressed = codec
                    .compress(&request.body)
                    .map_err(|e| ClientError::Encode(e.to_string()))?;
                (compressed, Some(compression.encoding.as_str()))
            }
            _ => (request.body.clone(), None),
        };
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&body);

        let mut query = format!(
            "connect=v1&encoding={}&base64=1&message={}",
            self.config.codec_name, encoded
        );
        if let Some(name) = compression_name {
            query.push_str(&format!("&compression={name}"));
        }

        let parts = request.uri.clone().into_parts();
        let path = parts.path_and_query.as_ref().map(|pq| pq.path()).unwrap_or("/");
        let path_and_query = format!("{path}?{query}");
        let mut builder = http::Uri::builder();
        if let Some(scheme) = parts.scheme {
            builder = builder.scheme(scheme);
        }
        if let Some(authority) = parts.authority {
            builder = builder.authority(authority);
        }
        request.uri = builder
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ClientError::Protocol(format!("failed to build GET uri: {e}")))?;
        request.method = http::Method::GET;
        request.body = Bytes::new();
        request.headers.set("get-request", "true");
        Ok(())
    }
}

/// Mirrors the JSON shape of a Connect unary error response.
#[derive(Deserialize)]
struct ConnectErrorBody {
    code: String,
    message: Option<String>,
    #[serde(default)]
    details: Vec<ConnectErrorDetailJson>,
}

#[derive(Deserialize)]
struct ConnectErrorDetailJson {
    #[serde(rename = "type")]
    type_url: String,
    value: String,
}

fn connect_error_from_body(bytes: &[u8], fallback: Code) -> ConnectError {
    let parsed: Result<ConnectErrorBody, _> = serde_json::from_slice(bytes);
    match parsed {
        Ok(body) => {
            let code = Code::from_str(&body.code).unwrap_or(fallback);
            let mut err = match body.message {
                Some(msg) => ConnectError::new(code, msg),
                None => ConnectError::from_code(code),
            };
            for detail in body.details {
                if let Ok(value) = base64::engine::general_purpose::STANDARD_NO_PAD.decode(detail.value.as_bytes()) {
                    err = err.add_detail(detail.type_url, value);
                }
            }
            err
        }
        Err(_) => ConnectError::new(fallback, "malformed connect error body"),
    }
}

/// Mirrors the JSON shape of Connect streaming's embedded end-of-stream frame.
#[derive(Deserialize, Default)]
struct EndStreamBody {
    error: Option<ConnectErrorBody>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, Vec<String>>,
}

impl UnaryInterceptor for ConnectInterceptor {
    fn on_request<'a>(&'a mut self, request: &'a mut UnaryRequest) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            request.headers.set("connect-protocol-version", "1");
            if let Some(timeout) = self.config.timeout {
                request.headers.set("connect-timeout-ms", timeout.as_millis().to_string());
            }

            if self.config.connect_get_requests && request.idempotency == Idempotency::NoSideEffects {
                return self.rewrite_as_get(request);
            }

            request.headers.set("content-type", self.unary_content_type());
            request.headers.set("accept-encoding", self.config.accept_encoding_header());
            if let Some(compression) = &self.config.request_compression {
                if request.body.len() >= compression.min_bytes {
                    let codec = compression
                        .encoding
                        .codec()
                        .ok_or_else(|| ClientError::Protocol("request compression configured but codec unavailable".into()))?;
                    request.body = codec.compress(&request.body).map_err(|e| ClientError::Encode(e.to_string()))?;
                    request.headers.set("content-encoding", compression.encoding.as_str());
                }
            }
            Ok(())
        })
    }

    fn on_response<'a>(&'a mut self, response: &'a mut UnaryResponse) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            if response.status != http::StatusCode::OK {
                let fallback = code_from_http_status(response.status.as_u16());
                let err = connect_error_from_body(&response.body, fallback).with_metadata(response.headers.clone());
                return Err(ClientError::Rpc(err));
            }
            let encoding_name = response.headers.get("content-encoding").unwrap_or("identity").to_string();
            if encoding_name != "identity" {
                let codec = negotiate_response_pool(&self.config, &encoding_name)?
                    .ok_or_else(|| ClientError::unimplemented(format!("unsupported response compression {encoding_name}")))?;
                response.body = codec.decompress(&response.body).map_err(|e| ClientError::Decode(e.to_string()))?;
            }
            Ok(())
        })
    }
}

impl StreamInterceptor for ConnectInterceptor {
    fn on_start<'a>(&'a mut self, headers: &'a mut Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            headers.set("content-type", self.streaming_content_type());
            headers.set("connect-protocol-version", "1");
            headers.set("connect-accept-encoding", self.config.accept_encoding_header());
            if let Some(timeout) = self.config.timeout {
                headers.set("connect-timeout-ms", timeout.as_millis().to_string());
            }
            if let Some(compression) = &self.config.request_compression {
                headers.set("connect-content-encoding", compression.encoding.as_str());
            }
            Ok(())
        })
    }

    fn on_headers<'a>(&'a mut self, headers: &'a Metadata) -> BoxFuture<'a, Result<(), ClientError>> {
        Box::pin(async move {
            let name = headers.get("connect-content-encoding").unwrap_or("identity").to_string();
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
            let flags = *frame.first().ok_or(ClientError::Protocol("empty connect frame".into()))?;
            self.pending_end_stream = flags & CONNECT_END_STREAM != 0;
            let pool = if self.pending_end_stream { None } else { self.response_compression.as_ref() };
            let (_flags, payload) = envelope::unpack(frame, pool)?;
            *frame = payload;
            Ok(())
        })
    }

    fn interpret_frame<'a>(&'a mut self, frame: Bytes) -> BoxFuture<'a, Result<FrameOutcome, ClientError>> {
        Box::pin(async move {
            if !self.pending_end_stream {
                return Ok(FrameOutcome::Message(frame));
            }
            let body: EndStreamBody = serde_json::from_slice(&frame)
                .map_err(|e| ClientError::Protocol(format!("malformed end-stream frame: {e}")))?;
            let mut trailers = Metadata::new();
            for (key, values) in body.metadata {
                for value in values {
                    trailers.insert(&key, value);
                }
            }
            let (code, error) = match body.error {
                Some(err_body) => {
                    let code = Code::from_str(&err_body.code).unwrap_or(Code::Unknown);
                    let err = connect_error_from_body_parts(err_body).with_metadata(trailers.clone());
                    (code, Some(ClientError::Rpc(err)))
                }
                None => (Code::Ok, None),
            };
            Ok(FrameOutcome::Complete { code, error, trailers })
        })
    }

    /// Connect never uses real HTTP trailers: reaching the transport's
    /// terminal event without first having seen the `0x02` end-stream frame
    /// means the peer closed the connection before telling us it was done.
    fn interpret_trailers<'a>(&'a mut self, trailers: Metadata) -> BoxFuture<'a, FrameOutcome> {
        Box::pin(async move {
            let err = ClientError::unavailable("stream closed before end-of-stream frame");
            FrameOutcome::Complete { code: Code::Unavailable, error: Some(err), trailers }
        })
    }
}

fn connect_error_from_body_parts(body: ConnectErrorBody) -> ConnectError {
    let code = Code::from_str(&body.code).unwrap_or(Code::Unknown);
    let mut err = match body.message {
        Some(msg) => ConnectError::new(code, msg),
        None => ConnectError::from_code(code),
    };
    for detail in body.details {
        if let Ok(value) = base64::engine::general_purpose::STANDARD_NO_PAD.decode(detail.value.as_bytes()) {
            err = err.add_detail(detail.type_url, value);
        }
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Protocol, ProtocolClientConfig};

    fn config() -> Arc<ProtocolClientConfig> {
        Arc::new(ProtocolClientConfig::new("https://example.com", Protocol::Connect))
    }

    #[tokio::test]
    async fn idempotent_unary_request_rewrites_to_get() {
        let mut interceptor = ConnectInterceptor::new(config());
        let mut request = UnaryRequest {
            method: http::Method::POST,
            uri: http::Uri::from_static("https://example.com/svc/Method"),
            headers: Metadata::new(),
            body: Bytes::from_static(b"{}"),
            idempotency: Idempotency::NoSideEffects,
        };
        interceptor.on_request(&mut request).await.unwrap();
        assert_eq!(request.method, http::Method::GET);
        assert!(request.body.is_empty());
        let query = request.uri.query().unwrap();
        assert!(query.contains("connect=v1"));
        assert!(query.contains("base64=1"));
        assert!(query.contains("message="));
        assert_eq!(request.headers.get("get-request"), Some("true"));
    }

    #[tokio::test]
    async fn non_idempotent_unary_request_stays_post() {
        let mut interceptor = ConnectInterceptor::new(config());
        let mut request = UnaryRequest {
            method: http::Method::POST,
            uri: http::Uri::from_static("https://example.com/svc/Method"),
            headers: Metadata::new(),
            body: Bytes::from_static(b"{}"),
            idempotency: Idempotency::Unknown,
        };
        interceptor.on_request(&mut request).await.unwrap();
        assert_eq!(request.method, http::Method::POST);
        assert_eq!(request.headers.get("content-type"), Some("application/json"));
        assert_eq!(&request.body[..], b"{}");
    }

    #[tokio::test]
    async fn unary_error_response_parses_json_body() {
        let mut interceptor = ConnectInterceptor::new(config());
        let mut response = UnaryResponse {
            status: http::StatusCode::NOT_FOUND,
            headers: Metadata::new(),
            body: Bytes::from_static(br#"{"code":"not_found","message":"missing"}"#),
            trailers: Metadata::new(),
        };
        let err = interceptor.on_response(&mut response).await.unwrap_err();
        assert_eq!(err.code(), connectrpc_axum_core::Code::NotFound);
        assert_eq!(err.message(), Some("missing"));
    }

    #[tokio::test]
    async fn end_stream_frame_with_no_error_completes_ok() {
        let mut interceptor = ConnectInterceptor::new(config());
        let mut frame = Bytes::from(br#"{"metadata":{}}"#.to_vec());
        let mut framed = vec![CONNECT_END_STREAM];
        framed.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        framed.extend_from_slice(&frame);
        let mut framed = Bytes::from(framed);
        interceptor.on_output(&mut framed).await.unwrap();
        frame = framed;
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
