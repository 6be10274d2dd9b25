//! Protocol interceptors: one per wire protocol, each implementing both
//! [`UnaryInterceptor`] and [`StreamInterceptor`] so the facade can build a
//! chain without knowing which protocol it's speaking.
//!
//! Shared helpers live here; the framing and status-mapping rules specific
//! to one protocol live in that protocol's own module.

mod connect;
mod grpc;
mod grpc_web;

use std::time::Duration;

use bytes::Bytes;
use connectrpc_axum_core::{envelope, Code, ConnectError, EnvelopeError, Metadata};

use crate::config::{Protocol, ProtocolClientConfig, RequestCompressionConfig};
use crate::error::ClientError;
use crate::interceptor::{StreamInterceptor, UnaryInterceptor};

use std::sync::Arc;

/// Builds the protocol interceptor for one unary call, selected by `config.protocol`.
pub(crate) fn build_unary(config: &Arc<ProtocolClientConfig>) -> Box<dyn UnaryInterceptor> {
    match config.protocol {
        Protocol::Connect => Box::new(connect::ConnectInterceptor::new(config.clone())),
        Protocol::Grpc => Box::new(grpc::GrpcInterceptor::new(config.clone())),
        Protocol::GrpcWeb => Box::new(grpc_web::GrpcWebInterceptor::new(config.clone())),
    }
}

/// Builds the protocol interceptor for one stream, selected by `config.protocol`.
pub(crate) fn build_stream(config: &Arc<ProtocolClientConfig>) -> Box<dyn StreamInterceptor> {
    match config.protocol {
        Protocol::Connect => Box::new(connect::ConnectInterceptor::new(config.clone())),
        Protocol::Grpc => Box::new(grpc::GrpcInterceptor::new(config.clone())),
        Protocol::GrpcWeb => Box::new(grpc_web::GrpcWebInterceptor::new(config.clone())),
    }
}

/// Packs `payload` into an envelope, compressing it first when the
/// client-wide request compression config applies and the payload clears its
/// minimum size.
pub(crate) fn pack_with_compression(
    payload: &[u8],
    compression: Option<&RequestCompressionConfig>,
) -> Result<Bytes, EnvelopeError> {
    let compression = compression.filter(|c| payload.len() >= c.min_bytes);
    let pool = compression.and_then(|c| c.encoding.codec());
    envelope::pack(payload, pool.as_ref().zip(compression).map(|(p, c)| (p, c.min_bytes)))
}

/// Resolves the codec to decompress a response encoded with wire name `name`,
/// per the client's accepted compressions. `"identity"` (or empty) resolves
/// to no codec; anything else not in the accepted list is a protocol error,
/// since it means the peer used an encoding we never advertised accepting.
pub(crate) fn negotiate_response_pool(
    config: &ProtocolClientConfig,
    name: &str,
) -> Result<Option<connectrpc_axum_core::BoxedCompression>, ClientError> {
    if name.is_empty() || name == "identity" {
        return Ok(None);
    }
    config
        .response_compression_pool(name)
        .map(Some)
        .ok_or_else(|| ClientError::unimplemented(format!("unsupported response compression {name}")))
}

/// Builds a [`ClientError`] from `grpc-status`/`grpc-message`/`grpc-status-details-bin`
/// carried in `trailers`. Returns `None` when the status is `Ok`.
///
/// Shared by gRPC (real HTTP trailers) and gRPC-Web (trailers synthesized
/// from the final enveloped frame's header-block payload).
pub(crate) fn status_error_from_metadata(trailers: &Metadata) -> Option<ClientError> {
    let status = trailers
        .get("grpc-status")
        .and_then(|s| s.parse::<i32>().ok())
        .and_then(Code::from_i32)
        .unwrap_or(Code::Unknown);
    if status == Code::Ok {
        return None;
    }
    let message = trailers.get("grpc-message").map(|s| s.to_string());
    let mut err = match message {
        Some(msg) => ConnectError::new(status, msg),
        None => ConnectError::from_code(status),
    };
    if let Some(Ok(bytes)) = trailers.get_bin("grpc-status-details-bin") {
        if !bytes.is_empty() {
            // google.rpc.Status-encoded protobuf; callers that carry prost-types
            // for google.rpc.Status can decode this further themselves.
            err = err.add_detail("grpc.status.details.bin", bytes);
        }
    }
    err = err.with_metadata(trailers.clone());
    Some(ClientError::Rpc(err))
}

/// Parses an HTTP/1.1-style header block (`key: value[, value2]` lines) into
/// [`Metadata`], one line per key and one comma-separated value per
/// [`Metadata`] entry (leading single space stripped from each).
///
/// Used to read gRPC-Web's synthesized trailers, which ride in-band as the
/// payload of the envelope's end-of-stream frame rather than as real HTTP
/// trailers.
pub(crate) fn parse_trailer_block(bytes: &[u8]) -> Metadata {
    let mut metadata = Metadata::new();
    for line in String::from_utf8_lossy(bytes).lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            for part in value.trim_end().split(',') {
                let part = part.strip_prefix(' ').unwrap_or(part);
                metadata.insert(key, part);
            }
        }
    }
    metadata
}

/// Encodes a [`Duration`] as a gRPC timeout header value (`<digits><unit>`,
/// where unit is one of H/M/S/m/u/n). We only ever emit milliseconds or
/// seconds, which is plenty of precision for a client-side deadline.
pub(crate) fn encode_grpc_timeout(timeout: Duration) -> String {
    let millis = timeout.as_millis();
    if millis <= 99_999_999 {
        format!("{millis}m")
    } else {
        format!("{}S", timeout.as_secs().min(99_999_999))
    }
}

/// The Connect unary fallback table (§4.4), used only when a non-200
/// response body doesn't parse as the expected JSON error shape.
pub(crate) fn code_from_http_status(status: u16) -> Code {
    match status {
        400 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        408 => Code::DeadlineExceeded,
        409 => Code::AlreadyExists,
        412 => Code::FailedPrecondition,
        413 => Code::ResourceExhausted,
        416 => Code::OutOfRange,
        429 => Code::ResourceExhausted,
        431 => Code::ResourceExhausted,
        499 => Code::Canceled,
        500 => Code::Internal,
        501 => Code::Unimplemented,
        502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

/// The gRPC/gRPC-Web fallback table (§4.5), distinct from Connect's: used
/// when a unary response arrives with a non-200 HTTP status and no
/// `grpc-status` trailer to read instead (a proxy or load balancer rejected
/// the request before it ever reached the gRPC handler).
pub(crate) fn code_from_grpc_http_status(status: u16) -> Code {
    match status {
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 => Code::Unavailable,
        502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connectrpc_axum_core::CompressionEncoding;

    #[test]
    fn grpc_timeout_encodes_as_milliseconds_under_the_digit_limit() {
        assert_eq!(encode_grpc_timeout(Duration::from_millis(10)), "10m");
        assert_eq!(encode_grpc_timeout(Duration::from_secs(5)), "5000m");
    }

    #[test]
    fn grpc_timeout_falls_back_to_seconds_past_the_digit_limit() {
        let huge = Duration::from_millis(100_000_000);
        assert_eq!(encode_grpc_timeout(huge), format!("{}S", huge.as_secs()));
    }

    #[test]
    fn trailer_block_parses_key_value_lines_and_skips_blanks() {
        let trailers = parse_trailer_block(b"grpc-status: 0\r\n\r\ngrpc-message: ok\r\n");
        assert_eq!(trailers.get("grpc-status"), Some("0"));
        assert_eq!(trailers.get("grpc-message"), Some("ok"));
    }

    #[test]
    fn trailer_block_ignores_lines_without_a_colon() {
        let trailers = parse_trailer_block(b"not-a-header-line\r\ngrpc-status: 0\r\n");
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers.get("grpc-status"), Some("0"));
    }

    #[test]
    fn trailer_block_splits_comma_separated_values_into_multiple_entries() {
        let trailers = parse_trailer_block(b"x-custom-trailer: v1, v2\r\n");
        assert_eq!(trailers.get_all("x-custom-trailer"), &["v1".to_string(), "v2".to_string()]);
    }

    #[test]
    fn status_error_from_metadata_is_none_for_ok() {
        let mut trailers = Metadata::new();
        trailers.insert("grpc-status", "0");
        assert!(status_error_from_metadata(&trailers).is_none());
    }

    #[test]
    fn status_error_from_metadata_defaults_to_unknown_without_a_status() {
        let err = status_error_from_metadata(&Metadata::new()).unwrap();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[test]
    fn connect_and_grpc_status_tables_disagree_on_404_and_429() {
        // Connect maps a bare 404/429 to NotFound/ResourceExhausted; gRPC (and
        // gRPC-Web) map the same statuses to Unimplemented/Unavailable, since a
        // gRPC server never produces a 404 or 429 itself -- only a proxy in
        // front of one does.
        assert_eq!(code_from_http_status(404), Code::NotFound);
        assert_eq!(code_from_grpc_http_status(404), Code::Unimplemented);
        assert_eq!(code_from_http_status(429), Code::ResourceExhausted);
        assert_eq!(code_from_grpc_http_status(429), Code::Unavailable);
    }

    #[test]
    fn pack_with_compression_leaves_identity_payloads_uncompressed() {
        let config = RequestCompressionConfig::new(CompressionEncoding::Identity).min_bytes(0);
        let packed = pack_with_compression(b"small", Some(&config)).unwrap();
        let (flags, payload) = envelope::unpack(&packed, None).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(&payload[..], b"small");
    }
}
