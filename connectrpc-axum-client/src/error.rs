//! Client-side error type.
//!
//! [`ClientError`] is the single error type every public client API returns.
//! It mirrors [`connectrpc_axum_core::ConnectError`] but also carries the
//! lower-level wire errors (transport failures, envelope framing errors) that
//! can occur before a protocol interceptor has had a chance to turn them into
//! a status.

use connectrpc_axum_core::{Code, ConnectError, ErrorDetail, EnvelopeError, Metadata};

/// Every error a [`crate::ProtocolClient`] call can produce.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// A status the peer (or an interceptor) returned.
    #[error(transparent)]
    Rpc(#[from] ConnectError),

    /// The transport failed to perform the request (connect, TLS, I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// A message failed to encode before being sent.
    #[error("encode error: {0}")]
    Encode(String),

    /// A message failed to decode after being received.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame or header violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Build a status-shaped error directly.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        ClientError::Rpc(ConnectError::new(code, message))
    }

    /// Build a status-shaped error with just a code.
    pub fn from_code(code: Code) -> Self {
        ClientError::Rpc(ConnectError::from_code(code))
    }

    /// The status code for this error.
    ///
    /// Non-status variants map onto the code a caller would expect:
    /// transport failures are `Unavailable`, encode/decode failures are
    /// `Internal`, protocol violations are `Unknown` (the peer did send a
    /// response, it just wasn't one we could interpret).
    pub fn code(&self) -> Code {
        match self {
            ClientError::Rpc(err) => err.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Encode(_) | ClientError::Decode(_) => Code::Internal,
            ClientError::Protocol(_) => Code::Unknown,
        }
    }

    /// The human-readable message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            ClientError::Rpc(err) => err.message(),
            ClientError::Transport(msg)
            | ClientError::Encode(msg)
            | ClientError::Decode(msg)
            | ClientError::Protocol(msg) => Some(msg),
        }
    }

    /// Structured error details, if any (only `Rpc` carries these).
    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            ClientError::Rpc(err) => err.details(),
            _ => &[],
        }
    }

    /// Trailers/headers captured alongside this error, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            ClientError::Rpc(err) => err.metadata(),
            _ => None,
        }
    }

    /// Whether this error is transient and safe to retry.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    // Convenience constructors mirroring `ConnectError`'s.

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }
}

impl From<EnvelopeError> for ClientError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::UnpackTooShort { .. } => ClientError::Protocol(err.to_string()),
            EnvelopeError::CompressionRequired { .. } => ClientError::Protocol(err.to_string()),
            EnvelopeError::DecompressFailed(msg) => ClientError::Decode(msg),
            EnvelopeError::CompressFailed(msg) => ClientError::Encode(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_variant_reports_wrapped_code() {
        let err = ClientError::not_found("missing");
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), Some("missing"));
    }

    #[test]
    fn non_rpc_variants_map_to_sensible_codes() {
        assert_eq!(ClientError::Transport("x".into()).code(), Code::Unavailable);
        assert_eq!(ClientError::Encode("x".into()).code(), Code::Internal);
        assert_eq!(ClientError::Decode("x".into()).code(), Code::Internal);
        assert_eq!(ClientError::Protocol("x".into()).code(), Code::Unknown);
    }

    #[test]
    fn is_retryable_delegates_to_code() {
        assert!(ClientError::unavailable("down").is_retryable());
        assert!(!ClientError::not_found("missing").is_retryable());
    }

    #[test]
    fn envelope_errors_convert_by_kind() {
        let short = EnvelopeError::UnpackTooShort { expected: 5, actual: 2 };
        assert!(matches!(ClientError::from(short), ClientError::Protocol(_)));

        let decompress = EnvelopeError::DecompressFailed("bad gzip".into());
        assert!(matches!(ClientError::from(decompress), ClientError::Decode(_)));
    }
}
