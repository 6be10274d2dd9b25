//! Length-prefixed envelope framing shared by Connect streaming, gRPC and gRPC-Web.
//!
//! Wire form: `flags(1) || length(4, big-endian) || payload(length)`.

use bytes::Bytes;

use crate::compression_codec::BoxedCompression;

/// Flag bits understood by the generic envelope codec.
///
/// Bit `0x02` (Connect streaming's own end-stream marker) is a protocol-specific
/// convention interpreted by the Connect interceptor, not by this module.
pub mod envelope_flags {
    /// Payload is compressed.
    pub const COMPRESSED: u8 = 0x01;
    /// Frame carries end-of-stream trailers (gRPC-Web).
    pub const END_STREAM: u8 = 0x80;
}

/// Size of the envelope header: 1 flags byte + 4 big-endian length bytes.
pub const ENVELOPE_HEADER_SIZE: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope too short: expected at least {expected} bytes, got {actual}")]
    UnpackTooShort { expected: usize, actual: usize },
    #[error("frame flags 0x{flags:02x} set the compressed bit but no compression pool was configured")]
    CompressionRequired { flags: u8 },
    #[error("failed to decompress envelope payload: {0}")]
    DecompressFailed(String),
    #[error("failed to compress envelope payload: {0}")]
    CompressFailed(String),
}

/// Packs `payload` into an envelope, compressing it first when `compression` is
/// present and the payload meets its size threshold.
pub fn pack(payload: &[u8], compression: Option<(&BoxedCompression, usize)>) -> Result<Bytes, EnvelopeError> {
    let (body, flags): (Bytes, u8) = match compression {
        Some((codec, min_bytes)) if payload.len() >= min_bytes => {
            let compressed = codec
                .compress(payload)
                .map_err(|e| EnvelopeError::CompressFailed(e.to_string()))?;
            (compressed, envelope_flags::COMPRESSED)
        }
        _ => (Bytes::copy_from_slice(payload), 0),
    };

    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_SIZE + body.len());
    frame.push(flags);
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(Bytes::from(frame))
}

/// Reads the header of `frame` and returns `(flags, payload)`.
pub fn unpack(frame: &[u8], compression_pool: Option<&BoxedCompression>) -> Result<(u8, Bytes), EnvelopeError> {
    if frame.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::UnpackTooShort {
            expected: ENVELOPE_HEADER_SIZE,
            actual: frame.len(),
        });
    }
    let flags = frame[0];
    let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    if frame.len() < ENVELOPE_HEADER_SIZE + length {
        return Err(EnvelopeError::UnpackTooShort {
            expected: ENVELOPE_HEADER_SIZE + length,
            actual: frame.len(),
        });
    }
    let body = &frame[ENVELOPE_HEADER_SIZE..ENVELOPE_HEADER_SIZE + length];

    if flags & envelope_flags::COMPRESSED != 0 {
        let codec = compression_pool.ok_or(EnvelopeError::CompressionRequired { flags })?;
        let decompressed = codec
            .decompress(body)
            .map_err(|e| EnvelopeError::DecompressFailed(e.to_string()))?;
        Ok((flags, decompressed))
    } else {
        Ok((flags, Bytes::copy_from_slice(body)))
    }
}

/// Reads the 4-byte big-endian length prefix without consuming the payload.
///
/// Used to slice multi-chunk gRPC-Web response bodies into a message frame
/// followed by a trailers frame.
pub fn message_length(frame: &[u8]) -> Result<u32, EnvelopeError> {
    if frame.len() < ENVELOPE_HEADER_SIZE {
        return Err(EnvelopeError::UnpackTooShort {
            expected: ENVELOPE_HEADER_SIZE,
            actual: frame.len(),
        });
    }
    Ok(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_uncompressed_sets_no_flags() {
        let frame = pack(b"hello", None).unwrap();
        assert_eq!(frame[0], 0);
        let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        assert_eq!(length as usize, 5);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn pack_then_unpack_round_trips_payload_and_flags() {
        let frame = pack(b"round trip me", None).unwrap();
        let (flags, body) = unpack(&frame, None).unwrap();
        assert_eq!(flags, 0);
        assert_eq!(&body[..], b"round trip me");
    }

    #[test]
    fn unpack_too_short_header() {
        let err = unpack(&[0x00, 0x00, 0x00], None).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnpackTooShort { .. }));
    }

    #[test]
    fn unpack_too_short_body() {
        // header says length=10 but only 2 bytes of payload follow
        let mut frame = vec![0x00];
        frame.extend_from_slice(&10u32.to_be_bytes());
        frame.extend_from_slice(b"ab");
        let err = unpack(&frame, None).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnpackTooShort { .. }));
    }

    #[test]
    fn unpack_compressed_without_pool_is_an_error() {
        let mut frame = vec![envelope_flags::COMPRESSED];
        frame.extend_from_slice(&3u32.to_be_bytes());
        frame.extend_from_slice(b"abc");
        let err = unpack(&frame, None).unwrap_err();
        assert!(matches!(err, EnvelopeError::CompressionRequired { .. }));
    }

    #[test]
    fn message_length_reads_header_without_consuming_payload() {
        let frame = pack(b"0123456789", None).unwrap();
        assert_eq!(message_length(&frame).unwrap(), 10);
    }

    #[test]
    fn end_stream_bit_is_the_high_bit() {
        let mut frame = vec![envelope_flags::END_STREAM];
        frame.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(frame[0] & envelope_flags::END_STREAM, envelope_flags::END_STREAM);
        assert_eq!(frame[0] & envelope_flags::COMPRESSED, 0);
    }
}
