//! Compression configuration types.
//!
//! This module provides configuration types for compression in ConnectRPC:
//! - [`CompressionEncoding`]: Supported compression algorithms
//! - [`CompressionLevel`]: Compression quality settings
//! - [`CompressionConfig`]: Server/client compression configuration

use crate::compression_codec::BoxedCompression;

#[cfg(feature = "compression-gzip")]
use crate::compression_codec::GzipCodec;

#[cfg(feature = "compression-deflate")]
use crate::compression_codec::DeflateCodec;

#[cfg(feature = "compression-br")]
use crate::compression_codec::BrotliCodec;

#[cfg(feature = "compression-zstd")]
use crate::compression_codec::ZstdCodec;

/// Supported compression encodings.
///
/// This enum is used for header parsing and negotiation.
/// Use [`CompressionEncoding::codec()`] to get the actual codec implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionEncoding {
    #[default]
    Identity,
    #[cfg(feature = "compression-gzip")]
    Gzip,
    #[cfg(feature = "compression-deflate")]
    Deflate,
    #[cfg(feature = "compression-br")]
    Brotli,
    #[cfg(feature = "compression-zstd")]
    Zstd,
}

impl CompressionEncoding {
    /// Parse from Content-Encoding or Connect-Content-Encoding header value.
    /// Returns None for unsupported encodings (caller should return Unimplemented).
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("identity") | Some("") => Some(Self::Identity),
            #[cfg(feature = "compression-gzip")]
            Some("gzip") => Some(Self::Gzip),
            #[cfg(feature = "compression-deflate")]
            Some("deflate") => Some(Self::Deflate),
            #[cfg(feature = "compression-br")]
            Some("br") => Some(Self::Brotli),
            #[cfg(feature = "compression-zstd")]
            Some("zstd") => Some(Self::Zstd),
            _ => None, // unsupported
        }
    }

    /// Get the header value string for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => "gzip",
            #[cfg(feature = "compression-deflate")]
            Self::Deflate => "deflate",
            #[cfg(feature = "compression-br")]
            Self::Brotli => "br",
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => "zstd",
        }
    }

    /// Returns true if this encoding is identity (no compression).
    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Get the codec for this encoding.
    ///
    /// Returns `None` for identity, `Some(BoxedCompression)` for others.
    pub fn codec(&self) -> Option<BoxedCompression> {
        match self {
            Self::Identity => None,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Some(BoxedCompression::new(GzipCodec::default())),
            #[cfg(feature = "compression-deflate")]
            Self::Deflate => Some(BoxedCompression::new(DeflateCodec::default())),
            #[cfg(feature = "compression-br")]
            Self::Brotli => Some(BoxedCompression::new(BrotliCodec::default())),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Some(BoxedCompression::new(ZstdCodec::default())),
        }
    }

    /// Get the codec for this encoding with the specified compression level.
    ///
    /// Returns `None` for identity, `Some(BoxedCompression)` for others.
    #[allow(unused_variables)]
    pub fn codec_with_level(&self, level: CompressionLevel) -> Option<BoxedCompression> {
        match self {
            Self::Identity => None,
            #[cfg(feature = "compression-gzip")]
            Self::Gzip => Some(BoxedCompression::new(GzipCodec::with_level(level_to_flate2(level)))),
            #[cfg(feature = "compression-deflate")]
            Self::Deflate => Some(BoxedCompression::new(DeflateCodec::with_level(level_to_flate2(level)))),
            #[cfg(feature = "compression-br")]
            Self::Brotli => Some(BoxedCompression::new(BrotliCodec::with_quality(level_to_brotli(
                level,
            )))),
            #[cfg(feature = "compression-zstd")]
            Self::Zstd => Some(BoxedCompression::new(ZstdCodec::with_level(level_to_zstd(level)))),
        }
    }
}

/// Compression level configuration.
///
/// This is a local definition that doesn't depend on tower-http,
/// making it suitable for use in both client and server contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Fastest compression (lowest ratio).
    Fastest,
    /// Best compression (highest ratio, slowest).
    Best,
    /// Default compression level for each algorithm.
    #[default]
    Default,
    /// Precise compression level (algorithm-specific value).
    Precise(u32),
}

impl CompressionLevel {
    /// Create a compression level with a precise value.
    ///
    /// The value interpretation is algorithm-specific:
    /// - gzip/deflate: 0-9 (0=no compression, 9=best)
    /// - brotli: 0-11 (0=fastest, 11=best)
    /// - zstd: 1-22 (1=fastest, 22=best)
    pub fn precise(level: u32) -> Self {
        CompressionLevel::Precise(level)
    }
}

/// Convert CompressionLevel to flate2 gzip level (0-9).
///
/// Matches tower-http → async_compression behavior:
/// - `Fastest` → 1
/// - `Best` → 9
/// - `Default` → 6
/// - `Precise(n)` → n clamped to 0-9
#[cfg(any(feature = "compression-gzip", feature = "compression-deflate"))]
fn level_to_flate2(level: CompressionLevel) -> u32 {
    match level {
        CompressionLevel::Fastest => 1,
        CompressionLevel::Best => 9,
        CompressionLevel::Default => 6,
        CompressionLevel::Precise(n) => n.clamp(0, 9),
    }
}

/// Convert CompressionLevel to brotli quality (0-11).
///
/// tower-http overrides Default to 4 (NGINX default) for performance.
#[cfg(feature = "compression-br")]
fn level_to_brotli(level: CompressionLevel) -> u32 {
    match level {
        CompressionLevel::Fastest => 0,
        CompressionLevel::Best => 11,
        CompressionLevel::Default => 4, // tower-http's custom default
        CompressionLevel::Precise(n) => n.clamp(0, 11),
    }
}

/// Convert CompressionLevel to zstd level (1-22).
#[cfg(feature = "compression-zstd")]
fn level_to_zstd(level: CompressionLevel) -> i32 {
    match level {
        CompressionLevel::Fastest => 1,
        CompressionLevel::Best => 22,
        CompressionLevel::Default => 3,
        CompressionLevel::Precise(n) => (n as i32).clamp(1, 22),
    }
}

/// Compression configuration.
///
/// Used to configure compression behavior for both client and server.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Minimum bytes before compression is applied.
    /// Default is 0 (compress everything), matching connect-go behavior.
    /// Messages smaller than this threshold are sent uncompressed.
    pub min_bytes: usize,
    /// Compression level/quality.
    pub level: CompressionLevel,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_bytes: 0,
            level: CompressionLevel::Default,
        }
    }
}

impl CompressionConfig {
    /// Create a new compression config with the specified minimum bytes threshold.
    pub fn new(min_bytes: usize) -> Self {
        Self {
            min_bytes,
            level: CompressionLevel::Default,
        }
    }

    /// Set the compression level.
    pub fn level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Disable compression by setting threshold to usize::MAX.
    pub fn disabled() -> Self {
        Self {
            min_bytes: usize::MAX,
            level: CompressionLevel::Default,
        }
    }

    /// Check if compression is effectively disabled.
    pub fn is_disabled(&self) -> bool {
        self.min_bytes == usize::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_encoding_from_header_identity() {
        assert_eq!(
            CompressionEncoding::from_header(None),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("")),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(
            CompressionEncoding::from_header(Some("identity")),
            Some(CompressionEncoding::Identity)
        );
        assert_eq!(CompressionEncoding::from_header(Some("lz4")), None);
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_compression_encoding_from_header_gzip() {
        assert_eq!(
            CompressionEncoding::from_header(Some("gzip")),
            Some(CompressionEncoding::Gzip)
        );
    }

    #[test]
    fn test_compression_encoding_as_str_identity() {
        assert_eq!(CompressionEncoding::Identity.as_str(), "identity");
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_compression_encoding_as_str_gzip() {
        assert_eq!(CompressionEncoding::Gzip.as_str(), "gzip");
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_compression_encoding_codec() {
        assert!(CompressionEncoding::Identity.codec().is_none());
        let codec = CompressionEncoding::Gzip.codec();
        assert!(codec.is_some());
        assert_eq!(codec.unwrap().name(), "gzip");
    }

    #[test]
    fn test_compression_level_precise() {
        assert_eq!(CompressionLevel::precise(5), CompressionLevel::Precise(5));
    }

    #[test]
    fn test_compression_config_default() {
        let config = CompressionConfig::default();
        assert_eq!(config.min_bytes, 0);
        assert_eq!(config.level, CompressionLevel::Default);
    }

    #[test]
    fn test_compression_config_new() {
        let config = CompressionConfig::new(512);
        assert_eq!(config.min_bytes, 512);
    }

    #[test]
    fn test_compression_config_disabled() {
        let config = CompressionConfig::disabled();
        assert_eq!(config.min_bytes, usize::MAX);
        assert!(config.is_disabled());
    }
}
