//! Named compression strategies and the registry that selects them.
//!
//! Implementations:
//! - [`GzipCompressor`]: gzip (feature `compression-gzip`, on by default)
//! - [`DeflateCompressor`]: zlib-wrapped deflate (feature `compression-deflate`)
//! - [`BrotliCompressor`]: brotli (feature `compression-br`)
//! - [`ZstdCompressor`]: zstd (feature `compression-zstd`)
//!
//! A [`CompressionRegistry`] lists every name a side is willing to accept. The
//! name a side *sends* with is configured separately, so a peer may accept an
//! encoding it never produces.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::EnvelopeError;

#[cfg(any(feature = "compression-gzip", feature = "compression-deflate"))]
use std::io::Write;

/// The encoding name meaning "no compression".
pub const IDENTITY: &str = "identity";

/// A per-message compression strategy.
///
/// Strategies are stateless: every call builds its own encoder or decoder,
/// so a single instance is shared by all connections.
///
/// ```ignore
/// struct Lz4;
///
/// impl Compressor for Lz4 {
///     fn name(&self) -> &str { "lz4" }
///     fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> { /* ... */ }
///     fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> { /* ... */ }
/// }
/// ```
pub trait Compressor: Send + Sync + 'static {
    /// The encoding name used in headers (e.g. "gzip").
    fn name(&self) -> &str;

    /// Compress a whole message.
    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>>;

    /// A reader yielding the decompressed form of `data`.
    fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>>;
}

/// A shared, type-erased compressor.
#[derive(Clone)]
pub struct BoxedCompressor(Arc<dyn Compressor>);

impl BoxedCompressor {
    pub fn new<C: Compressor>(compressor: C) -> Self {
        BoxedCompressor(Arc::new(compressor))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Compress data, mapping failures to a framing error.
    pub fn compress(&self, data: &[u8]) -> Result<Bytes, EnvelopeError> {
        self.0
            .compress(data)
            .map(Bytes::from)
            .map_err(|e| EnvelopeError::Compression(e.to_string()))
    }

    /// Decompress data, refusing to buffer more than `read_max` bytes.
    ///
    /// When the limit is exceeded the rest of the stream is drained without
    /// buffering so the error can report the full decoded size.
    pub fn decompress(&self, data: &[u8], read_max: Option<usize>) -> Result<Bytes, EnvelopeError> {
        let decompression = |e: io::Error| EnvelopeError::Decompression(e.to_string());
        let mut decoder = self.0.decoder(data).map_err(decompression)?;
        let mut out = Vec::new();
        match read_max {
            None => {
                decoder.read_to_end(&mut out).map_err(decompression)?;
            }
            Some(max) => {
                let read = decoder
                    .by_ref()
                    .take(max as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(decompression)?;
                if read > max {
                    let rest = io::copy(&mut decoder, &mut io::sink()).map_err(decompression)?;
                    return Err(EnvelopeError::TooLarge {
                        size: read + rest as usize,
                        max,
                    });
                }
            }
        }
        Ok(Bytes::from(out))
    }
}

impl std::fmt::Debug for BoxedCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCompressor").field(&self.name()).finish()
    }
}

/// Gzip compression using flate2.
#[cfg(feature = "compression-gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

#[cfg(feature = "compression-gzip")]
impl Default for GzipCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-gzip")]
impl GzipCompressor {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "compression-gzip")]
impl Compressor for GzipCompressor {
    fn name(&self) -> &str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(flate2::read::GzDecoder::new(data)))
    }
}

/// Deflate in the zlib container (RFC 1950), as HTTP's "deflate" means.
#[cfg(feature = "compression-deflate")]
#[derive(Debug, Clone, Copy)]
pub struct DeflateCompressor {
    pub level: u32,
}

#[cfg(feature = "compression-deflate")]
impl Default for DeflateCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "compression-deflate")]
impl Compressor for DeflateCompressor {
    fn name(&self) -> &str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(self.level));
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(flate2::read::ZlibDecoder::new(data)))
    }
}

/// Brotli compression.
#[cfg(feature = "compression-br")]
#[derive(Debug, Clone, Copy)]
pub struct BrotliCompressor {
    /// Quality (0-11). Default is 4.
    pub quality: u32,
}

#[cfg(feature = "compression-br")]
impl Default for BrotliCompressor {
    fn default() -> Self {
        Self { quality: 4 }
    }
}

#[cfg(feature = "compression-br")]
impl Compressor for BrotliCompressor {
    fn name(&self) -> &str {
        "br"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut output = Vec::new();
        let params = brotli::enc::BrotliEncoderParams {
            quality: self.quality as i32,
            ..Default::default()
        };
        brotli::enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
        Ok(output)
    }

    fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(brotli::Decompressor::new(data, 4096)))
    }
}

/// Zstd compression.
#[cfg(feature = "compression-zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    /// Level (1-22). Default is 3.
    pub level: i32,
}

#[cfg(feature = "compression-zstd")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "compression-zstd")]
impl Compressor for ZstdCompressor {
    fn name(&self) -> &str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        zstd::bulk::compress(data, self.level)
    }

    fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
        Ok(Box::new(zstd::Decoder::new(data)?))
    }
}

/// A name that is not in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownCompression(pub String);

/// Ordered, read-only-after-setup table of compressors keyed by name.
#[derive(Clone, Debug, Default)]
pub struct CompressionRegistry {
    entries: Vec<BoxedCompressor>,
}

impl CompressionRegistry {
    /// An empty registry: only identity is understood.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry both sides start from: gzip when the feature is enabled.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "compression-gzip")]
        registry.register(GzipCompressor::default());
        registry
    }

    /// Register a compressor, replacing any previous one with the same name.
    pub fn register<C: Compressor>(&mut self, compressor: C) -> &mut Self {
        self.insert(BoxedCompressor::new(compressor))
    }

    pub fn insert(&mut self, compressor: BoxedCompressor) -> &mut Self {
        self.entries.retain(|c| c.name() != compressor.name());
        self.entries.push(compressor);
        self
    }

    /// Stop accepting an encoding.
    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.entries.retain(|c| c.name() != name);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BoxedCompressor> {
        self.entries.iter().find(|c| c.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|c| c.name())
    }

    /// Names joined with `,`, the form used in accept-encoding headers and errors.
    pub fn comma_separated_names(&self) -> String {
        self.names().collect::<Vec<_>>().join(",")
    }

    /// Resolve a declared encoding. Identity (or no header) yields `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Option<BoxedCompressor>, UnknownCompression> {
        match name.map(str::trim) {
            None | Some("") | Some(IDENTITY) => Ok(None),
            Some(name) => self
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| UnknownCompression(name.to_owned())),
        }
    }

    /// Pick the first acceptable encoding from an accept-encoding header value.
    ///
    /// Entries with `q=0` are skipped; otherwise client order wins.
    pub fn negotiate(&self, accept: Option<&str>) -> Option<BoxedCompressor> {
        let accept = accept?;
        for token in accept.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let (encoding, q_value) = match token.split_once(';') {
                Some((enc, params)) => {
                    let q = params.split(';').find_map(|p| p.trim().strip_prefix("q="));
                    (enc.trim(), q)
                }
                None => (token, None),
            };

            if let Some(q) = q_value {
                if q.trim().parse::<f32>().is_ok_and(|q| q == 0.0) {
                    continue;
                }
            }

            if encoding == IDENTITY {
                return None;
            }
            if let Some(compressor) = self.get(encoding) {
                return Some(compressor.clone());
            }
        }
        None
    }
}

/// When outbound messages get compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Messages smaller than this are sent uncompressed. Default 0.
    pub min_bytes: usize,
}

impl CompressionConfig {
    pub fn new(min_bytes: usize) -> Self {
        Self { min_bytes }
    }

    /// Never compress.
    pub fn disabled() -> Self {
        Self {
            min_bytes: usize::MAX,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.min_bytes == usize::MAX
    }

    /// Whether a payload of `len` bytes should be compressed.
    pub fn should_compress(&self, len: usize) -> bool {
        !self.is_disabled() && len >= self.min_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl Compressor for Reverse {
        fn name(&self) -> &str {
            "reverse"
        }

        fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
            Ok(data.iter().rev().copied().collect())
        }

        fn decoder<'a>(&self, data: &'a [u8]) -> io::Result<Box<dyn Read + 'a>> {
            Ok(Box::new(io::Cursor::new(
                data.iter().rev().copied().collect::<Vec<_>>(),
            )))
        }
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = CompressionRegistry::new();
        registry.register(Reverse);
        assert!(registry.resolve(None).unwrap().is_none());
        assert!(registry.resolve(Some("identity")).unwrap().is_none());
        assert_eq!(registry.resolve(Some("reverse")).unwrap().unwrap().name(), "reverse");
        assert_eq!(
            registry.resolve(Some("invalid")).unwrap_err(),
            UnknownCompression("invalid".into())
        );
    }

    #[test]
    fn test_registry_replace_and_remove() {
        let mut registry = CompressionRegistry::new();
        registry.register(Reverse).register(Reverse);
        assert_eq!(registry.comma_separated_names(), "reverse");
        registry.remove("reverse");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_custom_compressor_round_trip() {
        let c = BoxedCompressor::new(Reverse);
        let packed = c.compress(b"abc").unwrap();
        assert_eq!(&packed[..], b"cba");
        assert_eq!(&c.decompress(&packed, None).unwrap()[..], b"abc");
    }

    #[test]
    fn test_decompress_limit_reports_full_size() {
        let c = BoxedCompressor::new(Reverse);
        let packed = c.compress(&[7u8; 20]).unwrap();
        assert_eq!(c.decompress(&packed, Some(20)).unwrap().len(), 20);
        match c.decompress(&packed, Some(19)) {
            Err(EnvelopeError::TooLarge { size, max }) => {
                assert_eq!(size, 20);
                assert_eq!(max, 19);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_compression_config_threshold() {
        let config = CompressionConfig::new(8);
        assert!(!config.should_compress(4));
        assert!(config.should_compress(8));
        assert!(CompressionConfig::default().should_compress(0));
        assert!(!CompressionConfig::disabled().should_compress(1 << 20));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_round_trip() {
        let registry = CompressionRegistry::with_defaults();
        let gzip = registry.get("gzip").unwrap();
        let data = b"hello hello hello hello".repeat(10);
        let packed = gzip.compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(gzip.decompress(&packed, None).unwrap(), Bytes::from(data));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_corrupt_input() {
        let gzip = BoxedCompressor::new(GzipCompressor::default());
        let err = gzip.decompress(b"not gzip", None).unwrap_err();
        assert!(matches!(err, EnvelopeError::Decompression(_)));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_negotiate() {
        let registry = CompressionRegistry::with_defaults();
        assert!(registry.negotiate(None).is_none());
        assert!(registry.negotiate(Some("")).is_none());
        assert_eq!(registry.negotiate(Some("gzip")).unwrap().name(), "gzip");
        assert_eq!(registry.negotiate(Some("br, gzip")).unwrap().name(), "gzip");
        assert!(registry.negotiate(Some("gzip;q=0")).is_none());
        assert!(registry.negotiate(Some("gzip;q=0.0, identity")).is_none());
        assert_eq!(registry.negotiate(Some("gzip;q=0.5")).unwrap().name(), "gzip");
        assert!(registry.negotiate(Some("identity, gzip")).is_none());
    }

    #[cfg(feature = "compression-deflate")]
    #[test]
    fn test_deflate_round_trip() {
        let c = BoxedCompressor::new(DeflateCompressor::default());
        let packed = c.compress(b"deflate me").unwrap();
        assert_eq!(&c.decompress(&packed, None).unwrap()[..], b"deflate me");
    }
}
