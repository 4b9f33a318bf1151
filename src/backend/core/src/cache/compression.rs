//! Gzip helpers for large cache values.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{ErrorCode, Result, TransflowError};

/// Gzip-compress a byte slice.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| {
            TransflowError::with_internal(ErrorCode::CompressionFailed, "Failed to compress value", e.to_string())
        })
}

/// Decompress a gzip stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out).map_err(|e| {
        TransflowError::with_internal(ErrorCode::CompressionFailed, "Failed to decompress value", e.to_string())
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_shrinks_repetitive_text() {
        let text = "La traducción automática necesita revisión humana. ".repeat(200);
        let packed = compress(text.as_bytes()).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(decompress(&packed).unwrap(), text.as_bytes());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let err = decompress(b"plainly not gzip").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CompressionFailed);
    }
}
