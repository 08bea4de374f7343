//! Chunk compression with an entropy gate.

use crate::error::CompressionError;

/// Payloads shorter than this are never compressed.
pub const MIN_COMPRESS_LEN: usize = 1024;

/// Payloads above this byte entropy (bits/byte) are treated as incompressible.
pub const MAX_COMPRESSIBLE_ENTROPY: f64 = 7.0;

/// zstd compression level.
pub const COMPRESSION_LEVEL: i32 = 3;

/// Shannon entropy of `data` in bits per byte (0.0 for empty input).
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Whether `data` is worth compressing.
///
/// False under [`MIN_COMPRESS_LEN`] bytes and for data whose entropy exceeds
/// [`MAX_COMPRESSIBLE_ENTROPY`] (already compressed or encrypted).
pub fn should_compress(data: &[u8]) -> bool {
    data.len() >= MIN_COMPRESS_LEN && shannon_entropy(data) <= MAX_COMPRESSIBLE_ENTROPY
}

/// Compress `data`.
///
/// Returns `None` when compression fails or does not make the data smaller;
/// the caller then sends the raw bytes.
pub fn compress(data: &[u8]) -> Option<Vec<u8>> {
    match zstd::bulk::compress(data, COMPRESSION_LEVEL) {
        Ok(compressed) if compressed.len() < data.len() => Some(compressed),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(len = data.len(), error = %e, "compression failed, sending raw");
            None
        }
    }
}

/// Decompress `data` that is expected to decode to exactly `expected_len` bytes.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CompressionError> {
    let decoded = zstd::bulk::decompress(data, expected_len).map_err(CompressionError::Corrupt)?;
    if decoded.len() != expected_len {
        return Err(CompressionError::LengthMismatch {
            expected: expected_len,
            actual: decoded.len(),
        });
    }
    Ok(decoded)
}
