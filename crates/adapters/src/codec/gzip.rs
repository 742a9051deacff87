//! Gzip helpers for request and response bodies.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use metricsd_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::io::{Read, Write};

/// Upper bound on a decompressed body.
pub const MAX_DECOMPRESSED_BYTES: u64 = 32 * 1024 * 1024;

/// Gzip-compress `body`.
pub fn compress(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body).map_err(compress_error)?;
    encoder.finish().map_err(compress_error)
}

/// Decompress a gzip body. Corrupt or oversized input is invalid input.
pub fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut decoder = GzDecoder::new(body).take(MAX_DECOMPRESSED_BYTES + 1);
    decoder.read_to_end(&mut output).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("invalid gzip body: {error}"),
        )
    })?;
    if output.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            "decompressed body too large",
        )
        .with_metadata("limitBytes", MAX_DECOMPRESSED_BYTES.to_string()));
    }
    Ok(output)
}

fn compress_error(error: std::io::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::internal(),
        format!("gzip compression failed: {error}"),
        ErrorClass::NonRetriable,
    )
}
