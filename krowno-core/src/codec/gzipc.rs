use std::io::{Read, Write};

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{KrownoError, Result};

/// Streaming gzip encoder over an arbitrary byte sink. The caller must
/// call `finish()` to flush the trailer.
pub fn encoder<W: Write>(sink: W) -> GzEncoder<W> {
    GzEncoder::new(sink, GzLevel::default())
}

/// Streaming gzip decoder over an arbitrary byte source.
pub fn decoder<R: Read>(source: R) -> GzDecoder<R> {
    GzDecoder::new(source)
}

/// Compress a whole buffer (used by the buffered encrypted path).
pub fn compress_all(input: &[u8]) -> Result<Vec<u8>> {
    let mut enc = encoder(Vec::new());
    enc.write_all(input)
        .map_err(|e| KrownoError::CompressionFailed(e.to_string()))?;
    enc.finish()
        .map_err(|e| KrownoError::CompressionFailed(e.to_string()))
}

/// Decompress a whole buffer.
pub fn decompress_all(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    decoder(input)
        .read_to_end(&mut out)
        .map_err(|e| KrownoError::DecompressionFailed(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_buffer_round_trip() {
        let data = b"a highly repetitive payload ".repeat(64);
        let packed = compress_all(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress_all(&packed).unwrap(), data);
    }

    #[test]
    fn plaintext_is_not_gzip() {
        assert!(matches!(
            decompress_all(b"definitely not gzip"),
            Err(KrownoError::DecompressionFailed(_))
        ));
    }
}
