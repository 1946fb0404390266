use flate2::read::GzDecoder;
use std::fmt::Debug;
use std::io;
use std::io::Read;

/// Decodes response bodies for a single `content-encoding`.
pub trait Decompressor: Debug + Send + Sync {
    /// the `content-encoding` token this decompressor handles
    fn encoding(&self) -> &'static str;

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn encoding(&self) -> &'static str {
        "gzip"
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_round_trip() {
        let compressed = gzip(b"hello hello hello");
        assert_ne!(compressed.as_slice(), b"hello hello hello");
        assert_eq!(GzipDecompressor.decompress(&compressed).unwrap(), b"hello hello hello");
    }

    #[test]
    fn test_corrupt_input() {
        assert!(GzipDecompressor.decompress(b"definitely not gzip").is_err());
    }
}
