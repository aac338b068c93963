//! Content digests and digest-accumulating writers.

use std::io::{self, Write};

use a3s_imgmod_core::error::{ModError, Result};
use sha2::{Digest, Sha256};

/// Algorithm prefix for canonical digests.
pub const SHA256_PREFIX: &str = "sha256:";

/// Compute the canonical `sha256:<hex>` digest of raw bytes.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize()))
}

/// Check that a digest has the `algorithm:encoded` shape and, for sha256,
/// a 64 character lowercase hex encoding.
pub fn validate_digest(digest: &str) -> Result<()> {
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(|| {
        ModError::OciImageError(format!("Invalid digest '{}': expected algorithm:hex", digest))
    })?;

    if algorithm.is_empty() || encoded.is_empty() {
        return Err(ModError::OciImageError(format!("Invalid digest '{}'", digest)));
    }

    if algorithm == "sha256"
        && (encoded.len() != 64
            || !encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)))
    {
        return Err(ModError::OciImageError(format!(
            "Invalid sha256 digest '{}'",
            digest
        )));
    }

    Ok(())
}

/// Transparent write observer.
///
/// Forwards every byte to the wrapped writer while feeding the bytes that
/// were actually accepted into a SHA-256 accumulator. Nest several around a
/// compressor to get compressed and uncompressed digests in one pass.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Digest of everything written so far.
    pub fn digest(&self) -> String {
        format!(
            "{}{}",
            SHA256_PREFIX,
            hex::encode(self.hasher.clone().finalize())
        )
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap into the inner writer, the digest, and the byte count.
    pub fn into_parts(self) -> (W, String, u64) {
        let digest = format!("{}{}", SHA256_PREFIX, hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_DIGEST: &str =
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_digest() {
        assert_eq!(sha256_digest(b"hello"), HELLO_DIGEST);
    }

    #[test]
    fn test_validate_digest() {
        assert!(validate_digest(HELLO_DIGEST).is_ok());
        assert!(validate_digest("sha512:abcd").is_ok());
        assert!(validate_digest("sha256:abc").is_err());
        assert!(validate_digest("sha256:").is_err());
        assert!(validate_digest("nocolon").is_err());
        assert!(validate_digest(
            "sha256:2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824"
        )
        .is_err());
    }

    #[test]
    fn test_digest_writer_passes_through() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"hel").unwrap();
        writer.write_all(b"lo").unwrap();
        assert_eq!(writer.bytes_written(), 5);
        assert_eq!(writer.digest(), HELLO_DIGEST);

        let (inner, digest, size) = writer.into_parts();
        assert_eq!(inner, b"hello");
        assert_eq!(digest, HELLO_DIGEST);
        assert_eq!(size, 5);
    }

    #[test]
    fn test_nested_writers_see_compressed_and_plain_bytes() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let raw = DigestWriter::new(Vec::new());
        let mut plain = DigestWriter::new(GzEncoder::new(raw, Compression::default()));
        plain.write_all(b"hello").unwrap();

        let (encoder, plain_digest, plain_size) = plain.into_parts();
        let raw = encoder.finish().unwrap();
        let (compressed, raw_digest, raw_size) = raw.into_parts();

        assert_eq!(plain_digest, HELLO_DIGEST);
        assert_eq!(plain_size, 5);
        assert_eq!(raw_size, compressed.len() as u64);
        assert_eq!(raw_digest, sha256_digest(&compressed));
        assert_ne!(raw_digest, plain_digest);
    }
}
