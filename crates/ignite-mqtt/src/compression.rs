//! Optional gzip compression of MQTT publish payloads (`MQTT.compression`,
//! spec §4.9). A compression failure aborts the current cycle's publish and
//! leaves the rows unpublished for the next cycle rather than sending an
//! uncompressed payload the broker doesn't expect.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip-compress `payload` at the default compression level.
pub fn gzip(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn gzip_roundtrips_via_decoder() {
        let original = b"[{\"eventId\":\"Speed\"}]";
        let compressed = gzip(original).unwrap();
        assert_ne!(compressed, original);

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, original);
    }
}
