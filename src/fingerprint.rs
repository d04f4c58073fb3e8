//! Coarse colour-histogram fingerprints and their bitwise similarity.
//!
//! An image is reduced to an 8x8 RGB thumbnail, each channel is bucketed into
//! eight bins, and the 24 bin counts are written out as one run of decimal
//! digits (no separators) and hashed with MD5. Re-encodes and
//! rescaled copies of one cover land in the same bins, so they hash alike,
//! while unrelated covers almost never do.

use std::fmt;

use image::{imageops::FilterType, DynamicImage};
use log::debug;

use crate::image_pipeline::decode_image_from_memory_with_fallback;

pub const FINGERPRINT_LEN: usize = 16;
const FINGERPRINT_BITS: u32 = (FINGERPRINT_LEN as u32) * 8;
const GRID_EDGE_PX: u32 = 8;
const BINS_PER_CHANNEL: usize = 8;
const BIN_WIDTH: usize = 256 / BINS_PER_CHANNEL;

/// 128-bit digest of an image's channel histograms. The empty fingerprint
/// stands for an image that could not be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fingerprint(Option<[u8; FINGERPRINT_LEN]>);

impl Fingerprint {
    pub const EMPTY: Self = Self(None);

    pub fn from_digest(digest: [u8; FINGERPRINT_LEN]) -> Self {
        Self(Some(digest))
    }

    /// Parses 32 hex characters; anything else yields [`Fingerprint::EMPTY`].
    pub fn from_hex(hex: &str) -> Self {
        let hex = hex.trim();
        if hex.len() != FINGERPRINT_LEN * 2 || !hex.is_ascii() {
            return Self::EMPTY;
        }
        let mut digest = [0u8; FINGERPRINT_LEN];
        for (index, byte) in digest.iter_mut().enumerate() {
            match u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16) {
                Ok(value) => *byte = value,
                Err(_) => return Self::EMPTY,
            }
        }
        Self::from_digest(digest)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn digest(&self) -> Option<&[u8; FINGERPRINT_LEN]> {
        self.0.as_ref()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(digest) = &self.0 {
            for byte in digest {
                write!(f, "{byte:02x}")?;
            }
        }
        Ok(())
    }
}

/// Per-channel bin counts of the 8x8 thumbnail, ordered R bins, G bins, B bins.
pub fn channel_histograms(image: &DynamicImage) -> [u8; BINS_PER_CHANNEL * 3] {
    let rgb = image.to_rgb8();
    let grid = image::imageops::resize(&rgb, GRID_EDGE_PX, GRID_EDGE_PX, FilterType::Lanczos3);

    let mut counts = [0u8; BINS_PER_CHANNEL * 3];
    for pixel in grid.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            let bin = usize::from(*value) / BIN_WIDTH;
            counts[channel * BINS_PER_CHANNEL + bin] += 1;
        }
    }
    counts
}

/// Hashes the counts as concatenated decimal text, so `[1, 10, ..]` and
/// `[11, 0, ..]` share a digest.
pub fn histogram_digest(counts: &[u8]) -> Fingerprint {
    let text: String = counts.iter().map(u8::to_string).collect();
    Fingerprint::from_digest(md5::compute(text.as_bytes()).0)
}

pub fn fingerprint_image(image: &DynamicImage) -> Fingerprint {
    histogram_digest(&channel_histograms(image))
}

/// Decodes `bytes` and fingerprints the result; undecodable input is [`Fingerprint::EMPTY`].
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    match decode_image_from_memory_with_fallback(bytes) {
        Some(image) => fingerprint_image(&image),
        None => {
            debug!("Fingerprint: could not decode {} bytes", bytes.len());
            Fingerprint::EMPTY
        }
    }
}

/// Fraction of matching bits, `1 - hamming / 128`. Empty fingerprints score 0.0.
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let (Some(left), Some(right)) = (a.digest(), b.digest()) else {
        return 0.0;
    };
    let differing: u32 = left
        .iter()
        .zip(right.iter())
        .map(|(l, r)| (l ^ r).count_ones())
        .sum();
    1.0 - f64::from(differing) / f64::from(FINGERPRINT_BITS)
}

#[cfg(test)]
mod tests {
    use super::{
        channel_histograms, fingerprint, histogram_digest, similarity, Fingerprint,
        FINGERPRINT_LEN,
    };
    use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("png encoding should succeed");
        cursor.into_inner()
    }

    fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, 90)
            .encode_image(&RgbImage::from_pixel(width, height, Rgb(color)))
            .expect("jpeg encoding should succeed");
        encoded
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let bytes = solid_png(40, 40, [12, 200, 90]);
        let first = fingerprint(&bytes);
        assert!(!first.is_empty());
        assert_eq!(first, fingerprint(&bytes));
        assert_eq!(first.to_string(), fingerprint(&bytes).to_string());
    }

    #[test]
    fn test_fingerprint_of_solid_color_matches_known_digest() {
        // Bins: R[3], G[4] and B[6] hold all 64 pixels, i.e. "000640000000064000000000640".
        let digest = fingerprint(&solid_png(40, 40, [100, 150, 200]));
        assert_eq!(digest.to_string(), "7b58eb310bcfa933222a5546e02ca64f");
    }

    #[test]
    fn test_histogram_digest_uses_unseparated_decimal_text() {
        let mut left = [0u8; 24];
        left[0] = 1;
        left[1] = 10;
        let mut right = [0u8; 24];
        right[0] = 11;
        right[1] = 0;
        assert_eq!(histogram_digest(&left), histogram_digest(&right));
        assert_eq!(
            histogram_digest(&[0u8; 24]).to_string(),
            format!("{:x}", md5::compute("0".repeat(24)))
        );
    }

    #[test]
    fn test_fingerprint_tolerates_reencoding_and_rescaling() {
        let original = fingerprint(&solid_png(600, 600, [100, 150, 200]));
        let thumbnail = fingerprint(&solid_png(300, 300, [100, 150, 200]));
        let reencoded = fingerprint(&solid_jpeg(600, 600, [100, 150, 200]));
        assert_eq!(original, thumbnail);
        assert_eq!(original, reencoded);
    }

    #[test]
    fn test_fingerprint_of_non_image_is_empty() {
        assert!(fingerprint(b"<html>not found</html>").is_empty());
    }

    #[test]
    fn test_channel_histograms_count_every_grid_pixel() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([0, 130, 255])));
        let counts = channel_histograms(&image);
        assert_eq!(counts[0], 64);
        assert_eq!(counts[8 + 4], 64);
        assert_eq!(counts[16 + 7], 64);
        assert_eq!(counts.iter().map(|count| u32::from(*count)).sum::<u32>(), 192);
    }

    #[test]
    fn test_similarity_identical_is_one_and_complement_is_zero() {
        let zeros = Fingerprint::from_digest([0x00; FINGERPRINT_LEN]);
        let ones = Fingerprint::from_digest([0xff; FINGERPRINT_LEN]);
        assert_eq!(similarity(&zeros, &zeros), 1.0);
        assert_eq!(similarity(&zeros, &ones), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric_and_bounded() {
        let samples = [
            Fingerprint::from_hex("00000000000000000000000000000000"),
            Fingerprint::from_hex("0123456789abcdef0123456789abcdef"),
            Fingerprint::from_hex("ffffffffffffffff0000000000000000"),
            Fingerprint::from_hex("d41d8cd98f00b204e9800998ecf8427e"),
            Fingerprint::EMPTY,
        ];
        for a in &samples {
            for b in &samples {
                let forward = similarity(a, b);
                assert_eq!(forward, similarity(b, a));
                assert!((0.0..=1.0).contains(&forward));
            }
        }
        assert_eq!(similarity(&samples[0], &samples[2]), 0.5);
    }

    #[test]
    fn test_similarity_with_empty_fingerprint_is_zero() {
        let digest = Fingerprint::from_hex("0123456789abcdef0123456789abcdef");
        assert_eq!(similarity(&Fingerprint::EMPTY, &digest), 0.0);
        assert_eq!(similarity(&Fingerprint::EMPTY, &Fingerprint::EMPTY), 0.0);
    }

    #[test]
    fn test_from_hex_rejects_malformed_input() {
        assert!(Fingerprint::from_hex("").is_empty());
        assert!(Fingerprint::from_hex("abc").is_empty());
        assert!(Fingerprint::from_hex("zz23456789abcdef0123456789abcdef").is_empty());
        let parsed = Fingerprint::from_hex("0123456789ABCDEF0123456789abcdef");
        assert_eq!(parsed.to_string(), "0123456789abcdef0123456789abcdef");
    }
}
