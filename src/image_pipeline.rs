//! Image validation, alpha flattening, and byte-budget recompression.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use log::{debug, warn};
use thiserror::Error;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

const START_QUALITY: u8 = 95;
const QUALITY_STEP: u8 = 5;
const QUALITY_FLOOR: u8 = 10;
const DOWNSCALE_QUALITY: u8 = 75;
const DOWNSCALE_START_PERCENT: u32 = 90;
const DOWNSCALE_STEP_PERCENT: usize = 10;
const DOWNSCALE_FLOOR_PERCENT: u32 = 30;
const FLATTEN_BACKGROUND: [u8; 3] = [255, 255, 255];

/// Why a downloaded body never became a candidate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageRejection {
    #[error("empty image body")]
    Empty,
    #[error("content type `{0}` is not an image")]
    NotImageContent(String),
    #[error("bytes do not decode as a raster image")]
    Undecodable,
    #[error("re-encoding failed: {0}")]
    Encode(String),
}

/// Image bytes that decoded successfully, possibly recompressed to JPEG.
#[derive(Debug, Clone)]
pub struct ValidatedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub recompressed: bool,
    /// False only when the compression floor was hit before meeting the budget.
    pub within_budget: bool,
}

/// Magic-byte sniff for the formats providers serve.
pub fn detect_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some("png");
    }
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some("jpg");
    }
    if bytes.len() >= 12 && bytes[0..4] == *b"RIFF" && bytes[8..12] == *b"WEBP" {
        return Some("webp");
    }
    if bytes.len() >= 6 && (&bytes[0..6] == b"GIF87a" || &bytes[0..6] == b"GIF89a") {
        return Some("gif");
    }
    if bytes.len() >= 2 && bytes[0] == b'B' && bytes[1] == b'M' {
        return Some("bmp");
    }
    None
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

pub(crate) fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Provider CDNs occasionally serve JPEGs with trailing junk the strict decoder refuses.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("image")
}

/// Composites alpha over a white background; opaque images convert unchanged.
pub fn flatten_to_rgb(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |channel: u8, background: u8| -> u8 {
            ((u16::from(channel) * alpha + u16::from(background) * (255 - alpha) + 127) / 255) as u8
        };
        image::Rgb([
            blend(r, FLATTEN_BACKGROUND[0]),
            blend(g, FLATTEN_BACKGROUND[1]),
            blend(b, FLATTEN_BACKGROUND[2]),
        ])
    })
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageRejection> {
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality)
        .encode_image(image)
        .map_err(|error| ImageRejection::Encode(error.to_string()))?;
    Ok(encoded)
}

fn scaled_dimensions(width: u32, height: u32, percent: u32) -> (u32, u32) {
    let scale = |value: u32| ((u64::from(value) * u64::from(percent)) / 100).max(1) as u32;
    (scale(width), scale(height))
}

struct Encoding {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

fn keep_smallest(smallest: &mut Option<Encoding>, candidate: Encoding) {
    let replace = smallest
        .as_ref()
        .map_or(true, |current| candidate.bytes.len() < current.bytes.len());
    if replace {
        *smallest = Some(candidate);
    }
}

/// Lowers JPEG quality, then dimensions, until the encoding fits `target_max_bytes`.
/// Returns the smallest attempt (and `false`) when nothing fits.
fn compress_to_budget(
    decoded: &DynamicImage,
    target_max_bytes: usize,
) -> Result<(Encoding, bool), ImageRejection> {
    let flattened = flatten_to_rgb(decoded);
    let (width, height) = flattened.dimensions();
    let mut smallest: Option<Encoding> = None;

    let mut quality = START_QUALITY;
    while quality > QUALITY_FLOOR {
        let bytes = encode_jpeg(&flattened, quality)?;
        if bytes.len() <= target_max_bytes {
            debug!(
                "ImagePipeline: compressed to {} bytes at quality {}",
                bytes.len(),
                quality
            );
            return Ok((Encoding { bytes, width, height }, true));
        }
        keep_smallest(&mut smallest, Encoding { bytes, width, height });
        quality -= QUALITY_STEP;
    }

    for percent in (DOWNSCALE_FLOOR_PERCENT..=DOWNSCALE_START_PERCENT)
        .rev()
        .step_by(DOWNSCALE_STEP_PERCENT)
    {
        let (scaled_width, scaled_height) = scaled_dimensions(width, height, percent);
        let resized = image::imageops::resize(
            &flattened,
            scaled_width,
            scaled_height,
            FilterType::Lanczos3,
        );
        let bytes = encode_jpeg(&resized, DOWNSCALE_QUALITY)?;
        let attempt = Encoding {
            bytes,
            width: scaled_width,
            height: scaled_height,
        };
        if attempt.bytes.len() <= target_max_bytes {
            debug!(
                "ImagePipeline: compressed to {}x{} at {} bytes",
                scaled_width,
                scaled_height,
                attempt.bytes.len()
            );
            return Ok((attempt, true));
        }
        keep_smallest(&mut smallest, attempt);
    }

    let smallest =
        smallest.ok_or_else(|| ImageRejection::Encode("no encoding attempts".to_string()))?;
    warn!(
        "ImagePipeline: could not compress below {} bytes, keeping smallest encoding ({} bytes)",
        target_max_bytes,
        smallest.bytes.len()
    );
    Ok((smallest, false))
}

/// Rejects non-images and recompresses anything larger than `target_max_bytes`.
///
/// A body is refused when it is empty, when it declares a non-image content
/// type and its magic bytes do not match a known image format either, or when
/// it does not decode. Bodies within budget are returned byte-for-byte.
pub fn validate_and_compress(
    bytes: &[u8],
    content_type: Option<&str>,
    target_max_bytes: usize,
) -> Result<ValidatedImage, ImageRejection> {
    if bytes.is_empty() {
        return Err(ImageRejection::Empty);
    }
    if let Some(content_type) = content_type {
        if !is_image_content_type(content_type) && detect_image_extension(bytes).is_none() {
            return Err(ImageRejection::NotImageContent(content_type.to_string()));
        }
    }

    let decoded =
        decode_image_from_memory_with_fallback(bytes).ok_or(ImageRejection::Undecodable)?;
    let (width, height) = decoded.dimensions();

    if bytes.len() <= target_max_bytes {
        return Ok(ValidatedImage {
            bytes: bytes.to_vec(),
            width,
            height,
            recompressed: false,
            within_budget: true,
        });
    }

    debug!(
        "ImagePipeline: compressing {}x{} image of {} bytes to fit {} bytes",
        width,
        height,
        bytes.len(),
        target_max_bytes
    );
    let (encoding, within_budget) = compress_to_budget(&decoded, target_max_bytes)?;
    Ok(ValidatedImage {
        bytes: encoding.bytes,
        width: encoding.width,
        height: encoding.height,
        recompressed: true,
        within_budget,
    })
}
