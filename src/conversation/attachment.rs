//! Decoded image attachments and the preprocessing applied before generation.

use std::fmt;
use std::fmt::Write as _;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest edge of the chat thumbnail.
pub const THUMBNAIL_MAX_EDGE: u32 = 800;
/// Shortest edge of the chat thumbnail, unless the upload is smaller.
pub const THUMBNAIL_MIN_EDGE: u32 = 400;
/// Square edge used by [`ImageProcessMode::Resize`].
pub const RESIZE_EDGE: u32 = 448;
/// Fill colour used by [`ImageProcessMode::Pad`].
pub const PAD_FILL: Rgb<u8> = Rgb([122, 116, 104]);

const THUMBNAIL_JPEG_QUALITY: u8 = 75;
const ARTIFACT_JPEG_QUALITY: u8 = 90;

/// Image decoding or encoding failure.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Upload is not an image format we can read.
    #[error("not a supported image: {0}")]
    Decode(#[source] image::ImageError),
    /// Re-encoding failed.
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Preprocessing applied to non-square images before they reach the model.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ImageProcessMode {
    /// Sent as uploaded; the worker's processor center-crops.
    Crop,
    /// Stretched to a fixed square.
    Resize,
    /// Padded to square with a neutral fill.
    Pad,
    /// Sent as uploaded.
    #[default]
    Default,
}

impl ImageProcessMode {
    /// Stable string form, as shown in the UI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crop => "Crop",
            Self::Resize => "Resize",
            Self::Pad => "Pad",
            Self::Default => "Default",
        }
    }
}

impl fmt::Display for ImageProcessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImageProcessMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Crop" => Ok(Self::Crop),
            "Resize" => Ok(Self::Resize),
            "Pad" => Ok(Self::Pad),
            "Default" => Ok(Self::Default),
            _ => Err(value.to_string()),
        }
    }
}

/// Decoded image attached to a user turn.
///
/// The content hash and the chat thumbnail are computed once on construction.
/// Cloning is cheap; everything is shared.
#[derive(Clone)]
pub struct ImageAttachment {
    image: Arc<DynamicImage>,
    hash: Arc<str>,
    thumbnail: Arc<str>,
}

impl ImageAttachment {
    /// Decode an uploaded file (PNG, JPEG, GIF, WebP, ...).
    ///
    /// # Errors
    /// Returns [`AttachmentError::Decode`] when the bytes are not an image.
    pub fn decode(bytes: &[u8]) -> Result<Self, AttachmentError> {
        let image = image::load_from_memory(bytes).map_err(AttachmentError::Decode)?;
        Self::from_image(image)
    }

    /// Wrap an already decoded image.
    ///
    /// # Errors
    /// Returns [`AttachmentError::Encode`] if the thumbnail cannot be encoded.
    pub fn from_image(image: DynamicImage) -> Result<Self, AttachmentError> {
        let hash = pixel_hash(&image);
        let jpeg = encode_jpeg(&thumbnail(&image), THUMBNAIL_JPEG_QUALITY)?;
        let uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg));
        Ok(Self {
            image: Arc::new(image),
            hash: hash.into(),
            thumbnail: uri.into(),
        })
    }

    /// `(width, height)` of the upload.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Hex-encoded SHA-256 of the decoded pixels, used as the dedup key.
    ///
    /// Identical pictures uploaded in different file formats share a hash.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.hash
    }

    /// JPEG `data:` URI of the downscaled chat thumbnail.
    #[must_use]
    pub fn thumbnail_uri(&self) -> &str {
        &self.thumbnail
    }

    /// Full-resolution JPEG, as written to the image log.
    ///
    /// # Errors
    /// Returns [`AttachmentError::Encode`] if encoding fails.
    pub fn to_jpeg(&self) -> Result<Vec<u8>, AttachmentError> {
        encode_jpeg(&self.image, ARTIFACT_JPEG_QUALITY)
    }

    /// Apply `mode` to the image.
    #[must_use]
    pub fn processed(&self, mode: ImageProcessMode) -> DynamicImage {
        match mode {
            ImageProcessMode::Pad => expand_to_square(&self.image, PAD_FILL),
            ImageProcessMode::Resize => {
                self.image
                    .resize_exact(RESIZE_EDGE, RESIZE_EDGE, FilterType::Triangle)
            }
            ImageProcessMode::Crop | ImageProcessMode::Default => (*self.image).clone(),
        }
    }

    /// Base64 PNG of the processed image, as sent to the model worker.
    ///
    /// # Errors
    /// Returns [`AttachmentError::Encode`] if encoding fails.
    pub fn worker_payload(&self, mode: ImageProcessMode) -> Result<String, AttachmentError> {
        let mut png = Cursor::new(Vec::new());
        self.processed(mode)
            .write_to(&mut png, ImageFormat::Png)
            .map_err(AttachmentError::Encode)?;
        Ok(STANDARD.encode(png.into_inner()))
    }
}

impl PartialEq for ImageAttachment {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for ImageAttachment {}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("ImageAttachment")
            .field("width", &width)
            .field("height", &height)
            .field("hash", &self.hash)
            .finish()
    }
}

fn pixel_hash(image: &DynamicImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_bytes());

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AttachmentError> {
    let rgb = image.to_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(&rgb)
        .map_err(AttachmentError::Encode)?;
    Ok(bytes)
}

/// Thumbnail `(width, height)`: the short edge is capped at
/// [`THUMBNAIL_MIN_EDGE`] and the long edge at [`THUMBNAIL_MAX_EDGE`], keeping
/// the aspect ratio. Never upscales.
#[must_use]
pub fn thumbnail_size(width: u32, height: u32) -> (u32, u32) {
    let long = u64::from(width.max(height).max(1));
    let short = u64::from(width.min(height).max(1));

    let short_edge = (u64::from(THUMBNAIL_MAX_EDGE) * short / long)
        .min(u64::from(THUMBNAIL_MIN_EDGE))
        .min(short)
        .max(1);
    let long_edge = (short_edge * long / short).max(1);

    let short_edge = u32::try_from(short_edge).unwrap_or(THUMBNAIL_MIN_EDGE);
    let long_edge = u32::try_from(long_edge).unwrap_or(THUMBNAIL_MAX_EDGE);
    if height > width {
        (short_edge, long_edge)
    } else {
        (long_edge, short_edge)
    }
}

fn thumbnail(image: &DynamicImage) -> DynamicImage {
    let (width, height) = thumbnail_size(image.width(), image.height());
    if (width, height) == (image.width(), image.height()) {
        image.clone()
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

fn expand_to_square(image: &DynamicImage, fill: Rgb<u8>) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width == height {
        return image.clone();
    }
    let side = width.max(height);
    let mut canvas = RgbImage::from_pixel(side, side, fill);
    imageops::overlay(
        &mut canvas,
        &image.to_rgb8(),
        i64::from((side - width) / 2),
        i64::from((side - height) / 2),
    );
    DynamicImage::ImageRgb8(canvas)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Solid-colour image of the given size.
    pub(crate) fn solid(width: u32, height: u32, rgb: [u8; 3]) -> ImageAttachment {
        ImageAttachment::from_image(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb(rgb),
        )))
        .unwrap()
    }

    /// PNG file bytes of a solid-colour image.
    pub(crate) fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(rgb)))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        png.into_inner()
    }

    fn decode_payload(payload: &str) -> DynamicImage {
        let bytes = STANDARD.decode(payload).unwrap();
        image::load_from_memory(&bytes).unwrap()
    }

    #[test]
    fn test_decode_accepts_png_and_rejects_text() {
        let image = ImageAttachment::decode(&png_bytes(30, 20, [1, 2, 3])).unwrap();
        assert_eq!(image.dimensions(), (30, 20));

        let err = ImageAttachment::decode(b"this is not an image at all");
        assert!(matches!(err, Err(AttachmentError::Decode(_))));
    }

    #[test]
    fn test_same_pixels_share_hash_across_formats() {
        let from_png = ImageAttachment::decode(&png_bytes(8, 8, [9, 9, 9])).unwrap();
        let built = solid(8, 8, [9, 9, 9]);
        let other = solid(8, 8, [10, 9, 9]);
        let reshaped = solid(4, 16, [9, 9, 9]);

        assert_eq!(from_png.content_hash(), built.content_hash());
        assert_ne!(built.content_hash(), other.content_hash());
        assert_ne!(built.content_hash(), reshaped.content_hash());
        assert_eq!(built.content_hash().len(), 64);
        assert_eq!(from_png, built);
    }

    #[test]
    fn test_thumbnail_size_bounds() {
        assert_eq!(thumbnail_size(1000, 500), (800, 400));
        assert_eq!(thumbnail_size(500, 1000), (400, 800));
        assert_eq!(thumbnail_size(3000, 3000), (400, 400));
        assert_eq!(thumbnail_size(300, 200), (300, 200));
        assert_eq!(thumbnail_size(4000, 100), (800, 20));
    }

    #[test]
    fn test_thumbnail_is_small_jpeg() {
        let image = solid(2400, 1200, [200, 10, 10]);
        let uri = image.thumbnail_uri();
        let encoded = uri.strip_prefix("data:image/jpeg;base64,").unwrap();

        let thumb = decode_payload(encoded);
        assert_eq!((thumb.width(), thumb.height()), (800, 400));
    }

    #[test]
    fn test_artifact_is_jpeg() {
        let jpeg = solid(16, 16, [0, 0, 0]).to_jpeg().unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_modes_change_worker_payload() {
        let image = solid(60, 30, [255, 255, 255]);

        let default = decode_payload(&image.worker_payload(ImageProcessMode::Default).unwrap());
        let crop = decode_payload(&image.worker_payload(ImageProcessMode::Crop).unwrap());
        let pad = decode_payload(&image.worker_payload(ImageProcessMode::Pad).unwrap());
        let resize = decode_payload(&image.worker_payload(ImageProcessMode::Resize).unwrap());

        assert_eq!((default.width(), default.height()), (60, 30));
        assert_eq!((crop.width(), crop.height()), (60, 30));
        assert_eq!((pad.width(), pad.height()), (60, 60));
        assert_eq!((resize.width(), resize.height()), (RESIZE_EDGE, RESIZE_EDGE));

        let pad = pad.to_rgb8();
        assert_eq!(*pad.get_pixel(0, 0), PAD_FILL);
        assert_eq!(*pad.get_pixel(30, 30), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in [
            ImageProcessMode::Crop,
            ImageProcessMode::Resize,
            ImageProcessMode::Pad,
            ImageProcessMode::Default,
        ] {
            assert_eq!(mode.as_str().parse::<ImageProcessMode>(), Ok(mode));
        }
        assert!("Stretch".parse::<ImageProcessMode>().is_err());
    }
}
