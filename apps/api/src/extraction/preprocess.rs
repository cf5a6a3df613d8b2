//! Image preprocessing for roster photos and scans.
//!
//! Pure bytes-to-bytes transform: no I/O, no model calls. Every step is
//! failure-tolerant. A step that cannot run leaves the image as it was and
//! records a `PreprocessNote`. If the input cannot even be decoded, the
//! original bytes are returned untouched. Preprocessing never blocks extraction.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Colour transparent pixels are flattened onto.
    pub background: [u8; 3],
    /// Per-channel distance from the corner colour still treated as border.
    pub crop_tolerance: u8,
    pub min_width: u32,
    pub max_width: u32,
    /// Upper bound on the pixel count an upscale may produce.
    pub max_pixels: u64,
    /// Linear contrast multiplier around mid-gray.
    pub contrast: f32,
    pub sharpen_sigma: f32,
    pub sharpen_threshold: i32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            background: [255, 255, 255],
            crop_tolerance: 10,
            min_width: 1000,
            max_width: 2000,
            max_pixels: 8_000_000,
            contrast: 1.2,
            sharpen_sigma: 1.0,
            sharpen_threshold: 1,
        }
    }
}

/// A step that was skipped or failed; preprocessing continued without it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreprocessNote {
    pub step: String,
    pub reason: String,
}

/// The image handed to the vision model.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub degraded: Vec<PreprocessNote>,
}

impl PreparedImage {
    /// Original bytes with measured dimensions, the total-failure fallback.
    pub fn passthrough(bytes: &[u8], reason: impl Into<String>) -> Self {
        let (width, height) = measure_dimensions(bytes).unwrap_or((0, 0));
        Self {
            bytes: bytes.to_vec(),
            width,
            height,
            mime_type: detect_mime(bytes)
                .unwrap_or("application/octet-stream")
                .to_string(),
            degraded: vec![PreprocessNote {
                step: "pipeline".to_string(),
                reason: reason.into(),
            }],
        }
    }
}

/// Detects a supported roster image format from its header magic bytes.
pub fn detect_mime(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

fn measure_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Runs the full normalization pipeline.
///
/// 1. flatten transparency  2. auto-crop borders  3. clamp width
/// 4. contrast boost  5. unsharp mask  6. re-encode as PNG
pub fn preprocess_image(bytes: &[u8], config: &PreprocessConfig) -> PreparedImage {
    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!("Roster image could not be decoded, sending original bytes: {e}");
            return PreparedImage::passthrough(bytes, format!("decode failed: {e}"));
        }
    };

    let mut notes = Vec::new();

    let image = flatten_transparency(&decoded, config.background);
    let image = apply_step("autocrop", image, &mut notes, |img| {
        Ok(autocrop(img, config.crop_tolerance))
    });
    let image = apply_step("resize", image, &mut notes, |img| {
        resize_to_width_bounds(img, config.min_width, config.max_width, config.max_pixels)
    });
    let image = apply_step("contrast", image, &mut notes, |img| {
        Ok(Some(boost_contrast(img, config.contrast)))
    });
    let image = apply_step("sharpen", image, &mut notes, |img| {
        Ok(Some(image::imageops::unsharpen(
            img,
            config.sharpen_sigma,
            config.sharpen_threshold,
        )))
    });

    let (width, height) = image.dimensions();
    match encode_png(image) {
        Ok(png) => {
            debug!(
                width,
                height,
                png_size = png.len(),
                degraded = notes.len(),
                "Roster image preprocessed"
            );
            PreparedImage {
                bytes: png,
                width,
                height,
                mime_type: "image/png".to_string(),
                degraded: notes,
            }
        }
        Err(e) => {
            warn!("PNG re-encode failed, sending original bytes: {e}");
            let mut fallback = PreparedImage::passthrough(bytes, format!("encode failed: {e}"));
            notes.append(&mut fallback.degraded);
            fallback.degraded = notes;
            fallback
        }
    }
}

/// Runs one step. `Ok(None)` means "nothing to do"; `Err` is recorded and the
/// input image passes through unchanged.
fn apply_step<F>(
    step: &str,
    image: RgbImage,
    notes: &mut Vec<PreprocessNote>,
    f: F,
) -> RgbImage
where
    F: FnOnce(&RgbImage) -> Result<Option<RgbImage>, String>,
{
    match f(&image) {
        Ok(Some(next)) => next,
        Ok(None) => image,
        Err(reason) => {
            warn!(step, %reason, "Preprocessing step skipped");
            notes.push(PreprocessNote {
                step: step.to_string(),
                reason,
            });
            image
        }
    }
}

/// Composites every pixel over `background` using its alpha.
fn flatten_transparency(image: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = px[3] as u32;
        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let blended = (px[c] as u32 * alpha + background[c] as u32 * (255 - alpha)) / 255;
            rgb[c] = blended as u8;
        }
        out.put_pixel(x, y, Rgb(rgb));
    }
    out
}

/// Crops borders matching the top-left colour. `None` when the image is a
/// single colour or there is no border to remove.
fn autocrop(image: &RgbImage, tolerance: u8) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    let reference = *image.get_pixel(0, 0);
    let differs = |px: &Rgb<u8>| {
        px.0.iter()
            .zip(reference.0.iter())
            .any(|(a, b)| a.abs_diff(*b) > tolerance)
    };

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, px) in image.enumerate_pixels() {
        if differs(px) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x == u32::MAX {
        debug!("Auto-crop skipped: image is a single colour");
        return None;
    }

    let crop_w = max_x - min_x + 1;
    let crop_h = max_y - min_y + 1;
    if crop_w == width && crop_h == height {
        return None;
    }

    Some(image::imageops::crop_imm(image, min_x, min_y, crop_w, crop_h).to_image())
}

/// Target width after clamping into `[min_width, max_width]`, with the height
/// that preserves aspect ratio. `Ok(None)` when no resize is needed.
///
/// An upscale whose result would exceed `max_pixels` (or a `u32` side) is
/// refused with `Err`. Downscales only ever shrink the image and always pass.
fn target_dimensions(
    width: u32,
    height: u32,
    min_width: u32,
    max_width: u32,
    max_pixels: u64,
) -> Result<Option<(u32, u32)>, String> {
    let target_w = width.clamp(min_width, max_width);
    if target_w == width {
        return Ok(None);
    }
    let scale = target_w as f64 / width as f64;
    let target_h = (height as f64 * scale).round().max(1.0);
    if target_w > width {
        let pixels = target_w as f64 * target_h;
        if target_h > u32::MAX as f64 || pixels > max_pixels as f64 {
            return Err(format!(
                "upscale of {width}x{height} to width {target_w} would exceed {max_pixels} pixels"
            ));
        }
    }
    Ok(Some((target_w, target_h as u32)))
}

fn resize_to_width_bounds(
    image: &RgbImage,
    min_width: u32,
    max_width: u32,
    max_pixels: u64,
) -> Result<Option<RgbImage>, String> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err("image has zero size".to_string());
    }
    Ok(target_dimensions(width, height, min_width, max_width, max_pixels)?
        .map(|(w, h)| image::imageops::resize(image, w, h, FilterType::Lanczos3)))
}

/// `out = (in − 128) × multiplier + 128`, clamped per channel.
fn boost_contrast(image: &RgbImage, multiplier: f32) -> RgbImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        for c in px.0.iter_mut() {
            let v = (*c as f32 - 128.0) * multiplier + 128.0;
            *c = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn encode_png(image: RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}
