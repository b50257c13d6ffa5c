//! Letterboxing a still image onto the fixed output canvas.
//!
//! The source is scaled uniformly so that it fits inside the canvas, centered,
//! and the remaining bands are filled with opaque black. Geometry is computed
//! in exact integer arithmetic so the bound dimension always lands on the
//! canvas edge.

use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageReader, Rgba, RgbaImage};

/// JPEG quality for the composited frame.
pub const JPEG_QUALITY: u8 = 90;

/// Output canvas dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSpec {
    pub width: u32,
    pub height: u32,
}

/// The only canvas stillcast renders to: 1280x720.
pub const CANVAS: CanvasSpec = CanvasSpec {
    width: 1280,
    height: 720,
};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Placement of a scaled source image on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    /// Scaled image width.
    pub width: u32,
    /// Scaled image height.
    pub height: u32,
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Letterbox {
    /// Fit a `src_width` x `src_height` image inside `canvas`.
    ///
    /// Equivalent to `scale = min(W / w, H / h)` followed by flooring both
    /// scaled dimensions, with each dimension kept at one pixel or more.
    /// Odd leftovers go to the right and bottom bands.
    pub fn fit(src_width: u32, src_height: u32, canvas: CanvasSpec) -> Self {
        let w = u64::from(src_width.max(1));
        let h = u64::from(src_height.max(1));
        let cw = u64::from(canvas.width);
        let ch = u64::from(canvas.height);

        // w/cw >= h/ch  <=>  width is the bound dimension.
        let (width, height) = if w * ch >= h * cw {
            (cw, h * cw / w)
        } else {
            (w * ch / h, ch)
        };

        let width = (width.max(1) as u32).min(canvas.width);
        let height = (height.max(1) as u32).min(canvas.height);

        let left = (canvas.width - width) / 2;
        let top = (canvas.height - height) / 2;

        Self {
            width,
            height,
            left,
            right: canvas.width - width - left,
            top,
            bottom: canvas.height - height - top,
        }
    }
}

/// Letterbox the image at `input` onto the black canvas and write it as a
/// JPEG to `output`.
///
/// The input format is detected from its content, not its name. Transparent
/// pixels are flattened onto black. This is CPU-bound; async callers should
/// run it on the blocking pool.
///
/// # Errors
///
/// [`sc_core::Error::Image`] when the input cannot be read or decoded, or the
/// output cannot be encoded or written.
pub fn composite(input: &Path, output: &Path) -> sc_core::Result<Letterbox> {
    let source = ImageReader::open(input)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| image_error("failed to open", input, e))?
        .decode()
        .map_err(|e| image_error("failed to decode", input, e))?;

    let (src_width, src_height) = source.dimensions();
    if src_width == 0 || src_height == 0 {
        return Err(sc_core::Error::Image(format!(
            "{} has no pixels",
            input.display()
        )));
    }

    let fit = Letterbox::fit(src_width, src_height, CANVAS);
    tracing::debug!(
        "Compositing {}x{} -> {}x{} at ({}, {})",
        src_width,
        src_height,
        fit.width,
        fit.height,
        fit.left,
        fit.top
    );

    let scaled = if (src_width, src_height) == (fit.width, fit.height) {
        source
    } else {
        source.resize_exact(fit.width, fit.height, FilterType::Lanczos3)
    };

    let mut canvas = RgbaImage::from_pixel(CANVAS.width, CANVAS.height, BACKGROUND);
    imageops::overlay(
        &mut canvas,
        &scaled.to_rgba8(),
        i64::from(fit.left),
        i64::from(fit.top),
    );
    let frame = DynamicImage::ImageRgba8(canvas).to_rgb8();

    let file = std::fs::File::create(output)
        .map_err(|e| image_error("failed to create", output, e))?;
    let mut writer = BufWriter::new(file);
    frame
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))
        .map_err(|e| image_error("failed to encode", output, e))?;
    writer
        .flush()
        .map_err(|e| image_error("failed to write", output, e))?;

    Ok(fit)
}

fn image_error(action: &str, path: &Path, err: impl std::fmt::Display) -> sc_core::Error {
    sc_core::Error::Image(format!("{action} {}: {err}", path.display()))
}
