//! Image transcoding: [`RasterPage`] → compact, delivery-ready bytes.
//!
//! The policy is fixed per run: downscale when the longest edge exceeds
//! `max_edge_px` (aspect ratio preserved, Lanczos3), then encode with the
//! configured format and quality. Output is size-bounded, not bit-exact.
//!
//! The transcoder only borrows the raster page, so a failed attempt can be
//! retried on the same bitmap without rasterising the document again.

use crate::config::{IngestConfig, OutputFormat};
use crate::pipeline::render::RasterPage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Fixed encoding policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    pub max_edge_px: u32,
    pub quality: u8,
    pub format: OutputFormat,
}

impl TranscodeOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_edge_px: config.max_edge_px,
            quality: config.quality,
            format: config.format,
        }
    }
}

/// An encoded page, held until its upload succeeds.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    pub page_num: usize,
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for EncodedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedAsset")
            .field("page_num", &self.page_num)
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Target dimensions after applying the longest-edge cap.
///
/// Returns the input unchanged when it already fits.
pub fn bounded_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || longest == 0 {
        return (width, height);
    }
    let scale = max_edge as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w.min(max_edge), h.min(max_edge))
}

/// Encode one page under `opts`.
pub fn transcode_page(
    page: &RasterPage,
    opts: &TranscodeOptions,
) -> Result<EncodedAsset, image::ImageError> {
    let (src_w, src_h) = page.image.dimensions();
    let (dst_w, dst_h) = bounded_dimensions(src_w, src_h, opts.max_edge_px);

    let resized;
    let image: &DynamicImage = if (dst_w, dst_h) != (src_w, src_h) {
        resized = page.image.resize_exact(dst_w, dst_h, FilterType::Lanczos3);
        &resized
    } else {
        &page.image
    };

    let bytes = encode(image, opts)?;
    debug!(
        "Transcoded page {}: {}x{} → {}x{}, {} bytes {}",
        page.page_num,
        src_w,
        src_h,
        image.width(),
        image.height(),
        bytes.len(),
        opts.format.mime_type()
    );

    Ok(EncodedAsset {
        page_num: page.page_num,
        bytes,
        mime_type: opts.format.mime_type(),
        width: image.width(),
        height: image.height(),
    })
}

fn encode(image: &DynamicImage, opts: &TranscodeOptions) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match opts.format {
        OutputFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = image.to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buf, opts.quality);
            rgb.write_with_encoder(encoder)?;
        }
        OutputFormat::WebpLossless => {
            let rgba = image.to_rgba8();
            let encoder = WebPEncoder::new_lossless(&mut buf);
            rgba.write_with_encoder(encoder)?;
        }
        OutputFormat::Png => {
            image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
    }
    Ok(buf)
}
