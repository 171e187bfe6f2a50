//! Accumulation-buffer resolve and image export.
//!
//! Accumulation pixels hold the radiance sum in `xyz` and the sample weight
//! in `w`. Resolving divides by the weight; presenting additionally applies
//! display gamma and quantizes to RGBA8.

use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb32FImage, RgbaImage};

use crate::util::{Error, Result, Vec3, Vec4};

/// Display gamma used when none is configured.
pub const DEFAULT_GAMMA: f32 = 2.2;

/// Average radiance of one accumulation pixel. Zero weight resolves to black.
#[inline]
pub fn resolve_pixel(px: Vec4) -> Vec3 {
    if px.w > 0.0 {
        px.truncate() / px.w
    } else {
        Vec3::ZERO
    }
}

/// Resolve a whole buffer to linear RGB.
pub fn resolve_linear(pixels: &[Vec4]) -> Vec<Vec3> {
    pixels.iter().map(|&p| resolve_pixel(p)).collect()
}

/// Resolve, gamma-correct and quantize to RGBA8 with opaque alpha.
pub fn tonemap_rgba8(pixels: &[Vec4], gamma: f32) -> Vec<u8> {
    let inv_gamma = 1.0 / gamma.max(1e-3);
    let mut out = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        let c = resolve_pixel(p);
        for v in c.to_array() {
            let v = v.max(0.0).powf(inv_gamma).clamp(0.0, 1.0);
            out.push((v * 255.0) as u8);
        }
        out.push(255);
    }
    out
}

/// Write an accumulation buffer to disk, format chosen by extension.
///
/// `.hdr` and `.exr` keep linear float radiance; other formats receive the
/// gamma-corrected 8-bit image.
#[tracing::instrument(skip(pixels))]
pub fn save_image(path: &Path, width: u32, height: u32, pixels: &[Vec4], gamma: f32) -> Result<()> {
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(Error::Config(format!(
            "image {width}x{height} needs {expected} pixels, got {}",
            pixels.len()
        )));
    }

    let format = ImageFormat::from_path(path)?;
    let image = match format {
        ImageFormat::Hdr | ImageFormat::OpenExr => {
            let data: Vec<f32> = resolve_linear(pixels)
                .into_iter()
                .flat_map(|c| c.to_array())
                .collect();
            let buf = Rgb32FImage::from_raw(width, height, data)
                .ok_or_else(|| Error::Config("float image buffer size mismatch".into()))?;
            DynamicImage::ImageRgb32F(buf)
        }
        _ => {
            let buf = RgbaImage::from_raw(width, height, tonemap_rgba8(pixels, gamma))
                .ok_or_else(|| Error::Config("rgba image buffer size mismatch".into()))?;
            let rgba = DynamicImage::ImageRgba8(buf);
            if format == ImageFormat::Jpeg {
                DynamicImage::ImageRgb8(rgba.to_rgb8())
            } else {
                rgba
            }
        }
    };

    image.save_with_format(path, format)?;
    tracing::info!(path = %path.display(), width, height, "image saved");
    Ok(())
}
