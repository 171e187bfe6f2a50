//! Image collaborator: opening and reading texture assets.
//!
//! The cache only talks to [`ImageLoader`] / [`ImageInput`], so tests and
//! embedders can substitute their own decoders. [`DiskImageLoader`] decodes
//! files with the `image` crate.

use std::path::{Path, PathBuf};

use half::f16;
use image::{DynamicImage, GenericImageView};

use super::TextureFormat;
use crate::util::{Error, Result};

/// Native sample type of an image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    Half,
    Float,
}

/// Dimensions and sample layout reported by an opened image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Number of channels stored by the source (1-4).
    pub channels: u8,
    pub sample: SampleType,
}

impl ImageSpec {
    /// Storage format a texture loaded from this source uses.
    ///
    /// 8-bit sources stay 8-bit, half sources stay half, everything else
    /// is widened to float.
    pub fn storage_format(&self) -> TextureFormat {
        match self.sample {
            SampleType::U8 => TextureFormat::Rgba8,
            SampleType::Half => TextureFormat::Rgba16,
            SampleType::U16 | SampleType::Float => TextureFormat::Rgba32,
        }
    }

    /// Number of texels in the image.
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize * self.depth.max(1) as usize
    }

    /// True if the source carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        matches!(self.channels, 2 | 4)
    }
}

/// An opened image ready to be read into a texture buffer.
pub trait ImageInput {
    fn spec(&self) -> ImageSpec;

    /// Read all texels converted to `format` into `buffer`, one texel every
    /// `stride` bytes.
    ///
    /// For [`TextureFormat::Rgba8`] only the channels present in the source
    /// are written; bytes for missing channels are left untouched.
    fn read(&mut self, format: TextureFormat, buffer: &mut [u8], stride: usize) -> Result<()>;
}

/// Opens image assets by path.
pub trait ImageLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageInput>>;
}

/// Loader backed by the `image` crate (PNG, JPEG, HDR, EXR).
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskImageLoader;

impl ImageLoader for DiskImageLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ImageInput>> {
        let image = image::ImageReader::open(path)
            .map_err(|e| Error::asset(path, e))?
            .with_guessed_format()
            .map_err(|e| Error::asset(path, e))?
            .decode()
            .map_err(|e| Error::asset(path, e))?;

        Ok(Box::new(DecodedImage {
            path: path.to_path_buf(),
            image,
        }))
    }
}

struct DecodedImage {
    path: PathBuf,
    image: DynamicImage,
}

fn sample_type(image: &DynamicImage) -> SampleType {
    use image::ColorType;
    match image.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => SampleType::U8,
        ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16 => SampleType::U16,
        _ => SampleType::Float,
    }
}

impl ImageInput for DecodedImage {
    fn spec(&self) -> ImageSpec {
        let (width, height) = self.image.dimensions();
        ImageSpec {
            width,
            height,
            depth: 1,
            channels: self.image.color().channel_count(),
            sample: sample_type(&self.image),
        }
    }

    fn read(&mut self, format: TextureFormat, buffer: &mut [u8], stride: usize) -> Result<()> {
        let spec = self.spec();
        let count = spec.texel_count();
        let texel = format.bytes_per_texel();
        if stride < texel || buffer.len() < count.saturating_sub(1) * stride + texel {
            return Err(Error::asset(
                &self.path,
                format!("buffer of {} bytes too small for {count} texels", buffer.len()),
            ));
        }

        match format {
            TextureFormat::Rgba8 if spec.has_alpha() => {
                let rgba = self.image.to_rgba8();
                for (i, px) in rgba.pixels().enumerate() {
                    buffer[i * stride..i * stride + 4].copy_from_slice(&px.0);
                }
            }
            TextureFormat::Rgba8 => {
                // Alpha byte stays as the caller initialized it
                let rgb = self.image.to_rgb8();
                for (i, px) in rgb.pixels().enumerate() {
                    buffer[i * stride..i * stride + 3].copy_from_slice(&px.0);
                }
            }
            TextureFormat::Rgba16 => {
                let rgba = self.image.to_rgba32f();
                for (i, px) in rgba.pixels().enumerate() {
                    let halves = px.0.map(f16::from_f32);
                    buffer[i * stride..i * stride + 8].copy_from_slice(bytemuck::bytes_of(&halves));
                }
            }
            TextureFormat::Rgba32 => {
                let rgba = self.image.to_rgba32f();
                for (i, px) in rgba.pixels().enumerate() {
                    buffer[i * stride..i * stride + 16].copy_from_slice(bytemuck::bytes_of(&px.0));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_format_from_sample_type() {
        let mut spec = ImageSpec {
            width: 1,
            height: 1,
            depth: 1,
            channels: 3,
            sample: SampleType::U8,
        };
        assert_eq!(spec.storage_format(), TextureFormat::Rgba8);
        spec.sample = SampleType::Half;
        assert_eq!(spec.storage_format(), TextureFormat::Rgba16);
        spec.sample = SampleType::U16;
        assert_eq!(spec.storage_format(), TextureFormat::Rgba32);
        spec.sample = SampleType::Float;
        assert_eq!(spec.storage_format(), TextureFormat::Rgba32);
    }

    #[test]
    fn test_rgb_read_leaves_alpha_untouched() {
        let img = image::RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30]));
        let mut input = DecodedImage {
            path: PathBuf::from("mem.png"),
            image: DynamicImage::ImageRgb8(img),
        };
        let mut buf = vec![0xAAu8; 8];
        input.read(TextureFormat::Rgba8, &mut buf, 4).unwrap();
        assert_eq!(buf, vec![10, 20, 30, 0xAA, 10, 20, 30, 0xAA]);
    }

    #[test]
    fn test_missing_file_is_asset_error() {
        let err = DiskImageLoader
            .open(Path::new("/definitely/not/here.png"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Asset { .. }));
    }
}
