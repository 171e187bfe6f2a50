//! Texture descriptors and the deduplicating texture cache.
//!
//! Every texture a scene references lives in one append-only pool: the
//! [`TextureCache`] owns both the [`Texture`] descriptors and their raw byte
//! buffers, and maps asset paths to indices so each file is read at most once.

mod image_io;

pub use image_io::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use half::f16;

use crate::util::{Error, Result, Vec2, Vec4};

/// Storage format of a texture's texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 4 x u8 per texel.
    Rgba8,
    /// 4 x f16 per texel.
    Rgba16,
    /// 4 x f32 per texel.
    Rgba32,
}

impl TextureFormat {
    #[inline]
    pub const fn bytes_per_texel(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16 => 8,
            Self::Rgba32 => 16,
        }
    }
}

/// Texture descriptor. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: TextureFormat,
    /// Entry of this texture's bytes in the data pool.
    pub data_offset: usize,
    /// Size of the texel data in bytes.
    pub size: usize,
}

/// Deduplicating loader and owner of the texture data pool.
#[derive(Debug, Default)]
pub struct TextureCache {
    by_path: HashMap<PathBuf, usize>,
    textures: Vec<Texture>,
    data: Vec<Box<[u8]>>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the texture loaded from `path`, loading it on first request.
    ///
    /// Repeat requests for the same path never touch the loader again.
    pub fn get_or_load(&mut self, loader: &dyn ImageLoader, path: &Path) -> Result<usize> {
        if let Some(&index) = self.by_path.get(path) {
            return Ok(index);
        }

        let index = self.load(loader, path)?;
        self.by_path.insert(path.to_path_buf(), index);
        Ok(index)
    }

    fn load(&mut self, loader: &dyn ImageLoader, path: &Path) -> Result<usize> {
        let mut input = loader.open(path)?;
        let spec = input.spec();
        let format = spec.storage_format();
        let stride = format.bytes_per_texel();
        let size = spec.texel_count() * stride;

        // Sources without alpha only write color bytes, so 8-bit buffers
        // start out fully opaque.
        let fill = match format {
            TextureFormat::Rgba8 => 0xFF,
            _ => 0,
        };
        let mut bytes = vec![fill; size].into_boxed_slice();
        input.read(format, &mut bytes, stride)?;

        let texture = Texture {
            width: spec.width,
            height: spec.height,
            depth: spec.depth.max(1),
            format,
            data_offset: self.data.len(),
            size,
        };
        self.data.push(bytes);
        self.textures.push(texture);

        tracing::debug!(
            path = %path.display(),
            width = spec.width,
            height = spec.height,
            ?format,
            "texture loaded"
        );
        Ok(self.textures.len() - 1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Number of buffers in the data pool.
    #[inline]
    pub fn pool_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Texture> {
        self.textures.get(index)
    }

    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    /// Raw bytes of texture `index`.
    pub fn data(&self, index: usize) -> Option<&[u8]> {
        let texture = self.textures.get(index)?;
        self.data.get(texture.data_offset).map(|b| &b[..texture.size])
    }

    /// True if an 8-bit texture stores any alpha sample below 255.
    ///
    /// Half and float textures always report false.
    pub fn has_translucent_texels(&self, index: usize) -> bool {
        match (self.get(index), self.data(index)) {
            (Some(texture), Some(bytes)) if texture.format == TextureFormat::Rgba8 => {
                bytes.chunks_exact(4).any(|texel| texel[3] < 0xFF)
            }
            _ => false,
        }
    }

    /// Texel at `(x, y)` of the first slice, as normalized RGBA.
    pub fn texel(&self, index: usize, x: u32, y: u32) -> Option<Vec4> {
        let texture = self.get(index)?;
        let bytes = self.data(index)?;
        if x >= texture.width || y >= texture.height {
            return None;
        }

        let stride = texture.format.bytes_per_texel();
        let offset = (y as usize * texture.width as usize + x as usize) * stride;
        let raw = bytes.get(offset..offset + stride)?;

        let value = match texture.format {
            TextureFormat::Rgba8 => Vec4::new(
                raw[0] as f32 / 255.0,
                raw[1] as f32 / 255.0,
                raw[2] as f32 / 255.0,
                raw[3] as f32 / 255.0,
            ),
            TextureFormat::Rgba16 => {
                let halves: [f16; 4] = bytemuck::pod_read_unaligned(raw);
                Vec4::from_array(halves.map(f16::to_f32))
            }
            TextureFormat::Rgba32 => Vec4::from_array(bytemuck::pod_read_unaligned::<[f32; 4]>(raw)),
        };
        Some(value)
    }

    /// Nearest-texel lookup with wrapping texture coordinates.
    pub fn sample(&self, index: usize, uv: Vec2) -> Option<Vec4> {
        let texture = self.get(index)?;
        let u = uv.x - uv.x.floor();
        let v = uv.y - uv.y.floor();
        let x = ((u * texture.width as f32) as u32).min(texture.width.saturating_sub(1));
        // Texture rows are stored top-down, v grows upwards.
        let y = (((1.0 - v) * texture.height as f32) as u32).min(texture.height.saturating_sub(1));
        self.texel(index, x, y)
    }
}

/// Resolve a texture file name the way material libraries reference them:
/// relative names are joined onto the scene's base directory.
pub fn resolve_texture_path(base: &Path, name: &str) -> PathBuf {
    let name = name.trim();
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory image source: 8-bit RGB or RGBA with a constant color.
    pub(crate) struct SolidImage {
        pub spec: ImageSpec,
        pub rgba: [u8; 4],
    }

    impl ImageInput for SolidImage {
        fn spec(&self) -> ImageSpec {
            self.spec
        }

        fn read(&mut self, format: TextureFormat, buffer: &mut [u8], stride: usize) -> Result<()> {
            assert_eq!(format, TextureFormat::Rgba8);
            let channels = if self.spec.has_alpha() { 4 } else { 3 };
            for i in 0..self.spec.texel_count() {
                buffer[i * stride..i * stride + channels].copy_from_slice(&self.rgba[..channels]);
            }
            Ok(())
        }
    }

    /// Loader serving solid images and counting `open` calls.
    #[derive(Default, Clone)]
    pub(crate) struct CountingLoader {
        pub opens: Arc<AtomicUsize>,
        /// Paths containing this marker get an alpha channel.
        pub alpha: Option<u8>,
    }

    impl ImageLoader for CountingLoader {
        fn open(&self, path: &Path) -> Result<Box<dyn ImageInput>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("missing") {
                return Err(Error::asset(path, "not found"));
            }
            let (channels, alpha) = match self.alpha {
                Some(a) if path.to_string_lossy().contains("alpha") => (4, a),
                _ => (3, 0),
            };
            Ok(Box::new(SolidImage {
                spec: ImageSpec {
                    width: 2,
                    height: 2,
                    depth: 1,
                    channels,
                    sample: SampleType::U8,
                },
                rgba: [200, 100, 50, alpha],
            }))
        }
    }

    #[test]
    fn test_same_path_loads_once() {
        let loader = CountingLoader::default();
        let mut cache = TextureCache::new();

        let a = cache.get_or_load(&loader, Path::new("tex/wood.png")).unwrap();
        let b = cache.get_or_load(&loader, Path::new("tex/wood.png")).unwrap();
        let c = cache.get_or_load(&loader, Path::new("tex/wood.png")).unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(cache.pool_len(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(loader.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rgb_source_gets_opaque_alpha() {
        let loader = CountingLoader::default();
        let mut cache = TextureCache::new();
        let idx = cache.get_or_load(&loader, Path::new("rgb.png")).unwrap();

        let tex = cache.get(idx).unwrap();
        assert_eq!(tex.format, TextureFormat::Rgba8);
        assert_eq!(tex.size, 2 * 2 * 4);
        assert!(!cache.has_translucent_texels(idx));
        let data = cache.data(idx).unwrap();
        assert_eq!(&data[..4], &[200, 100, 50, 255]);
    }

    #[test]
    fn test_translucent_alpha_detected() {
        let loader = CountingLoader {
            alpha: Some(128),
            ..Default::default()
        };
        let mut cache = TextureCache::new();
        let idx = cache.get_or_load(&loader, Path::new("leaf_alpha.png")).unwrap();
        assert!(cache.has_translucent_texels(idx));

        let texel = cache.texel(idx, 1, 1).unwrap();
        assert!((texel.w - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_open_failure_is_asset_error() {
        let loader = CountingLoader::default();
        let mut cache = TextureCache::new();
        let err = cache.get_or_load(&loader, Path::new("missing.png")).unwrap_err();
        assert!(matches!(err, Error::Asset { .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.pool_len(), 0);
    }

    #[test]
    fn test_sample_wraps() {
        let loader = CountingLoader::default();
        let mut cache = TextureCache::new();
        let idx = cache.get_or_load(&loader, Path::new("rgb.png")).unwrap();
        let a = cache.sample(idx, Vec2::new(0.25, 0.25)).unwrap();
        let b = cache.sample(idx, Vec2::new(1.25, -0.75)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_texture_path() {
        let base = Path::new("/scenes/car");
        assert_eq!(
            resolve_texture_path(base, "paint.png"),
            PathBuf::from("/scenes/car/paint.png")
        );
        assert_eq!(
            resolve_texture_path(base, "/abs/paint.png"),
            PathBuf::from("/abs/paint.png")
        );
    }
}
