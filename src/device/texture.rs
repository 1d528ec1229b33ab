use std::hash::{Hash, Hasher};

use image::{ImageBuffer, Rgba, RgbaImage};

use super::backend::{TexFilter, TexWrap, TextureHandle};

/// Layout of incoming pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexFormat {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    /// Pick RGB or RGBA from the channel count.
    #[default]
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureCreateParams {
    pub format: TexFormat,
    pub filter: TexFilter,
    pub mipmap: bool,
    pub wrap: TexWrap,
    pub pad_to_nearest_power_of_two: bool,
    /// Requested anisotropy level; values above the hardware maximum are clamped.
    pub anisotropy: u32,
}

impl Default for TextureCreateParams {
    fn default() -> Self {
        Self {
            format: TexFormat::Auto,
            filter: TexFilter::Nearest,
            mipmap: false,
            wrap: TexWrap::Repeat,
            pad_to_nearest_power_of_two: false,
            anisotropy: 1,
        }
    }
}

/// Decoded pixels handed over by the asset layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// 3 or 4 bytes per pixel.
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, channels: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            pixels,
        }
    }

    pub fn rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, 4, pixels)
    }

    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixels = color
            .iter()
            .copied()
            .cycle()
            .take(byte_len(width, height, 4).unwrap_or(0))
            .collect();
        Self::rgba(width, height, pixels)
    }

    fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && matches!(self.channels, 3 | 4)
            && byte_len(self.width, self.height, self.channels) == Some(self.pixels.len())
    }
}

/// Size in bytes of a `width` x `height` image, `None` when it does not fit.
fn byte_len(width: u32, height: u32, channels: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(channels as usize)
}

/// Texture as seen by callers: a backend handle plus sizing metadata.
///
/// Equality and hashing only consider the handle so a `Texture` can be used
/// as a registry key regardless of how its metadata was obtained.
#[derive(Debug, Clone, Copy, Default)]
pub struct Texture {
    pub handle: Option<TextureHandle>,
    pub size: (u32, u32),
    pub original_size: (u32, u32),
    pub alpha: bool,
    pub mip_levels: u32,
}

impl Texture {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Texture {}

impl Hash for Texture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

/// Pixels converted to RGBA8, ready for upload.
pub(crate) struct PreparedPixels {
    pub(crate) image: RgbaImage,
    pub(crate) original_size: (u32, u32),
    pub(crate) alpha: bool,
}

/// Convert `data` to RGBA8, honouring the declared format and optional
/// power-of-two padding.
pub(crate) fn prepare_pixels(
    data: &ImageData,
    format: TexFormat,
    pad_to_power_of_two: bool,
) -> Option<PreparedPixels> {
    if !data.is_well_formed() {
        return None;
    }

    let format = match (format, data.channels) {
        (TexFormat::Auto, 3) => TexFormat::Rgb,
        (TexFormat::Auto, _) => TexFormat::Rgba,
        (TexFormat::Rgb | TexFormat::Bgr, 4) | (TexFormat::Rgba | TexFormat::Bgra, 3) => {
            log::warn!(
                "Texture format {:?} does not match {} channel data",
                format,
                data.channels
            );
            return None;
        }
        (format, _) => format,
    };

    let alpha = matches!(format, TexFormat::Rgba | TexFormat::Bgra);
    let channels = data.channels as usize;
    let mut rgba = Vec::with_capacity(data.pixels.len() / channels * 4);
    for px in data.pixels.chunks_exact(channels) {
        let (r, g, b) = match format {
            TexFormat::Bgr | TexFormat::Bgra => (px[2], px[1], px[0]),
            _ => (px[0], px[1], px[2]),
        };
        let a = if alpha { px[3] } else { 255 };
        rgba.extend_from_slice(&[r, g, b, a]);
    }

    let image: RgbaImage = ImageBuffer::from_raw(data.width, data.height, rgba)?;
    let original_size = (data.width, data.height);

    let image = if pad_to_power_of_two {
        pad_to_pot(image)?
    } else {
        image
    };

    Some(PreparedPixels {
        image,
        original_size,
        alpha,
    })
}

fn pad_to_pot(image: RgbaImage) -> Option<RgbaImage> {
    let (width, height) = image.dimensions();
    let pot_width = width.checked_next_power_of_two()?;
    let pot_height = height.checked_next_power_of_two()?;
    if (pot_width, pot_height) == (width, height) {
        return Some(image);
    }

    log::debug!(
        "Padding texture {}x{} to {}x{}",
        width,
        height,
        pot_width,
        pot_height
    );
    let mut padded = RgbaImage::from_pixel(pot_width, pot_height, Rgba([0, 0, 0, 0]));
    image::imageops::replace(&mut padded, &image, 0, 0);
    Some(padded)
}

pub(crate) fn calculate_mip_levels(width: u32, height: u32) -> u32 {
    let max_dimension = width.max(height).max(1);
    u32::BITS - max_dimension.leading_zeros()
}

/// Depth bits the backend can actually allocate.
pub(crate) fn normalize_depth_bits(bits: u32) -> u32 {
    match bits {
        16 | 24 | 32 => bits,
        other => {
            log::warn!("Unsupported depth size {}, using 24 bits", other);
            24
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_levels() {
        assert_eq!(calculate_mip_levels(1, 1), 1);
        assert_eq!(calculate_mip_levels(2, 1), 2);
        assert_eq!(calculate_mip_levels(256, 256), 9);
        assert_eq!(calculate_mip_levels(300, 20), 9);
        assert_eq!(calculate_mip_levels(0, 0), 1);
    }

    #[test]
    fn bgr_is_swizzled_and_opaque() {
        let data = ImageData::new(1, 1, 3, vec![10, 20, 30]);
        let prepared = prepare_pixels(&data, TexFormat::Bgr, false).unwrap();
        assert_eq!(prepared.image.as_raw().as_slice(), &[30, 20, 10, 255]);
        assert!(!prepared.alpha);
    }

    #[test]
    fn auto_format_follows_channel_count() {
        let rgb = ImageData::new(1, 1, 3, vec![1, 2, 3]);
        assert!(!prepare_pixels(&rgb, TexFormat::Auto, false).unwrap().alpha);

        let rgba = ImageData::rgba(1, 1, vec![1, 2, 3, 4]);
        let prepared = prepare_pixels(&rgba, TexFormat::Auto, false).unwrap();
        assert!(prepared.alpha);
        assert_eq!(prepared.image.as_raw().as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn padding_keeps_original_size() {
        let data = ImageData::solid(3, 5, [255, 0, 0, 255]);
        let prepared = prepare_pixels(&data, TexFormat::Rgba, true).unwrap();
        assert_eq!(prepared.image.dimensions(), (4, 8));
        assert_eq!(prepared.original_size, (3, 5));
        assert_eq!(prepared.image.get_pixel(2, 4).0, [255, 0, 0, 255]);
        assert_eq!(prepared.image.get_pixel(3, 7).0, [0, 0, 0, 0]);
    }

    #[test]
    fn malformed_data_is_rejected() {
        let short = ImageData::rgba(2, 2, vec![0; 3]);
        assert!(prepare_pixels(&short, TexFormat::Auto, false).is_none());

        let mismatched = ImageData::new(1, 1, 3, vec![0; 3]);
        assert!(prepare_pixels(&mismatched, TexFormat::Rgba, false).is_none());
    }

    #[test]
    fn sizes_that_overflow_are_malformed() {
        assert_eq!(byte_len(u32::MAX, u32::MAX, 4), None);
        assert!(!ImageData::new(65536, 65536, 4, vec![0; 16]).is_well_formed());
        assert!(ImageData::solid(u32::MAX, u32::MAX, [0; 4]).pixels.is_empty());
    }

    #[test]
    fn padding_past_the_largest_power_of_two_fails() {
        let wide = RgbaImage::new((1 << 31) + 1, 0);
        assert!(pad_to_pot(wide).is_none());
    }

    #[test]
    fn textures_compare_by_handle() {
        let a = Texture {
            handle: Some(TextureHandle(7)),
            size: (4, 4),
            ..Texture::default()
        };
        let b = Texture {
            handle: Some(TextureHandle(7)),
            size: (8, 8),
            ..Texture::default()
        };
        assert_eq!(a, b);
        assert_ne!(a, Texture::invalid());
        assert!(!Texture::invalid().is_valid());
    }

    #[test]
    fn depth_bits_fall_back_to_24() {
        assert_eq!(normalize_depth_bits(16), 16);
        assert_eq!(normalize_depth_bits(32), 32);
        assert_eq!(normalize_depth_bits(8), 24);
    }
}
