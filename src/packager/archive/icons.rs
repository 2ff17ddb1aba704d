//! Icon conversion to platform icon containers.
//!
//! The source image is decoded once and squared onto a single RGBA surface.
//! Every size variant is resampled from that surface, so a conversion never
//! creates more than one drawing surface.

use crate::packager::error::{Error, Result};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops::FilterType};
use std::io::Cursor;

/// Sizes written to `.ico` files.
pub const ICO_SIZES: [u32; 7] = [16, 24, 32, 48, 64, 128, 256];

/// Sizes written to `.icns` files.
pub const ICNS_SIZES: [u32; 7] = [16, 32, 64, 128, 256, 512, 1024];

/// Edge length of generated PNG icons and default icons.
pub const PNG_SIZE: u32 = 512;

/// A decoded icon ready for conversion.
pub struct Icon {
    surface: RgbaImage,
}

impl Icon {
    /// Decodes a raster image (PNG, JPEG, ...).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedImage`] if the bytes cannot be decoded.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::UnsupportedImage(e.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::UnsupportedImage("image has no pixels".into()));
        }
        Ok(Self::from_image(image))
    }

    /// Creates a plain icon from the background and accent colors.
    pub fn generated(background: [u8; 3], accent: [u8; 3]) -> Self {
        let [r, g, b] = background;
        let mut surface = RgbaImage::from_pixel(PNG_SIZE, PNG_SIZE, Rgba([r, g, b, 255]));
        let [r, g, b] = accent;
        let inset = PNG_SIZE / 4;
        for y in inset..PNG_SIZE - inset {
            for x in inset..PNG_SIZE - inset {
                surface.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
        Self { surface }
    }

    fn from_image(image: DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let edge = rgba.width().max(rgba.height());
        if rgba.width() == rgba.height() {
            return Self { surface: rgba };
        }
        let mut surface = RgbaImage::from_pixel(edge, edge, Rgba([0, 0, 0, 0]));
        let x = i64::from((edge - rgba.width()) / 2);
        let y = i64::from((edge - rgba.height()) / 2);
        image::imageops::overlay(&mut surface, &rgba, x, y);
        Self { surface }
    }

    /// Edge length of the squared source.
    pub fn resolution(&self) -> u32 {
        self.surface.width()
    }

    fn render(&self, size: u32) -> RgbaImage {
        if size == self.resolution() {
            return self.surface.clone();
        }
        image::imageops::resize(&self.surface, size, size, FilterType::Lanczos3)
    }

    /// Encodes a PNG no larger than `max_size` and never upscaled.
    pub fn to_png(&self, max_size: u32) -> Result<Vec<u8>> {
        let size = max_size.min(self.resolution());
        let mut out = Cursor::new(Vec::new());
        self.render(size).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Encodes a Windows `.ico` container.
    pub fn to_ico(&self) -> Result<Vec<u8>> {
        let mut dir = ico::IconDir::new(ico::ResourceType::Icon);
        for size in supported_sizes(&ICO_SIZES, self.resolution()) {
            let image = ico::IconImage::from_rgba_data(size, size, self.render(size).into_raw());
            let entry = ico::IconDirEntry::encode(&image)
                .map_err(|e| Error::GenericError(format!("encoding {size}px ico entry: {e}")))?;
            dir.add_entry(entry);
        }
        let mut out = Vec::new();
        dir.write(&mut out)?;
        Ok(out)
    }

    /// Encodes a macOS `.icns` container.
    pub fn to_icns(&self) -> Result<Vec<u8>> {
        let mut family = icns::IconFamily::new();
        for size in supported_sizes(&ICNS_SIZES, self.resolution()) {
            let image =
                icns::Image::from_data(icns::PixelFormat::RGBA, size, size, self.render(size).into_raw())
                    .map_err(|e| Error::GenericError(format!("building {size}px icns image: {e}")))?;
            family
                .add_icon_with_type(&image, icns_type(size))
                .map_err(|e| Error::GenericError(format!("encoding {size}px icns entry: {e}")))?;
        }
        let mut out = Vec::new();
        family.write(&mut out)?;
        Ok(out)
    }
}

fn icns_type(size: u32) -> icns::IconType {
    match size {
        16 => icns::IconType::RGBA32_16x16,
        32 => icns::IconType::RGBA32_32x32,
        64 => icns::IconType::RGBA32_64x64,
        128 => icns::IconType::RGBA32_128x128,
        256 => icns::IconType::RGBA32_256x256,
        512 => icns::IconType::RGBA32_512x512,
        _ => icns::IconType::RGBA32_512x512_2x,
    }
}

/// Sizes from `sizes` (ascending) that `resolution` can fill without
/// upscaling. The smallest size is always kept as a fallback.
pub fn supported_sizes(sizes: &[u32], resolution: u32) -> Vec<u32> {
    let mut chosen: Vec<u32> = sizes.iter().copied().filter(|&s| s <= resolution).collect();
    if chosen.is_empty() {
        chosen.extend(sizes.first());
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn never_upscales_beyond_source() {
        assert_eq!(supported_sizes(&ICO_SIZES, 48), vec![16, 24, 32, 48]);
        assert_eq!(supported_sizes(&ICNS_SIZES, 2048).len(), ICNS_SIZES.len());
    }

    #[test]
    fn tiny_source_keeps_smallest_size() {
        assert_eq!(supported_sizes(&ICO_SIZES, 8), vec![16]);
    }

    #[test]
    fn undecodable_bytes_are_unsupported() {
        let err = Icon::decode(b"definitely not an image").err().unwrap();
        assert!(matches!(err, Error::UnsupportedImage(_)));
    }

    #[test]
    fn non_square_sources_are_padded() {
        let icon = Icon::decode(&png(64, 32)).unwrap();
        assert_eq!(icon.resolution(), 64);
    }

    #[test]
    fn ico_contains_one_entry_per_supported_size() {
        let icon = Icon::decode(&png(64, 64)).unwrap();
        let bytes = icon.to_ico().unwrap();
        let dir = ico::IconDir::read(Cursor::new(bytes)).unwrap();
        let sizes: Vec<u32> = dir.entries().iter().map(|e| e.width()).collect();
        assert_eq!(sizes, vec![16, 24, 32, 48, 64]);
    }

    #[test]
    fn icns_is_readable() {
        let icon = Icon::decode(&png(128, 128)).unwrap();
        let bytes = icon.to_icns().unwrap();
        let family = icns::IconFamily::read(Cursor::new(bytes)).unwrap();
        assert_eq!(family.available_icons().len(), 4);
    }

    #[test]
    fn png_output_is_capped_at_source_size() {
        let icon = Icon::decode(&png(40, 40)).unwrap();
        let out = image::load_from_memory(&icon.to_png(PNG_SIZE).unwrap()).unwrap();
        assert_eq!(out.width(), 40);
    }

    #[test]
    fn generated_icon_is_full_size() {
        let icon = Icon::generated([0, 0, 0], [255, 76, 76]);
        assert_eq!(icon.resolution(), PNG_SIZE);
    }
}
