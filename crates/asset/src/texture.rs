//! Decoded image data in a CPU-friendly format before GPU upload.

use image::{RgbaImage, imageops};

use crate::error::{AssetError, AssetResult};

#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Supported texture formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
}

impl TextureData {
    /// Wrap raw RGBA8 pixels, rejecting buffers that don't match the size.
    pub fn new_rgba8(width: u32, height: u32, data: Vec<u8>) -> AssetResult<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(AssetError::Image(format!(
                "{}x{} RGBA8 needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format: TextureFormat::Rgba8,
        })
    }

    /// Decode an encoded image (PNG, JPEG, PNM) into RGBA8.
    pub fn from_encoded(bytes: &[u8]) -> AssetResult<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| AssetError::Image(e.to_string()))?;
        Ok(Self::from_image(img.to_rgba8()))
    }

    fn from_image(rgba: RgbaImage) -> Self {
        let (width, height) = rgba.dimensions();
        Self {
            data: rgba.into_raw(),
            width,
            height,
            format: TextureFormat::Rgba8,
        }
    }

    fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Copy with rows in reverse order (GL-style bottom-left origin).
    pub fn flipped_vertically(&self) -> Self {
        match self.to_image() {
            Some(img) => Self::from_image(imageops::flip_vertical(&img)),
            None => self.clone(),
        }
    }

    /// Full mip chain below level 0, each level half the previous (min 1px),
    /// down to 1x1. Filtered with a triangle kernel.
    pub fn mip_chain(&self) -> Vec<TextureData> {
        let Some(base) = self.to_image() else {
            return Vec::new();
        };
        let mut levels = Vec::new();
        let (mut w, mut h) = (self.width, self.height);
        let mut prev = base;
        while w > 1 || h > 1 {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            let next = imageops::resize(&prev, w, h, imageops::FilterType::Triangle);
            levels.push(Self::from_image(next.clone()));
            prev = next;
        }
        levels
    }

    /// Number of mip levels including level 0.
    pub fn mip_level_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }

    /// Get the number of bytes per pixel for the format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self.format {
            TextureFormat::Rgba8 => 4,
        }
    }

    /// Check if the texture data is valid.
    pub fn is_valid(&self) -> bool {
        let expected_size =
            self.width as usize * self.height as usize * self.bytes_per_pixel() as usize;
        self.data.len() == expected_size && self.width > 0 && self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rows() -> TextureData {
        TextureData::new_rgba8(1, 2, vec![255, 0, 0, 255, 0, 0, 255, 255]).expect("valid")
    }

    #[test]
    fn rejects_size_mismatch() {
        assert!(TextureData::new_rgba8(2, 2, vec![0; 15]).is_err());
        assert!(TextureData::new_rgba8(0, 0, vec![]).is_err());
    }

    #[test]
    fn flip_swaps_rows() {
        let flipped = two_rows().flipped_vertically();
        assert_eq!(&flipped.data[..4], &[0, 0, 255, 255]);
        assert_eq!(&flipped.data[4..], &[255, 0, 0, 255]);
    }

    #[test]
    fn mip_chain_halves_to_one_pixel() {
        let checker: Vec<u8> = (0..16 * 16)
            .flat_map(|i| {
                if (i % 16 / 4 + i / 64) % 2 == 0 {
                    [255u8; 4]
                } else {
                    [128, 128, 128, 255]
                }
            })
            .collect();
        let tex = TextureData::new_rgba8(16, 16, checker).expect("valid");
        let chain = tex.mip_chain();
        let sizes: Vec<_> = chain.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(sizes, vec![(8, 8), (4, 4), (2, 2), (1, 1)]);
        assert_eq!(tex.mip_level_count() as usize, chain.len() + 1);
        assert!(chain.iter().all(TextureData::is_valid));

        let tall = two_rows();
        assert_eq!(tall.mip_chain().len(), 1);
        assert_eq!(tall.mip_level_count(), 2);
    }

    #[test]
    fn decodes_ascii_ppm() {
        let ppm = b"P3\n2 1\n255\n255 0 0  0 255 0\n";
        let tex = TextureData::from_encoded(ppm).expect("decode ppm");
        assert_eq!((tex.width, tex.height), (2, 1));
        assert_eq!(tex.data, vec![255, 0, 0, 255, 0, 255, 0, 255]);
    }

    #[test]
    fn huge_dimensions_do_not_wrap() {
        // 65536 * 65536 * 4 wraps to 0 in u32.
        let tex = TextureData {
            data: Vec::new(),
            width: 65536,
            height: 65536,
            format: TextureFormat::Rgba8,
        };
        assert!(!tex.is_valid());
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            TextureData::from_encoded(b"not an image"),
            Err(AssetError::Image(_))
        ));
    }
}
