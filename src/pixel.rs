//! Pixel vectors exchanged with the device.
//!
//! Colour images travel as one `PixelVector` (OpenCL `float4`) per pixel in
//! alpha, red, green, blue order; grayscale images as one `f32` per pixel.
//! Both are row-major with `index = y * width + x` and channels in [0, 1].

use bytemuck::{Pod, Zeroable};
use image::{GrayImage, Luma, Rgba, RgbaImage};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct PixelVector {
    pub a: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl PixelVector {
    pub fn new(a: f32, r: f32, g: f32, b: f32) -> Self {
        PixelVector { a, r, g, b }
    }

    pub fn channels(&self) -> [f32; 4] {
        [self.a, self.r, self.g, self.b]
    }
}

fn byte_to_unit(v: u8) -> f32 {
    (v as f32 / 255.0).clamp(0.0, 1.0)
}

fn unit_to_byte(v: f32) -> u8 {
    // NaN saturates to 0 through the cast.
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

impl From<Rgba<u8>> for PixelVector {
    fn from(pixel: Rgba<u8>) -> Self {
        let [r, g, b, a] = pixel.0;
        PixelVector::new(
            byte_to_unit(a),
            byte_to_unit(r),
            byte_to_unit(g),
            byte_to_unit(b),
        )
    }
}

impl From<PixelVector> for Rgba<u8> {
    fn from(pixel: PixelVector) -> Self {
        Rgba([
            unit_to_byte(pixel.r),
            unit_to_byte(pixel.g),
            unit_to_byte(pixel.b),
            unit_to_byte(pixel.a),
        ])
    }
}

pub fn rgba_to_vectors(image: &RgbaImage) -> Vec<PixelVector> {
    // `pixels()` walks rows top to bottom, left to right.
    image.pixels().map(|p| PixelVector::from(*p)).collect()
}

/// Rebuild an image from `width * height` vectors.
///
/// # Panics
/// Panics if `data` holds fewer than `width * height` vectors.
pub fn vectors_to_rgba(data: &[PixelVector], width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba::from(data[(y * width + x) as usize])
    })
}

pub fn luma_to_floats(image: &GrayImage) -> Vec<f32> {
    image.pixels().map(|p| byte_to_unit(p.0[0])).collect()
}

/// # Panics
/// Panics if `data` holds fewer than `width * height` values.
pub fn floats_to_luma(data: &[f32], width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        Luma([unit_to_byte(data[(y * width + x) as usize])])
    })
}
