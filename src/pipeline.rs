//! Gaussian blur pipeline.
//!
//! The separable variant runs one kernel twice: a column pass (axis 1) and a
//! row pass (axis 2). Between the passes the intermediate result is read back
//! to the host and uploaded again as a fresh read-only buffer; the pass-1
//! input buffer is never reused. Every dispatch and read blocks, so each
//! stage has fully completed on the device before the next begins.

use crate::backend::{AccessMode, ComputeBackend};
use crate::context::{CompiledKernel, DeviceBuffer, DeviceContext};
use crate::error::{DeviceError, Result};
use crate::kernel_arg::KernelArg;
use crate::pixel::{PixelVector, floats_to_luma, luma_to_floats, rgba_to_vectors, vectors_to_rgba};
use bytemuck::Pod;
use image::DynamicImage;
use std::path::PathBuf;

/// Largest sigma a separable pass accepts. The window spans
/// `2 * ceil(3 * sigma) + 1` taps.
pub const MAX_SIGMA: f32 = 256.0;

/// Direction of a 1-D pass, as the kernel's `axis` argument expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Column,
    Row,
}

impl Axis {
    pub fn flag(self) -> i32 {
        match self {
            Axis::Column => 1,
            Axis::Row => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    /// One `float` per pixel.
    Gray,
    /// One `float4` (A, R, G, B) per pixel.
    Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassMode {
    /// `(in, out, width, height)`, 2-D window in one dispatch.
    Single,
    /// `(in, out, width, height, sigma, axis)`, column pass then row pass.
    Separable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlurVariant {
    pub channels: Channels,
    pub passes: PassMode,
    pub entry_point: String,
}

impl BlurVariant {
    /// The entry point in `kernels/gaussian_blur.cl` for this combination.
    pub fn new(channels: Channels, passes: PassMode) -> Self {
        let entry_point = match (channels, passes) {
            (Channels::Color, PassMode::Separable) => "gaussian_blur",
            (Channels::Gray, PassMode::Separable) => "gaussian_blur_gray",
            (Channels::Color, PassMode::Single) => "gaussian_blur_2d",
            (Channels::Gray, PassMode::Single) => "gaussian_blur_2d_gray",
        };
        BlurVariant {
            channels,
            passes,
            entry_point: entry_point.to_string(),
        }
    }
}

impl Default for BlurVariant {
    fn default() -> Self {
        Self::new(Channels::Color, PassMode::Separable)
    }
}

/// Configuration for a blur run
#[derive(Debug, Clone)]
pub struct BlurConfig {
    /// Path of the OpenCL source, compiled on every run
    pub kernel_source: PathBuf,
    /// Spatial spread, passed through to the kernel untouched
    pub sigma: f32,
    pub variant: BlurVariant,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            kernel_source: PathBuf::from("kernels/gaussian_blur.cl"),
            sigma: 1.0,
            variant: BlurVariant::default(),
        }
    }
}

/// Blur `pixels` (`width * height` elements, row-major) on the device.
///
/// `T` is the per-pixel element the kernel was written for: `f32` for the
/// gray entry points, [`PixelVector`] for the colour ones.
pub fn blur_pixels<T: Pod, B: ComputeBackend>(
    ctx: &mut DeviceContext<B>,
    config: &BlurConfig,
    pixels: &[T],
    width: u32,
    height: u32,
) -> Result<Vec<T>> {
    let count = width as usize * height as usize;
    if pixels.len() != count {
        return Err(DeviceError::HostDataLength {
            expected: count,
            actual: pixels.len(),
        });
    }

    if config.variant.passes == PassMode::Separable
        && !(config.sigma.is_finite() && config.sigma <= MAX_SIGMA)
    {
        return Err(DeviceError::Sigma {
            sigma: config.sigma,
            max: MAX_SIGMA,
        });
    }

    let kernel = ctx.compile_kernel(&config.kernel_source, &config.variant.entry_point)?;

    log::info!("Uploading {}x{} image ({} pixels)", width, height, count);
    let input = ctx.allocate_buffer(AccessMode::ReadOnly, count, Some(pixels))?;
    let output = ctx.allocate_buffer::<T>(AccessMode::WriteOnly, count, None)?;

    let pass = Pass {
        kernel,
        width,
        height,
    };

    match config.variant.passes {
        PassMode::Single => {
            log::info!("Running single-pass blur");
            pass.run(ctx, &input, &output, &[])?;
        }
        PassMode::Separable => {
            log::info!("Running column-wise pass (sigma {})", config.sigma);
            let tail = [KernelArg::from(config.sigma), Axis::Column.flag().into()];
            pass.run(ctx, &input, &output, &tail)?;

            let columns = ctx.read_buffer(&output, count)?;
            let intermediate =
                ctx.allocate_buffer(AccessMode::ReadOnly, count, Some(columns.as_slice()))?;

            log::info!("Running row-wise pass (sigma {})", config.sigma);
            let tail = [KernelArg::from(config.sigma), Axis::Row.flag().into()];
            pass.run(ctx, &intermediate, &output, &tail)?;
        }
    }

    let result = ctx.read_buffer(&output, count)?;
    log::info!("Read back {} pixels", result.len());
    Ok(result)
}

/// One blocking dispatch over the full `width x height` index space.
struct Pass {
    kernel: CompiledKernel,
    width: u32,
    height: u32,
}

impl Pass {
    fn run<T, B: ComputeBackend>(
        &self,
        ctx: &mut DeviceContext<B>,
        input: &DeviceBuffer<T>,
        output: &DeviceBuffer<T>,
        tail: &[KernelArg],
    ) -> Result<()> {
        // The kernel keeps earlier bindings, so every position is rebound.
        let mut args = vec![
            KernelArg::from(input),
            KernelArg::from(output),
            KernelArg::from(self.width as i32),
            KernelArg::from(self.height as i32),
        ];
        args.extend_from_slice(tail);
        let global = [self.width as usize, self.height as usize];
        ctx.dispatch(&self.kernel, 2, &global, true, &args)
    }
}

/// Decode-side adapter: converts `image` to the variant's pixel layout, blurs
/// it and converts the result back.
pub fn blur_image<B: ComputeBackend>(
    ctx: &mut DeviceContext<B>,
    config: &BlurConfig,
    image: &DynamicImage,
) -> Result<DynamicImage> {
    let (width, height) = (image.width(), image.height());
    match config.variant.channels {
        Channels::Color => {
            let pixels: Vec<PixelVector> = rgba_to_vectors(&image.to_rgba8());
            let blurred = blur_pixels(ctx, config, &pixels, width, height)?;
            Ok(DynamicImage::ImageRgba8(vectors_to_rgba(&blurred, width, height)))
        }
        Channels::Gray => {
            let pixels = luma_to_floats(&image.to_luma8());
            let blurred = blur_pixels(ctx, config, &pixels, width, height)?;
            Ok(DynamicImage::ImageLuma8(floats_to_luma(&blurred, width, height)))
        }
    }
}
