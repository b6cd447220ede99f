//! Host implementations of the entry points in `kernels/gaussian_blur.cl`.
//!
//! Same weights, border handling and work-item guards as the device code, so
//! the host device produces what a correct OpenCL run would.

use super::Memory;
use crate::backend::RawBuffer;
use crate::kernel_arg::KernelArg;
use crate::pipeline::MAX_SIGMA;
use opencl3::error_codes::{CL_INVALID_KERNEL_ARGS, CL_INVALID_MEM_OBJECT, ClError};
use std::ffi::c_void;
use std::mem::size_of;

/// Sigma baked into the single-pass entry points.
const SINGLE_PASS_SIGMA: f32 = 1.0;

/// Declared parameter type of a kernel argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Param {
    Buffer,
    Int,
    Float,
}

impl Param {
    pub(crate) fn size(self) -> usize {
        match self {
            Param::Buffer => size_of::<*mut c_void>(),
            Param::Int => size_of::<i32>(),
            Param::Float => size_of::<f32>(),
        }
    }
}

type KernelFn = fn(&[KernelArg], &[usize], &mut Memory) -> Result<(), ClError>;

#[derive(Clone, Copy)]
pub(crate) struct HostKernel {
    pub(crate) params: &'static [Param],
    pub(crate) run: KernelFn,
}

const SEPARABLE_PARAMS: &[Param] = &[
    Param::Buffer,
    Param::Buffer,
    Param::Int,
    Param::Int,
    Param::Float,
    Param::Int,
];
const SINGLE_PASS_PARAMS: &[Param] = &[Param::Buffer, Param::Buffer, Param::Int, Param::Int];

/// Entry points the host device knows how to run. Element width (float or
/// float4) is recovered from the buffer size, so the `_gray` variants share
/// an implementation with their colour counterparts.
pub(crate) fn lookup(entry_point: &str) -> Option<HostKernel> {
    match entry_point {
        "gaussian_blur" | "gaussian_blur_gray" => Some(HostKernel {
            params: SEPARABLE_PARAMS,
            run: separable_pass,
        }),
        "gaussian_blur_2d" | "gaussian_blur_2d_gray" => Some(HostKernel {
            params: SINGLE_PASS_PARAMS,
            run: single_pass,
        }),
        _ => None,
    }
}

/// Normalised 1-D Gaussian taps over `[-r, r]` with `r = ceil(3 * sigma)`.
/// A non-positive sigma gives the single-tap identity kernel; sigma is
/// clamped to [`MAX_SIGMA`], as the device code does.
pub fn gaussian_weights(sigma: f32) -> Vec<f32> {
    if !(sigma > 0.0) {
        return vec![1.0];
    }
    let sigma = sigma.min(MAX_SIGMA);
    let radius = (3.0 * sigma).ceil() as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut weights: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-d * d / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Geometry shared by both entry points.
struct Plane {
    width: usize,
    height: usize,
    channels: usize,
}

impl Plane {
    fn new(width: i32, height: i32, elements: usize) -> Result<Self, ClError> {
        let width = width.max(0) as usize;
        let height = height.max(0) as usize;
        let pixels = width * height;
        if pixels == 0 {
            return Ok(Plane {
                width,
                height,
                channels: 0,
            });
        }
        let channels = elements / pixels;
        if elements % pixels != 0 || channels == 0 || channels > 4 {
            return Err(ClError(CL_INVALID_KERNEL_ARGS));
        }
        Ok(Plane {
            width,
            height,
            channels,
        })
    }

    fn offset(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.channels
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

fn buffer_at(args: &[KernelArg], index: usize) -> Result<RawBuffer, ClError> {
    match args.get(index) {
        Some(KernelArg::Buffer(raw)) => Ok(*raw),
        _ => Err(ClError(CL_INVALID_MEM_OBJECT)),
    }
}

fn int_at(args: &[KernelArg], index: usize) -> Result<i32, ClError> {
    match args.get(index) {
        Some(KernelArg::Int(v)) => Ok(*v),
        Some(KernelArg::UInt(v)) => Ok(*v as i32),
        _ => Err(ClError(CL_INVALID_KERNEL_ARGS)),
    }
}

fn float_at(args: &[KernelArg], index: usize) -> Result<f32, ClError> {
    match args.get(index) {
        Some(KernelArg::Float(v)) => Ok(*v),
        _ => Err(ClError(CL_INVALID_KERNEL_ARGS)),
    }
}

fn extent(global: &[usize]) -> (usize, usize) {
    (global[0], global.get(1).copied().unwrap_or(1))
}

/// `gaussian_blur(in, out, width, height, sigma, axis)`.
fn separable_pass(args: &[KernelArg], global: &[usize], memory: &mut Memory) -> Result<(), ClError> {
    let input = buffer_at(args, 0)?;
    let output = buffer_at(args, 1)?;
    let sigma = float_at(args, 4)?;
    let axis = int_at(args, 5)?;

    let src = memory.floats(input)?;
    let mut dst = memory.floats(output)?;
    let plane = Plane::new(int_at(args, 2)?, int_at(args, 3)?, src.len())?;
    if dst.len() < src.len() {
        return Err(ClError(CL_INVALID_KERNEL_ARGS));
    }

    let weights = gaussian_weights(sigma);
    let radius = (weights.len() / 2) as isize;
    let (gx, gy) = extent(global);

    for y in 0..gy.min(plane.height) {
        for x in 0..gx.min(plane.width) {
            let at = plane.offset(x, y);
            for c in 0..plane.channels {
                dst[at + c] = match axis {
                    1 => weights
                        .iter()
                        .enumerate()
                        .map(|(k, w)| {
                            let sy = clamp_index(y as isize + k as isize - radius, plane.height);
                            w * src[plane.offset(x, sy) + c]
                        })
                        .sum::<f32>(),
                    2 => weights
                        .iter()
                        .enumerate()
                        .map(|(k, w)| {
                            let sx = clamp_index(x as isize + k as isize - radius, plane.width);
                            w * src[plane.offset(sx, y) + c]
                        })
                        .sum::<f32>(),
                    _ => src[at + c],
                };
            }
        }
    }

    memory.store(output, &dst)
}

/// `gaussian_blur_2d(in, out, width, height)`: full 2-D window, fixed sigma.
fn single_pass(args: &[KernelArg], global: &[usize], memory: &mut Memory) -> Result<(), ClError> {
    let input = buffer_at(args, 0)?;
    let output = buffer_at(args, 1)?;

    let src = memory.floats(input)?;
    let mut dst = memory.floats(output)?;
    let plane = Plane::new(int_at(args, 2)?, int_at(args, 3)?, src.len())?;
    if dst.len() < src.len() {
        return Err(ClError(CL_INVALID_KERNEL_ARGS));
    }

    let weights = gaussian_weights(SINGLE_PASS_SIGMA);
    let radius = (weights.len() / 2) as isize;
    let (gx, gy) = extent(global);

    for y in 0..gy.min(plane.height) {
        for x in 0..gx.min(plane.width) {
            let at = plane.offset(x, y);
            for c in 0..plane.channels {
                let mut acc = 0.0f32;
                for (ky, wy) in weights.iter().enumerate() {
                    let sy = clamp_index(y as isize + ky as isize - radius, plane.height);
                    for (kx, wx) in weights.iter().enumerate() {
                        let sx = clamp_index(x as isize + kx as isize - radius, plane.width);
                        acc += wy * wx * src[plane.offset(sx, sy) + c];
                    }
                }
                dst[at + c] = acc;
            }
        }
    }

    memory.store(output, &dst)
}
