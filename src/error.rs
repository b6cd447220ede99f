//! Error types for device resource management.
//!
//! Every failure reported by a compute backend carries the raw OpenCL status
//! it was produced with, so callers can tell an allocation failure from a
//! dispatch failure and still see the underlying driver code.

use opencl3::error_codes::ClError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

/// The device operation a status code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOp {
    EnumeratePlatforms,
    EnumerateDevices,
    QueryDevice,
    CreateContext,
    CreateQueue,
    CreateBuffer,
    ReadBuffer,
    CreateProgram,
    BuildProgram,
    CreateKernel,
    SetKernelArg { index: u32 },
    EnqueueKernel,
    Finish,
    ReleaseQueue,
    ReleaseContext,
    ReleaseBuffer,
    ReleaseKernel,
}

impl fmt::Display for DeviceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceOp::EnumeratePlatforms => write!(f, "clGetPlatformIDs"),
            DeviceOp::EnumerateDevices => write!(f, "clGetDeviceIDs"),
            DeviceOp::QueryDevice => write!(f, "clGetDeviceInfo"),
            DeviceOp::CreateContext => write!(f, "clCreateContext"),
            DeviceOp::CreateQueue => write!(f, "clCreateCommandQueue"),
            DeviceOp::CreateBuffer => write!(f, "clCreateBuffer"),
            DeviceOp::ReadBuffer => write!(f, "clEnqueueReadBuffer"),
            DeviceOp::CreateProgram => write!(f, "clCreateProgramWithSource"),
            DeviceOp::BuildProgram => write!(f, "clBuildProgram"),
            DeviceOp::CreateKernel => write!(f, "clCreateKernel"),
            DeviceOp::SetKernelArg { index } => write!(f, "clSetKernelArg(#{index})"),
            DeviceOp::EnqueueKernel => write!(f, "clEnqueueNDRangeKernel"),
            DeviceOp::Finish => write!(f, "clFinish"),
            DeviceOp::ReleaseQueue => write!(f, "clReleaseCommandQueue"),
            DeviceOp::ReleaseContext => write!(f, "clReleaseContext"),
            DeviceOp::ReleaseBuffer => write!(f, "clReleaseMemObject"),
            DeviceOp::ReleaseKernel => write!(f, "clReleaseKernel"),
        }
    }
}

/// Failures surfaced by the device resource context and its backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No platform at the requested index (or none installed at all).
    #[error("no OpenCL platform available")]
    NoPlatform,

    /// The selected platform exposes no device at the requested index.
    #[error("no OpenCL device available for platform '{platform}'")]
    NoDevice { platform: String },

    /// The kernel source failed to compile for the selected device. The
    /// compiler output is kept in `log` and printed once, where the build
    /// fails.
    #[error("failed to build kernel '{entry_point}'")]
    Build { entry_point: String, log: String },

    #[error("failed to read kernel source {}: {source}", .path.display())]
    KernelSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A device call returned a non-success status.
    #[error("{op} failed: {status} ({})", .status.0)]
    Status { op: DeviceOp, status: ClError },

    #[error("read of {requested} elements exceeds buffer capacity of {capacity}")]
    ReadOutOfBounds { requested: usize, capacity: usize },

    #[error("host data holds {actual} elements, expected {expected}")]
    HostDataLength { expected: usize, actual: usize },

    #[error("global work shape {shape:?} does not match {dimensions} dimension(s)")]
    WorkShape { dimensions: u32, shape: Vec<usize> },

    /// Sigma outside what a kernel window can cover.
    #[error("sigma {sigma} is not a usable blur radius (finite, at most {max})")]
    Sigma { sigma: f32, max: f32 },
}

impl DeviceError {
    pub fn status(op: DeviceOp, status: ClError) -> Self {
        DeviceError::Status { op, status }
    }

    /// Errors after which no pipeline can make progress: there is no device
    /// to fall back to and no kernel to run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::NoPlatform | DeviceError::NoDevice { .. } | DeviceError::Build { .. }
        )
    }

    /// The raw device status code, if this error came from a device call.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            DeviceError::Status { status, .. } => Some(status.0),
            _ => None,
        }
    }
}
