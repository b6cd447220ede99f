//! OpenCL module for device selection and kernel execution
//!
//! This module handles interaction with the GPU via OpenCL,
//! including device selection, buffer allocation, program builds and
//! kernel dispatch on a single in-order command queue.

mod device;

pub use device::{
    DeviceSelection, DeviceSummary, OpenClBackend, platform_devices, platforms,
};
