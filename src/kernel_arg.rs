//! Positional kernel arguments.
//!
//! A `KernelArg` is either a scalar bound by value or a device buffer bound
//! by reference. The bound size of a buffer argument is the width of the
//! `cl_mem` handle itself, never the size of the buffer's contents.

use crate::backend::RawBuffer;
use crate::context::DeviceBuffer;
use std::ffi::c_void;
use std::mem::size_of;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Float(f32),
    Double(f64),
    Buffer(RawBuffer),
}

impl KernelArg {
    /// Number of bytes handed to `clSetKernelArg` for this argument.
    pub fn size(&self) -> usize {
        match self {
            KernelArg::Int(_) => size_of::<i32>(),
            KernelArg::UInt(_) => size_of::<u32>(),
            KernelArg::Long(_) => size_of::<i64>(),
            KernelArg::ULong(_) => size_of::<u64>(),
            KernelArg::Float(_) => size_of::<f32>(),
            KernelArg::Double(_) => size_of::<f64>(),
            KernelArg::Buffer(_) => size_of::<*mut c_void>(),
        }
    }
}

macro_rules! scalar_arg {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for KernelArg {
                fn from(value: $ty) -> Self {
                    KernelArg::$variant(value)
                }
            }
        )*
    };
}

scalar_arg! {
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

impl<T> From<&DeviceBuffer<T>> for KernelArg {
    fn from(buffer: &DeviceBuffer<T>) -> Self {
        KernelArg::Buffer(buffer.raw())
    }
}
