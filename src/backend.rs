use crate::error::Result;
use crate::kernel_arg::KernelArg;

/// Backend-assigned identifier for a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBuffer(pub u64);

/// Backend-assigned identifier for a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawKernel(pub u64);

/// Device-side access mode of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    // Part of the buffer model; the blur pipeline only needs the other two.
    #[allow(dead_code)]
    ReadWrite,
}

/// Primitive device operations driven by [`crate::context::DeviceContext`].
///
/// A backend owns one context and one in-order command queue. It hands out
/// raw handles and never tracks their lifetime on the caller's behalf; the
/// context decides when each handle is released.
pub trait ComputeBackend {
    fn device_name(&self) -> &str;
    fn max_work_group_size(&self) -> usize;

    /// Allocate `size` bytes, copying `host_data` in when given.
    fn create_buffer(
        &mut self,
        access: AccessMode,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawBuffer>;

    /// Blocking read of `dst.len()` bytes from the start of `buffer`.
    fn read_buffer(&mut self, buffer: RawBuffer, dst: &mut [u8]) -> Result<()>;

    /// Compile `source` and extract `entry_point`. The intermediate program
    /// object does not outlive this call.
    fn build_kernel(&mut self, source: &str, entry_point: &str) -> Result<RawKernel>;

    fn set_kernel_arg(&mut self, kernel: RawKernel, index: u32, arg: &KernelArg) -> Result<()>;

    /// Enqueue over `global_work_shape` with a driver-chosen local size.
    fn enqueue_kernel(&mut self, kernel: RawKernel, global_work_shape: &[usize]) -> Result<()>;

    /// Block until every queued command has completed.
    fn finish(&mut self) -> Result<()>;

    fn release_queue(&mut self) -> Result<()>;
    fn release_context(&mut self) -> Result<()>;
    fn release_buffer(&mut self, buffer: RawBuffer) -> Result<()>;
    fn release_kernel(&mut self, kernel: RawKernel) -> Result<()>;
}
