//! OpenCL implementation of [`ComputeBackend`] on top of `opencl3`.

use crate::backend::{AccessMode, ComputeBackend, RawBuffer, RawKernel};
use crate::error::{DeviceError, DeviceOp, Result};
use crate::kernel_arg::KernelArg;
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{CL_DEVICE_TYPE_ALL, Device};
use opencl3::error_codes::{
    CL_DEVICE_NOT_FOUND, CL_INVALID_COMMAND_QUEUE, CL_INVALID_CONTEXT, CL_INVALID_KERNEL,
    CL_INVALID_MEM_OBJECT, CL_INVALID_VALUE, ClError,
};
use opencl3::kernel::Kernel;
use opencl3::memory::{
    Buffer, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY, ClMem,
};
use opencl3::platform::{Platform, get_platforms};
use opencl3::program::Program;
use opencl3::types::{CL_BLOCKING, cl_mem_flags, cl_uint};
use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::ptr;

/// `cl_khr_icd`: the ICD loader found no platform.
const CL_PLATFORM_NOT_FOUND_KHR: i32 = -1001;

/// Which platform and device to run on.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelection {
    /// OpenCL platform index (0 for the first platform)
    pub platform_index: usize,
    /// Device index within the platform (0 for the first device)
    pub device_index: usize,
}

/// One device, one context and one in-order command queue.
///
/// opencl3 handles release their OpenCL object when dropped, so releasing a
/// resource here means dropping the handle that owns it.
pub struct OpenClBackend {
    device: Device,
    device_name: String,
    max_work_group_size: usize,
    context: Option<Context>,
    queue: Option<CommandQueue>,
    buffers: HashMap<u64, Buffer<u8>>,
    kernels: HashMap<u64, Kernel>,
    next_id: u64,
}

/// Name, vendor and limits of one device, as `--list-devices` prints them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub vendor: String,
    pub global_mem_size: u64,
    pub max_work_group_size: usize,
}

impl DeviceSummary {
    /// Query `device`, falling back to placeholders for unanswered fields.
    pub fn query(device: &Device) -> Self {
        DeviceSummary {
            name: device
                .name()
                .unwrap_or_else(|_| "Unknown Device".to_string()),
            vendor: device
                .vendor()
                .unwrap_or_else(|_| "Unknown Vendor".to_string()),
            global_mem_size: device.global_mem_size().unwrap_or(0),
            max_work_group_size: device.max_work_group_size().unwrap_or(0),
        }
    }
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - Memory: {} MB - Max work-group size: {}",
            self.name,
            self.vendor,
            self.global_mem_size / (1024 * 1024),
            self.max_work_group_size
        )
    }
}

/// Every installed platform.
pub fn platforms() -> Result<Vec<Platform>> {
    get_platforms().map_err(platform_error)
}

fn platform_error(e: ClError) -> DeviceError {
    if e.0 == CL_PLATFORM_NOT_FOUND_KHR {
        DeviceError::NoPlatform
    } else {
        DeviceError::status(DeviceOp::EnumeratePlatforms, e)
    }
}

/// Devices of any type on `platform`, empty when it has none.
pub fn platform_devices(platform: &Platform) -> Result<Vec<Device>> {
    match platform.get_devices(CL_DEVICE_TYPE_ALL) {
        Ok(ids) => Ok(ids.into_iter().map(Device::new).collect()),
        Err(e) if e.0 == CL_DEVICE_NOT_FOUND => Ok(Vec::new()),
        Err(e) => Err(DeviceError::status(DeviceOp::EnumerateDevices, e)),
    }
}

impl OpenClBackend {
    /// Select the requested platform and device. There is no fallback: a
    /// missing platform or device is reported as such.
    pub fn new(selection: &DeviceSelection) -> Result<Self> {
        let platforms = platforms().inspect_err(|e| {
            log::error!("Error: No OpenCL platform available! ({})", e);
        })?;

        let platform = platforms.get(selection.platform_index).ok_or_else(|| {
            log::error!(
                "Error: No OpenCL platform available at index {} ({} found)",
                selection.platform_index,
                platforms.len()
            );
            DeviceError::NoPlatform
        })?;
        let platform_name = platform
            .name()
            .unwrap_or_else(|_| "Unknown Platform".to_string());

        let device = platform_devices(platform)?
            .into_iter()
            .nth(selection.device_index)
            .ok_or_else(|| {
                log::error!(
                    "Error: No OpenCL device available for platform '{}' at index {}",
                    platform_name,
                    selection.device_index
                );
                DeviceError::NoDevice {
                    platform: platform_name.clone(),
                }
            })?;

        let summary = DeviceSummary::query(&device);
        let max_work_group_size = device
            .max_work_group_size()
            .map_err(|e| DeviceError::status(DeviceOp::QueryDevice, e))?;

        let context = Context::from_device(&device)
            .map_err(|e| DeviceError::status(DeviceOp::CreateContext, e))?;
        // No out-of-order flag: commands run in submission order.
        let queue = CommandQueue::create_default_with_properties(&context, 0, 0)
            .map_err(|e| DeviceError::status(DeviceOp::CreateQueue, e))?;

        log::info!("Using OpenCL device {} on platform '{}'", summary, platform_name);

        Ok(OpenClBackend {
            device,
            device_name: summary.name,
            max_work_group_size,
            context: Some(context),
            queue: Some(queue),
            buffers: HashMap::new(),
            kernels: HashMap::new(),
            next_id: 1,
        })
    }

    fn context(&self, op: DeviceOp) -> Result<&Context> {
        self.context
            .as_ref()
            .ok_or(DeviceError::status(op, ClError(CL_INVALID_CONTEXT)))
    }

    fn queue(&self, op: DeviceOp) -> Result<&CommandQueue> {
        self.queue
            .as_ref()
            .ok_or(DeviceError::status(op, ClError(CL_INVALID_COMMAND_QUEUE)))
    }

    fn buffer(&self, raw: RawBuffer, op: DeviceOp) -> Result<&Buffer<u8>> {
        self.buffers
            .get(&raw.0)
            .ok_or(DeviceError::status(op, ClError(CL_INVALID_MEM_OBJECT)))
    }

    fn kernel(&self, raw: RawKernel, op: DeviceOp) -> Result<&Kernel> {
        self.kernels
            .get(&raw.0)
            .ok_or(DeviceError::status(op, ClError(CL_INVALID_KERNEL)))
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl ComputeBackend for OpenClBackend {
    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    fn create_buffer(
        &mut self,
        access: AccessMode,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawBuffer> {
        let op = DeviceOp::CreateBuffer;
        let mut flags: cl_mem_flags = match access {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        };
        let host_ptr = match host_data {
            // The driver copies `size` bytes from the pointer.
            Some(data) if data.len() != size => {
                return Err(DeviceError::status(op, ClError(CL_INVALID_VALUE)));
            }
            Some(data) => {
                flags |= CL_MEM_COPY_HOST_PTR;
                data.as_ptr() as *mut c_void
            }
            None => ptr::null_mut(),
        };

        let context = self.context(op)?;
        let buffer = unsafe { Buffer::<u8>::create(context, flags, size, host_ptr) }
            .map_err(|e| DeviceError::status(op, e))?;

        let id = self.next_id();
        self.buffers.insert(id, buffer);
        Ok(RawBuffer(id))
    }

    fn read_buffer(&mut self, buffer: RawBuffer, dst: &mut [u8]) -> Result<()> {
        let op = DeviceOp::ReadBuffer;
        let queue = self.queue(op)?;
        let buffer = self.buffer(buffer, op)?;
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, dst, &[]) }
            .map_err(|e| DeviceError::status(op, e))?;
        Ok(())
    }

    fn build_kernel(&mut self, source: &str, entry_point: &str) -> Result<RawKernel> {
        let context = self.context(DeviceOp::CreateProgram)?;
        let mut program = Program::create_from_source(context, source)
            .map_err(|e| DeviceError::status(DeviceOp::CreateProgram, e))?;

        if let Err(e) = program.build(&[self.device.id()], "") {
            let log = program
                .get_build_log(self.device.id())
                .map_err(|e| DeviceError::status(DeviceOp::BuildProgram, e))?;
            log::debug!("clBuildProgram returned {}", e);
            return Err(DeviceError::Build {
                entry_point: entry_point.to_string(),
                log,
            });
        }

        let kernel = Kernel::create(&program, entry_point)
            .map_err(|e| DeviceError::status(DeviceOp::CreateKernel, e))?;
        // The kernel retains what it needs; the program goes now.
        drop(program);

        let id = self.next_id();
        self.kernels.insert(id, kernel);
        Ok(RawKernel(id))
    }

    fn set_kernel_arg(&mut self, kernel: RawKernel, index: u32, arg: &KernelArg) -> Result<()> {
        let op = DeviceOp::SetKernelArg { index };
        let target = self.kernel(kernel, op)?;
        let result = unsafe {
            match arg {
                KernelArg::Int(v) => target.set_arg(index, v),
                KernelArg::UInt(v) => target.set_arg(index, v),
                KernelArg::Long(v) => target.set_arg(index, v),
                KernelArg::ULong(v) => target.set_arg(index, v),
                KernelArg::Float(v) => target.set_arg(index, v),
                KernelArg::Double(v) => target.set_arg(index, v),
                KernelArg::Buffer(raw) => {
                    let mem = self.buffer(*raw, op)?.get();
                    target.set_arg(index, &mem)
                }
            }
        };
        result.map_err(|e| DeviceError::status(op, e))
    }

    fn enqueue_kernel(&mut self, kernel: RawKernel, global_work_shape: &[usize]) -> Result<()> {
        let op = DeviceOp::EnqueueKernel;
        let queue = self.queue(op)?;
        let kernel = self.kernel(kernel, op)?;
        // Null local size: the driver partitions work-groups itself.
        unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                global_work_shape.len() as cl_uint,
                ptr::null(),
                global_work_shape.as_ptr(),
                ptr::null(),
                &[],
            )
        }
        .map_err(|e| DeviceError::status(op, e))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.queue(DeviceOp::Finish)?
            .finish()
            .map_err(|e| DeviceError::status(DeviceOp::Finish, e))
    }

    fn release_queue(&mut self) -> Result<()> {
        self.queue
            .take()
            .map(drop)
            .ok_or(DeviceError::status(DeviceOp::ReleaseQueue, ClError(CL_INVALID_COMMAND_QUEUE)))
    }

    fn release_context(&mut self) -> Result<()> {
        self.context
            .take()
            .map(drop)
            .ok_or(DeviceError::status(DeviceOp::ReleaseContext, ClError(CL_INVALID_CONTEXT)))
    }

    fn release_buffer(&mut self, buffer: RawBuffer) -> Result<()> {
        self.buffers
            .remove(&buffer.0)
            .map(drop)
            .ok_or(DeviceError::status(DeviceOp::ReleaseBuffer, ClError(CL_INVALID_MEM_OBJECT)))
    }

    fn release_kernel(&mut self, kernel: RawKernel) -> Result<()> {
        self.kernels
            .remove(&kernel.0)
            .map(drop)
            .ok_or(DeviceError::status(DeviceOp::ReleaseKernel, ClError(CL_INVALID_KERNEL)))
    }
}
