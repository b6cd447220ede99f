//! Host reference device.
//!
//! A CPU stand-in for an OpenCL device with the same observable contract: an
//! in-order queue, zero-initialised buffers, stateful per-kernel argument
//! slots and OpenCL status codes on failure. Entry points are resolved
//! against host implementations in [`kernels`] rather than compiled.

mod kernels;

#[cfg(test)]
pub use kernels::gaussian_weights;

use crate::backend::{AccessMode, ComputeBackend, RawBuffer, RawKernel};
use crate::error::{DeviceError, DeviceOp, Result};
use crate::kernel_arg::KernelArg;
use kernels::{HostKernel, Param};
use opencl3::error_codes::{
    CL_INVALID_ARG_INDEX, CL_INVALID_ARG_SIZE, CL_INVALID_BUFFER_SIZE, CL_INVALID_COMMAND_QUEUE,
    CL_INVALID_CONTEXT, CL_INVALID_GLOBAL_WORK_SIZE, CL_INVALID_KERNEL, CL_INVALID_KERNEL_ARGS,
    CL_INVALID_KERNEL_NAME, CL_INVALID_MEM_OBJECT, CL_INVALID_OPERATION, CL_INVALID_VALUE,
    CL_INVALID_WORK_DIMENSION, ClError,
};
use std::collections::HashMap;

const HOST_DEVICE_NAME: &str = "host reference device";
const HOST_MAX_WORK_GROUP_SIZE: usize = 256;

struct HostBuffer {
    access: AccessMode,
    bytes: Vec<u8>,
}

/// Buffer storage as seen by running kernels.
#[derive(Default)]
pub(crate) struct Memory {
    buffers: HashMap<u64, HostBuffer>,
}

impl Memory {
    pub(crate) fn floats(&self, raw: RawBuffer) -> Result<Vec<f32>, ClError> {
        let buffer = self
            .buffers
            .get(&raw.0)
            .ok_or(ClError(CL_INVALID_MEM_OBJECT))?;
        Ok(bytemuck::pod_collect_to_vec(&buffer.bytes))
    }

    /// Kernel-side write. Writing a read-only buffer is rejected.
    pub(crate) fn store(&mut self, raw: RawBuffer, values: &[f32]) -> Result<(), ClError> {
        let buffer = self
            .buffers
            .get_mut(&raw.0)
            .ok_or(ClError(CL_INVALID_MEM_OBJECT))?;
        if buffer.access == AccessMode::ReadOnly {
            return Err(ClError(CL_INVALID_OPERATION));
        }
        let bytes: &[u8] = bytemuck::cast_slice(values);
        if bytes.len() > buffer.bytes.len() {
            return Err(ClError(CL_INVALID_VALUE));
        }
        buffer.bytes[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

struct KernelState {
    kernel: HostKernel,
    args: Vec<Option<KernelArg>>,
}

/// Creation, dispatch and release counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HostCounters {
    pub buffers_created: usize,
    pub buffers_released: usize,
    pub kernels_created: usize,
    pub kernels_released: usize,
    pub queues_released: usize,
    pub contexts_released: usize,
    pub dispatches: usize,
    /// Release calls issued, successful or not.
    pub release_attempts: usize,
}

pub struct HostBackend {
    memory: Memory,
    kernels: HashMap<u64, KernelState>,
    next_id: u64,
    queue_live: bool,
    context_live: bool,
    failures: HashMap<DeviceOp, i32>,
    counters: HostCounters,
    release_log: Vec<DeviceOp>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        HostBackend {
            memory: Memory::default(),
            kernels: HashMap::new(),
            next_id: 1,
            queue_live: true,
            context_live: true,
            failures: HashMap::new(),
            counters: HostCounters::default(),
            release_log: Vec::new(),
        }
    }

    /// Make the next `op` fail with `status` instead of running.
    #[cfg(test)]
    pub fn inject_failure(&mut self, op: DeviceOp, status: i32) {
        self.failures.insert(op, status);
    }

    #[cfg(test)]
    pub fn counters(&self) -> &HostCounters {
        &self.counters
    }

    /// Every release call in issue order.
    #[cfg(test)]
    pub fn release_log(&self) -> &[DeviceOp] {
        &self.release_log
    }

    fn check(&mut self, op: DeviceOp) -> Result<()> {
        match self.failures.remove(&op) {
            Some(status) => Err(DeviceError::status(op, ClError(status))),
            None => Ok(()),
        }
    }

    fn check_queue(&self, op: DeviceOp) -> Result<()> {
        if self.queue_live {
            Ok(())
        } else {
            Err(DeviceError::status(op, ClError(CL_INVALID_COMMAND_QUEUE)))
        }
    }

    fn check_context(&self, op: DeviceOp) -> Result<()> {
        if self.context_live {
            Ok(())
        } else {
            Err(DeviceError::status(op, ClError(CL_INVALID_CONTEXT)))
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn begin_release(&mut self, op: DeviceOp) -> Result<()> {
        self.counters.release_attempts += 1;
        self.release_log.push(op);
        self.check(op)
    }
}

/// Whether `name` appears in `source` as a whole identifier.
fn declares(source: &str, name: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(name).any(|(at, _)| {
        let before = source[..at].chars().next_back();
        let after = source[at + name.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

impl ComputeBackend for HostBackend {
    fn device_name(&self) -> &str {
        HOST_DEVICE_NAME
    }

    fn max_work_group_size(&self) -> usize {
        HOST_MAX_WORK_GROUP_SIZE
    }

    fn create_buffer(
        &mut self,
        access: AccessMode,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawBuffer> {
        let op = DeviceOp::CreateBuffer;
        self.check_context(op)?;
        self.check(op)?;
        if size == 0 {
            return Err(DeviceError::status(op, ClError(CL_INVALID_BUFFER_SIZE)));
        }
        let bytes = match host_data {
            Some(data) if data.len() != size => {
                return Err(DeviceError::status(op, ClError(CL_INVALID_VALUE)));
            }
            Some(data) => data.to_vec(),
            None => vec![0; size],
        };

        let id = self.next_id();
        self.memory.buffers.insert(id, HostBuffer { access, bytes });
        self.counters.buffers_created += 1;
        Ok(RawBuffer(id))
    }

    fn read_buffer(&mut self, buffer: RawBuffer, dst: &mut [u8]) -> Result<()> {
        let op = DeviceOp::ReadBuffer;
        self.check_queue(op)?;
        self.check(op)?;
        let source = self
            .memory
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| DeviceError::status(op, ClError(CL_INVALID_MEM_OBJECT)))?;
        if dst.len() > source.bytes.len() {
            return Err(DeviceError::status(op, ClError(CL_INVALID_VALUE)));
        }
        dst.copy_from_slice(&source.bytes[..dst.len()]);
        Ok(())
    }

    fn build_kernel(&mut self, source: &str, entry_point: &str) -> Result<RawKernel> {
        self.check_context(DeviceOp::CreateProgram)?;
        self.check(DeviceOp::CreateProgram)?;
        if source.trim().is_empty() {
            return Err(DeviceError::status(
                DeviceOp::CreateProgram,
                ClError(CL_INVALID_VALUE),
            ));
        }
        self.check(DeviceOp::CreateKernel)?;
        if !declares(source, entry_point) {
            return Err(DeviceError::status(
                DeviceOp::CreateKernel,
                ClError(CL_INVALID_KERNEL_NAME),
            ));
        }
        let kernel = kernels::lookup(entry_point).ok_or_else(|| DeviceError::Build {
            entry_point: entry_point.to_string(),
            log: format!("error: no host implementation of kernel '{entry_point}'"),
        })?;

        let id = self.next_id();
        self.kernels.insert(
            id,
            KernelState {
                kernel,
                args: vec![None; kernel.params.len()],
            },
        );
        self.counters.kernels_created += 1;
        Ok(RawKernel(id))
    }

    fn set_kernel_arg(&mut self, kernel: RawKernel, index: u32, arg: &KernelArg) -> Result<()> {
        let op = DeviceOp::SetKernelArg { index };
        self.check(op)?;
        let fail = |code| Err(DeviceError::status(op, ClError(code)));

        let Some(state) = self.kernels.get_mut(&kernel.0) else {
            return fail(CL_INVALID_KERNEL);
        };
        let Some(param) = state.kernel.params.get(index as usize).copied() else {
            return fail(CL_INVALID_ARG_INDEX);
        };
        if arg.size() != param.size() {
            return fail(CL_INVALID_ARG_SIZE);
        }
        match (param, arg) {
            (Param::Buffer, KernelArg::Buffer(raw)) if self.memory.buffers.contains_key(&raw.0) => {}
            (Param::Buffer, _) => return fail(CL_INVALID_MEM_OBJECT),
            (_, KernelArg::Buffer(_)) => return fail(CL_INVALID_ARG_SIZE),
            _ => {}
        }
        state.args[index as usize] = Some(*arg);
        Ok(())
    }

    fn enqueue_kernel(&mut self, kernel: RawKernel, global_work_shape: &[usize]) -> Result<()> {
        let op = DeviceOp::EnqueueKernel;
        self.check_queue(op)?;
        self.check(op)?;
        let fail = |code| Err(DeviceError::status(op, ClError(code)));

        let Some(state) = self.kernels.get(&kernel.0) else {
            return fail(CL_INVALID_KERNEL);
        };
        if !(1..=3).contains(&global_work_shape.len()) {
            return fail(CL_INVALID_WORK_DIMENSION);
        }
        if global_work_shape.contains(&0) {
            return fail(CL_INVALID_GLOBAL_WORK_SIZE);
        }
        let Some(args) = state.args.iter().copied().collect::<Option<Vec<_>>>() else {
            return fail(CL_INVALID_KERNEL_ARGS);
        };
        let run = state.kernel.run;

        // Commands execute as they are enqueued, which is already in order.
        run(&args, global_work_shape, &mut self.memory)
            .map_err(|status| DeviceError::status(op, status))?;
        self.counters.dispatches += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.check_queue(DeviceOp::Finish)?;
        self.check(DeviceOp::Finish)
    }

    fn release_queue(&mut self) -> Result<()> {
        let op = DeviceOp::ReleaseQueue;
        self.begin_release(op)?;
        self.check_queue(op)?;
        self.queue_live = false;
        self.counters.queues_released += 1;
        Ok(())
    }

    fn release_context(&mut self) -> Result<()> {
        let op = DeviceOp::ReleaseContext;
        self.begin_release(op)?;
        self.check_context(op)?;
        self.context_live = false;
        self.counters.contexts_released += 1;
        log::debug!(
            "Host device closed: {} dispatches, {} queue(s) and {} context(s) released, {} release call(s) so far",
            self.counters.dispatches,
            self.counters.queues_released,
            self.counters.contexts_released,
            self.counters.release_attempts
        );
        Ok(())
    }

    fn release_buffer(&mut self, buffer: RawBuffer) -> Result<()> {
        let op = DeviceOp::ReleaseBuffer;
        self.begin_release(op)?;
        self.memory
            .buffers
            .remove(&buffer.0)
            .ok_or_else(|| DeviceError::status(op, ClError(CL_INVALID_MEM_OBJECT)))?;
        self.counters.buffers_released += 1;
        Ok(())
    }

    fn release_kernel(&mut self, kernel: RawKernel) -> Result<()> {
        let op = DeviceOp::ReleaseKernel;
        self.begin_release(op)?;
        self.kernels
            .remove(&kernel.0)
            .ok_or_else(|| DeviceError::status(op, ClError(CL_INVALID_KERNEL)))?;
        self.counters.kernels_released += 1;
        if self.kernels.is_empty() {
            log::debug!(
                "Host device: {}/{} buffers and {}/{} kernels released",
                self.counters.buffers_released,
                self.counters.buffers_created,
                self.counters.kernels_released,
                self.counters.kernels_created
            );
        }
        Ok(())
    }
}
