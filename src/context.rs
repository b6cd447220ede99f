//! Device resource context.
//!
//! Owns the backend (and through it the OpenCL context and command queue),
//! every buffer and kernel created through it, and the argument slots of each
//! kernel. Callers only ever hold non-owning, `Copy` handles.

use crate::backend::{AccessMode, ComputeBackend, RawBuffer, RawKernel};
use crate::error::{DeviceError, DeviceOp, Result};
use crate::kernel_arg::KernelArg;
use crate::opencl::{DeviceSelection, OpenClBackend};
use bytemuck::Pod;
use opencl3::error_codes::{CL_INVALID_KERNEL, ClError};
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::Path;

/// Non-owning handle to a typed device buffer of fixed element count.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    raw: RawBuffer,
    len: usize,
    _element: PhantomData<T>,
}

// Manual impls: the handle is copyable whatever `T` is.
impl<T> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DeviceBuffer<T> {}

impl<T> DeviceBuffer<T> {
    pub(crate) fn from_raw(raw: RawBuffer, len: usize) -> Self {
        DeviceBuffer {
            raw,
            len,
            _element: PhantomData,
        }
    }

    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    /// Element count fixed at allocation.
    pub fn len(&self) -> usize {
        self.len
    }
}

/// Non-owning handle to a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledKernel {
    raw: RawKernel,
    slot: usize,
}

struct TrackedKernel {
    raw: RawKernel,
    entry_point: String,
    /// Last value bound at each position. Slots persist between dispatches.
    args: Vec<Option<KernelArg>>,
}

pub struct DeviceContext<B: ComputeBackend> {
    backend: B,
    buffers: Vec<RawBuffer>,
    kernels: Vec<TrackedKernel>,
    released: bool,
}

impl DeviceContext<OpenClBackend> {
    /// Select the configured platform/device (0/0 by default) and create the
    /// OpenCL context and in-order queue on it.
    pub fn initialize(selection: &DeviceSelection) -> Result<Self> {
        Ok(Self::with_backend(OpenClBackend::new(selection)?))
    }
}

impl<B: ComputeBackend> DeviceContext<B> {
    pub fn with_backend(backend: B) -> Self {
        log::info!(
            "Device capabilities: {} - max work items in single group: {}",
            backend.device_name(),
            backend.max_work_group_size()
        );
        DeviceContext {
            backend,
            buffers: Vec::new(),
            kernels: Vec::new(),
            released: false,
        }
    }

    pub fn device_name(&self) -> &str {
        self.backend.device_name()
    }

    pub fn max_work_group_size(&self) -> usize {
        self.backend.max_work_group_size()
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_kernels(&self) -> usize {
        self.kernels.len()
    }

    /// Allocate a buffer of `count` elements of `T`, optionally initialised
    /// from `initial` (which must then hold exactly `count` elements).
    pub fn allocate_buffer<T: Pod>(
        &mut self,
        access: AccessMode,
        count: usize,
        initial: Option<&[T]>,
    ) -> Result<DeviceBuffer<T>> {
        if let Some(data) = initial {
            if data.len() != count {
                return Err(DeviceError::HostDataLength {
                    expected: count,
                    actual: data.len(),
                });
            }
        }

        let size = count * size_of::<T>();
        let host_bytes = initial.map(bytemuck::cast_slice::<T, u8>);
        let raw = self.backend.create_buffer(access, size, host_bytes)?;
        self.buffers.push(raw);

        log::debug!(
            "Allocated {:?} buffer {:?}: {} elements ({} bytes)",
            access,
            raw,
            count,
            size
        );
        Ok(DeviceBuffer::from_raw(raw, count))
    }

    /// Blocking copy of the first `count` elements of `buffer` to the host.
    pub fn read_buffer<T: Pod>(&mut self, buffer: &DeviceBuffer<T>, count: usize) -> Result<Vec<T>> {
        if count > buffer.len() {
            return Err(DeviceError::ReadOutOfBounds {
                requested: count,
                capacity: buffer.len(),
            });
        }

        let mut host = vec![T::zeroed(); count];
        self.backend
            .read_buffer(buffer.raw(), bytemuck::cast_slice_mut(&mut host))?;
        log::debug!("Read {} elements from buffer {:?}", count, buffer.raw());
        Ok(host)
    }

    /// Read `source_path` and compile `entry_point` from it for the selected
    /// device. Build failures are logged with the full compiler output.
    pub fn compile_kernel(
        &mut self,
        source_path: impl AsRef<Path>,
        entry_point: &str,
    ) -> Result<CompiledKernel> {
        let path = source_path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| DeviceError::KernelSource {
            path: path.to_path_buf(),
            source,
        })?;

        let raw = match self.backend.build_kernel(&source, entry_point) {
            Ok(raw) => raw,
            Err(e) => {
                if let DeviceError::Build { log, .. } = &e {
                    log::error!("Build error for '{}' in {}:\n{}", entry_point, path.display(), log);
                }
                return Err(e);
            }
        };

        self.kernels.push(TrackedKernel {
            raw,
            entry_point: entry_point.to_string(),
            args: Vec::new(),
        });
        log::debug!("Compiled kernel '{}' from {}", entry_point, path.display());

        Ok(CompiledKernel {
            raw,
            slot: self.kernels.len() - 1,
        })
    }

    /// Bind `args` at positions `0..args.len()` and enqueue `kernel` over
    /// `global_work_shape`. With `blocking` set this returns only after the
    /// queue has drained; otherwise completion is observed by the next
    /// blocking call on the same in-order queue.
    pub fn dispatch(
        &mut self,
        kernel: &CompiledKernel,
        dimensions: u32,
        global_work_shape: &[usize],
        blocking: bool,
        args: &[KernelArg],
    ) -> Result<()> {
        if !(1..=3).contains(&dimensions) || global_work_shape.len() != dimensions as usize {
            return Err(DeviceError::WorkShape {
                dimensions,
                shape: global_work_shape.to_vec(),
            });
        }

        let raw = self.resolve(kernel)?;
        for (index, arg) in args.iter().enumerate() {
            self.backend.set_kernel_arg(raw, index as u32, arg)?;
            let slots = &mut self.kernels[kernel.slot].args;
            if slots.len() <= index {
                slots.resize(index + 1, None);
            }
            slots[index] = Some(*arg);
        }

        self.backend.enqueue_kernel(raw, global_work_shape)?;
        log::debug!(
            "Enqueued '{}' over {:?} ({} args, blocking: {})",
            self.kernels[kernel.slot].entry_point,
            global_work_shape,
            args.len(),
            blocking
        );

        if blocking {
            self.backend.finish()?;
        }
        Ok(())
    }

    /// Wait for everything enqueued so far.
    pub fn finish(&mut self) -> Result<()> {
        self.backend.finish()
    }

    /// Arguments currently bound to `kernel`, by position.
    #[cfg(test)]
    pub fn bound_args(&self, kernel: &CompiledKernel) -> &[Option<KernelArg>] {
        self.kernels
            .get(kernel.slot)
            .filter(|tracked| tracked.raw == kernel.raw)
            .map(|tracked| tracked.args.as_slice())
            .unwrap_or(&[])
    }

    /// Release the command queue, the context, every buffer and every kernel,
    /// in that order. Every release is attempted; the first failure is
    /// returned. Calling this again afterwards does nothing.
    pub fn teardown(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        if let Err(e) = self.finish() {
            log::warn!("Queue did not drain before teardown: {}", e);
        }

        let mut first_error: Option<DeviceError> = None;
        let mut record = |result: Result<()>, what: String| {
            if let Err(e) = result {
                log::warn!("Failed to release {}: {}", what, e);
                first_error.get_or_insert(e);
            }
        };

        record(self.backend.release_queue(), "command queue".to_string());
        record(self.backend.release_context(), "context".to_string());

        let buffers = std::mem::take(&mut self.buffers);
        let buffer_count = buffers.len();
        for raw in buffers {
            record(self.backend.release_buffer(raw), format!("buffer {:?}", raw));
        }

        let kernels = std::mem::take(&mut self.kernels);
        let kernel_count = kernels.len();
        for tracked in kernels {
            record(
                self.backend.release_kernel(tracked.raw),
                format!("kernel '{}'", tracked.entry_point),
            );
        }

        log::debug!(
            "Released queue, context, {} buffer(s) and {} kernel(s)",
            buffer_count,
            kernel_count
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn resolve(&self, kernel: &CompiledKernel) -> Result<RawKernel> {
        match self.kernels.get(kernel.slot) {
            Some(tracked) if tracked.raw == kernel.raw => Ok(tracked.raw),
            _ => Err(DeviceError::status(
                DeviceOp::EnqueueKernel,
                ClError(CL_INVALID_KERNEL),
            )),
        }
    }
}

impl<B: ComputeBackend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        if !self.released {
            log::debug!("Device context dropped without teardown, releasing resources");
            if let Err(e) = self.teardown() {
                log::error!("Error releasing device resources: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBackend;
    use opencl3::error_codes::{
        CL_INVALID_ARG_INDEX, CL_INVALID_COMMAND_QUEUE, CL_INVALID_KERNEL_ARGS, CL_INVALID_KERNEL_NAME,
        CL_INVALID_VALUE,
        CL_MEM_OBJECT_ALLOCATION_FAILURE, CL_OUT_OF_RESOURCES,
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn host_context() -> DeviceContext<HostBackend> {
        DeviceContext::with_backend(HostBackend::new())
    }

    fn kernel_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "__kernel void gaussian_blur_gray(__global const float *in, __global float *out,\n\
             int width, int height, float sigma, int axis) {{}}"
        )
        .expect("write kernel");
        file
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32 / len as f32).collect()
    }

    #[test]
    fn allocate_and_read_back() {
        let mut ctx = host_context();
        let data = ramp(12);
        let buffer = ctx
            .allocate_buffer(AccessMode::ReadWrite, data.len(), Some(&data))
            .unwrap();
        assert_eq!(buffer.len(), 12);
        assert_eq!(ctx.read_buffer(&buffer, 12).unwrap(), data);
        assert_eq!(ctx.read_buffer(&buffer, 5).unwrap(), &data[..5]);
        ctx.teardown().unwrap();
    }

    #[test]
    fn write_only_buffer_starts_zeroed() {
        let mut ctx = host_context();
        let buffer = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 4, None).unwrap();
        assert_eq!(ctx.read_buffer(&buffer, 4).unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn read_past_allocation_is_rejected() {
        let mut ctx = host_context();
        let buffer = ctx.allocate_buffer::<f32>(AccessMode::ReadOnly, 4, Some(&[1.0; 4])).unwrap();
        match ctx.read_buffer(&buffer, 5) {
            Err(DeviceError::ReadOutOfBounds {
                requested: 5,
                capacity: 4,
            }) => {}
            other => panic!("expected ReadOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    fn initial_data_must_match_count() {
        let mut ctx = host_context();
        let err = ctx
            .allocate_buffer(AccessMode::ReadOnly, 3, Some(&[1.0f32, 2.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::HostDataLength {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(ctx.live_buffers(), 0);
    }

    #[test]
    fn allocation_failure_carries_status_and_is_not_tracked() {
        let mut ctx = host_context();
        ctx.backend_mut()
            .inject_failure(DeviceOp::CreateBuffer, CL_MEM_OBJECT_ALLOCATION_FAILURE);
        let err = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 16, None).unwrap_err();
        assert_eq!(err.status_code(), Some(CL_MEM_OBJECT_ALLOCATION_FAILURE));
        assert_eq!(ctx.live_buffers(), 0);

        ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 16, None).unwrap();
        assert_eq!(ctx.live_buffers(), 1);
    }

    #[test]
    fn missing_source_file_is_not_fatal() {
        let mut ctx = host_context();
        let err = ctx
            .compile_kernel("/nonexistent/kernel.cl", "gaussian_blur")
            .unwrap_err();
        assert!(matches!(err, DeviceError::KernelSource { .. }));
        assert!(!err.is_fatal());
        assert_eq!(ctx.live_kernels(), 0);
    }

    #[test]
    fn entry_point_missing_from_source_is_not_fatal() {
        let mut ctx = host_context();
        let file = kernel_file();
        let err = ctx.compile_kernel(file.path(), "sharpen").unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(err.status_code(), Some(CL_INVALID_KERNEL_NAME));
        assert_eq!(ctx.live_kernels(), 0);
    }

    #[test]
    fn build_failure_is_fatal_and_carries_the_log() {
        let mut ctx = host_context();
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "__kernel void sharpen(__global float4 *img) {{}}").expect("write kernel");
        let err = ctx.compile_kernel(file.path(), "sharpen").unwrap_err();
        assert!(err.is_fatal(), "expected fatal error, got {err}");
        match err {
            DeviceError::Build { entry_point, log } => {
                assert_eq!(entry_point, "sharpen");
                assert!(log.contains("sharpen"));
            }
            other => panic!("expected Build, got {other:?}"),
        }
        assert_eq!(ctx.live_kernels(), 0);
    }

    #[test]
    fn dispatch_rejects_mismatched_work_shape() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let err = ctx.dispatch(&kernel, 2, &[4], true, &[]).unwrap_err();
        assert!(matches!(err, DeviceError::WorkShape { dimensions: 2, .. }));
        let err = ctx.dispatch(&kernel, 0, &[], true, &[]).unwrap_err();
        assert!(matches!(err, DeviceError::WorkShape { dimensions: 0, .. }));
    }

    #[test]
    fn unbound_arguments_fail_the_enqueue() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 4, Some(&ramp(4))).unwrap();
        let err = ctx
            .dispatch(&kernel, 2, &[2, 2], true, &[(&input).into()])
            .unwrap_err();
        assert_eq!(err.status_code(), Some(CL_INVALID_KERNEL_ARGS));
    }

    #[test]
    fn set_arg_failure_names_the_position() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let args: Vec<KernelArg> = (0..7).map(|i| KernelArg::Int(i)).collect();
        match ctx.dispatch(&kernel, 1, &[1], true, &args) {
            Err(DeviceError::Status { op, status }) => {
                // Position 0 expects a buffer; the host device rejects the int first.
                assert_eq!(op, DeviceOp::SetKernelArg { index: 0 });
                assert_ne!(status.0, 0);
            }
            other => panic!("expected a SetKernelArg status, got {other:?}"),
        }

        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 1, Some(&[0.5f32])).unwrap();
        let output = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 1, None).unwrap();
        let mut args = vec![
            KernelArg::from(&input),
            KernelArg::from(&output),
            1i32.into(),
            1i32.into(),
            1.0f32.into(),
            1i32.into(),
            0i32.into(),
        ];
        let err = ctx.dispatch(&kernel, 1, &[1], true, &args).unwrap_err();
        assert_eq!(err.status_code(), Some(CL_INVALID_ARG_INDEX));
        args.pop();

        ctx.backend_mut()
            .inject_failure(DeviceOp::SetKernelArg { index: 4 }, CL_INVALID_VALUE);
        match ctx.dispatch(&kernel, 1, &[1], true, &args) {
            Err(DeviceError::Status { op, .. }) => assert_eq!(op, DeviceOp::SetKernelArg { index: 4 }),
            other => panic!("expected SetKernelArg #4 failure, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_failure_surfaces_status() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 1, Some(&[0.5f32])).unwrap();
        let output = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 1, None).unwrap();
        let args = [
            KernelArg::from(&input),
            KernelArg::from(&output),
            1i32.into(),
            1i32.into(),
            1.0f32.into(),
            1i32.into(),
        ];
        ctx.backend_mut()
            .inject_failure(DeviceOp::EnqueueKernel, CL_OUT_OF_RESOURCES);
        let err = ctx.dispatch(&kernel, 1, &[1], true, &args).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Status {
                op: DeviceOp::EnqueueKernel,
                ..
            }
        ));
        assert_eq!(err.status_code(), Some(CL_OUT_OF_RESOURCES));
    }

    #[test]
    fn argument_slots_persist_between_dispatches() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 4, Some(&ramp(4))).unwrap();
        let output = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 4, None).unwrap();
        let args = [
            KernelArg::from(&input),
            KernelArg::from(&output),
            2i32.into(),
            2i32.into(),
            1.0f32.into(),
            1i32.into(),
        ];
        ctx.dispatch(&kernel, 2, &[2, 2], true, &args).unwrap();
        assert_eq!(ctx.bound_args(&kernel).len(), 6);

        // Rebinding only the first two positions leaves the rest untouched.
        let second = ctx.allocate_buffer(AccessMode::ReadOnly, 4, Some(&[1.0f32; 4])).unwrap();
        ctx.dispatch(
            &kernel,
            2,
            &[2, 2],
            true,
            &[KernelArg::from(&second), KernelArg::from(&output)],
        )
        .unwrap();

        let bound = ctx.bound_args(&kernel);
        assert_eq!(bound[0], Some(KernelArg::Buffer(second.raw())));
        assert_eq!(bound[5], Some(KernelArg::Int(1)));
        let blurred = ctx.read_buffer(&output, 4).unwrap();
        assert!(blurred.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }

    #[test]
    fn non_blocking_dispatch_completes_on_finish() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 4, Some(&[0.25f32; 4])).unwrap();
        let output = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 4, None).unwrap();
        let args = [
            KernelArg::from(&input),
            KernelArg::from(&output),
            2i32.into(),
            2i32.into(),
            0.0f32.into(),
            2i32.into(),
        ];
        ctx.dispatch(&kernel, 2, &[2, 2], false, &args).unwrap();
        ctx.finish().unwrap();
        assert_eq!(ctx.read_buffer(&output, 4).unwrap(), vec![0.25; 4]);
    }

    #[test]
    fn swapped_positions_change_the_result() {
        let mut ctx = host_context();
        let file = kernel_file();
        let kernel = ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        let (width, height) = (3i32, 2i32);
        let input = ctx.allocate_buffer(AccessMode::ReadOnly, 6, Some(&ramp(6))).unwrap();

        let mut run = |w: i32, h: i32| {
            let output = ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 6, None).unwrap();
            let args = [
                KernelArg::from(&input),
                KernelArg::from(&output),
                w.into(),
                h.into(),
                1.0f32.into(),
                1i32.into(),
            ];
            ctx.dispatch(&kernel, 2, &[3, 2], true, &args).unwrap();
            ctx.read_buffer(&output, 6).unwrap()
        };

        let ordered = run(width, height);
        let swapped = run(height, width);
        assert_ne!(ordered, swapped);
    }

    #[test]
    fn teardown_releases_everything_that_was_created() {
        let mut ctx = host_context();
        let file = kernel_file();
        for n in 1..=3 {
            ctx.allocate_buffer::<f32>(AccessMode::ReadWrite, n, None).unwrap();
        }
        ctx.backend_mut()
            .inject_failure(DeviceOp::CreateBuffer, CL_MEM_OBJECT_ALLOCATION_FAILURE);
        assert!(ctx.allocate_buffer::<f32>(AccessMode::ReadWrite, 8, None).is_err());
        ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        assert!(ctx.compile_kernel(file.path(), "unknown").is_err());

        ctx.teardown().unwrap();

        let counters = ctx.backend().counters();
        assert_eq!(counters.buffers_created, 3);
        assert_eq!(counters.buffers_released, 3);
        assert_eq!(counters.kernels_created, 1);
        assert_eq!(counters.kernels_released, 1);
        assert_eq!(counters.queues_released, 1);
        assert_eq!(counters.contexts_released, 1);
        assert_eq!(ctx.live_buffers(), 0);
        assert_eq!(ctx.live_kernels(), 0);

        // A second teardown must not double-release.
        ctx.teardown().unwrap();
        assert_eq!(ctx.backend().counters().buffers_released, 3);
    }

    #[test]
    fn teardown_continues_after_a_failed_release() {
        let mut ctx = host_context();
        let file = kernel_file();
        ctx.allocate_buffer::<f32>(AccessMode::ReadOnly, 2, None).unwrap();
        ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 2, None).unwrap();
        ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();

        ctx.backend_mut()
            .inject_failure(DeviceOp::ReleaseQueue, CL_INVALID_COMMAND_QUEUE);
        ctx.backend_mut()
            .inject_failure(DeviceOp::ReleaseBuffer, CL_INVALID_VALUE);

        let err = ctx.teardown().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Status {
                op: DeviceOp::ReleaseQueue,
                ..
            }
        ));
        assert_eq!(err.status_code(), Some(CL_INVALID_COMMAND_QUEUE));

        let counters = ctx.backend().counters();
        assert_eq!(counters.contexts_released, 1);
        assert_eq!(counters.buffers_released, 1);
        assert_eq!(counters.kernels_released, 1);
        assert_eq!(counters.release_attempts, 5);
    }

    #[test]
    fn teardown_drains_the_queue_but_ignores_a_failed_wait() {
        let mut ctx = host_context();
        ctx.allocate_buffer::<f32>(AccessMode::WriteOnly, 2, None).unwrap();
        ctx.backend_mut()
            .inject_failure(DeviceOp::Finish, CL_OUT_OF_RESOURCES);
        ctx.teardown().unwrap();
        let counters = ctx.backend().counters();
        assert_eq!(counters.buffers_released, 1);
        assert_eq!(counters.release_attempts, 3);
    }

    #[test]
    fn releases_happen_in_queue_context_buffer_kernel_order() {
        let mut ctx = host_context();
        let file = kernel_file();
        ctx.compile_kernel(file.path(), "gaussian_blur_gray").unwrap();
        ctx.allocate_buffer::<f32>(AccessMode::ReadOnly, 2, None).unwrap();
        ctx.teardown().unwrap();
        assert_eq!(
            ctx.backend().release_log(),
            &[
                DeviceOp::ReleaseQueue,
                DeviceOp::ReleaseContext,
                DeviceOp::ReleaseBuffer,
                DeviceOp::ReleaseKernel
            ]
        );
    }
}
