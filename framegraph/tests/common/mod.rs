//! Shared helpers for frame graph integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use redlilium_framegraph::{
    BackendError, BufferDescriptor, DummyBackend, FrameGraphConfig, GpuBackend, GpuBuffer,
    GpuCommandList, GpuFence, GpuSemaphore, GpuTexture, PassHandle, RenderGraph, ResourceHandle,
    TextureDescriptor, TextureFormat, TextureUsage,
};

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A graph on the dummy backend, with access to the backend's records.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub graph: RenderGraph,
    /// Names of passes in the order their callbacks ran.
    pub executed: Arc<Mutex<Vec<String>>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(FrameGraphConfig::default())
    }

    pub fn with_config(config: FrameGraphConfig) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let graph = RenderGraph::new(backend.clone(), config).expect("graph creation");
        Self {
            backend,
            graph,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Like [`with_config`](Self::with_config), but the `nth` queue
    /// submission (1-based) fails with a lost device.
    pub fn with_failing_submit(config: FrameGraphConfig, nth: usize) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let failing = Arc::new(FailingSubmitBackend {
            inner: Arc::clone(&backend),
            fail_at: nth,
            submits: AtomicUsize::new(0),
        });
        let graph = RenderGraph::new(failing, config).expect("graph creation");
        Self {
            backend,
            graph,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a pass that reads `reads`, writes `writes` and logs its execution.
    pub fn pass(
        &mut self,
        name: &str,
        reads: &[ResourceHandle],
        writes: &[ResourceHandle],
        side_effects: bool,
    ) -> PassHandle {
        let executed = Arc::clone(&self.executed);
        let label = name.to_string();
        let (handle, ()) = self
            .graph
            .add_pass_with_setup(
                name,
                |builder| {
                    for &read in reads {
                        builder.read(read)?;
                    }
                    for &write in writes {
                        builder.write(write)?;
                    }
                    if side_effects {
                        builder.has_side_effects();
                    }
                    Ok(())
                },
                move |_ctx| {
                    executed.lock().push(label.clone());
                    Ok(())
                },
            )
            .expect("add pass");
        handle
    }

    /// Declare a fixed-size color texture.
    pub fn texture(&mut self, label: &str, width: u32, height: u32) -> ResourceHandle {
        self.graph
            .create_transient_texture(color(label, width, height))
            .expect("transient texture")
    }

    /// Declare a frame-sized color texture.
    pub fn frame_texture(&mut self, label: &str) -> ResourceHandle {
        self.graph
            .create_transient_texture(color(label, 0, 0))
            .expect("transient texture")
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn clear_executed(&self) {
        self.executed.lock().clear();
    }

    pub fn names(&self, handles: &[PassHandle]) -> Vec<String> {
        handles
            .iter()
            .map(|&h| self.graph.pass_info(h).expect("pass info").name)
            .collect()
    }
}

pub fn color(label: &str, width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(
        width,
        height,
        TextureFormat::Rgba8Unorm,
        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    )
    .with_label(label)
}

/// Dummy backend whose `fail_at`-th submission fails. Failed submissions are
/// not recorded.
struct FailingSubmitBackend {
    inner: Arc<DummyBackend>,
    fail_at: usize,
    submits: AtomicUsize,
}

impl GpuBackend for FailingSubmitBackend {
    fn name(&self) -> &'static str {
        "Failing Submit Backend"
    }

    fn create_command_lists(&self, count: usize) -> Result<Vec<GpuCommandList>, BackendError> {
        self.inner.create_command_lists(count)
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        self.inner.create_fence(signaled)
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        self.inner.create_semaphore()
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError> {
        self.inner.create_texture(descriptor)
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError> {
        self.inner.create_buffer(descriptor)
    }

    fn destroy_texture(&self, texture: GpuTexture) -> Result<(), BackendError> {
        self.inner.destroy_texture(texture)
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<(), BackendError> {
        self.inner.destroy_buffer(buffer)
    }

    fn begin_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        self.inner.begin_command_list(command_list)
    }

    fn end_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        self.inner.end_command_list(command_list)
    }

    fn submit(
        &self,
        command_list: &GpuCommandList,
        wait_semaphores: &[&GpuSemaphore],
        signal_semaphores: &[&GpuSemaphore],
        fence: Option<&GpuFence>,
    ) -> Result<(), BackendError> {
        if self.submits.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
            return Err(BackendError::DeviceLost);
        }
        self.inner
            .submit(command_list, wait_semaphores, signal_semaphores, fence)
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        self.inner.wait_idle()
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        self.inner.wait_fence(fence)
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        self.inner.reset_fence(fence)
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        self.inner.is_fence_signaled(fence)
    }
}
