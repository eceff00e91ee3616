//! Render graph.
//!
//! A [`RenderGraph`] is rebuilt every frame. Passes declare the resources
//! they read and write; [`compile`](RenderGraph::compile) derives the
//! dependency edges, drops passes nothing needs, orders the rest, allocates
//! transient resources and assigns command lists;
//! [`execute`](RenderGraph::execute) records and submits.
//!
//! # Frame lifecycle
//!
//! ```text
//! Inactive ──begin_frame──► Active ──compile──► Compiled ──execute──► Inactive
//!                             │                                ▲
//!                             └──────────execute───────────────┘
//! ```
//!
//! Any error during `compile` or `execute` aborts the frame and returns the
//! graph to `Inactive`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use redlilium_framegraph::{
//!     DummyBackend, FrameGraphConfig, RenderGraph, TextureDescriptor, TextureFormat,
//!     TextureUsage,
//! };
//!
//! let mut graph = RenderGraph::new(Arc::new(DummyBackend::new()), FrameGraphConfig::default())?;
//! graph.begin_frame(0)?;
//!
//! let (_, gbuffer) = graph.add_pass_with_setup(
//!     "geometry",
//!     |builder| {
//!         let target = builder.create_transient_texture(
//!             TextureDescriptor::frame_sized(
//!                 TextureFormat::Rgba16Float,
//!                 TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
//!             )
//!             .with_label("gbuffer"),
//!         )?;
//!         builder.write(target)
//!     },
//!     |_ctx| Ok(()),
//! )?;
//! graph.add_pass_with_setup(
//!     "present",
//!     |builder| {
//!         builder.read(gbuffer)?;
//!         builder.has_side_effects();
//!         Ok(())
//!     },
//!     move |ctx| {
//!         let _texture = ctx.get_texture(gbuffer)?;
//!         Ok(())
//!     },
//! )?;
//!
//! graph.execute()?;
//! # Ok::<(), redlilium_framegraph::FrameGraphError>(())
//! ```

mod handle;
pub(crate) mod pass;
pub(crate) mod resource;

pub use handle::{PassHandle, ResourceHandle};
pub use pass::{
    ExecuteFn, ExternalExecuteFn, ExternalPassContext, ExternalPassResult, FrameInfo,
    PassBuilder, PassContext, PassInfo,
};
pub use resource::{ResourceInfo, ResourceOrigin};

use std::sync::Arc;

use crate::allocator::{AllocationStats, TransientAllocator};
use crate::backend::{GpuBackend, GpuBuffer, GpuTexture};
use crate::bindings::BindingRegistry;
use crate::compiler;
use crate::config::FrameGraphConfig;
use crate::error::{FrameGraphError, FrameState, Result};
use crate::submission::SubmissionEngine;
use crate::types::{BufferDescriptor, TextureDescriptor};

use pass::{PassCallback, PassDecl, PassRegistry};
use resource::{ResourceBacking, ResourceRegistry};

/// Per-frame render graph with pooled GPU resources.
pub struct RenderGraph {
    config: FrameGraphConfig,
    state: FrameState,
    frame_index: u64,
    slot: usize,
    width: u32,
    height: u32,
    resources: ResourceRegistry,
    passes: PassRegistry,
    execution_order: Vec<usize>,
    last_allocation: AllocationStats,
    allocator: TransientAllocator,
    submission: SubmissionEngine,
    bindings: BindingRegistry,
    backend: Arc<dyn GpuBackend>,
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("frame_index", &self.frame_index)
            .field("slot", &self.slot)
            .field("passes", &self.passes.len())
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

impl RenderGraph {
    /// Create a graph driving `backend`.
    pub fn new(backend: Arc<dyn GpuBackend>, config: FrameGraphConfig) -> Result<Self> {
        config.validate()?;
        let submission = SubmissionEngine::new(backend.as_ref(), config.frames_in_flight)?;
        log::debug!(
            "RenderGraph created on {} ({} frames in flight)",
            backend.name(),
            config.frames_in_flight
        );
        Ok(Self {
            state: FrameState::Inactive,
            frame_index: 0,
            slot: 0,
            width: config.width,
            height: config.height,
            resources: ResourceRegistry::new(config.max_resources),
            passes: PassRegistry::new(config.max_passes),
            execution_order: Vec::new(),
            last_allocation: AllocationStats::default(),
            allocator: TransientAllocator::new(config.frames_in_flight),
            submission,
            bindings: BindingRegistry::new(),
            backend,
            config,
        })
    }

    fn require(&self, operation: &'static str, expected: FrameState) -> Result<()> {
        if self.state != expected {
            return Err(FrameGraphError::StateViolation {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    fn abort_frame(&mut self, error: &FrameGraphError) {
        log::error!("Frame {} aborted: {}", self.frame_index, error);
        self.state = FrameState::Inactive;
        self.execution_order.clear();
    }

    // ------------------------------------------------------------------
    // Frame lifecycle
    // ------------------------------------------------------------------

    /// Start declaring a frame.
    ///
    /// Blocks until the GPU has retired the last frame that used the same
    /// frame-in-flight slot. Every handle from earlier frames becomes stale.
    pub fn begin_frame(&mut self, frame_index: u64) -> Result<()> {
        self.require("begin_frame", FrameState::Inactive)?;
        crate::profile_scope!("begin_frame");

        let slot = (frame_index % self.config.frames_in_flight as u64) as usize;
        self.submission.wait_slot(self.backend.as_ref(), slot)?;

        self.frame_index = frame_index;
        self.slot = slot;
        self.resources.reset();
        self.passes.reset();
        self.execution_order.clear();
        self.last_allocation = AllocationStats::default();
        self.bindings.reset_frame();
        self.state = FrameState::Active;

        log::trace!("Begin frame {} (slot {})", frame_index, slot);
        Ok(())
    }

    /// Set the size auto-sized textures resolve to from the next allocation on.
    pub fn set_dimensions(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(FrameGraphError::InvalidConfig(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if (width, height) != (self.width, self.height) {
            log::debug!(
                "Frame dimensions {}x{} -> {}x{}",
                self.width,
                self.height,
                width,
                height
            );
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Current frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Derive the execution plan of the current frame.
    ///
    /// Calling it again before `execute` does nothing.
    pub fn compile(&mut self) -> Result<()> {
        match self.state {
            FrameState::Compiled => return Ok(()),
            FrameState::Active => {}
            state => {
                return Err(FrameGraphError::StateViolation {
                    operation: "compile",
                    state,
                });
            }
        }
        if let Err(error) = self.compile_frame() {
            self.abort_frame(&error);
            return Err(error);
        }
        self.state = FrameState::Compiled;
        Ok(())
    }

    fn compile_frame(&mut self) -> Result<()> {
        crate::profile_scope!("compile");

        let edges = self.passes.edges().to_vec();
        let resource_count = self.resources.len();
        let passes = self.passes.entries_mut();

        compiler::build_dependencies(passes, &edges, resource_count);
        let live = compiler::cull(passes);
        compiler::schedule(passes, &mut self.execution_order)?;
        compiler::compute_live_spans(passes, &mut self.resources);

        self.last_allocation = self.allocator.allocate(
            self.backend.as_ref(),
            self.slot,
            &mut self.resources,
            self.width,
            self.height,
        )?;
        let lists = self.submission.assign(
            self.backend.as_ref(),
            self.slot,
            self.passes.entries_mut(),
            &self.execution_order,
        )?;

        log::debug!(
            "Compiled frame {}: {} passes declared, {} live, {} command lists",
            self.frame_index,
            self.passes.len(),
            live,
            lists
        );
        Ok(())
    }

    /// Record and submit the current frame, compiling it first if needed.
    pub fn execute(&mut self) -> Result<()> {
        match self.state {
            FrameState::Inactive => {
                return Err(FrameGraphError::StateViolation {
                    operation: "execute",
                    state: FrameState::Inactive,
                });
            }
            FrameState::Active => self.compile()?,
            FrameState::Compiled => {}
        }

        let result = self.record().and_then(|()| {
            self.submission.submit(
                self.backend.as_ref(),
                self.slot,
                self.passes.entries(),
                &self.execution_order,
            )
        });
        match result {
            Ok(submitted) => {
                log::trace!(
                    "Frame {} submitted ({} submissions)",
                    self.frame_index,
                    submitted
                );
                self.state = FrameState::Inactive;
                crate::frame_mark!();
                Ok(())
            }
            Err(error) => {
                self.abort_frame(&error);
                Err(error)
            }
        }
    }

    fn record(&mut self) -> Result<()> {
        crate::profile_scope!("record_passes");

        let frame = self.frame_info();
        let backend = self.backend.as_ref();
        for position in 0..self.execution_order.len() {
            let index = self.execution_order[position];
            let entry = &mut self.passes.entries_mut()[index];
            crate::profile_scope_dynamic!(entry.name.as_str());

            match &mut entry.callback {
                PassCallback::Standard(execute) => {
                    let Some(list) = entry.command_list else {
                        continue;
                    };
                    let command_list = self.submission.command_list(self.slot, list);
                    backend.begin_command_list(command_list)?;
                    let mut ctx = PassContext {
                        pass_name: &entry.name,
                        pass: PassHandle::new(index),
                        resources: &self.resources,
                        command_list,
                        bindings: &mut self.bindings,
                        frame,
                    };
                    let outcome = execute(&mut ctx);
                    let ended = backend.end_command_list(command_list);
                    if let Err(error) = outcome {
                        log::error!("Pass '{}' failed: {}", entry.name, error);
                        return Err(error);
                    }
                    ended?;
                }
                PassCallback::External(execute) => {
                    let output = entry.external_output.unwrap_or(ResourceHandle::INVALID);
                    let mut ctx = ExternalPassContext {
                        pass_name: &entry.name,
                        pass: PassHandle::new(index),
                        output,
                        resources: &self.resources,
                        frame,
                    };
                    let result = execute(&mut ctx).inspect_err(|error| {
                        log::error!("External pass '{}' failed: {}", entry.name, error);
                    })?;
                    if let Some(texture) = &result.texture {
                        self.resources.entry_mut(output)?.backing =
                            Some(ResourceBacking::Texture(Arc::clone(texture)));
                    }
                    entry.external_result = Some(result);
                }
            }
        }
        Ok(())
    }

    /// Wait for the queue and every frame in flight to retire.
    ///
    /// Allowed in any state.
    pub fn wait_idle(&mut self) -> Result<()> {
        crate::profile_scope!("wait_idle");
        self.backend.wait_idle()?;
        self.submission.wait_all(self.backend.as_ref())
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Register an externally owned texture for this frame.
    pub fn import_texture(
        &mut self,
        name: impl Into<String>,
        texture: Arc<GpuTexture>,
    ) -> Result<ResourceHandle> {
        self.require("import_texture", FrameState::Active)?;
        self.resources.import_texture(name, texture)
    }

    /// Register an externally owned buffer for this frame.
    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: Arc<GpuBuffer>,
    ) -> Result<ResourceHandle> {
        self.require("import_buffer", FrameState::Active)?;
        self.resources.import_buffer(name, buffer)
    }

    /// Declare a transient texture outside of a pass setup.
    pub fn create_transient_texture(
        &mut self,
        descriptor: TextureDescriptor,
    ) -> Result<ResourceHandle> {
        self.require("create_transient_texture", FrameState::Active)?;
        self.resources.create_transient_texture(descriptor)
    }

    /// Declare a transient buffer outside of a pass setup.
    pub fn create_transient_buffer(
        &mut self,
        descriptor: BufferDescriptor,
    ) -> Result<ResourceHandle> {
        self.require("create_transient_buffer", FrameState::Active)?;
        self.resources.create_transient_buffer(descriptor)
    }

    /// Look up a resource declared this frame by name.
    pub fn get_resource(&self, name: &str) -> Option<ResourceHandle> {
        self.resources.get_resource(name)
    }

    /// Native texture behind a handle.
    pub fn get_texture(&self, handle: ResourceHandle) -> Result<&Arc<GpuTexture>> {
        self.resources.get_texture(handle)
    }

    /// Native buffer behind a handle.
    pub fn get_buffer(&self, handle: ResourceHandle) -> Result<&Arc<GpuBuffer>> {
        self.resources.get_buffer(handle)
    }

    /// Summary of a declared resource.
    pub fn resource_info(&self, handle: ResourceHandle) -> Result<ResourceInfo> {
        self.resources.info(handle)
    }

    /// Number of resources declared this frame.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    // ------------------------------------------------------------------
    // Passes
    // ------------------------------------------------------------------

    /// Add a pass without declared resources.
    ///
    /// Such a pass is culled unless something depends on it through
    /// [`add_dependency`](Self::add_dependency); use
    /// [`add_pass_with_setup`](Self::add_pass_with_setup) to mark it
    /// side-effecting.
    pub fn add_pass<F>(&mut self, name: impl Into<String>, execute: F) -> Result<PassHandle>
    where
        F: FnMut(&mut PassContext<'_>) -> Result<()> + Send + 'static,
    {
        self.add_pass_with_setup(name, |_| Ok(()), execute)
            .map(|(handle, ())| handle)
    }

    /// Add a pass, declaring its resources in `setup`.
    ///
    /// Returns the pass handle and whatever `setup` returned.
    pub fn add_pass_with_setup<T, S, F>(
        &mut self,
        name: impl Into<String>,
        setup: S,
        execute: F,
    ) -> Result<(PassHandle, T)>
    where
        S: FnOnce(&mut PassBuilder<'_>) -> Result<T>,
        F: FnMut(&mut PassContext<'_>) -> Result<()> + Send + 'static,
    {
        self.require("add_pass", FrameState::Active)?;
        self.passes.check_capacity()?;

        let name = name.into();
        let mut decl = PassDecl::default();
        let value = {
            let mut builder = PassBuilder::new(&mut self.resources, &mut decl, self.passes.len());
            setup(&mut builder)?
        };
        let handle = self
            .passes
            .push(name, decl, PassCallback::Standard(Box::new(execute)));
        Ok((handle, value))
    }

    /// Add an opaque pass delegating to another subsystem.
    ///
    /// The pass is always side-effecting and writes one transient texture,
    /// whose handle is returned. If the callback returns a texture it
    /// replaces the output for the rest of the frame; a returned semaphore is
    /// waited on by every dependent pass.
    pub fn add_external_pass<F>(
        &mut self,
        name: impl Into<String>,
        descriptor: TextureDescriptor,
        execute: F,
    ) -> Result<ResourceHandle>
    where
        F: FnMut(&mut ExternalPassContext<'_>) -> Result<ExternalPassResult> + Send + 'static,
    {
        self.add_external_pass_with_setup(name, |_| Ok(()), descriptor, execute)
    }

    /// Add an external pass that also declares inputs in `setup`.
    pub fn add_external_pass_with_setup<S, F>(
        &mut self,
        name: impl Into<String>,
        setup: S,
        descriptor: TextureDescriptor,
        execute: F,
    ) -> Result<ResourceHandle>
    where
        S: FnOnce(&mut PassBuilder<'_>) -> Result<()>,
        F: FnMut(&mut ExternalPassContext<'_>) -> Result<ExternalPassResult> + Send + 'static,
    {
        self.require("add_external_pass", FrameState::Active)?;
        self.passes.check_capacity()?;

        let name = name.into();
        let mut decl = PassDecl::default();
        let output = {
            let mut builder = PassBuilder::new(&mut self.resources, &mut decl, self.passes.len());
            setup(&mut builder)?;
            let output = builder.create_transient_texture(descriptor)?;
            builder.write(output)?;
            builder.has_side_effects();
            output
        };
        let handle = self
            .passes
            .push(name, decl, PassCallback::External(Box::new(execute)));
        self.passes.get_mut(handle)?.external_output = Some(output);
        Ok(output)
    }

    /// Order `dependent` after `dependency` regardless of resource usage.
    pub fn add_dependency(&mut self, dependent: PassHandle, dependency: PassHandle) -> Result<()> {
        self.require("add_dependency", FrameState::Active)?;
        self.passes.add_edge(dependent, dependency)
    }

    /// Summary of a declared pass. Derived fields reflect the last compile.
    pub fn pass_info(&self, handle: PassHandle) -> Result<PassInfo> {
        self.passes.info(handle)
    }

    /// Number of passes declared this frame.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Live passes in execution order, as of the last compile.
    pub fn execution_order(&self) -> Vec<PassHandle> {
        self.execution_order
            .iter()
            .map(|&index| PassHandle::new(index))
            .collect()
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Current frame state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frame-in-flight slot of the current (or last) frame.
    pub fn frame_slot(&self) -> usize {
        self.slot
    }

    /// Metadata of the current frame.
    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            frame_index: self.frame_index,
            slot: self.slot,
            width: self.width,
            height: self.height,
        }
    }

    /// Returns true while the GPU may still be working on the slot's last frame.
    pub fn is_slot_in_flight(&self, slot: usize) -> bool {
        self.submission.is_pending(slot)
    }

    /// The configuration the graph was created with.
    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    /// What the last compile did with the transient pools.
    pub fn allocation_stats(&self) -> AllocationStats {
        self.last_allocation
    }

    /// Pooled textures, buffers and command lists of a slot.
    pub fn pool_sizes(&self, slot: usize) -> (usize, usize, usize) {
        let (textures, buffers) = self.allocator.pool_sizes(slot);
        (textures, buffers, self.submission.pool_size(slot))
    }

    /// Binding pools of this graph.
    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    /// Binding pools of this graph, for registering spaces.
    pub fn bindings_mut(&mut self) -> &mut BindingRegistry {
        &mut self.bindings
    }

    /// The backend this graph drives.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if let Err(error) = self.wait_idle() {
            log::error!("wait_idle failed while dropping RenderGraph: {}", error);
        }
        self.resources.reset();
        if let Err(error) = self.allocator.release_all(self.backend.as_ref()) {
            log::error!("Failed to release transient resources: {}", error);
        }
    }
}

static_assertions::assert_impl_all!(RenderGraph: Send);
