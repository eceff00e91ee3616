//! Pass registry and the contexts handed to pass callbacks.

use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuCommandList, GpuSemaphore, GpuTexture};
use crate::bindings::{
    BindingRegistry, BindingSlot, BindingSpace, BindingTable, BoundResource, ResourceRef,
};
use crate::error::{FrameGraphError, Result};
use crate::types::{BufferDescriptor, TextureDescriptor};

use super::handle::{PassHandle, ResourceHandle};
use super::resource::ResourceRegistry;

/// Execute callback of a regular pass.
pub type ExecuteFn = Box<dyn FnMut(&mut PassContext<'_>) -> Result<()> + Send>;

/// Execute callback of an external pass.
pub type ExternalExecuteFn =
    Box<dyn FnMut(&mut ExternalPassContext<'_>) -> Result<ExternalPassResult> + Send>;

pub(crate) enum PassCallback {
    Standard(ExecuteFn),
    External(ExternalExecuteFn),
}

/// What an external pass hands back to the graph.
#[derive(Debug, Clone, Default)]
pub struct ExternalPassResult {
    /// Finished texture; replaces the pass output for the rest of the frame.
    pub texture: Option<Arc<GpuTexture>>,
    /// Semaphore downstream passes must wait on. When `None`, downstream
    /// passes wait on whatever this pass's own dependencies signalled.
    pub semaphore: Option<Arc<GpuSemaphore>>,
}

impl ExternalPassResult {
    /// Result that keeps the graph-allocated output and needs no wait.
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the finished texture.
    pub fn with_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Set the semaphore to wait on.
    pub fn with_semaphore(mut self, semaphore: Arc<GpuSemaphore>) -> Self {
        self.semaphore = Some(semaphore);
        self
    }
}

/// Per-frame metadata visible to pass callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Index passed to `begin_frame`.
    pub frame_index: u64,
    /// Frame-in-flight slot in use.
    pub slot: usize,
    /// Frame width used for auto-sized textures.
    pub width: u32,
    /// Frame height used for auto-sized textures.
    pub height: u32,
}

pub(crate) struct PassEntry {
    pub(crate) name: String,
    pub(crate) reads: Vec<ResourceHandle>,
    pub(crate) writes: Vec<ResourceHandle>,
    pub(crate) has_side_effects: bool,
    pub(crate) external_output: Option<ResourceHandle>,
    pub(crate) depends_on: Vec<usize>,
    pub(crate) dependents: Vec<usize>,
    pub(crate) culled: bool,
    pub(crate) execution_order: Option<usize>,
    pub(crate) command_list: Option<usize>,
    pub(crate) external_result: Option<ExternalPassResult>,
    pub(crate) callback: PassCallback,
}

impl PassEntry {
    pub(crate) fn is_external(&self) -> bool {
        matches!(self.callback, PassCallback::External(_))
    }

    /// Drop everything derived by the last compile.
    pub(crate) fn clear_derived(&mut self) {
        self.depends_on.clear();
        self.dependents.clear();
        self.culled = true;
        self.execution_order = None;
        self.command_list = None;
        self.external_result = None;
    }
}

impl std::fmt::Debug for PassEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassEntry")
            .field("name", &self.name)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("has_side_effects", &self.has_side_effects)
            .field("external", &self.is_external())
            .field("depends_on", &self.depends_on)
            .field("culled", &self.culled)
            .finish_non_exhaustive()
    }
}

/// Read-only summary of a declared pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassInfo {
    /// Pass name.
    pub name: String,
    /// Passes this one waits for.
    pub depends_on: Vec<PassHandle>,
    /// Passes waiting for this one.
    pub dependents: Vec<PassHandle>,
    /// Whether the pass is side-effecting.
    pub has_side_effects: bool,
    /// Whether the pass is external.
    pub is_external: bool,
    /// Whether the last compile culled the pass.
    pub culled: bool,
    /// Position in the execution order, if scheduled.
    pub execution_order: Option<usize>,
    /// Whether a command list is assigned.
    pub has_command_list: bool,
}

/// Ordered table of the passes declared in the current frame.
#[derive(Debug)]
pub(crate) struct PassRegistry {
    passes: Vec<PassEntry>,
    max_passes: usize,
    /// Explicit (dependent, dependency) edges.
    edges: Vec<(usize, usize)>,
}

impl PassRegistry {
    pub(crate) fn new(max_passes: usize) -> Self {
        Self {
            passes: Vec::new(),
            max_passes,
            edges: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.passes.clear();
        self.edges.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.passes.len()
    }

    pub(crate) fn check_capacity(&self) -> Result<()> {
        if self.passes.len() >= self.max_passes {
            return Err(FrameGraphError::CapacityExceeded {
                what: "pass",
                limit: self.max_passes,
            });
        }
        Ok(())
    }

    pub(crate) fn push(
        &mut self,
        name: String,
        decl: PassDecl,
        callback: PassCallback,
    ) -> PassHandle {
        let index = self.passes.len();
        self.passes.push(PassEntry {
            name,
            reads: decl.reads,
            writes: decl.writes,
            has_side_effects: decl.has_side_effects,
            external_output: None,
            depends_on: Vec::new(),
            dependents: Vec::new(),
            culled: true,
            execution_order: None,
            command_list: None,
            external_result: None,
            callback,
        });
        PassHandle::new(index)
    }

    pub(crate) fn get(&self, handle: PassHandle) -> Result<&PassEntry> {
        self.passes
            .get(handle.index())
            .ok_or(FrameGraphError::InvalidPass(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: PassHandle) -> Result<&mut PassEntry> {
        self.passes
            .get_mut(handle.index())
            .ok_or(FrameGraphError::InvalidPass(handle))
    }

    pub(crate) fn add_edge(&mut self, dependent: PassHandle, dependency: PassHandle) -> Result<()> {
        self.get(dependent)?;
        self.get(dependency)?;
        if dependent == dependency {
            return Err(FrameGraphError::CircularDependency {
                passes: vec![self.passes[dependent.index()].name.clone()],
            });
        }
        let edge = (dependent.index(), dependency.index());
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(())
    }

    pub(crate) fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub(crate) fn entries(&self) -> &[PassEntry] {
        &self.passes
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [PassEntry] {
        &mut self.passes
    }

    pub(crate) fn info(&self, handle: PassHandle) -> Result<PassInfo> {
        let pass = self.get(handle)?;
        Ok(PassInfo {
            name: pass.name.clone(),
            depends_on: pass.depends_on.iter().map(|&i| PassHandle::new(i)).collect(),
            dependents: pass.dependents.iter().map(|&i| PassHandle::new(i)).collect(),
            has_side_effects: pass.has_side_effects,
            is_external: pass.is_external(),
            culled: pass.culled,
            execution_order: pass.execution_order,
            has_command_list: pass.command_list.is_some(),
        })
    }
}

/// Reads, writes and flags collected while a pass is set up.
#[derive(Debug, Default)]
pub(crate) struct PassDecl {
    pub(crate) reads: Vec<ResourceHandle>,
    pub(crate) writes: Vec<ResourceHandle>,
    pub(crate) has_side_effects: bool,
}

/// Declares the resources a pass uses.
///
/// Handed to the setup closure of
/// [`add_pass_with_setup`](crate::RenderGraph::add_pass_with_setup). It can
/// only create transient resources and record reads and writes; nothing else
/// in the graph is reachable from it.
pub struct PassBuilder<'a> {
    registry: &'a mut ResourceRegistry,
    decl: &'a mut PassDecl,
    pass_index: usize,
}

impl<'a> PassBuilder<'a> {
    pub(crate) fn new(
        registry: &'a mut ResourceRegistry,
        decl: &'a mut PassDecl,
        pass_index: usize,
    ) -> Self {
        Self {
            registry,
            decl,
            pass_index,
        }
    }

    /// Declare a transient texture. Zero width or height follows the frame
    /// dimensions.
    pub fn create_transient_texture(
        &mut self,
        descriptor: TextureDescriptor,
    ) -> Result<ResourceHandle> {
        self.registry.create_transient_texture(descriptor)
    }

    /// Declare a transient buffer.
    pub fn create_transient_buffer(
        &mut self,
        descriptor: BufferDescriptor,
    ) -> Result<ResourceHandle> {
        self.registry.create_transient_buffer(descriptor)
    }

    /// Record that the pass reads `handle`.
    pub fn read(&mut self, handle: ResourceHandle) -> Result<ResourceHandle> {
        self.registry.entry_mut(handle)?.touch(self.pass_index);
        if !self.decl.reads.contains(&handle) {
            self.decl.reads.push(handle);
        }
        Ok(handle)
    }

    /// Record that the pass writes `handle`.
    pub fn write(&mut self, handle: ResourceHandle) -> Result<ResourceHandle> {
        self.registry.entry_mut(handle)?.touch(self.pass_index);
        if !self.decl.writes.contains(&handle) {
            self.decl.writes.push(handle);
        }
        Ok(handle)
    }

    /// Keep the pass alive even if nothing consumes its output.
    pub fn has_side_effects(&mut self) -> &mut Self {
        self.decl.has_side_effects = true;
        self
    }
}

/// Resource access during pass execution.
///
/// Carries graph resource lookup, the pass's command list, the binding
/// pools and frame metadata. Nothing else from the graph is reachable.
pub struct PassContext<'a> {
    pub(crate) pass_name: &'a str,
    pub(crate) pass: PassHandle,
    pub(crate) resources: &'a ResourceRegistry,
    pub(crate) command_list: &'a GpuCommandList,
    pub(crate) bindings: &'a mut BindingRegistry,
    pub(crate) frame: FrameInfo,
}

impl<'a> PassContext<'a> {
    /// Name of the executing pass.
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Handle of the executing pass.
    pub fn pass(&self) -> PassHandle {
        self.pass
    }

    /// Frame metadata.
    pub fn frame(&self) -> FrameInfo {
        self.frame
    }

    /// Command list to record into.
    pub fn command_list(&self) -> &GpuCommandList {
        self.command_list
    }

    /// Native texture behind a handle.
    pub fn get_texture(&self, handle: ResourceHandle) -> Result<&Arc<GpuTexture>> {
        self.resources.get_texture(handle)
    }

    /// Native buffer behind a handle.
    pub fn get_buffer(&self, handle: ResourceHandle) -> Result<&Arc<GpuBuffer>> {
        self.resources.get_buffer(handle)
    }

    /// Resolve a resource and stage it at `slot` of `space`.
    pub fn bind(
        &mut self,
        space: BindingSpace,
        slot: BindingSlot,
        resource: ResourceRef,
    ) -> Result<()> {
        let bound = resolve(self.resources, resource)?;
        self.bindings.bind(space, slot, bound)
    }

    /// Move the staged bindings of `space` into a table.
    pub fn flush(&mut self, space: BindingSpace) -> Result<BindingTable> {
        self.bindings.flush(space)
    }
}

fn resolve(resources: &ResourceRegistry, resource: ResourceRef) -> Result<BoundResource> {
    match resource {
        ResourceRef::Texture(handle) => resources
            .get_texture(handle)
            .map(|t| BoundResource::Texture(Arc::clone(t))),
        ResourceRef::Buffer(handle) => resources
            .get_buffer(handle)
            .map(|b| BoundResource::Buffer(Arc::clone(b))),
    }
}

/// Resource access during external pass execution.
pub struct ExternalPassContext<'a> {
    pub(crate) pass_name: &'a str,
    pub(crate) pass: PassHandle,
    pub(crate) output: ResourceHandle,
    pub(crate) resources: &'a ResourceRegistry,
    pub(crate) frame: FrameInfo,
}

impl<'a> ExternalPassContext<'a> {
    /// Name of the executing pass.
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Handle of the executing pass.
    pub fn pass(&self) -> PassHandle {
        self.pass
    }

    /// Frame metadata.
    pub fn frame(&self) -> FrameInfo {
        self.frame
    }

    /// Handle of the pass output texture.
    pub fn output(&self) -> ResourceHandle {
        self.output
    }

    /// Graph-allocated output texture, usable when the subsystem renders in place.
    pub fn output_texture(&self) -> Result<&Arc<GpuTexture>> {
        self.resources.get_texture(self.output)
    }

    /// Native texture behind a handle.
    pub fn get_texture(&self, handle: ResourceHandle) -> Result<&Arc<GpuTexture>> {
        self.resources.get_texture(handle)
    }

    /// Native buffer behind a handle.
    pub fn get_buffer(&self, handle: ResourceHandle) -> Result<&Arc<GpuBuffer>> {
        self.resources.get_buffer(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TextureFormat, TextureUsage};

    fn noop() -> PassCallback {
        PassCallback::Standard(Box::new(|_ctx| Ok(())))
    }

    fn texture() -> TextureDescriptor {
        TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::TEXTURE_BINDING)
    }

    #[test]
    fn test_capacity() {
        let mut registry = PassRegistry::new(1);
        assert!(registry.check_capacity().is_ok());
        registry.push("a".into(), PassDecl::default(), noop());
        assert_eq!(
            registry.check_capacity().unwrap_err(),
            FrameGraphError::CapacityExceeded {
                what: "pass",
                limit: 1
            }
        );
    }

    #[test]
    fn test_explicit_edges() {
        let mut registry = PassRegistry::new(8);
        let a = registry.push("a".into(), PassDecl::default(), noop());
        let b = registry.push("b".into(), PassDecl::default(), noop());

        registry.add_edge(b, a).unwrap();
        registry.add_edge(b, a).unwrap();
        assert_eq!(registry.edges(), &[(1, 0)]);

        assert!(matches!(
            registry.add_edge(a, a),
            Err(FrameGraphError::CircularDependency { .. })
        ));
        assert_eq!(
            registry.add_edge(PassHandle::new(5), a).unwrap_err(),
            FrameGraphError::InvalidPass(PassHandle::new(5))
        );

        registry.reset();
        assert_eq!(registry.len(), 0);
        assert!(registry.edges().is_empty());
    }

    #[test]
    fn test_builder_records_usage_once() {
        let mut resources = ResourceRegistry::new(4);
        let mut decl = PassDecl::default();
        let handle = {
            let mut builder = PassBuilder::new(&mut resources, &mut decl, 2);
            let handle = builder.create_transient_texture(texture()).unwrap();
            builder.read(handle).unwrap();
            builder.read(handle).unwrap();
            builder.write(handle).unwrap();
            builder.has_side_effects();
            handle
        };
        assert_eq!(decl.reads, vec![handle]);
        assert_eq!(decl.writes, vec![handle]);
        assert!(decl.has_side_effects);

        let info = resources.info(handle).unwrap();
        assert_eq!(info.first_pass, Some(2));
        assert_eq!(info.last_pass, Some(2));
    }

    #[test]
    fn test_builder_rejects_stale_handles() {
        let mut resources = ResourceRegistry::new(4);
        let handle = resources.create_transient_texture(texture()).unwrap();
        resources.reset();

        let mut decl = PassDecl::default();
        let mut builder = PassBuilder::new(&mut resources, &mut decl, 0);
        assert!(matches!(
            builder.write(handle),
            Err(FrameGraphError::StaleHandle { .. })
        ));
        assert!(decl.writes.is_empty());
    }
}
