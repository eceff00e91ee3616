//! Resource registry.
//!
//! A versioned table of the logical resources declared in one frame. Slots
//! are claimed in declaration order and live until the next reset, which
//! bumps every slot's generation so handles from earlier frames go stale.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuTexture};
use crate::error::{FrameGraphError, Result};
use crate::types::{BufferDescriptor, ResourceKind, TextureDescriptor};

use super::handle::ResourceHandle;

/// Where a resource comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOrigin {
    /// Owned outside the graph, referenced by handle.
    Imported,
    /// Owned and pooled by the graph, scoped to the passes that use it.
    Transient,
}

/// Shape of a transient resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourceDescriptor {
    Texture(TextureDescriptor),
    Buffer(BufferDescriptor),
}

/// Native resource behind a slot.
#[derive(Debug, Clone)]
pub(crate) enum ResourceBacking {
    Texture(Arc<GpuTexture>),
    Buffer(Arc<GpuBuffer>),
}

#[derive(Debug)]
pub(crate) struct ResourceEntry {
    pub(crate) kind: ResourceKind,
    pub(crate) origin: ResourceOrigin,
    pub(crate) version: u32,
    pub(crate) name: Option<String>,
    pub(crate) descriptor: Option<ResourceDescriptor>,
    pub(crate) backing: Option<ResourceBacking>,
    pub(crate) first_pass: Option<usize>,
    pub(crate) last_pass: Option<usize>,
}

impl ResourceEntry {
    fn empty() -> Self {
        Self {
            kind: ResourceKind::Texture,
            origin: ResourceOrigin::Transient,
            version: 0,
            name: None,
            descriptor: None,
            backing: None,
            first_pass: None,
            last_pass: None,
        }
    }

    /// Extend the usage span to cover `pass`.
    pub(crate) fn touch(&mut self, pass: usize) {
        self.first_pass = Some(self.first_pass.map_or(pass, |first| first.min(pass)));
        self.last_pass = Some(self.last_pass.map_or(pass, |last| last.max(pass)));
    }

    fn clear(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.name = None;
        self.descriptor = None;
        self.backing = None;
        self.first_pass = None;
        self.last_pass = None;
    }
}

/// Read-only summary of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Lookup name, if any.
    pub name: Option<String>,
    /// Texture or buffer.
    pub kind: ResourceKind,
    /// Imported or transient.
    pub origin: ResourceOrigin,
    /// First pass (declaration index) touching the resource.
    pub first_pass: Option<usize>,
    /// Last pass (declaration index) touching the resource.
    pub last_pass: Option<usize>,
    /// Whether a native resource is attached.
    pub allocated: bool,
}

#[derive(Debug)]
pub(crate) struct ResourceRegistry {
    entries: Vec<ResourceEntry>,
    count: usize,
    max_resources: usize,
    names: HashMap<String, u32>,
}

impl ResourceRegistry {
    pub(crate) fn new(max_resources: usize) -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
            max_resources,
            names: HashMap::new(),
        }
    }

    /// Invalidate every handle and forget this frame's resources.
    pub(crate) fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.clear();
        }
        self.count = 0;
        self.names.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }

    fn claim(
        &mut self,
        kind: ResourceKind,
        origin: ResourceOrigin,
        name: Option<String>,
        descriptor: Option<ResourceDescriptor>,
        backing: Option<ResourceBacking>,
    ) -> Result<ResourceHandle> {
        if self.count >= self.max_resources {
            return Err(FrameGraphError::CapacityExceeded {
                what: "resource",
                limit: self.max_resources,
            });
        }
        let index = self.count;
        if index == self.entries.len() {
            self.entries.push(ResourceEntry::empty());
        }
        self.count += 1;

        let entry = &mut self.entries[index];
        entry.kind = kind;
        entry.origin = origin;
        entry.descriptor = descriptor;
        entry.backing = backing;
        if let Some(name) = &name
            && self.names.insert(name.clone(), index as u32).is_some()
        {
            log::debug!("Resource name '{}' redeclared; lookups use the newest", name);
        }
        entry.name = name;
        Ok(ResourceHandle::new(index as u32, entry.version))
    }

    pub(crate) fn import_texture(
        &mut self,
        name: impl Into<String>,
        texture: Arc<GpuTexture>,
    ) -> Result<ResourceHandle> {
        self.claim(
            ResourceKind::Texture,
            ResourceOrigin::Imported,
            Some(name.into()),
            None,
            Some(ResourceBacking::Texture(texture)),
        )
    }

    pub(crate) fn import_buffer(
        &mut self,
        name: impl Into<String>,
        buffer: Arc<GpuBuffer>,
    ) -> Result<ResourceHandle> {
        self.claim(
            ResourceKind::Buffer,
            ResourceOrigin::Imported,
            Some(name.into()),
            None,
            Some(ResourceBacking::Buffer(buffer)),
        )
    }

    pub(crate) fn create_transient_texture(
        &mut self,
        descriptor: TextureDescriptor,
    ) -> Result<ResourceHandle> {
        self.claim(
            ResourceKind::Texture,
            ResourceOrigin::Transient,
            descriptor.label.clone(),
            Some(ResourceDescriptor::Texture(descriptor)),
            None,
        )
    }

    pub(crate) fn create_transient_buffer(
        &mut self,
        descriptor: BufferDescriptor,
    ) -> Result<ResourceHandle> {
        self.claim(
            ResourceKind::Buffer,
            ResourceOrigin::Transient,
            descriptor.label.clone(),
            Some(ResourceDescriptor::Buffer(descriptor)),
            None,
        )
    }

    pub(crate) fn get_resource(&self, name: &str) -> Option<ResourceHandle> {
        let index = *self.names.get(name)?;
        let entry = &self.entries[index as usize];
        Some(ResourceHandle::new(index, entry.version))
    }

    /// Validate a handle against the current generation.
    pub(crate) fn entry(&self, handle: ResourceHandle) -> Result<&ResourceEntry> {
        let index = handle.index() as usize;
        let entry = self
            .entries
            .get(index)
            .ok_or(FrameGraphError::InvalidHandle(handle))?;
        if entry.version != handle.version() {
            return Err(FrameGraphError::StaleHandle {
                handle,
                current_version: entry.version,
            });
        }
        if index >= self.count {
            return Err(FrameGraphError::InvalidHandle(handle));
        }
        Ok(entry)
    }

    pub(crate) fn entry_mut(&mut self, handle: ResourceHandle) -> Result<&mut ResourceEntry> {
        self.entry(handle)?;
        Ok(&mut self.entries[handle.index() as usize])
    }

    fn expect_kind(
        entry: &ResourceEntry,
        handle: ResourceHandle,
        expected: ResourceKind,
    ) -> Result<()> {
        if entry.kind != expected {
            return Err(FrameGraphError::WrongKind {
                handle,
                expected,
                found: entry.kind,
            });
        }
        Ok(())
    }

    pub(crate) fn get_texture(&self, handle: ResourceHandle) -> Result<&Arc<GpuTexture>> {
        let entry = self.entry(handle)?;
        Self::expect_kind(entry, handle, ResourceKind::Texture)?;
        match &entry.backing {
            Some(ResourceBacking::Texture(texture)) => Ok(texture),
            _ => Err(FrameGraphError::NotAllocated(handle)),
        }
    }

    pub(crate) fn get_buffer(&self, handle: ResourceHandle) -> Result<&Arc<GpuBuffer>> {
        let entry = self.entry(handle)?;
        Self::expect_kind(entry, handle, ResourceKind::Buffer)?;
        match &entry.backing {
            Some(ResourceBacking::Buffer(buffer)) => Ok(buffer),
            _ => Err(FrameGraphError::NotAllocated(handle)),
        }
    }

    pub(crate) fn info(&self, handle: ResourceHandle) -> Result<ResourceInfo> {
        let entry = self.entry(handle)?;
        Ok(ResourceInfo {
            name: entry.name.clone(),
            kind: entry.kind,
            origin: entry.origin,
            first_pass: entry.first_pass,
            last_pass: entry.last_pass,
            allocated: entry.backing.is_some(),
        })
    }

    /// Entries claimed this frame, in declaration order.
    pub(crate) fn live_entries_mut(&mut self) -> &mut [ResourceEntry] {
        &mut self.entries[..self.count]
    }
}
