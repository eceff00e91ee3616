//! Binding pools.
//!
//! Passes publish the resources their shaders consume by binding them into
//! a per-space pool and flushing the pool into a [`BindingTable`]. Pools are
//! owned by the [`RenderGraph`](crate::RenderGraph) that uses them; a space
//! without a registered pool rejects binds with
//! [`FrameGraphError::MissingBinding`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::backend::{GpuBuffer, GpuTexture};
use crate::error::{FrameGraphError, Result};
use crate::graph::ResourceHandle;

/// Update frequency group of a set of bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingSpace {
    /// Bound once per frame (camera, time).
    Frame,
    /// Bound once per pass.
    Pass,
    /// Bound per material.
    Material,
    /// Bound per draw.
    Object,
}

/// Stable binding slot within a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingSlot(pub u32);

/// Graph resource to bind, tagged with the kind the shader expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A texture handle.
    Texture(ResourceHandle),
    /// A buffer handle.
    Buffer(ResourceHandle),
}

impl ResourceRef {
    /// The underlying handle.
    pub fn handle(self) -> ResourceHandle {
        match self {
            Self::Texture(handle) | Self::Buffer(handle) => handle,
        }
    }
}

/// Native resource resolved from a [`ResourceRef`].
#[derive(Debug, Clone)]
pub enum BoundResource {
    /// A texture.
    Texture(Arc<GpuTexture>),
    /// A buffer.
    Buffer(Arc<GpuBuffer>),
}

/// Flushed bindings of one space, ordered by slot.
#[derive(Debug, Clone)]
pub struct BindingTable {
    space: BindingSpace,
    entries: Vec<(BindingSlot, BoundResource)>,
}

impl BindingTable {
    /// The space these bindings belong to.
    pub fn space(&self) -> BindingSpace {
        self.space
    }

    /// Bindings ordered by slot.
    pub fn entries(&self) -> &[(BindingSlot, BoundResource)] {
        &self.entries
    }

    /// Look up a single slot.
    pub fn get(&self, slot: BindingSlot) -> Option<&BoundResource> {
        self.entries
            .binary_search_by_key(&slot, |(s, _)| *s)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing was bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pending bindings for one space.
#[derive(Debug)]
pub struct BindingPool {
    max_slots: usize,
    pending: BTreeMap<BindingSlot, BoundResource>,
    tables_flushed: usize,
}

impl BindingPool {
    fn new(max_slots: usize) -> Self {
        Self {
            max_slots,
            pending: BTreeMap::new(),
            tables_flushed: 0,
        }
    }

    /// Maximum number of distinct slots bound before a flush.
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    /// Tables flushed since the start of the frame.
    pub fn tables_flushed(&self) -> usize {
        self.tables_flushed
    }
}

/// Binding pools owned by one graph, keyed by space.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    pools: HashMap<BindingSpace, BindingPool>,
}

impl BindingRegistry {
    /// Create a registry with no pools.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the pool of a space.
    pub fn register_pool(&mut self, space: BindingSpace, max_slots: usize) {
        log::debug!("Binding pool for {:?} registered ({} slots)", space, max_slots);
        self.pools.insert(space, BindingPool::new(max_slots));
    }

    /// Remove the pool of a space. Later binds into it fail.
    pub fn remove_pool(&mut self, space: BindingSpace) -> bool {
        self.pools.remove(&space).is_some()
    }

    /// Returns true if a pool is registered for the space.
    pub fn has_pool(&self, space: BindingSpace) -> bool {
        self.pools.contains_key(&space)
    }

    /// The pool of a space.
    pub fn pool(&self, space: BindingSpace) -> Option<&BindingPool> {
        self.pools.get(&space)
    }

    fn pool_mut(&mut self, space: BindingSpace) -> Result<&mut BindingPool> {
        self.pools
            .get_mut(&space)
            .ok_or(FrameGraphError::MissingBinding(space))
    }

    /// Stage a resource at a slot. Rebinding a slot replaces it.
    pub fn bind(
        &mut self,
        space: BindingSpace,
        slot: BindingSlot,
        resource: BoundResource,
    ) -> Result<()> {
        let pool = self.pool_mut(space)?;
        if !pool.pending.contains_key(&slot) && pool.pending.len() >= pool.max_slots {
            return Err(FrameGraphError::CapacityExceeded {
                what: "binding slot",
                limit: pool.max_slots,
            });
        }
        pool.pending.insert(slot, resource);
        Ok(())
    }

    /// Move the staged bindings of a space into a table.
    pub fn flush(&mut self, space: BindingSpace) -> Result<BindingTable> {
        let pool = self.pool_mut(space)?;
        pool.tables_flushed += 1;
        let entries = std::mem::take(&mut pool.pending).into_iter().collect();
        Ok(BindingTable { space, entries })
    }

    /// Drop staged bindings and counters at the start of a frame.
    pub(crate) fn reset_frame(&mut self) {
        for pool in self.pools.values_mut() {
            pool.pending.clear();
            pool.tables_flushed = 0;
        }
    }
}
