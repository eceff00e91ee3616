//! Transient resource allocation.
//!
//! Each frame-in-flight slot owns a grow-only pool of textures and a pool of
//! buffers. Pools are addressed by position: the Nth transient texture with
//! a live span this frame maps to the Nth texture of the slot's pool. A
//! stable declaration shape across frames therefore reuses every resource
//! once the pool has warmed up.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuBuffer, GpuTexture};
use crate::error::Result;
use crate::graph::resource::{
    ResourceBacking, ResourceDescriptor, ResourceOrigin, ResourceRegistry,
};
use crate::types::{BufferDescriptor, TextureDescriptor};

#[derive(Debug)]
struct PooledTexture {
    texture: Arc<GpuTexture>,
    /// Resolved descriptor the texture was created from.
    descriptor: TextureDescriptor,
}

#[derive(Debug)]
struct PooledBuffer {
    buffer: Arc<GpuBuffer>,
    descriptor: BufferDescriptor,
}

#[derive(Debug, Default)]
struct SlotPools {
    textures: Vec<PooledTexture>,
    buffers: Vec<PooledBuffer>,
}

/// What one allocation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Pool entries reused as is.
    pub reused: usize,
    /// Pool entries appended.
    pub created: usize,
    /// Pool entries destroyed and created again with a new shape.
    pub recreated: usize,
}

/// Per-slot pools of transient textures and buffers.
#[derive(Debug)]
pub(crate) struct TransientAllocator {
    slots: Vec<SlotPools>,
}

fn release_texture(backend: &dyn GpuBackend, texture: Arc<GpuTexture>) -> Result<()> {
    match Arc::try_unwrap(texture) {
        Ok(texture) => backend.destroy_texture(texture)?,
        Err(shared) => log::warn!(
            "Transient texture {:?} is still referenced outside the graph; \
             it is released when the last reference drops",
            shared
        ),
    }
    Ok(())
}

fn release_buffer(backend: &dyn GpuBackend, buffer: Arc<GpuBuffer>) -> Result<()> {
    match Arc::try_unwrap(buffer) {
        Ok(buffer) => backend.destroy_buffer(buffer)?,
        Err(shared) => log::warn!(
            "Transient buffer {:?} is still referenced outside the graph; \
             it is released when the last reference drops",
            shared
        ),
    }
    Ok(())
}

impl TransientAllocator {
    pub(crate) fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: (0..frames_in_flight).map(|_| SlotPools::default()).collect(),
        }
    }

    /// Number of pooled textures and buffers of a slot.
    pub(crate) fn pool_sizes(&self, slot: usize) -> (usize, usize) {
        self.slots
            .get(slot)
            .map_or((0, 0), |pools| (pools.textures.len(), pools.buffers.len()))
    }

    /// Attach native resources to every live transient of this frame.
    ///
    /// Transients without a live span are skipped and consume no pool entry.
    pub(crate) fn allocate(
        &mut self,
        backend: &dyn GpuBackend,
        slot: usize,
        resources: &mut ResourceRegistry,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<AllocationStats> {
        crate::profile_scope!("allocate_transients");

        let pools = &mut self.slots[slot];
        let mut stats = AllocationStats::default();
        let mut next_texture = 0;
        let mut next_buffer = 0;

        for entry in resources.live_entries_mut() {
            if entry.origin != ResourceOrigin::Transient || entry.first_pass.is_none() {
                continue;
            }
            match &entry.descriptor {
                Some(ResourceDescriptor::Texture(descriptor)) => {
                    let resolved = descriptor.resolved(frame_width, frame_height);
                    let texture = Self::texture_at(
                        backend,
                        &mut pools.textures,
                        next_texture,
                        resolved,
                        &mut stats,
                    )?;
                    next_texture += 1;
                    entry.backing = Some(ResourceBacking::Texture(texture));
                }
                Some(ResourceDescriptor::Buffer(descriptor)) => {
                    let buffer = Self::buffer_at(
                        backend,
                        &mut pools.buffers,
                        next_buffer,
                        descriptor.clone(),
                        &mut stats,
                    )?;
                    next_buffer += 1;
                    entry.backing = Some(ResourceBacking::Buffer(buffer));
                }
                None => {}
            }
        }

        if stats.created > 0 || stats.recreated > 0 {
            log::debug!(
                "Slot {} transients: {} reused, {} created, {} recreated",
                slot,
                stats.reused,
                stats.created,
                stats.recreated
            );
        }
        Ok(stats)
    }

    fn texture_at(
        backend: &dyn GpuBackend,
        pool: &mut Vec<PooledTexture>,
        position: usize,
        descriptor: TextureDescriptor,
        stats: &mut AllocationStats,
    ) -> Result<Arc<GpuTexture>> {
        if let Some(pooled) = pool.get_mut(position) {
            if pooled.descriptor.same_shape(&descriptor) {
                stats.reused += 1;
                return Ok(Arc::clone(&pooled.texture));
            }
            if pooled.descriptor.format == descriptor.format
                && pooled.descriptor.usage == descriptor.usage
            {
                log::debug!(
                    "Resizing transient texture {} from {:?} to {:?}",
                    position,
                    pooled.descriptor.size,
                    descriptor.size
                );
            } else {
                log::warn!(
                    "Transient texture {} changed shape between frames ({:?} -> {:?}); \
                     declare transients in a stable order to keep pooling effective",
                    position,
                    pooled.descriptor,
                    descriptor
                );
            }
            let texture = Arc::new(backend.create_texture(&descriptor)?);
            let old = std::mem::replace(
                pooled,
                PooledTexture {
                    texture: Arc::clone(&texture),
                    descriptor,
                },
            );
            release_texture(backend, old.texture)?;
            stats.recreated += 1;
            return Ok(texture);
        }

        let texture = Arc::new(backend.create_texture(&descriptor)?);
        pool.push(PooledTexture {
            texture: Arc::clone(&texture),
            descriptor,
        });
        stats.created += 1;
        Ok(texture)
    }

    fn buffer_at(
        backend: &dyn GpuBackend,
        pool: &mut Vec<PooledBuffer>,
        position: usize,
        descriptor: BufferDescriptor,
        stats: &mut AllocationStats,
    ) -> Result<Arc<GpuBuffer>> {
        if let Some(pooled) = pool.get_mut(position) {
            if pooled.descriptor.same_shape(&descriptor) {
                stats.reused += 1;
                return Ok(Arc::clone(&pooled.buffer));
            }
            if pooled.descriptor.usage == descriptor.usage {
                log::debug!(
                    "Recreating transient buffer {} ({} -> {} bytes)",
                    position,
                    pooled.descriptor.size,
                    descriptor.size
                );
            } else {
                log::warn!(
                    "Transient buffer {} changed usage between frames ({:?} -> {:?}); \
                     declare transients in a stable order to keep pooling effective",
                    position,
                    pooled.descriptor.usage,
                    descriptor.usage
                );
            }
            let buffer = Arc::new(backend.create_buffer(&descriptor)?);
            let old = std::mem::replace(
                pooled,
                PooledBuffer {
                    buffer: Arc::clone(&buffer),
                    descriptor,
                },
            );
            release_buffer(backend, old.buffer)?;
            stats.recreated += 1;
            return Ok(buffer);
        }

        let buffer = Arc::new(backend.create_buffer(&descriptor)?);
        pool.push(PooledBuffer {
            buffer: Arc::clone(&buffer),
            descriptor,
        });
        stats.created += 1;
        Ok(buffer)
    }

    /// Destroy every pooled resource. The GPU must be idle.
    pub(crate) fn release_all(&mut self, backend: &dyn GpuBackend) -> Result<()> {
        for pools in &mut self.slots {
            for pooled in pools.textures.drain(..) {
                release_texture(backend, pooled.texture)?;
            }
            for pooled in pools.buffers.drain(..) {
                release_buffer(backend, pooled.buffer)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    fn registry_with(descriptors: &[TextureDescriptor]) -> ResourceRegistry {
        let mut registry = ResourceRegistry::new(16);
        for descriptor in descriptors {
            let handle = registry
                .create_transient_texture(descriptor.clone())
                .unwrap();
            registry.entry_mut(handle).unwrap().touch(0);
        }
        registry
    }

    fn color(width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(
            width,
            height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        )
    }

    #[test]
    fn test_pool_warms_up_then_reuses() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);

        let mut registry = registry_with(&[color(8, 8), color(4, 4)]);
        let stats = allocator
            .allocate(&backend, 0, &mut registry, 100, 100)
            .unwrap();
        assert_eq!(stats.created, 2);

        let mut registry = registry_with(&[color(8, 8), color(4, 4)]);
        let stats = allocator
            .allocate(&backend, 0, &mut registry, 100, 100)
            .unwrap();
        assert_eq!(
            stats,
            AllocationStats {
                reused: 2,
                created: 0,
                recreated: 0
            }
        );
        assert_eq!(backend.stats().textures_created.len(), 2);
    }

    #[test]
    fn test_unused_transients_are_skipped() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);
        let mut registry = ResourceRegistry::new(4);
        let unused = registry.create_transient_texture(color(8, 8)).unwrap();
        let used = registry.create_transient_texture(color(8, 8)).unwrap();
        registry.entry_mut(used).unwrap().touch(0);

        allocator
            .allocate(&backend, 0, &mut registry, 10, 10)
            .unwrap();
        assert!(registry.get_texture(used).is_ok());
        assert!(registry.get_texture(unused).is_err());
        assert_eq!(allocator.pool_sizes(0), (1, 0));
    }

    #[test]
    fn test_frame_sized_texture_recreated_on_resize() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);
        let auto = TextureDescriptor::frame_sized(
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        );

        let mut registry = registry_with(&[auto.clone()]);
        allocator
            .allocate(&backend, 0, &mut registry, 640, 480)
            .unwrap();
        // The registry of the previous frame must not keep the texture alive.
        drop(registry);

        let mut registry = registry_with(&[auto]);
        let stats = allocator
            .allocate(&backend, 0, &mut registry, 800, 600)
            .unwrap();
        assert_eq!(stats.recreated, 1);

        let recorded = backend.stats();
        assert_eq!(recorded.textures_destroyed.len(), 1);
        assert_eq!(recorded.textures_created[1].1.size.width, 800);
    }

    #[test]
    fn test_texture_drift_recreates_entry() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);

        let mut registry = registry_with(&[color(8, 8)]);
        allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        drop(registry);
        let old_id = backend.stats().textures_created[0].0;

        // Same position, same size, different format.
        let hdr = TextureDescriptor::new_2d(
            8,
            8,
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        );
        let mut registry = ResourceRegistry::new(4);
        let handle = registry.create_transient_texture(hdr).unwrap();
        registry.entry_mut(handle).unwrap().touch(0);
        let stats = allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        assert_eq!(
            stats,
            AllocationStats {
                reused: 0,
                created: 0,
                recreated: 1
            }
        );

        let recorded = backend.stats();
        assert_eq!(recorded.textures_destroyed, vec![old_id]);
        let (new_id, descriptor) = &recorded.textures_created[1];
        assert_eq!(descriptor.format, TextureFormat::Rgba16Float);
        assert_eq!(registry.get_texture(handle).unwrap().dummy_id(), Some(*new_id));
        assert_eq!(allocator.pool_sizes(0), (1, 0));
    }

    #[test]
    fn test_buffer_drift_recreates_entry() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);
        let declare = |descriptor: BufferDescriptor| {
            let mut registry = ResourceRegistry::new(4);
            let handle = registry.create_transient_buffer(descriptor).unwrap();
            registry.entry_mut(handle).unwrap().touch(0);
            (registry, handle)
        };

        let (mut registry, _) = declare(BufferDescriptor::new(256, BufferUsage::STORAGE));
        allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        drop(registry);

        // Usage change at the same size.
        let (mut registry, handle) = declare(BufferDescriptor::new(256, BufferUsage::UNIFORM));
        let stats = allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        assert_eq!(stats.recreated, 1);
        let second = registry.get_buffer(handle).unwrap().dummy_id();
        drop(registry);

        // Size change.
        let (mut registry, handle) = declare(BufferDescriptor::new(1024, BufferUsage::UNIFORM));
        let stats = allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        assert_eq!(stats.recreated, 1);
        assert_eq!(registry.get_buffer(handle).unwrap().size(), 1024);

        let recorded = backend.stats();
        let created: Vec<u64> = recorded.buffers_created.iter().map(|&(id, _)| id).collect();
        assert_eq!(created.len(), 3);
        assert_eq!(second, Some(created[1]));
        assert_eq!(recorded.buffers_destroyed, vec![created[0], created[1]]);
        assert_eq!(allocator.pool_sizes(0), (0, 1));
    }

    #[test]
    fn test_slots_have_separate_pools() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(2);

        let mut registry = registry_with(&[color(8, 8)]);
        allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        let mut registry = registry_with(&[color(8, 8)]);
        let stats = allocator.allocate(&backend, 1, &mut registry, 1, 1).unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(allocator.pool_sizes(0), (1, 0));
        assert_eq!(allocator.pool_sizes(1), (1, 0));
    }

    #[test]
    fn test_buffers_pool_independently() {
        let backend = DummyBackend::new();
        let mut allocator = TransientAllocator::new(1);
        let mut registry = ResourceRegistry::new(4);
        let buffer = registry
            .create_transient_buffer(BufferDescriptor::new(256, BufferUsage::STORAGE))
            .unwrap();
        registry.entry_mut(buffer).unwrap().touch(0);

        allocator.allocate(&backend, 0, &mut registry, 1, 1).unwrap();
        assert_eq!(registry.get_buffer(buffer).unwrap().size(), 256);

        allocator.release_all(&backend).unwrap();
        assert_eq!(backend.stats().buffers_destroyed.len(), 1);
    }
}
