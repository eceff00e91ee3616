//! GPU capability surface consumed by the frame graph.
//!
//! The frame graph never talks to a graphics API directly. Everything it
//! needs from the device (command lists, fences, semaphores, resource
//! creation and queue submission) goes through the [`GpuBackend`] trait.
//!
//! # Available Backends
//!
//! - `dummy` (always available): no GPU work, records every call for tests
//! - `vulkan-backend`: native Vulkan using ash and gpu-allocator

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::Allocation;
#[cfg(feature = "vulkan-backend")]
use parking_lot::Mutex;

use std::sync::atomic::AtomicBool;
#[cfg(feature = "vulkan-backend")]
use std::sync::atomic::AtomicU64;

use crate::error::BackendError;
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Handle to a GPU buffer resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuBuffer {
    /// Dummy backend buffer.
    Dummy { id: u64, size: u64 },
    /// Vulkan backend buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        size: u64,
    },
}

impl GpuBuffer {
    /// Identifier assigned by the dummy backend.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy { id, .. } => Some(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, size } => f
                .debug_struct("GpuBuffer::Dummy")
                .field("id", id)
                .field("size", size)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU texture resource.
#[allow(clippy::large_enum_variant)]
pub enum GpuTexture {
    /// Dummy backend texture.
    Dummy {
        id: u64,
        descriptor: TextureDescriptor,
    },
    /// Vulkan backend texture.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        view: vk::ImageView,
        allocation: Mutex<Option<Allocation>>,
        format: vk::Format,
        extent: vk::Extent3D,
    },
}

impl GpuTexture {
    /// Identifier assigned by the dummy backend.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy { id, .. } => Some(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }

    /// Width and height of the texture.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Dummy { descriptor, .. } => (descriptor.size.width, descriptor.size.height),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => (extent.width, extent.height),
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, descriptor } => f
                .debug_struct("GpuTexture::Dummy")
                .field("id", id)
                .field("label", &descriptor.label)
                .field("size", &descriptor.size)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                view,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("view", view)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub enum GpuFence {
    /// Dummy backend fence.
    Dummy { id: u64, signaled: AtomicBool },
    /// Vulkan backend fence.
    #[cfg(feature = "vulkan-backend")]
    Vulkan { device: ash::Device, fence: vk::Fence },
}

impl GpuFence {
    /// Identifier assigned by the dummy backend.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy { id, .. } => Some(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, signaled } => f
                .debug_struct("GpuFence::Dummy")
                .field("id", id)
                .field("signaled", signaled)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { fence, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", fence)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU semaphore for GPU-GPU synchronization.
pub enum GpuSemaphore {
    /// Dummy backend semaphore.
    Dummy { id: u64 },
    /// Vulkan backend semaphore.
    ///
    /// Semaphores created by the frame graph are timeline semaphores: `value`
    /// holds the last value a submission signalled. Binary semaphores handed
    /// in by other subsystems carry `value: None`.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
        value: Option<AtomicU64>,
        owned: bool,
    },
}

impl GpuSemaphore {
    /// Identifier assigned by the dummy backend.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy { id } => Some(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id } => f.debug_struct("GpuSemaphore::Dummy").field("id", id).finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                semaphore, value, ..
            } => f
                .debug_struct("GpuSemaphore::Vulkan")
                .field("semaphore", semaphore)
                .field("value", value)
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a recordable command list.
pub enum GpuCommandList {
    /// Dummy backend command list.
    Dummy { id: u64, recording: AtomicBool },
    /// Vulkan backend command buffer. Freed with its pool.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        command_buffer: vk::CommandBuffer,
    },
}

impl GpuCommandList {
    /// Identifier assigned by the dummy backend.
    pub fn dummy_id(&self) -> Option<u64> {
        match self {
            Self::Dummy { id, .. } => Some(*id),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        }
    }

    /// Native command buffer, for passes that record Vulkan commands.
    #[cfg(feature = "vulkan-backend")]
    pub fn vk_command_buffer(&self) -> Option<vk::CommandBuffer> {
        match self {
            Self::Vulkan { command_buffer, .. } => Some(*command_buffer),
            _ => None,
        }
    }
}

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy { id, recording } => f
                .debug_struct("GpuCommandList::Dummy")
                .field("id", id)
                .field("recording", recording)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { command_buffer, .. } => f
                .debug_struct("GpuCommandList::Vulkan")
                .field("command_buffer", command_buffer)
                .finish_non_exhaustive(),
        }
    }
}

// ============================================================================
// Vulkan Resource Cleanup (Drop implementations)
// ============================================================================

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            ..
        } = self
        {
            if allocation.lock().take().is_some() {
                log::warn!("Vulkan buffer dropped without destroy_buffer; memory leaked");
            }
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            view,
            allocation,
            ..
        } = self
        {
            if allocation.lock().take().is_some() {
                log::warn!("Vulkan texture dropped without destroy_texture; memory leaked");
            }
            unsafe {
                device.destroy_image_view(*view, None);
                device.destroy_image(*image, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, fence } = self {
            unsafe {
                device.destroy_fence(*fence, None);
            }
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuSemaphore {
    fn drop(&mut self) {
        if let GpuSemaphore::Vulkan {
            device,
            semaphore,
            owned: true,
            ..
        } = self
        {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods take `&self`; implementations synchronise internally so a
/// backend can be shared as `Arc<dyn GpuBackend>`.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create `count` command lists ready for recording.
    fn create_command_lists(&self, count: usize) -> Result<Vec<GpuCommandList>, BackendError>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError>;

    /// Create a semaphore for GPU-GPU synchronization.
    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError>;

    /// Create a texture. The descriptor is fully resolved (no zero dimensions).
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError>;

    /// Create a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError>;

    /// Release a texture created by this backend. The GPU must be done with it.
    fn destroy_texture(&self, texture: GpuTexture) -> Result<(), BackendError>;

    /// Release a buffer created by this backend. The GPU must be done with it.
    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<(), BackendError>;

    /// Begin recording into a command list, discarding previous contents.
    fn begin_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError>;

    /// Finish recording into a command list.
    fn end_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError>;

    /// Submit one command list to the graphics queue.
    ///
    /// The submission starts after every semaphore in `wait_semaphores` is
    /// signalled, signals every semaphore in `signal_semaphores` on
    /// completion, and signals `fence` if one is given.
    fn submit(
        &self,
        command_list: &GpuCommandList,
        wait_semaphores: &[&GpuSemaphore],
        signal_semaphores: &[&GpuSemaphore],
        fence: Option<&GpuFence>,
    ) -> Result<(), BackendError>;

    /// Block until the graphics queue is idle.
    fn wait_idle(&self) -> Result<(), BackendError>;

    /// Block until a fence is signalled.
    fn wait_fence(&self, fence: &GpuFence) -> Result<(), BackendError>;

    /// Return a fence to the unsignalled state.
    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError>;

    /// Check if a fence is signalled (non-blocking).
    fn is_fence_signaled(&self, fence: &GpuFence) -> bool;
}

static_assertions::assert_impl_all!(GpuTexture: Send, Sync);
static_assertions::assert_impl_all!(GpuBuffer: Send, Sync);
static_assertions::assert_impl_all!(GpuFence: Send, Sync);
static_assertions::assert_impl_all!(GpuSemaphore: Send, Sync);
static_assertions::assert_impl_all!(GpuCommandList: Send, Sync);
