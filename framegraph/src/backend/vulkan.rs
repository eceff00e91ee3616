//! Native Vulkan backend using ash and gpu-allocator.
//!
//! The backend does not create the instance or device. It wraps a device and
//! graphics queue owned by the caller, which must outlive the backend and
//! every handle it hands out. The device must have the Vulkan 1.2
//! `timelineSemaphore` feature enabled.

use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::error::BackendError;
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};

use super::{GpuBackend, GpuBuffer, GpuCommandList, GpuFence, GpuSemaphore, GpuTexture};

/// Upper bound for a single fence or idle wait.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Vulkan GPU backend.
pub struct VulkanBackend {
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    command_pool: Mutex<vk::CommandPool>,
    allocator: Mutex<Option<Allocator>>,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("device", &self.device.handle())
            .field("queue", &*self.queue.lock())
            .finish_non_exhaustive()
    }
}

fn vk_error(context: &str) -> impl Fn(vk::Result) -> BackendError + '_ {
    move |result| match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => BackendError::Internal(format!("{context}: {other:?}")),
    }
}

impl VulkanBackend {
    /// Wrap an existing device and graphics queue.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        queue: vk::Queue,
    ) -> Result<Self, BackendError> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| BackendError::Internal(format!("failed to create allocator: {e}")))?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(vk_error("failed to create command pool"))?;

        log::info!("Vulkan frame graph backend ready (queue family {queue_family_index})");

        Ok(Self {
            device,
            queue: Mutex::new(queue),
            command_pool: Mutex::new(command_pool),
            allocator: Mutex::new(Some(allocator)),
        })
    }

    /// Wrap a binary semaphore owned by another subsystem, for example one
    /// returned from an external pass. The semaphore is not destroyed with
    /// the returned handle.
    pub fn wrap_binary_semaphore(&self, semaphore: vk::Semaphore) -> GpuSemaphore {
        GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
            value: None,
            owned: false,
        }
    }

    /// The wrapped device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        linear: bool,
    ) -> Result<gpu_allocator::vulkan::Allocation, BackendError> {
        let mut allocator = self.allocator.lock();
        let allocator = allocator
            .as_mut()
            .ok_or_else(|| BackendError::Internal("allocator already released".into()))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                other => BackendError::ResourceCreationFailed(format!(
                    "failed to allocate memory for {name}: {other}"
                )),
            })
    }

    fn free(&self, allocation: gpu_allocator::vulkan::Allocation) -> Result<(), BackendError> {
        let mut allocator = self.allocator.lock();
        if let Some(allocator) = allocator.as_mut() {
            allocator
                .free(allocation)
                .map_err(|e| BackendError::Internal(format!("failed to free memory: {e}")))?;
        }
        Ok(())
    }

    fn fence_handle(fence: &GpuFence) -> Result<vk::Fence, BackendError> {
        match fence {
            GpuFence::Vulkan { fence, .. } => Ok(*fence),
            _ => Err(BackendError::ForeignHandle("fence")),
        }
    }

    fn command_buffer(command_list: &GpuCommandList) -> Result<vk::CommandBuffer, BackendError> {
        command_list
            .vk_command_buffer()
            .ok_or(BackendError::ForeignHandle("command list"))
    }
}

fn convert_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::R16Float => vk::Format::R16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

fn convert_texture_usage(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    result
}

fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        result |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    result
}

fn sample_count(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan Backend"
    }

    fn create_command_lists(&self, count: usize) -> Result<Vec<GpuCommandList>, BackendError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(vk_error("failed to allocate command buffers"))?;
        Ok(buffers
            .into_iter()
            .map(|command_buffer| GpuCommandList::Vulkan {
                device: self.device.clone(),
                command_buffer,
            })
            .collect())
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&fence_info, None) }
            .map_err(vk_error("failed to create fence"))?;
        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            fence,
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { self.device.create_semaphore(&semaphore_info, None) }
            .map_err(vk_error("failed to create timeline semaphore"))?;
        Ok(GpuSemaphore::Vulkan {
            device: self.device.clone(),
            semaphore,
            value: Some(AtomicU64::new(0)),
            owned: true,
        })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError> {
        if descriptor.is_frame_relative() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "texture {:?} has unresolved dimensions",
                descriptor.label
            )));
        }
        let format = convert_format(descriptor.format);
        let (image_type, view_type) = if descriptor.size.depth > 1 {
            (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D)
        } else {
            (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D)
        };
        let extent = vk::Extent3D {
            width: descriptor.size.width,
            height: descriptor.size.height,
            depth: descriptor.size.depth.max(1),
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(extent)
            .mip_levels(descriptor.mip_level_count.max(1))
            .array_layers(1)
            .samples(sample_count(descriptor.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(vk_error("failed to create image"))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(
            descriptor.label.as_deref().unwrap_or("texture"),
            requirements,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_image(image, None) };
            self.free(allocation)?;
            return Err(vk_error("failed to bind image memory")(e));
        }

        let aspect_mask = if descriptor.format.is_depth_stencil() {
            if descriptor.format.has_stencil() {
                vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
            } else {
                vk::ImageAspectFlags::DEPTH
            }
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: descriptor.mip_level_count.max(1),
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free(allocation)?;
                return Err(vk_error("failed to create image view")(e));
            }
        };

        Ok(GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            view,
            allocation: Mutex::new(Some(allocation)),
            format,
            extent,
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(vk_error("failed to create buffer"))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = match self.allocate(
            descriptor.label.as_deref().unwrap_or("buffer"),
            requirements,
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation)?;
            return Err(vk_error("failed to bind buffer memory")(e));
        }

        Ok(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            size: descriptor.size,
        })
    }

    fn destroy_texture(&self, texture: GpuTexture) -> Result<(), BackendError> {
        let GpuTexture::Vulkan { allocation, .. } = &texture else {
            return Err(BackendError::ForeignHandle("texture"));
        };
        let allocation = allocation.lock().take();
        if let Some(allocation) = allocation {
            self.free(allocation)?;
        }
        // Image and view are released by Drop.
        drop(texture);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<(), BackendError> {
        let GpuBuffer::Vulkan { allocation, .. } = &buffer else {
            return Err(BackendError::ForeignHandle("buffer"));
        };
        let allocation = allocation.lock().take();
        if let Some(allocation) = allocation {
            self.free(allocation)?;
        }
        drop(buffer);
        Ok(())
    }

    fn begin_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        let command_buffer = Self::command_buffer(command_list)?;
        let _pool = self.command_pool.lock();
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
            .map_err(vk_error("failed to begin command buffer"))
    }

    fn end_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        let command_buffer = Self::command_buffer(command_list)?;
        let _pool = self.command_pool.lock();
        unsafe { self.device.end_command_buffer(command_buffer) }
            .map_err(vk_error("failed to end command buffer"))
    }

    fn submit(
        &self,
        command_list: &GpuCommandList,
        wait_semaphores: &[&GpuSemaphore],
        signal_semaphores: &[&GpuSemaphore],
        fence: Option<&GpuFence>,
    ) -> Result<(), BackendError> {
        let command_buffers = [Self::command_buffer(command_list)?];

        let mut wait_handles = Vec::with_capacity(wait_semaphores.len());
        let mut wait_values = Vec::with_capacity(wait_semaphores.len());
        for semaphore in wait_semaphores {
            let GpuSemaphore::Vulkan {
                semaphore, value, ..
            } = semaphore
            else {
                return Err(BackendError::ForeignHandle("semaphore"));
            };
            wait_handles.push(*semaphore);
            wait_values.push(value.as_ref().map_or(0, |v| v.load(Ordering::Acquire)));
        }
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_handles.len()];

        // Timeline values are committed only after the submit succeeds.
        let mut signal_handles = Vec::with_capacity(signal_semaphores.len());
        let mut signal_values = Vec::with_capacity(signal_semaphores.len());
        for semaphore in signal_semaphores {
            let GpuSemaphore::Vulkan {
                semaphore, value, ..
            } = semaphore
            else {
                return Err(BackendError::ForeignHandle("semaphore"));
            };
            signal_handles.push(*semaphore);
            signal_values.push(value.as_ref().map_or(0, |v| v.load(Ordering::Acquire) + 1));
        }

        let fence = fence.map(Self::fence_handle).transpose()?;

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_handles)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_handles)
            .push_next(&mut timeline_info);

        {
            let queue = self.queue.lock();
            unsafe {
                self.device
                    .queue_submit(*queue, &[submit_info], fence.unwrap_or(vk::Fence::null()))
            }
            .map_err(|e| BackendError::SubmissionFailed(format!("{e:?}")))?;
        }

        for (semaphore, next) in signal_semaphores.iter().zip(&signal_values) {
            if let GpuSemaphore::Vulkan {
                value: Some(value), ..
            } = semaphore
            {
                value.store(*next, Ordering::Release);
            }
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }.map_err(vk_error("queue wait idle failed"))
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        let fence = Self::fence_handle(fence)?;
        match unsafe { self.device.wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => {
                log::warn!("Fence wait timed out after 10 seconds; GPU may be hung");
                Err(BackendError::DeviceLost)
            }
            Err(e) => Err(vk_error("fence wait failed")(e)),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        let fence = Self::fence_handle(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(vk_error("failed to reset fence"))
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Vulkan { device, fence } => unsafe {
                device.get_fence_status(*fence).unwrap_or(false)
            },
            _ => false,
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed while dropping backend: {:?}", e);
            }
            self.device
                .destroy_command_pool(*self.command_pool.get_mut(), None);
        }
        // Dropping the allocator releases its memory blocks.
        drop(self.allocator.get_mut().take());
    }
}
