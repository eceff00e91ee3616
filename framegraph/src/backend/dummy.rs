//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Fences signal as soon
//! as work is submitted. Every call that matters to scheduling is recorded so
//! tests can inspect what the frame graph asked the device to do.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::BackendError;
use crate::types::{BufferDescriptor, TextureDescriptor};

use super::{GpuBackend, GpuBuffer, GpuCommandList, GpuFence, GpuSemaphore, GpuTexture};

/// One recorded queue submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    /// Id of the submitted command list.
    pub command_list: u64,
    /// Ids of the semaphores waited on.
    pub waits: Vec<u64>,
    /// Ids of the semaphores signalled.
    pub signals: Vec<u64>,
    /// Id of the fence signalled, if any.
    pub fence: Option<u64>,
}

/// Counters and logs collected by [`DummyBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Submissions in queue order.
    pub submissions: Vec<SubmissionRecord>,
    /// Ids of command lists passed to `begin_command_list`, in call order.
    pub recorded_lists: Vec<u64>,
    /// Textures created, as `(id, resolved descriptor)`.
    pub textures_created: Vec<(u64, TextureDescriptor)>,
    /// Ids of destroyed textures.
    pub textures_destroyed: Vec<u64>,
    /// Buffers created, as `(id, size)`.
    pub buffers_created: Vec<(u64, u64)>,
    /// Ids of destroyed buffers.
    pub buffers_destroyed: Vec<u64>,
    /// Number of command lists created.
    pub command_lists_created: usize,
    /// Number of semaphores created.
    pub semaphores_created: usize,
    /// Number of fences created.
    pub fences_created: usize,
    /// Ids of fences waited on.
    pub fence_waits: Vec<u64>,
    /// Number of `wait_idle` calls.
    pub idle_waits: usize,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    next_id: AtomicU64,
    stats: Mutex<DummyStats>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn stats(&self) -> DummyStats {
        self.stats.lock().clone()
    }

    /// Clear the recorded calls. Ids keep increasing.
    pub fn clear_stats(&self) {
        *self.stats.lock() = DummyStats::default();
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn foreign(what: &'static str) -> BackendError {
    BackendError::ForeignHandle(what)
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_command_lists(&self, count: usize) -> Result<Vec<GpuCommandList>, BackendError> {
        let lists = (0..count)
            .map(|_| GpuCommandList::Dummy {
                id: self.next_id(),
                recording: AtomicBool::new(false),
            })
            .collect();
        self.stats.lock().command_lists_created += count;
        log::trace!("DummyBackend: created {} command lists", count);
        Ok(lists)
    }

    fn create_fence(&self, signaled: bool) -> Result<GpuFence, BackendError> {
        self.stats.lock().fences_created += 1;
        Ok(GpuFence::Dummy {
            id: self.next_id(),
            signaled: AtomicBool::new(signaled),
        })
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, BackendError> {
        self.stats.lock().semaphores_created += 1;
        Ok(GpuSemaphore::Dummy { id: self.next_id() })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, BackendError> {
        if descriptor.is_frame_relative() {
            return Err(BackendError::ResourceCreationFailed(format!(
                "texture {:?} has unresolved dimensions",
                descriptor.label
            )));
        }
        let id = self.next_id();
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        self.stats
            .lock()
            .textures_created
            .push((id, descriptor.clone()));
        Ok(GpuTexture::Dummy {
            id,
            descriptor: descriptor.clone(),
        })
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, BackendError> {
        let id = self.next_id();
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        self.stats.lock().buffers_created.push((id, descriptor.size));
        Ok(GpuBuffer::Dummy {
            id,
            size: descriptor.size,
        })
    }

    fn destroy_texture(&self, texture: GpuTexture) -> Result<(), BackendError> {
        let id = texture.dummy_id().ok_or_else(|| foreign("texture"))?;
        log::trace!("DummyBackend: destroying texture {}", id);
        self.stats.lock().textures_destroyed.push(id);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) -> Result<(), BackendError> {
        let id = buffer.dummy_id().ok_or_else(|| foreign("buffer"))?;
        log::trace!("DummyBackend: destroying buffer {}", id);
        self.stats.lock().buffers_destroyed.push(id);
        Ok(())
    }

    fn begin_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        match command_list {
            GpuCommandList::Dummy { id, recording } => {
                if recording.swap(true, Ordering::AcqRel) {
                    return Err(BackendError::Internal(format!(
                        "command list {id} is already recording"
                    )));
                }
                self.stats.lock().recorded_lists.push(*id);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(foreign("command list")),
        }
    }

    fn end_command_list(&self, command_list: &GpuCommandList) -> Result<(), BackendError> {
        match command_list {
            GpuCommandList::Dummy { id, recording } => {
                if !recording.swap(false, Ordering::AcqRel) {
                    return Err(BackendError::Internal(format!(
                        "command list {id} is not recording"
                    )));
                }
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(foreign("command list")),
        }
    }

    fn submit(
        &self,
        command_list: &GpuCommandList,
        wait_semaphores: &[&GpuSemaphore],
        signal_semaphores: &[&GpuSemaphore],
        fence: Option<&GpuFence>,
    ) -> Result<(), BackendError> {
        let ids = |semaphores: &[&GpuSemaphore]| {
            semaphores
                .iter()
                .map(|s| s.dummy_id().ok_or_else(|| foreign("semaphore")))
                .collect::<Result<Vec<_>, _>>()
        };
        let record = SubmissionRecord {
            command_list: command_list
                .dummy_id()
                .ok_or_else(|| foreign("command list"))?,
            waits: ids(wait_semaphores)?,
            signals: ids(signal_semaphores)?,
            fence: fence.and_then(GpuFence::dummy_id),
        };
        log::trace!(
            "DummyBackend: submit list {} (waits {:?}, signals {:?}, fence {:?})",
            record.command_list,
            record.waits,
            record.signals,
            record.fence
        );
        self.stats.lock().submissions.push(record);

        // No GPU work, so the submission completes immediately.
        if let Some(GpuFence::Dummy { signaled, .. }) = fence {
            signaled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), BackendError> {
        self.stats.lock().idle_waits += 1;
        Ok(())
    }

    fn wait_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        match fence {
            GpuFence::Dummy { id, signaled } => {
                if !signaled.load(Ordering::Acquire) {
                    return Err(BackendError::Internal(format!(
                        "fence {id} was never submitted and would block forever"
                    )));
                }
                self.stats.lock().fence_waits.push(*id);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(foreign("fence")),
        }
    }

    fn reset_fence(&self, fence: &GpuFence) -> Result<(), BackendError> {
        match fence {
            GpuFence::Dummy { signaled, .. } => {
                signaled.store(false, Ordering::Release);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(foreign("fence")),
        }
    }

    fn is_fence_signaled(&self, fence: &GpuFence) -> bool {
        match fence {
            GpuFence::Dummy { signaled, .. } => signaled.load(Ordering::Acquire),
            #[cfg(feature = "vulkan-backend")]
            _ => false,
        }
    }
}
