//! # RedLilium Frame Graph
//!
//! Per-frame render graph scheduler for the RedLilium engine.
//!
//! ## Overview
//!
//! Every frame, passes declare the resources they read and write. The graph
//! then derives an execution plan:
//!
//! - dependency edges from read/write sets
//! - dead pass elimination from side-effecting passes
//! - a deterministic topological order with cycle detection
//! - transient textures and buffers from per-slot pools
//! - one command list and completion semaphore per live pass, submitted with
//!   the right waits and the frame fence on the last submission
//!
//! The GPU is reached only through the [`GpuBackend`] trait. The
//! [`DummyBackend`] performs no GPU work and records every call; the
//! `vulkan-backend` feature adds a native Vulkan implementation.
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Graph | [`RenderGraph`] | Declaration, compile, execute |
//! | Compiler | `compiler` | Dependencies, culling, scheduling |
//! | Allocator | `allocator` | Transient pools per frame slot |
//! | Submission | `submission` | Command lists, semaphores, fences |
//! | Backend | [`GpuBackend`] | Device capability surface |
//!
//! See [`RenderGraph`] for a complete frame.

mod allocator;
pub mod backend;
pub mod bindings;
mod compiler;
pub mod config;
pub mod error;
pub mod graph;
pub mod profiling;
mod submission;
pub mod types;

pub use allocator::AllocationStats;
pub use backend::dummy::{DummyBackend, DummyStats, SubmissionRecord};
pub use backend::{GpuBackend, GpuBuffer, GpuCommandList, GpuFence, GpuSemaphore, GpuTexture};
pub use bindings::{
    BindingPool, BindingRegistry, BindingSlot, BindingSpace, BindingTable, BoundResource,
    ResourceRef,
};
pub use config::FrameGraphConfig;
pub use error::{BackendError, FrameGraphError, FrameState, Result};
pub use graph::{
    ExecuteFn, ExternalExecuteFn, ExternalPassContext, ExternalPassResult, FrameInfo,
    PassBuilder, PassContext, PassHandle, PassInfo, RenderGraph, ResourceHandle, ResourceInfo,
    ResourceOrigin,
};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, ResourceKind, TextureDescriptor, TextureFormat,
    TextureUsage,
};

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version. Call once after installing a logger.
pub fn init() {
    log::info!("RedLilium Frame Graph v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
