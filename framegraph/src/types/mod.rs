//! Resource descriptors used by the frame graph.
//!
//! Descriptors describe the *shape* of a resource. Transient resources are
//! declared with a descriptor only; the allocator turns it into a native
//! resource once the graph has been compiled.

mod buffer;
mod extent;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use extent::Extent3d;
pub use texture::{TextureDescriptor, TextureFormat, TextureUsage};

/// Kind of a logical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A texture (image) resource.
    Texture,
    /// A buffer resource.
    Buffer,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Texture => write!(f, "texture"),
            Self::Buffer => write!(f, "buffer"),
        }
    }
}
