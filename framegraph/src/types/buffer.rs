//! Buffer descriptors for transient and imported buffers.

use bitflags::bitflags;

bitflags! {
    /// How a buffer may be used by passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Vertex input.
        const VERTEX = 1 << 0;
        /// Index input.
        const INDEX = 1 << 1;
        /// Uniform (constant) data.
        const UNIFORM = 1 << 2;
        /// Read-write storage.
        const STORAGE = 1 << 3;
        /// Indirect draw or dispatch arguments.
        const INDIRECT = 1 << 4;
        /// Source of copies.
        const COPY_SRC = 1 << 5;
        /// Destination of copies.
        const COPY_DST = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shape of a buffer. Two descriptors with equal size and usage can share a
/// pooled buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label; also the lookup name of a transient buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Descriptor of `size` bytes.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns true if a pooled buffer created from `other` can stand in for
    /// this one. Labels are ignored.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.size == other.size && self.usage == other.usage
    }
}
