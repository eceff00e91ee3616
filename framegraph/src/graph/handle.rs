//! Handles into the per-frame registries.

/// Handle to a logical resource declared in the current frame.
///
/// `ResourceHandle` is `Copy` and cheap to pass around. It carries the
/// generation of the registry slot it was issued from; once the slot is reset
/// (every [`begin_frame`](crate::RenderGraph::begin_frame)) the handle is
/// stale and every use fails with
/// [`FrameGraphError::StaleHandle`](crate::FrameGraphError::StaleHandle).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    index: u32,
    version: u32,
}

impl ResourceHandle {
    /// Sentinel for "no resource".
    pub const INVALID: Self = Self {
        index: u32::MAX,
        version: u32::MAX,
    };

    pub(crate) fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// Slot index in the resource registry.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time the handle was issued.
    pub fn version(self) -> u32 {
        self.version
    }

    /// Returns false for [`ResourceHandle::INVALID`].
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Res({}.v{})", self.index, self.version)
        } else {
            write!(f, "Res(invalid)")
        }
    }
}

/// Handle to a pass in the current frame.
///
/// Only valid within the frame of the `RenderGraph` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Declaration index of the pass.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", ResourceHandle::new(3, 2)), "Res(3.v2)");
        assert_eq!(format!("{:?}", ResourceHandle::INVALID), "Res(invalid)");
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(!ResourceHandle::default().is_valid());
        assert!(ResourceHandle::new(0, 0).is_valid());
    }
}
