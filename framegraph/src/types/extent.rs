//! Extents with frame-relative sizing.

/// 3D extent for textures.
///
/// A `width` or `height` of zero is not an empty texture: it means the
/// dimension follows the frame size set with
/// [`RenderGraph::set_dimensions`](crate::RenderGraph::set_dimensions) and is
/// resolved when the resource is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels (0 = frame width).
    pub width: u32,
    /// Height in pixels (0 = frame height).
    pub height: u32,
    /// Depth in pixels (1 for 2D textures).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Create a new 3D extent.
    pub fn new_3d(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// 2D extent that follows the frame dimensions.
    pub fn frame_sized() -> Self {
        Self::new_2d(0, 0)
    }

    /// Returns true if either planar dimension follows the frame size.
    pub fn is_frame_relative(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Replace frame-relative dimensions with the given frame size.
    pub fn resolve(self, frame_width: u32, frame_height: u32) -> Self {
        Self {
            width: if self.width == 0 {
                frame_width
            } else {
                self.width
            },
            height: if self.height == 0 {
                frame_height
            } else {
                self.height
            },
            depth: self.depth.max(1),
        }
    }
}
