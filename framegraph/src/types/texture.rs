//! Texture formats, usage flags and descriptors.

use super::Extent3d;
use bitflags::bitflags;

/// Pixel format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit red channel, unsigned normalized.
    R8Unorm,
    /// 16-bit red channel, float.
    R16Float,
    /// 32-bit red channel, float.
    R32Float,
    /// 16-bit RG channels, float.
    Rg16Float,
    /// 8-bit RGBA channels, unsigned normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA channels, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA channels, unsigned normalized.
    Bgra8Unorm,
    /// 16-bit RGBA channels, float.
    Rgba16Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
    /// 32-bit depth, float.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Depth or depth-stencil formats.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    /// Formats with a stencil aspect.
    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }
}

bitflags! {
    /// How a texture may be used by passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Source of copies.
        const COPY_SRC = 1 << 0;
        /// Destination of copies.
        const COPY_DST = 1 << 1;
        /// Sampled in shaders.
        const TEXTURE_BINDING = 1 << 2;
        /// Read-write storage image.
        const STORAGE_BINDING = 1 << 3;
        /// Color or depth attachment.
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Shape of a texture. A zero width or height follows the frame size.
///
/// For transient textures a zero `size.width`/`size.height` means "match the
/// frame dimensions"; see [`Extent3d::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label; also the lookup name of a transient texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Mip level count.
    pub mip_level_count: u32,
    /// Sample count for multisampling.
    pub sample_count: u32,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Fixed-size 2D descriptor. Pass zero for a dimension that should
    /// follow the frame size.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            sample_count: 1,
            format,
            usage,
        }
    }

    /// Create a 2D texture descriptor that follows the frame dimensions.
    pub fn frame_sized(format: TextureFormat, usage: TextureUsage) -> Self {
        Self::new_2d(0, 0, format, usage)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Override the mip count.
    pub fn with_mip_levels(mut self, count: u32) -> Self {
        self.mip_level_count = count;
        self
    }

    /// Override the MSAA sample count.
    pub fn with_sample_count(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    /// Returns true if the size depends on the frame dimensions.
    pub fn is_frame_relative(&self) -> bool {
        self.size.is_frame_relative()
    }

    /// Copy of this descriptor with frame-relative dimensions resolved.
    pub fn resolved(&self, frame_width: u32, frame_height: u32) -> Self {
        Self {
            size: self.size.resolve(frame_width, frame_height),
            ..self.clone()
        }
    }

    /// Returns true if a pooled texture created from `other` can stand in for
    /// this one. Labels are ignored; both descriptors must be resolved.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.size == other.size
            && self.mip_level_count == other.mip_level_count
            && self.sample_count == other.sample_count
            && self.format == other.format
            && self.usage == other.usage
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            mip_level_count: 1,
            sample_count: 1,
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_keeps_label_and_format() {
        let desc = TextureDescriptor::frame_sized(
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_label("hdr");
        let resolved = desc.resolved(640, 480);
        assert_eq!(resolved.label.as_deref(), Some("hdr"));
        assert_eq!(resolved.size, Extent3d::new_2d(640, 480));
        assert_eq!(resolved.format, TextureFormat::Rgba16Float);
        assert!(!resolved.is_frame_relative());
    }

    #[test]
    fn test_same_shape_ignores_label() {
        let a = TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::COPY_DST)
            .with_label("a");
        let b = a.clone().with_label("b");
        assert!(a.same_shape(&b));
        let c = TextureDescriptor { format: TextureFormat::R32Float, ..b };
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth_stencil());
    }
}
