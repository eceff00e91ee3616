//! Frame graph configuration.

use crate::error::{FrameGraphError, Result};

/// Limits and initial settings for a [`RenderGraph`](crate::RenderGraph).
///
/// ```
/// use redlilium_framegraph::FrameGraphConfig;
///
/// let config = FrameGraphConfig::default()
///     .with_frames_in_flight(3)
///     .with_dimensions(1920, 1080);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameGraphConfig {
    /// Number of frame-in-flight slots (command lists, semaphores, fences).
    pub frames_in_flight: usize,
    /// Maximum number of resources declared in one frame.
    pub max_resources: usize,
    /// Maximum number of passes declared in one frame.
    pub max_passes: usize,
    /// Initial frame width used for auto-sized textures.
    pub width: u32,
    /// Initial frame height used for auto-sized textures.
    pub height: u32,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_resources: 256,
            max_passes: 128,
            width: 1280,
            height: 720,
        }
    }
}

impl FrameGraphConfig {
    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = count;
        self
    }

    /// Set the resource slot limit.
    pub fn with_max_resources(mut self, count: usize) -> Self {
        self.max_resources = count;
        self
    }

    /// Set the pass slot limit.
    pub fn with_max_passes(mut self, count: usize) -> Self {
        self.max_passes = count;
        self
    }

    /// Set the initial frame dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Check that the configuration can drive a graph.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(FrameGraphError::InvalidConfig(
                "frames_in_flight must be at least 1".into(),
            ));
        }
        if self.max_resources == 0 || self.max_resources > u32::MAX as usize {
            return Err(FrameGraphError::InvalidConfig(format!(
                "max_resources must be in 1..={}",
                u32::MAX
            )));
        }
        if self.max_passes == 0 || self.max_passes > u32::MAX as usize {
            return Err(FrameGraphError::InvalidConfig(format!(
                "max_passes must be in 1..={}",
                u32::MAX
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(FrameGraphError::InvalidConfig(
                "frame dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(FrameGraphConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_frames_in_flight() {
        let config = FrameGraphConfig::default().with_frames_in_flight(0);
        assert!(matches!(
            config.validate(),
            Err(FrameGraphError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let config = FrameGraphConfig::default().with_dimensions(0, 720);
        assert!(config.validate().is_err());
    }
}
