//! Surface queries and the window abstraction.
//!
//! The swapchain never talks to a windowing library directly. A window hands
//! out raw handles for surface creation and reports its framebuffer size
//! through [`PlatformWindow`].

use crate::error::Result;
use crate::swapchain::{choose_swap_present_mode, choose_swap_surface_format, DEFAULT_SURFACE_FORMAT};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Window provider for surface creation and resize handling.
pub trait PlatformWindow {
    /// Raw display and window handles for surface creation.
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)>;

    /// Current framebuffer size in pixels. Zero while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the windowing system has delivered more events.
    fn wait_events(&self);
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Get the recommended surface format.
    pub fn recommended_format(&self) -> Result<vk::SurfaceFormatKHR> {
        choose_swap_surface_format(&self.formats, DEFAULT_SURFACE_FORMAT)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            choose_swap_present_mode(&self.present_modes)
        }
    }

    /// Swapchain image count: one above the minimum, clamped to the maximum.
    pub fn image_count(&self) -> u32 {
        let desired = self.capabilities.min_image_count + 1;
        if self.capabilities.max_image_count > 0 {
            desired.min(self.capabilities.max_image_count)
        } else {
            desired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support(min: u32, max: u32) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: min,
                max_image_count: max,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        assert_eq!(support(2, 8).image_count(), 3);
        assert_eq!(support(2, 2).image_count(), 2);
        // Zero maximum means unbounded.
        assert_eq!(support(3, 0).image_count(), 4);
    }

    #[test]
    fn vsync_forces_fifo() {
        let support = support(2, 8);
        assert_eq!(support.recommended_present_mode(true), vk::PresentModeKHR::FIFO);
        assert_eq!(support.recommended_present_mode(false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            support.recommended_format().unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
    }
}
