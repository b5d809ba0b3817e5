//! [`PlatformWindow`] for winit windows.

use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use scenery_gpu::{GpuError, PlatformWindow, Result};
use std::sync::Arc;
use std::time::Duration;
use winit::window::Window;

/// How long [`PlatformWindow::wait_events`] yields to the event loop.
const EVENT_WAIT: Duration = Duration::from_millis(16);

/// A winit window shared with the event loop.
#[derive(Debug, Clone)]
pub struct WinitWindow(Arc<Window>);

impl WinitWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self(window)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.0
    }

    pub fn request_redraw(&self) {
        self.0.request_redraw();
    }
}

impl PlatformWindow for WinitWindow {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let display = self
            .0
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("display handle: {e}")))?;
        let window = self
            .0
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("window handle: {e}")))?;
        Ok((display.as_raw(), window.as_raw()))
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }

    /// winit delivers events through the application handler, so this only
    /// yields; `inner_size` reflects the window system directly.
    fn wait_events(&self) {
        std::thread::sleep(EVENT_WAIT);
    }
}
