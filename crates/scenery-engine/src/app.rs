//! `EditorApp` trait definition.

use crate::engine::GraphicsEngine;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for applications driven by [`run_app`](crate::run_app).
///
/// The runner creates the window and the [`GraphicsEngine`], acquires and
/// presents swapchain images, and handles resizes. Applications record their
/// own commands into the frame's command buffer.
///
/// Applications must be `Send`: with
/// [`ThreadingPolicy::MultiThreaded`](crate::ThreadingPolicy::MultiThreaded)
/// rendering happens on the render thread.
pub trait EditorApp: Sized + Send + 'static {
    /// Initialize the application.
    ///
    /// Called once after the window, device and swapchain exist.
    fn init(engine: &mut GraphicsEngine) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called on the app thread every frame before rendering.
    ///
    /// # Arguments
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, dt: f32);

    /// Record the frame.
    ///
    /// The command buffer is recording when this is called; the runner ends,
    /// submits and presents it afterwards. Timestamp regions can be opened
    /// through [`GraphicsEngine::commands_mut`].
    fn render(&mut self, engine: &mut GraphicsEngine, frame: &FrameContext) -> anyhow::Result<()>;

    /// Handle window resize.
    ///
    /// Called after the swapchain has been rebuilt for the new size.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, engine: &mut GraphicsEngine, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup resources before shutdown.
    ///
    /// The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, engine: &mut GraphicsEngine) {}
}
