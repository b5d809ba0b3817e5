//! Graphics engine and application framework for the Scenery Editor.
//!
//! This crate wires the `scenery-gpu` subsystems together and provides:
//! - [`GraphicsEngine`], which owns the device, allocator, swapchain and
//!   command manager and runs the per-frame acquire/submit/present cycle
//! - [`ThreadManager`], which hands frames to an optional render thread
//! - A winit runner that drives an [`EditorApp`]
//!
//! # Example
//!
//! ```no_run
//! use scenery_engine::{run_app, EditorApp, EngineConfig, FrameContext, GraphicsEngine};
//!
//! struct MyApp;
//!
//! impl EditorApp for MyApp {
//!     fn init(_engine: &mut GraphicsEngine) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _dt: f32) {}
//!
//!     fn render(&mut self, _engine: &mut GraphicsEngine, _frame: &FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(EngineConfig::default())
//! }
//! ```

mod app;
mod engine;
mod frame;
mod runner;
pub mod thread;
mod window;

pub use app::EditorApp;
pub use engine::{EngineConfig, GraphicsEngine};
pub use frame::FrameContext;
pub use runner::{init_logging, run_app};
pub use thread::{ThreadManager, ThreadState, ThreadingPolicy};
pub use window::WinitWindow;

// Re-export commonly used types for convenience
pub use scenery_gpu::vk;
pub use winit::event::WindowEvent;
