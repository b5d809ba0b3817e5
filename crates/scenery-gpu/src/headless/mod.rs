//! GPU-less implementations of the device, memory and window seams.
//!
//! Used by unit tests and by downstream crates through the `headless`
//! feature. Handles are fabricated, fences signal after a simulated GPU
//! latency, and memory is ordinary host memory.

mod device;
mod memory;
mod window;

pub use device::{HeadlessDevice, ObjectKind};
pub use memory::HeadlessMemoryBackend;
pub use window::HeadlessWindow;
