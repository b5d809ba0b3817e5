//! Per-frame render parameters shared between the app and render threads.

use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot of the frame parameters renderers read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderData {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    /// Swapchain image acquired for the current frame.
    pub image_index: u32,
    pub frames_in_flight: usize,
    /// Frame slot, in `0..frames_in_flight`.
    pub swap_chain_current_frame: usize,
    pub vsync: bool,
    pub frame_number: u64,
}

impl Default for RenderData {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            mip_levels: 1,
            image_index: 0,
            frames_in_flight: 2,
            swap_chain_current_frame: 0,
            vsync: false,
            frame_number: 0,
        }
    }
}

impl RenderData {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            ..Default::default()
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// [`RenderData`] behind a reader/writer lock.
///
/// The frame loop is the only writer; any thread may take snapshots.
#[derive(Debug, Clone, Default)]
pub struct SharedRenderData(Arc<RwLock<RenderData>>);

impl SharedRenderData {
    pub fn new(data: RenderData) -> Self {
        Self(Arc::new(RwLock::new(data)))
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut RenderData) -> R) -> R {
        f(&mut self.0.write())
    }

    pub fn snapshot(&self) -> RenderData {
        *self.0.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn defaults() {
        let data = RenderData::default();
        assert_eq!(data.mip_levels, 1);
        assert_eq!(data.frames_in_flight, 2);
        assert_eq!(RenderData::new(3).frames_in_flight, 3);
        assert_relative_eq!(data.aspect_ratio(), 1.0);
    }

    #[test]
    fn snapshots_see_updates_from_other_threads() {
        let shared = SharedRenderData::new(RenderData::new(2));
        let writer = shared.clone();

        std::thread::spawn(move || {
            writer.update(|data| {
                data.width = 1920;
                data.height = 1080;
                data.frame_number = 7;
            });
        })
        .join()
        .unwrap();

        let snapshot = shared.snapshot();
        assert_eq!((snapshot.width, snapshot.height), (1920, 1080));
        assert_eq!(snapshot.frame_number, 7);
        assert_relative_eq!(snapshot.aspect_ratio(), 16.0 / 9.0);
    }
}
