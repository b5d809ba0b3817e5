use crate::error::Result;
use crate::surface::PlatformWindow;
use parking_lot::Mutex;
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WebDisplayHandle, WebWindowHandle,
};
use std::collections::VecDeque;

/// A window whose framebuffer size follows a script.
#[derive(Debug)]
pub struct HeadlessWindow {
    size: Mutex<(u32, u32)>,
    pending: Mutex<VecDeque<(u32, u32)>>,
    waits: Mutex<usize>,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new((width, height)),
            pending: Mutex::new(VecDeque::new()),
            waits: Mutex::new(0),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        *self.size.lock() = (width, height);
    }

    /// Size reported after the next `wait_events` call.
    pub fn push_size(&self, width: u32, height: u32) {
        self.pending.lock().push_back((width, height));
    }

    /// Number of `wait_events` calls so far.
    pub fn wait_count(&self) -> usize {
        *self.waits.lock()
    }
}

impl PlatformWindow for HeadlessWindow {
    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        Ok((
            RawDisplayHandle::Web(WebDisplayHandle::new()),
            RawWindowHandle::Web(WebWindowHandle::new(1)),
        ))
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        *self.size.lock()
    }

    fn wait_events(&self) {
        *self.waits.lock() += 1;
        if let Some(size) = self.pending.lock().pop_front() {
            *self.size.lock() = size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_events_applies_scripted_sizes() {
        let window = HeadlessWindow::new(0, 0);
        window.push_size(0, 0);
        window.push_size(640, 480);

        window.wait_events();
        assert_eq!(window.framebuffer_size(), (0, 0));
        window.wait_events();
        assert_eq!(window.framebuffer_size(), (640, 480));
        window.wait_events();
        assert_eq!(window.framebuffer_size(), (640, 480));
        assert_eq!(window.wait_count(), 3);
        assert!(window.raw_handles().is_ok());
    }
}
