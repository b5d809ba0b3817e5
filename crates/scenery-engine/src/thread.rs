//! Render-thread handoff.
//!
//! The app thread and the render thread pass a single frame token back and
//! forth through a [`ThreadState`] guarded by a mutex and condvar. The app
//! thread kicks a frame, the render thread runs it and goes idle, and the app
//! thread blocks until that happens before kicking again. At most one render
//! request is ever in flight.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

/// Name given to the spawned render thread.
pub const RENDER_THREAD_NAME: &str = "Render Thread";

/// Where render work runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadingPolicy {
    /// Render work runs inline on the app thread.
    #[default]
    SingleThreaded,
    /// Render work runs on a dedicated render thread.
    MultiThreaded,
}

/// Handoff state between the app and render threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    Busy,
    Kick,
}

/// Work executed once per kicked frame.
pub type RenderJob = Box<dyn FnMut() + Send>;

#[derive(Debug)]
struct Shared {
    state: Mutex<ThreadState>,
    signal: Condvar,
    running: AtomicBool,
}

impl Shared {
    /// Block until `state` is reached or the render loop stops.
    ///
    /// Returns the guard so the caller can transition atomically.
    fn wait_for(&self, state: ThreadState) -> parking_lot::MutexGuard<'_, ThreadState> {
        let mut guard = self.state.lock();
        while *guard != state && self.running.load(Ordering::Acquire) {
            self.signal.wait(&mut guard);
        }
        guard
    }

    fn set(&self, state: ThreadState) {
        *self.state.lock() = state;
        self.signal.notify_all();
    }
}

/// Drives render work either inline or on a dedicated render thread.
pub struct ThreadManager {
    policy: ThreadingPolicy,
    shared: Arc<Shared>,
    inline_job: Option<RenderJob>,
    render_thread: Option<JoinHandle<()>>,
    render_thread_id: Option<ThreadId>,
    owner: ThreadId,
    app_frames: AtomicU64,
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("policy", &self.policy)
            .field("state", &*self.shared.state.lock())
            .field("running", &self.is_running())
            .field("app_frames", &self.app_frames())
            .finish_non_exhaustive()
    }
}

impl ThreadManager {
    pub fn new(policy: ThreadingPolicy) -> Self {
        Self {
            policy,
            shared: Arc::new(Shared {
                state: Mutex::new(ThreadState::Idle),
                signal: Condvar::new(),
                running: AtomicBool::new(false),
            }),
            inline_job: None,
            render_thread: None,
            render_thread_id: None,
            owner: thread::current().id(),
            app_frames: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> ThreadingPolicy {
        self.policy
    }

    /// Start executing `job` once per kicked frame.
    ///
    /// Multi-threaded, this spawns the render thread. Single-threaded, the job
    /// is kept and run inline by [`kick`](Self::kick).
    pub fn run(&mut self, job: RenderJob) -> std::io::Result<()> {
        if self.is_running() {
            debug!("ThreadManager::run called while already running");
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        self.shared.set(ThreadState::Idle);

        match self.policy {
            ThreadingPolicy::SingleThreaded => {
                self.inline_job = Some(job);
                self.render_thread_id = Some(self.owner);
            }
            ThreadingPolicy::MultiThreaded => {
                let shared = Arc::clone(&self.shared);
                let handle = thread::Builder::new()
                    .name(RENDER_THREAD_NAME.to_string())
                    .spawn(move || render_loop(&shared, job));
                let handle = match handle {
                    Ok(handle) => handle,
                    Err(e) => {
                        self.shared.running.store(false, Ordering::Release);
                        return Err(e);
                    }
                };
                self.render_thread_id = Some(handle.thread().id());
                self.render_thread = Some(handle);
                info!("{RENDER_THREAD_NAME} started");
            }
        }
        Ok(())
    }

    /// Block until the handoff reaches `state`.
    pub fn wait(&self, state: ThreadState) {
        drop(self.shared.wait_for(state));
    }

    /// Block until `wait_for` is reached, then switch to `set_to`.
    pub fn wait_and_set(&self, wait_for: ThreadState, set_to: ThreadState) {
        let mut guard = self.shared.wait_for(wait_for);
        *guard = set_to;
        drop(guard);
        self.shared.signal.notify_all();
    }

    pub fn set(&self, state: ThreadState) {
        self.shared.set(state);
    }

    /// Hand the next frame to the render side.
    pub fn kick(&mut self) {
        match self.policy {
            ThreadingPolicy::SingleThreaded => {
                if let Some(job) = self.inline_job.as_mut() {
                    job();
                }
            }
            ThreadingPolicy::MultiThreaded => self.set(ThreadState::Kick),
        }
    }

    /// Wait for the render side to finish the kicked frame.
    pub fn block_until_render_complete(&self) {
        if self.policy == ThreadingPolicy::SingleThreaded {
            return;
        }
        self.wait(ThreadState::Idle);
    }

    /// Count a frame on the app thread.
    pub fn next_frame(&self) -> u64 {
        self.app_frames.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Run one full frame handoff.
    pub fn pump(&mut self) {
        self.next_frame();
        self.kick();
        self.block_until_render_complete();
    }

    /// Stop the render loop and join the render thread.
    pub fn terminate(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.signal.notify_all();

        if let Some(handle) = self.render_thread.take() {
            if handle.join().is_err() {
                error!("{RENDER_THREAD_NAME} panicked");
            } else {
                info!("{RENDER_THREAD_NAME} stopped");
            }
        }
        self.inline_job = None;
        self.render_thread_id = None;
        *self.shared.state.lock() = ThreadState::Idle;
    }

    /// Whether the calling thread is the one executing render work.
    pub fn is_render_thread(&self) -> bool {
        let current = thread::current().id();
        match self.render_thread_id {
            Some(id) => id == current,
            None => self.policy == ThreadingPolicy::SingleThreaded && current == self.owner,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Frames counted by [`next_frame`](Self::next_frame).
    pub fn app_frames(&self) -> u64 {
        self.app_frames.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ThreadState {
        *self.shared.state.lock()
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn render_loop(shared: &Shared, mut job: RenderJob) {
    loop {
        {
            let mut guard = shared.wait_for(ThreadState::Kick);
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            *guard = ThreadState::Busy;
        }
        shared.signal.notify_all();

        job();

        shared.set(ThreadState::Idle);
    }
}
