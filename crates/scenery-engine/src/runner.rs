//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::EditorApp;
use crate::engine::{EngineConfig, GraphicsEngine};
use crate::thread::ThreadManager;
use crate::window::WinitWindow;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Calling this again after a
/// subscriber is installed does nothing.
pub fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
    if installed.is_err() {
        debug!("Global tracing subscriber already installed");
    }
}

/// Run an [`EditorApp`] with the given configuration.
///
/// Initializes logging, creates the window and graphics engine, and runs the
/// event loop until the window is closed. Initialization failures are
/// returned to the caller.
pub fn run_app<A: EditorApp>(config: EngineConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        init_error: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.init_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Engine and app, locked together by whichever thread renders.
struct Session<A> {
    engine: GraphicsEngine,
    app: A,
}

impl<A: EditorApp> Session<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render(&mut self) -> anyhow::Result<()> {
        let Some(frame) = self.engine.begin_frame()? else {
            return Ok(());
        };
        let recorded = self.app.render(&mut self.engine, &frame);
        // The frame is ended even when recording failed so its fences signal.
        self.engine.end_frame(frame)?;
        recorded
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: EditorApp> {
    config: EngineConfig,
    state: Option<AppState<A>>,
    init_error: Option<anyhow::Error>,
}

/// Internal application state.
///
/// Field order is drop order: the render thread stops before the engine is
/// released, and the engine before the window it presents to.
struct AppState<A: EditorApp> {
    threads: ThreadManager,
    session: Arc<Mutex<Session<A>>>,
    window: WinitWindow,
    last_frame_time: Instant,
    target_frame_time: Option<Duration>,
    // FPS tracking
    frame_count: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: EditorApp> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &self.state {
            if state.session.lock().app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    state.render_frame();
                    state.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e:#}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl<A: EditorApp> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = WinitWindow::new(Arc::new(event_loop.create_window(window_attrs)?));

        let mut engine = GraphicsEngine::vulkan(&window, self.config.clone())?;
        let app = A::init(&mut engine)?;
        let session = Arc::new(Mutex::new(Session { engine, app }));

        let mut threads = ThreadManager::new(self.config.threading);
        let render_session = Arc::clone(&session);
        threads.run(Box::new(move || {
            if let Err(e) = render_session.lock().render() {
                error!("Render error: {e:#}");
            }
        }))?;

        let target_frame_time = self
            .config
            .target_fps
            .filter(|fps| *fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            threads,
            session,
            window,
            last_frame_time: Instant::now(),
            target_frame_time,
            frame_count: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }
}

impl<A: EditorApp> AppState<A> {
    fn render_frame(&mut self) {
        let frame_start = Instant::now();

        let dt = frame_start.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = frame_start;
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.frame_count += 1;
        }

        self.session.lock().app.update(dt);

        // Kick the render side and wait for it to finish the frame.
        self.threads.pump();

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        let mut session = self.session.lock();
        let Session { engine, app } = &mut *session;

        if !engine.on_resize(width, height)? {
            debug!("Window minimized, rendering paused");
            return Ok(());
        }
        app.on_resize(engine, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.threads.terminate();

        // Print FPS statistics
        if self.frame_count > 0 {
            let avg_fps = self.fps_sum / self.frame_count as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.frame_count);
        }

        info!("Starting cleanup...");
        let mut session = self.session.lock();
        let Session { engine, app } = &mut *session;

        if let Err(e) = engine.device().wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // Let the app cleanup first
        app.cleanup(engine);

        engine.allocator().print_detailed_stats();
        if let Err(e) = engine.shutdown() {
            error!("Engine shutdown failed: {e}");
        }
        info!("Cleanup complete");
    }
}
