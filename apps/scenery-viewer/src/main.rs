//! Scenery Editor demo viewer
//!
//! Opens a window and clears the swapchain through the engine's render pass
//! every frame, exercising allocation, swapchain recreation and GPU timing.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p scenery-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--vsync`: Present with FIFO
//! - `--render-thread`: Record and submit on a dedicated render thread
//! - `--frames-in-flight <N>`: Frames the CPU may run ahead (default: 2)
//! - `--fps <N>`: Frame rate cap
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use std::process::ExitCode;

use scenery_engine::{init_logging, run_app, EngineConfig, ThreadingPolicy};
use tracing::error;

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> ExitCode {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return ExitCode::SUCCESS;
    }

    init_logging();

    match run_app::<Viewer>(config_from_args()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn config_from_args() -> EngineConfig {
    let mut config = EngineConfig::new("Scenery Editor X - Viewer").with_size(WIDTH, HEIGHT);
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--vsync" => config = config.with_vsync(true),
            "--render-thread" => config = config.with_threading(ThreadingPolicy::MultiThreaded),
            "--frames-in-flight" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config = config.with_frames_in_flight(v);
                    i += 1;
                }
            }
            "--fps" => {
                if let Some(v) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config = config.with_target_fps(v);
                    i += 1;
                }
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    config
}

fn print_help() {
    eprintln!(
        "Scenery Editor X demo viewer

USAGE:
    cargo run -p scenery-viewer -- [OPTIONS]

OPTIONS:
    --vsync                   Present with FIFO
    --render-thread           Record and submit on a dedicated render thread
    --frames-in-flight <N>    Frames the CPU may run ahead (default: 2)
    --fps <N>                 Frame rate cap
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log level (e.g., info, debug, trace)"
    );
}
