//! Tutorglass - orchestration engine for camera-equipped tutoring glasses
//!
//! The engine coordinates audio feedback, two touch sensors, a physical
//! button, a camera, Wi-Fi/HTTP and low-power sleep on a single logical
//! thread of control. Hardware and external services sit behind the
//! contracts in [`hal`]; the [`sim`] module binds those contracts to
//! scripted host-side doubles so the engine runs off-device.

pub mod audio;
pub mod config;
pub mod error;
pub mod hal;
pub mod input;
pub mod led;
pub mod net;
pub mod policy;
pub mod sim;
pub mod state;

/// Set up logging to stdout and a debug log file (local time for
/// readability). The `RUST_LOG` environment variable overrides the default
/// `info` filter.
pub fn init_logging() {
    use tracing_subscriber::prelude::*;

    /// Format timestamps using the system's local time via chrono
    struct LocalTimer;
    impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
        fn format_time(
            &self,
            w: &mut tracing_subscriber::fmt::format::Writer<'_>,
        ) -> std::fmt::Result {
            write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        }
    }

    let log_dir = dirs::home_dir()
        .map(|h| h.join(".tutorglass").join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("/tmp"));
    let _ = std::fs::create_dir_all(&log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("tutorglass-debug.log"))
        .ok();

    if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        let stdout_layer = tracing_subscriber::fmt::layer().with_timer(LocalTimer);
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::fmt().with_timer(LocalTimer).init();
    }
}
