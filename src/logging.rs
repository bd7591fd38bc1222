//! Structured logging setup (§4.8).
//!
//! Everything else in the engine logs through the `log` facade; this is
//! the one place that wires a concrete backend to it.

use chrono::Local;
use std::env;

pub fn init() {
    // LOG_LEVEL is this engine's own knob; RUST_LOG is honored too since
    // it's the convention most of the surrounding tooling expects.
    let level = env::var("LOG_LEVEL")
        .ok()
        .or_else(|| env::var("RUST_LOG").ok())
        .and_then(|s| s.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .expect("logger to initialize exactly once");
}
