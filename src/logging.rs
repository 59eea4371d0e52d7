//! Tracing setup shared by all three binaries: a console layer plus an
//! append-only file layer under `logs/`, the Rust equivalent of the
//! original Python services' paired `StreamHandler` + `FileHandler`
//! (`orquestrador.py::setup_logging`, `print_server.py::setup_logging`,
//! `distributed_node.py::setup_logging`). Style follows
//! `coordinator::logger::init_tracing` in the reference pack: an
//! `EnvFilter` seeded with a default plus `RUST_LOG`, composed with
//! `tracing_subscriber::registry()`.

use anyhow::Context;
use std::path::Path;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RUST_LOG_ENV: &str = "RUST_LOG";

/// Initializes the global tracing subscriber for one binary. `component`
/// names the log file under `logs/<component>.log` (e.g. `node_1`,
/// `orchestrator`, `printer`).
pub fn init_tracing(component: &str, level: LevelFilter) -> anyhow::Result<()> {
    std::fs::create_dir_all("logs").context("creating logs/ directory")?;
    let log_path = Path::new("logs").join(format!("{component}.log"));
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    let mut filter = EnvFilter::new("").add_directive(tracing::metadata::LevelFilter::from(level).into());
    if let Ok(env) = std::env::var(RUST_LOG_ENV) {
        for directive in env.split(',') {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("ignoring invalid {RUST_LOG_ENV} directive {directive:?}: {err}"),
            }
        }
    }

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stdout));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(())
}

/// Terminal colors rotated by node id, mirroring `NoDistribuido.py`'s
/// `CORES` palette (`id % len(CORES)`). Used to visually separate
/// interleaved node logs when several nodes are tailed together.
const ANSI_COLORS: [&str; 7] = [
    "\x1b[91m", // red
    "\x1b[92m", // green
    "\x1b[93m", // yellow
    "\x1b[94m", // blue
    "\x1b[95m", // magenta
    "\x1b[96m", // cyan
    "\x1b[97m", // white
];
const ANSI_RESET: &str = "\x1b[0m";

/// Wraps `message` in the ANSI color assigned to `node_id`.
pub fn colorize(node_id: u8, message: impl std::fmt::Display) -> String {
    let color = ANSI_COLORS[node_id as usize % ANSI_COLORS.len()];
    format!("{color}{message}{ANSI_RESET}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorize_wraps_with_reset() {
        let colored = colorize(1, "hello");
        assert!(colored.starts_with("\x1b["));
        assert!(colored.ends_with(ANSI_RESET));
        assert!(colored.contains("hello"));
    }

    #[test]
    fn colorize_rotates_by_modulus() {
        let a = colorize(0, "x");
        let b = colorize(ANSI_COLORS.len() as u8, "x");
        assert_eq!(a, b);
    }
}
