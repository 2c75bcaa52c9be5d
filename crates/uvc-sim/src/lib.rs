//! UVC Stream Simulator
//!
//! Wires the streaming core to an in-memory camera: a tokio task plays the
//! device data path while blocking client sessions negotiate, stream and
//! grab still images the way applications do.

pub mod capture;
pub mod config;
mod error;
pub mod pump;

pub use error::SimError;

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging at `level` (falls back to INFO if unparsable)
pub fn init_logging(level: &str) -> Result<(), SimError> {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
