//! Durable sample log for the Waymark location-tracking SDK.
//!
//! This crate provides SQLite-based storage for captured location
//! samples and their delivery bookkeeping, so that fixes captured while
//! offline (or while the channel is down) survive restarts and can be
//! reconciled later.
//!
//! # Features
//!
//! - Append-only sample log keyed by sample id
//! - Send/resend status transitions with attempt timestamps
//! - Effective-status resolution across the primary and retry paths
//! - Bounded retention (oldest samples pruned past a fixed cap)
//!
//! # Example
//!
//! ```no_run
//! use waymark_store::Store;
//! use waymark_types::{AppMode, Position, Sample};
//! use time::OffsetDateTime;
//!
//! let store = Store::open_default()?;
//!
//! let position = Position {
//!     latitude: -33.865,
//!     longitude: 151.209,
//!     horizontal_accuracy: 5.0,
//!     timestamp: OffsetDateTime::now_utc(),
//!     ..Position::invalid()
//! };
//! store.insert_sample(&Sample::new(position, AppMode::Foreground))?;
//! # Ok::<(), waymark_store::Error>(())
//! ```

mod error;
mod models;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredSample;
pub use store::{Store, MAX_RETAINED_SAMPLES};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/waymark/samples.db`
/// - macOS: `~/Library/Application Support/waymark/samples.db`
/// - Windows: `C:\Users\<user>\AppData\Local\waymark\samples.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("waymark")
        .join("samples.db")
}
