//! Platform-agnostic types for the Waymark location-tracking SDK.
//!
//! This crate defines the data model shared by the Waymark pipeline:
//! captured position fixes, durable samples with their delivery
//! bookkeeping, remote configuration, and the JSON wire types exchanged
//! with the ingestion service.
//!
//! # Example
//!
//! ```
//! use waymark_types::{AppMode, Position, Sample};
//! use time::OffsetDateTime;
//!
//! let position = Position {
//!     latitude: -33.865,
//!     longitude: 151.209,
//!     horizontal_accuracy: 5.0,
//!     timestamp: OffsetDateTime::now_utc(),
//!     ..Position::invalid()
//! };
//! assert!(position.is_valid());
//!
//! let sample = Sample::new(position, AppMode::Foreground);
//! assert!(sample.id.starts_with("LOC-"));
//! ```

mod config;
mod error;
mod location;

#[cfg(feature = "serde")]
pub mod wire;

pub use config::{DeviceIdentity, RemoteConfig};
pub use error::ParseError;
pub use location::{AppMode, Position, Sample, SendStatus, TrackedLocation};

/// Protocol version reported in outbound payloads.
pub const SDK_VERSION: &str = "1.0";
