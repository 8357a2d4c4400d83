//! Location delivery pipeline for the Waymark location-tracking SDK.
//!
//! Waymark continuously samples device position, persists samples
//! locally, and relays them to an ingestion service over two
//! transports: a persistent pub/sub channel with an HTTP fallback.
//! This crate holds the pipeline itself — geofence-driven sampling,
//! the durable sample log facade, transport selection and retry, and
//! the session lifecycle that ties them together.
//!
//! # Architecture
//!
//! ```text
//! raw readings ──> GeofenceSampler ──> SampleLog (SQLite)
//!                        │
//!                        └──> DeliveryCoordinator ──> Channel (MQTT)
//!                                     │                  │ fallback
//!                                     └──────────────> LocationApi (HTTP)
//! ```
//!
//! [`Session`] constructs and owns all of it; every external
//! collaborator is a port in [`traits`], with in-memory doubles in
//! [`mock`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waymark_core::{mock, Ports, Session, SessionConfig};
//! use waymark_store::Store;
//!
//! # async fn example() {
//! let ports = Ports {
//!     api: Arc::new(mock::MockApi::default()),
//!     channel: Arc::new(mock::MockChannel::default()),
//!     positions: Arc::new(mock::MockPositionSource::default()),
//!     regions: Arc::new(mock::MockRegionMonitor::default()),
//!     power: Arc::new(mock::MockPowerMonitor::default()),
//!     state: Arc::new(mock::MemoryStateStore::default()),
//! };
//! let store = Store::open_in_memory().unwrap();
//! let session = Session::new(ports, store, SessionConfig::new("pk_123", "com.example.app"));
//!
//! if session.login("user-1").await {
//!     let mut events = session.events();
//!     // captured samples now flow to the service
//! }
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod delivery;
mod error;
pub mod events;
pub mod mock;
pub mod regions;
pub mod sample_log;
pub mod sampler;
pub mod session;
pub mod state;
pub mod traits;

pub use api::HttpLocationApi;
pub use channel::IotHubChannel;
pub use delivery::{DeliveryCoordinator, SEND_DEBOUNCE};
pub use error::{Error, Result};
pub use events::{EventDispatcher, EventReceiver, SdkEvent};
pub use regions::{region_ring, satellite_radius, Region, RegionMirror};
pub use sample_log::SampleLog;
pub use sampler::{GeofenceSampler, SampleEnvelope, SamplerConfig};
pub use session::{DeviceInfo, Ports, Session, SessionConfig};
pub use state::SdkState;
pub use traits::{
    Channel, ChannelEvent, LocationApi, MethodInvocation, PositionSource, PowerMonitor,
    RegionEvent, RegionMonitor, SamplingOptions, StateStore,
};
