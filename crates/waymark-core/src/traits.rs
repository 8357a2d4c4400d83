//! Port abstractions for the delivery pipeline.
//!
//! Every external collaborator the pipeline consumes — the ingestion
//! service, the persistent channel, the platform location facility,
//! region monitoring, battery introspection, and small-blob persistence
//! — is expressed as a trait here, with in-memory doubles in
//! [`crate::mock`] substituting each one in tests.

use async_trait::async_trait;
use tokio::sync::broadcast;

use waymark_types::wire::{
    Battery, LastKnownLocation, LocationPayload, LogRequest, LoginRequest, LoginResponse,
    LogoutResponse, SubscribeResponse, SubscriptionRequest,
};
use waymark_types::{DeviceIdentity, Position};

use crate::error::Result;
use crate::regions::Region;

/// Request/response client for the ingestion service.
#[async_trait]
pub trait LocationApi: Send + Sync {
    /// Install (or clear) the auth key attached to subsequent requests.
    fn set_auth_key(&self, auth_key: Option<String>);

    /// Exchange a device descriptor for credentials and configuration.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse>;

    /// Terminate the server-side session for a device.
    async fn logout(&self, device_id: &str) -> Result<LogoutResponse>;

    /// Fetch the most recent fix the service holds for a user.
    async fn last_known_location(&self, user_id: &str) -> Result<LastKnownLocation>;

    /// Subscribe to a set of publishers.
    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<SubscribeResponse>;

    /// Unsubscribe from a set of publishers.
    async fn unsubscribe(&self, request: &SubscriptionRequest) -> Result<SubscribeResponse>;

    /// Submit one location report over HTTP.
    async fn send_location(&self, payload: &LocationPayload) -> Result<()>;

    /// Upload a diagnostic record.
    async fn upload_log(&self, request: &LogRequest) -> Result<()>;
}

/// A server-to-device method invocation received over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInvocation {
    /// Method name from the invocation topic.
    pub method: String,
    /// Raw JSON payload.
    pub payload: String,
}

/// Events emitted by the persistent channel.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event
/// types in future versions without breaking downstream code.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// The broker accepted the connection and authentication.
    Connected,
    /// The connection dropped; no automatic reconnect is attempted.
    Disconnected { reason: String },
    /// The server invoked a method on this device.
    MethodInvoked(MethodInvocation),
}

/// The persistent device-to-cloud messaging connection.
///
/// `connect` is fire-and-forget: it resolves once the client is set up,
/// and the authentication outcome arrives as a [`ChannelEvent`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// Start connecting with the given device credentials.
    async fn connect(&self, host: &str, identity: &DeviceIdentity) -> Result<()>;

    /// Tear down the connection. Pending sends are abandoned.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the broker has accepted the connection.
    fn is_connected(&self) -> bool;

    /// Publish one location report over the channel.
    async fn send(&self, payload: &LocationPayload) -> Result<()>;

    /// Subscribe to channel lifecycle and method-invocation events.
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;
}

/// A region boundary crossing reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionEvent {
    /// The device entered the identified region.
    Entered(String),
    /// The device exited the identified region.
    Exited(String),
}

/// Platform geofence monitoring.
#[async_trait]
pub trait RegionMonitor: Send + Sync {
    /// Replace the monitored set with the given regions.
    async fn register(&self, regions: &[Region]) -> Result<()>;

    /// Stop monitoring all regions.
    async fn clear(&self) -> Result<()>;

    /// Subscribe to boundary-crossing events.
    fn events(&self) -> broadcast::Receiver<RegionEvent>;
}

/// Parameters applied when (re)starting continuous position updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingOptions {
    /// Minimum movement in meters before a new reading is produced.
    pub distance_filter_m: f64,
    /// Horizontal accuracy target in meters.
    pub desired_accuracy_m: f64,
}

/// The platform location facility, seen as an infinite stream of raw
/// readings.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Start (or reconfigure) continuous updates.
    async fn start(&self, options: SamplingOptions) -> Result<()>;

    /// Stop continuous updates.
    async fn stop(&self) -> Result<()>;

    /// Request a single one-shot fix; the reading arrives on the
    /// normal stream.
    async fn request_fix(&self) -> Result<()>;

    /// Subscribe to raw readings.
    fn readings(&self) -> broadcast::Receiver<Position>;
}

/// Battery introspection.
pub trait PowerMonitor: Send + Sync {
    /// Current battery snapshot, if the platform exposes one.
    fn battery(&self) -> Option<Battery>;
}

/// Small-blob key-value persistence for identity and configuration.
///
/// Backends are expected to be infallible local stores (platform
/// preferences or an in-memory map in tests).
pub trait StateStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: &str);

    /// Delete a value.
    fn remove(&self, key: &str);
}
