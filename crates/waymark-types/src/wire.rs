//! JSON wire types exchanged with the ingestion service.
//!
//! Field names follow the service contract exactly (camelCase with a
//! few legacy exceptions), so every struct here carries explicit serde
//! renames rather than relying on the Rust field names.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;
use crate::location::{AppMode, Position, Sample, TrackedLocation};
use crate::{RemoteConfig, SDK_VERSION};

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Battery snapshot attached to outbound location payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    pub is_charging: bool,
    /// Remaining charge in percent, 0..=100.
    pub remaining_charge: u8,
}

/// One location report as submitted to the service, over either
/// transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    /// Logical user/session id publishing the location.
    pub user_id: String,
    /// Device id registered with the broker.
    pub device_id: String,
    pub coordinates: Coordinates,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    #[serde(rename = "speedInMetersPerSecond")]
    pub speed: f64,
    #[serde(rename = "headingDirection")]
    pub heading: f64,
    #[serde(rename = "recordedAtUtc", with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    /// Motion activity label, when the platform provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub is_simulated: bool,
    pub app_mode: AppMode,
    pub sdk_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
}

impl LocationPayload {
    /// Build the wire representation of a captured sample.
    #[must_use]
    pub fn from_sample(
        sample: &Sample,
        user_id: &str,
        device_id: &str,
        battery: Option<Battery>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            coordinates: Coordinates {
                latitude: sample.position.latitude,
                longitude: sample.position.longitude,
            },
            altitude: sample.position.altitude,
            horizontal_accuracy: sample.position.horizontal_accuracy,
            vertical_accuracy: sample.position.vertical_accuracy,
            speed: sample.position.speed,
            heading: sample.position.course,
            recorded_at: sample.position.timestamp,
            activity: None,
            is_simulated: sample.position.is_simulated,
            app_mode: sample.app_mode,
            sdk_version: SDK_VERSION.to_string(),
            battery,
        }
    }
}

/// A publisher's most recent known fix as reported by the service.
///
/// Coordinates are optional: the service answers with an empty record
/// when it has never seen a location for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastKnownLocation {
    pub user_id: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub horizontal_accuracy: Option<f64>,
    #[serde(
        rename = "recordedAtUtc",
        default,
        with = "time::serde::rfc3339::option"
    )]
    pub recorded_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub is_simulated: bool,
    #[serde(default)]
    pub app_mode: Option<AppMode>,
}

impl LastKnownLocation {
    /// Convert into the observer-facing form. A record without
    /// coordinates resolves to an invalid position so callers can rely
    /// on [`Position::is_valid`].
    #[must_use]
    pub fn resolve(self) -> TrackedLocation {
        let mut position = Position::invalid();
        if let Some(coordinates) = self.coordinates {
            position.latitude = coordinates.latitude;
            position.longitude = coordinates.longitude;
            position.horizontal_accuracy = self.horizontal_accuracy.unwrap_or(0.0);
        }
        if let Some(recorded_at) = self.recorded_at {
            position.timestamp = recorded_at;
        }
        position.is_simulated = self.is_simulated;
        TrackedLocation {
            user_id: self.user_id,
            position,
            is_simulated: self.is_simulated,
            app_mode: self.app_mode.unwrap_or(AppMode::Terminated),
        }
    }
}

/// Device registration issued at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    // Legacy contract: this one field is PascalCase.
    #[serde(rename = "Id")]
    pub id: String,
    pub symmetric_key: String,
}

/// Body of the login call: a descriptor of the device logging in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub device_id: String,
    pub manufacturer: String,
    pub os: String,
    pub os_version: String,
    pub model: String,
    pub sdk_version: String,
}

/// Response of the login call: device credentials plus the tracking
/// configuration to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub device: DeviceDescriptor,
    #[serde(rename = "sdkConfigurations", default)]
    pub config: RemoteConfig,
}

/// Response of the logout call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub result: bool,
}

/// Body of the subscribe/unsubscribe calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub publishers: Vec<String>,
}

/// One publisher entry in a subscribe response, optionally seeded with
/// the publisher's last known fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherRecord {
    pub id: String,
    #[serde(default)]
    pub last_known_location: Option<LastKnownLocation>,
}

/// Response of the subscribe call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    #[serde(default)]
    pub failed_subscriptions: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<PublisherRecord>,
}

/// Viewing-state notification delivered over the channel when a
/// subscriber starts or stops watching this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewingState {
    pub is_on: bool,
    #[serde(default)]
    pub send_location_immediately: bool,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<String>,
}

/// Severity of an uploaded diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum LogType {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl From<LogType> for u8 {
    fn from(value: LogType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for LogType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(LogType::Info),
            1 => Ok(LogType::Warning),
            2 => Ok(LogType::Error),
            other => Err(ParseError::UnknownLogType(other)),
        }
    }
}

/// Body of the diagnostic-log upload call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub user_id: String,
    pub device_id: String,
    pub log_type: LogType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<Battery>,
    pub sdk_version: String,
}
