//! Remote configuration and device identity.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tracking parameters issued by the service at login.
///
/// All fields have conservative defaults so the pipeline can run before
/// (or without) a successful login response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase", default)
)]
pub struct RemoteConfig {
    /// Hostname of the persistent-channel broker.
    #[cfg_attr(feature = "serde", serde(rename = "iotHubHost"))]
    pub channel_host: String,
    /// Minimum seconds between forwarded samples.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "locationCollectionIntervalInSeconds")
    )]
    pub collection_interval_secs: u64,
    /// Distance filter in meters while the app is foregrounded.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "foregroundLocationUpdateDistanceInMeters")
    )]
    pub foreground_distance_m: f64,
    /// Distance filter in meters while the app is backgrounded.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "backgroundLocationUpdateDistanceInMeters")
    )]
    pub background_distance_m: f64,
    /// Desired horizontal accuracy in meters requested from the
    /// platform location facility.
    #[cfg_attr(
        feature = "serde",
        serde(rename = "desiredHorizontalAccuracyInMeters")
    )]
    pub desired_accuracy_m: f64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            channel_host: String::new(),
            collection_interval_secs: 30,
            foreground_distance_m: 25.0,
            background_distance_m: 50.0,
            desired_accuracy_m: 10.0,
        }
    }
}

/// Per-device credentials returned by login and used to authenticate
/// the persistent channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "camelCase")
)]
pub struct DeviceIdentity {
    /// Device id registered with the broker.
    pub id: String,
    /// Shared key used to sign channel access tokens.
    pub symmetric_key: String,
}
