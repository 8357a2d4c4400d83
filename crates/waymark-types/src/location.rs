//! Core location model: position fixes, durable samples, and the
//! per-sample delivery state machine values.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Execution state of the host application when a fix was captured.
///
/// The wire encoding is the bare integer (0 = foreground, 1 = background,
/// 2 = terminated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(into = "u8", try_from = "u8")
)]
#[repr(u8)]
pub enum AppMode {
    /// App is active and on screen.
    Foreground = 0,
    /// App is backgrounded; sampling is throttled.
    Background = 1,
    /// App has been terminated by the platform.
    Terminated = 2,
}

impl From<AppMode> for u8 {
    fn from(mode: AppMode) -> Self {
        mode as u8
    }
}

impl TryFrom<u8> for AppMode {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AppMode::Foreground),
            1 => Ok(AppMode::Background),
            2 => Ok(AppMode::Terminated),
            other => Err(ParseError::UnknownAppMode(other)),
        }
    }
}

/// Delivery outcome of a sample on one attempt path.
///
/// `Unknown` is the initial state of a freshly captured sample. The
/// channel/HTTP variants record which transport carried (or dropped) the
/// sample; the retry variants belong to the explicit resend path.
/// `Ignored` marks samples superseded before any delivery attempt.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(i64)]
pub enum SendStatus {
    /// No delivery attempt recorded yet.
    Unknown = 0,
    /// Delivered over the persistent channel.
    SentViaChannel = 1,
    /// Delivered over HTTP on the primary path.
    SentViaHttp = 2,
    /// Channel send failed.
    FailedViaChannel = 3,
    /// HTTP send failed on the primary path.
    FailedViaHttp = 4,
    /// Delivered over HTTP on the retry path.
    SentViaHttpRetry = 5,
    /// HTTP send failed on the retry path.
    FailedViaHttpRetry = 6,
    /// Superseded without a delivery attempt.
    Ignored = 7,
}

impl SendStatus {
    /// Whether a sample in this state should be (re)sent when the
    /// channel connection is established.
    ///
    /// Terminal successes are done; everything else is still eligible.
    #[must_use]
    pub fn can_send_on_connect(&self) -> bool {
        !matches!(
            self,
            SendStatus::SentViaChannel | SendStatus::SentViaHttp | SendStatus::SentViaHttpRetry
        )
    }

    /// Whether this value records a failed attempt.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SendStatus::FailedViaChannel
                | SendStatus::FailedViaHttp
                | SendStatus::FailedViaHttpRetry
        )
    }

    /// Integer code used for storage.
    #[must_use]
    pub fn code(&self) -> i64 {
        *self as i64
    }
}

impl TryFrom<i64> for SendStatus {
    type Error = ParseError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SendStatus::Unknown),
            1 => Ok(SendStatus::SentViaChannel),
            2 => Ok(SendStatus::SentViaHttp),
            3 => Ok(SendStatus::FailedViaChannel),
            4 => Ok(SendStatus::FailedViaHttp),
            5 => Ok(SendStatus::SentViaHttpRetry),
            6 => Ok(SendStatus::FailedViaHttpRetry),
            7 => Ok(SendStatus::Ignored),
            other => Err(ParseError::UnknownSendStatus(other)),
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStatus::Unknown => write!(f, "unknown"),
            SendStatus::SentViaChannel => write!(f, "sent via channel"),
            SendStatus::SentViaHttp => write!(f, "sent via HTTP"),
            SendStatus::FailedViaChannel => write!(f, "failed via channel"),
            SendStatus::FailedViaHttp => write!(f, "failed via HTTP"),
            SendStatus::SentViaHttpRetry => write!(f, "sent via HTTP retry"),
            SendStatus::FailedViaHttpRetry => write!(f, "failed via HTTP retry"),
            SendStatus::Ignored => write!(f, "ignored"),
        }
    }
}

/// A single position fix as produced by the platform location facility.
///
/// Latitude/longitude of exactly `0.0`, out-of-range coordinates, and a
/// non-positive horizontal accuracy are "no fix" sentinels; such a
/// position is never stored or forwarded.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in meters above sea level.
    pub altitude: f64,
    /// Horizontal accuracy radius in meters; non-positive means invalid.
    pub horizontal_accuracy: f64,
    /// Vertical accuracy in meters.
    pub vertical_accuracy: f64,
    /// Ground speed in meters per second.
    pub speed: f64,
    /// Course over ground in degrees from true north.
    pub course: f64,
    /// When the fix was captured.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Whether the fix was produced by a simulator.
    pub is_simulated: bool,
}

impl Position {
    /// A sentinel position that fails [`Position::is_valid`].
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            horizontal_accuracy: -1.0,
            vertical_accuracy: -1.0,
            speed: -1.0,
            course: -1.0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            is_simulated: false,
        }
    }

    /// Whether this fix carries real coordinates.
    ///
    /// Valid iff latitude is in (-90, 90) excluding 0, longitude is in
    /// (-180, 180) excluding 0, and horizontal accuracy is positive.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let latitude_ok =
            self.latitude != 0.0 && self.latitude > -90.0 && self.latitude < 90.0;
        let longitude_ok =
            self.longitude != 0.0 && self.longitude > -180.0 && self.longitude < 180.0;
        latitude_ok && longitude_ok && self.horizontal_accuracy > 0.0
    }
}

/// One durable captured location fix.
///
/// Delivery bookkeeping (send/resend status, attempt times, last error)
/// lives in the sample store, keyed by `id`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// Opaque unique identifier, assigned at creation (`LOC-<uuid>`).
    pub id: String,
    /// The captured fix.
    pub position: Position,
    /// Execution state of the app at capture time.
    pub app_mode: AppMode,
}

impl Sample {
    /// Create a sample with a fresh identifier.
    #[must_use]
    pub fn new(position: Position, app_mode: AppMode) -> Self {
        Self {
            id: format!("LOC-{}", uuid::Uuid::new_v4()),
            position,
            app_mode,
        }
    }
}

/// A resolved location belonging to a tracked user, as surfaced to
/// observers (own device updates and other publishers' last-known fixes).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedLocation {
    /// The logical user/session id the location belongs to.
    pub user_id: String,
    /// The position fix; may be [`Position::invalid`] when the service
    /// had no coordinates for the user.
    pub position: Position,
    /// Whether the fix was simulated.
    pub is_simulated: bool,
    /// Execution state of the publishing app.
    pub app_mode: AppMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn valid_position() -> Position {
        Position {
            latitude: -33.865,
            longitude: 151.209,
            horizontal_accuracy: 5.0,
            timestamp: OffsetDateTime::now_utc(),
            ..Position::invalid()
        }
    }

    #[test]
    fn test_position_validity() {
        assert!(valid_position().is_valid());
        assert!(!Position::invalid().is_valid());

        let zero_lat = Position {
            latitude: 0.0,
            ..valid_position()
        };
        assert!(!zero_lat.is_valid());

        let zero_lon = Position {
            longitude: 0.0,
            ..valid_position()
        };
        assert!(!zero_lon.is_valid());

        let no_accuracy = Position {
            horizontal_accuracy: 0.0,
            ..valid_position()
        };
        assert!(!no_accuracy.is_valid());

        let out_of_range = Position {
            latitude: 90.0,
            ..valid_position()
        };
        assert!(!out_of_range.is_valid());
    }

    #[test]
    fn test_sample_id_prefix() {
        let a = Sample::new(valid_position(), AppMode::Foreground);
        let b = Sample::new(valid_position(), AppMode::Foreground);
        assert!(a.id.starts_with("LOC-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_app_mode_round_trip() {
        for mode in [AppMode::Foreground, AppMode::Background, AppMode::Terminated] {
            assert_eq!(AppMode::try_from(u8::from(mode)), Ok(mode));
        }
        assert!(AppMode::try_from(3).is_err());
    }

    #[test]
    fn test_send_status_round_trip() {
        for code in 0..=7 {
            let status = SendStatus::try_from(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(SendStatus::try_from(8).is_err());
    }

    #[test]
    fn test_can_send_on_connect() {
        assert!(SendStatus::Unknown.can_send_on_connect());
        assert!(SendStatus::FailedViaChannel.can_send_on_connect());
        assert!(SendStatus::FailedViaHttp.can_send_on_connect());
        assert!(SendStatus::FailedViaHttpRetry.can_send_on_connect());
        assert!(SendStatus::Ignored.can_send_on_connect());
        assert!(!SendStatus::SentViaChannel.can_send_on_connect());
        assert!(!SendStatus::SentViaHttp.can_send_on_connect());
        assert!(!SendStatus::SentViaHttpRetry.can_send_on_connect());
    }

    proptest! {
        #[test]
        fn prop_valid_positions_are_in_bounds(
            lat in -200.0f64..200.0,
            lon in -400.0f64..400.0,
            acc in -50.0f64..50.0,
        ) {
            let position = Position {
                latitude: lat,
                longitude: lon,
                horizontal_accuracy: acc,
                timestamp: OffsetDateTime::UNIX_EPOCH,
                ..Position::invalid()
            };
            if position.is_valid() {
                prop_assert!(lat > -90.0 && lat < 90.0 && lat != 0.0);
                prop_assert!(lon > -180.0 && lon < 180.0 && lon != 0.0);
                prop_assert!(acc > 0.0);
            }
        }
    }
}
