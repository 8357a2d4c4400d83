//! Typed schema over the small-blob state store.
//!
//! Documented keys:
//!
//! | Key | Value |
//! |-----|-------|
//! | `waymark.device_id` | device id, generated once, survives logout |
//! | `waymark.symmetric_key` | channel auth secret, wiped at logout |
//! | `waymark.session_id` | logical user/session id, wiped at logout |
//! | `waymark.remote_config` | JSON [`RemoteConfig`] |
//! | `waymark.last_send_time` | unix milliseconds of the last send |
//! | `waymark.current_sample` | JSON of the sample currently held |
//!
//! Region mirror keys live in [`crate::regions`].

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;

use waymark_types::{RemoteConfig, Sample};

use crate::traits::StateStore;

const DEVICE_ID_KEY: &str = "waymark.device_id";
const SYMMETRIC_KEY_KEY: &str = "waymark.symmetric_key";
const SESSION_ID_KEY: &str = "waymark.session_id";
const REMOTE_CONFIG_KEY: &str = "waymark.remote_config";
const LAST_SEND_TIME_KEY: &str = "waymark.last_send_time";
const CURRENT_SAMPLE_KEY: &str = "waymark.current_sample";

/// Typed accessors over the persisted SDK state.
#[derive(Clone)]
pub struct SdkState {
    store: Arc<dyn StateStore>,
}

impl SdkState {
    /// Wrap a state store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// The persisted device id, generating and storing one on first
    /// use.
    pub fn ensure_device_id(&self) -> String {
        if let Some(id) = self.store.get(DEVICE_ID_KEY) {
            return id;
        }
        let id = format!("DVC-{}", uuid::Uuid::new_v4());
        self.store.set(DEVICE_ID_KEY, &id);
        id
    }

    pub fn device_id(&self) -> Option<String> {
        self.store.get(DEVICE_ID_KEY)
    }

    /// Replace the device id with the one issued by the service.
    pub fn set_device_id(&self, id: &str) {
        self.store.set(DEVICE_ID_KEY, id);
    }

    pub fn symmetric_key(&self) -> Option<String> {
        self.store.get(SYMMETRIC_KEY_KEY)
    }

    pub fn set_symmetric_key(&self, key: &str) {
        self.store.set(SYMMETRIC_KEY_KEY, key);
    }

    pub fn session_id(&self) -> Option<String> {
        self.store.get(SESSION_ID_KEY)
    }

    pub fn set_session_id(&self, id: &str) {
        self.store.set(SESSION_ID_KEY, id);
    }

    /// The persisted remote configuration, falling back to defaults
    /// when absent or unreadable.
    pub fn remote_config(&self) -> RemoteConfig {
        self.store
            .get(REMOTE_CONFIG_KEY)
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!(error = %e, "Stored remote config is unreadable");
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn set_remote_config(&self, config: &RemoteConfig) {
        match serde_json::to_string(config) {
            Ok(raw) => self.store.set(REMOTE_CONFIG_KEY, &raw),
            Err(e) => warn!(error = %e, "Failed to encode remote config"),
        }
    }

    pub fn last_send_time(&self) -> Option<OffsetDateTime> {
        let ms: i64 = self.store.get(LAST_SEND_TIME_KEY)?.parse().ok()?;
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
    }

    pub fn set_last_send_time(&self, at: OffsetDateTime) {
        let ms = (at.unix_timestamp_nanos() / 1_000_000) as i64;
        self.store.set(LAST_SEND_TIME_KEY, &ms.to_string());
    }

    /// The sample most recently held by the pipeline, mirrored for
    /// crash recovery.
    pub fn current_sample(&self) -> Option<Sample> {
        let raw = self.store.get(CURRENT_SAMPLE_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!(error = %e, "Stored current sample is unreadable");
                None
            }
        }
    }

    pub fn set_current_sample(&self, sample: &Sample) {
        match serde_json::to_string(sample) {
            Ok(raw) => self.store.set(CURRENT_SAMPLE_KEY, &raw),
            Err(e) => warn!(error = %e, "Failed to encode current sample"),
        }
    }

    /// Wipe session-scoped state at logout. The device id survives.
    pub fn clear_session(&self) {
        self.store.remove(SYMMETRIC_KEY_KEY);
        self.store.remove(SESSION_ID_KEY);
        self.store.remove(CURRENT_SAMPLE_KEY);
        self.store.remove(LAST_SEND_TIME_KEY);
    }
}
