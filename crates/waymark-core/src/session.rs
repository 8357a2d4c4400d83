//! Session lifecycle and component wiring.
//!
//! [`Session`] is the single owner of the pipeline: it holds identity
//! and configuration, serializes login/logout transitions, and wires
//! the sampler's output into the delivery coordinator. It is
//! constructed once by the hosting application with explicit ports for
//! every external collaborator.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use waymark_store::Store;
use waymark_types::wire::{
    LogRequest, LogType, LoginRequest, SubscribeResponse, SubscriptionRequest,
};
use waymark_types::{AppMode, DeviceIdentity, Position, TrackedLocation, SDK_VERSION};

use crate::api::auth_key;
use crate::delivery::DeliveryCoordinator;
use crate::events::{EventDispatcher, EventReceiver, SdkEvent};
use crate::regions::RegionMirror;
use crate::sample_log::SampleLog;
use crate::sampler::{GeofenceSampler, SamplerConfig};
use crate::state::SdkState;
use crate::traits::{
    Channel, LocationApi, PositionSource, PowerMonitor, RegionMonitor, StateStore,
};

/// Static description of the host device, reported at login.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub os: String,
    pub os_version: String,
    pub model: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "unknown".to_string(),
            os: std::env::consts::OS.to_string(),
            os_version: "unknown".to_string(),
            model: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Publishable API credential issued to the hosting application.
    pub publishable_key: String,
    /// Application identifier included in the auth header.
    pub application_id: String,
    /// Host device description.
    pub device: DeviceInfo,
    /// Sampler tuning.
    pub sampler: SamplerConfig,
}

impl SessionConfig {
    pub fn new(publishable_key: impl Into<String>, application_id: impl Into<String>) -> Self {
        Self {
            publishable_key: publishable_key.into(),
            application_id: application_id.into(),
            device: DeviceInfo::default(),
            sampler: SamplerConfig::default(),
        }
    }
}

/// External collaborators injected into a [`Session`].
pub struct Ports {
    pub api: Arc<dyn LocationApi>,
    pub channel: Arc<dyn Channel>,
    pub positions: Arc<dyn PositionSource>,
    pub regions: Arc<dyn RegionMonitor>,
    pub power: Arc<dyn PowerMonitor>,
    pub state: Arc<dyn StateStore>,
}

/// Top-level SDK entry point.
pub struct Session {
    config: SessionConfig,
    api: Arc<dyn LocationApi>,
    channel: Arc<dyn Channel>,
    power: Arc<dyn PowerMonitor>,
    state: SdkState,
    log: SampleLog,
    delivery: DeliveryCoordinator,
    events: EventDispatcher,
    mode_tx: watch::Sender<AppMode>,
    tracking_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    // Serializes login/logout; concurrent transitions queue here
    transition: Mutex<()>,
}

impl Session {
    /// Build the pipeline and spawn its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ports: Ports, store: Store, config: SessionConfig) -> Self {
        let state = SdkState::new(Arc::clone(&ports.state));
        state.ensure_device_id();

        let log = SampleLog::new(store);
        let events = EventDispatcher::default();
        let cancel = CancellationToken::new();

        let (mode_tx, mode_rx) = watch::channel(AppMode::Foreground);
        let (tracking_tx, tracking_rx) = watch::channel(false);
        let (sample_tx, sample_rx) = mpsc::unbounded_channel();

        let sampler = GeofenceSampler::new(
            Arc::clone(&ports.positions),
            Arc::clone(&ports.regions),
            log.clone(),
            state.clone(),
            RegionMirror::new(Arc::clone(&ports.state)),
            events.clone(),
            sample_tx,
            mode_rx,
            tracking_rx,
            config.sampler,
        );
        tokio::spawn(sampler.run(cancel.child_token()));

        let delivery = DeliveryCoordinator::new(
            Arc::clone(&ports.api),
            Arc::clone(&ports.channel),
            Arc::clone(&ports.power),
            log.clone(),
            state.clone(),
            events.clone(),
        );
        {
            let delivery = delivery.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move { delivery.run(sample_rx, cancel).await });
        }

        Self {
            config,
            api: ports.api,
            channel: ports.channel,
            power: ports.power,
            state,
            log,
            delivery,
            events,
            mode_tx,
            tracking_tx,
            cancel,
            transition: Mutex::new(()),
        }
    }

    /// Start a session as `session_id`.
    ///
    /// When already logged in as the same user with a stored key, only
    /// the channel is reconnected. Returns `false` on an invalid id,
    /// missing publishable credential, or exchange failure.
    pub async fn login(&self, session_id: &str) -> bool {
        let _guard = self.transition.lock().await;

        let session_id = session_id.trim();
        if session_id.is_empty() {
            warn!("Login rejected: empty session id");
            return false;
        }
        if self.config.publishable_key.is_empty() {
            warn!("Login rejected: missing publishable key");
            return false;
        }

        self.api.set_auth_key(Some(auth_key(
            &self.config.publishable_key,
            &self.config.application_id,
            session_id,
        )));

        // Same user with a valid stored key: reconnect only. The auth
        // key above still has to be installed; a relaunched process
        // starts with a bare HTTP client.
        if self.state.session_id().as_deref() == Some(session_id)
            && self.state.symmetric_key().is_some()
        {
            info!(session_id, "Already logged in; reconnecting channel");
            let _ = self.tracking_tx.send(true);
            return self.connect_channel().await;
        }

        let request = LoginRequest {
            device_id: self.state.ensure_device_id(),
            manufacturer: self.config.device.manufacturer.clone(),
            os: self.config.device.os.clone(),
            os_version: self.config.device.os_version.clone(),
            model: self.config.device.model.clone(),
            sdk_version: SDK_VERSION.to_string(),
        };

        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login exchange failed");
                self.api.set_auth_key(None);
                return false;
            }
        };

        // A different user may have been logged in before; start clean
        self.state.clear_session();
        self.state.set_session_id(session_id);
        if !response.device.id.is_empty() {
            self.state.set_device_id(&response.device.id);
        }
        self.state.set_symmetric_key(&response.device.symmetric_key);
        self.state.set_remote_config(&response.config);
        info!(session_id, "Logged in");

        let _ = self.tracking_tx.send(true);
        self.connect_channel().await;
        true
    }

    /// End the session: stop sampling, tear down the channel, wipe
    /// session state, and inform the service.
    ///
    /// The remote logout is attempted regardless of local teardown
    /// outcome; the return value reflects the service's answer.
    pub async fn logout(&self) -> bool {
        let _guard = self.transition.lock().await;

        let Some(device_id) = self.state.device_id() else {
            return false;
        };

        let _ = self.tracking_tx.send(false);
        if let Err(e) = self.channel.disconnect().await {
            warn!(error = %e, "Channel teardown failed");
        }
        self.log.clear().await;
        self.state.clear_session();

        let result = match self.api.logout(&device_id).await {
            Ok(response) => response.result,
            Err(e) => {
                warn!(error = %e, "Remote logout failed");
                false
            }
        };
        self.api.set_auth_key(None);
        info!(result, "Logged out");
        result
    }

    /// Fetch another user's last known fix. Returns `None` on any
    /// transport error.
    pub async fn last_known_location(&self, user_id: &str) -> Option<TrackedLocation> {
        match self.api.last_known_location(user_id).await {
            Ok(record) => {
                let location = record.resolve();
                self.events.send(SdkEvent::UserLocationUpdated {
                    location: location.clone(),
                });
                Some(location)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Last-known-location fetch failed");
                None
            }
        }
    }

    /// Subscribe to a set of publishers. Ids are trimmed and
    /// deduplicated; each resolved publisher location is surfaced to
    /// observers. Returns `None` on any transport error.
    pub async fn subscribe(&self, publisher_ids: &[String]) -> Option<SubscribeResponse> {
        let publishers = normalize_ids(publisher_ids);
        if publishers.is_empty() {
            return None;
        }

        let request = SubscriptionRequest { publishers };
        match self.api.subscribe(&request).await {
            Ok(response) => {
                for publisher in &response.publishers {
                    if let Some(record) = publisher.last_known_location.clone() {
                        self.events.send(SdkEvent::UserLocationUpdated {
                            location: record.resolve(),
                        });
                    }
                }
                Some(response)
            }
            Err(e) => {
                warn!(error = %e, "Subscribe failed");
                None
            }
        }
    }

    /// Unsubscribe from a set of publishers. Returns `None` on any
    /// transport error.
    pub async fn unsubscribe(&self, publisher_ids: &[String]) -> Option<SubscribeResponse> {
        let publishers = normalize_ids(publisher_ids);
        if publishers.is_empty() {
            return None;
        }

        let request = SubscriptionRequest { publishers };
        match self.api.unsubscribe(&request).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "Unsubscribe failed");
                None
            }
        }
    }

    /// Force a delivery attempt of the currently held sample.
    pub async fn send_current(&self) {
        if let Some(sample) = self.state.current_sample() {
            self.delivery.consider_send(&sample, true).await;
        }
    }

    /// Explicitly re-attempt the currently held sample over HTTP.
    pub async fn retry_current(&self) {
        if let Some(sample) = self.state.current_sample() {
            self.delivery.retry_send(&sample).await;
        }
    }

    /// Upload a diagnostic record. Returns whether the service
    /// accepted it.
    pub async fn log_message(&self, log_type: LogType, message: &str) -> bool {
        let (Some(user_id), Some(device_id)) = (self.state.session_id(), self.state.device_id())
        else {
            warn!("No active session; dropping diagnostic");
            return false;
        };
        let request = LogRequest {
            user_id,
            device_id,
            log_type,
            message: message.to_string(),
            battery: self.power.battery(),
            sdk_version: SDK_VERSION.to_string(),
        };
        match self.api.upload_log(&request).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Diagnostic upload failed");
                false
            }
        }
    }

    /// Report an execution-mode change from the host application.
    pub fn set_app_mode(&self, mode: AppMode) {
        let _ = self.mode_tx.send(mode);
    }

    /// Subscribe to observer events. The currently held location, if
    /// any, is replayed so a fresh observer does not wait for the next
    /// fix.
    pub fn events(&self) -> EventReceiver {
        let receiver = self.events.subscribe();
        if let Some(sample) = self.state.current_sample() {
            if sample.position.is_valid() {
                self.events.send(SdkEvent::LocationUpdated {
                    location: TrackedLocation {
                        user_id: self.state.session_id().unwrap_or_default(),
                        position: sample.position,
                        is_simulated: sample.position.is_simulated,
                        app_mode: sample.app_mode,
                    },
                });
            }
        }
        receiver
    }

    /// The position of the currently held sample, if it is valid.
    pub fn current_position(&self) -> Option<Position> {
        self.state
            .current_sample()
            .map(|sample| sample.position)
            .filter(Position::is_valid)
    }

    /// The persisted device id.
    pub fn device_id(&self) -> Option<String> {
        self.state.device_id()
    }

    /// The active session id, if logged in.
    pub fn session_id(&self) -> Option<String> {
        self.state.session_id()
    }

    /// Stop all background tasks and tear down the channel.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Err(e) = self.channel.disconnect().await {
            warn!(error = %e, "Channel teardown failed");
        }
    }

    async fn connect_channel(&self) -> bool {
        let config = self.state.remote_config();
        if config.channel_host.is_empty() {
            warn!("No channel host configured; staying on HTTP only");
            return false;
        }
        let (Some(id), Some(symmetric_key)) = (self.state.device_id(), self.state.symmetric_key())
        else {
            warn!("Missing channel credentials");
            return false;
        };

        let identity = DeviceIdentity { id, symmetric_key };
        match self.channel.connect(&config.channel_host, &identity).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Channel connect failed");
                false
            }
        }
    }
}

/// Trim, drop empties, and deduplicate while preserving order.
fn normalize_ids(ids: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ids() {
        let ids = vec![
            " user-1 ".to_string(),
            "user-2".to_string(),
            "user-1".to_string(),
            "  ".to_string(),
        ];
        assert_eq!(normalize_ids(&ids), vec!["user-1", "user-2"]);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new("pk_123", "com.example.app");
        assert_eq!(config.publishable_key, "pk_123");
        assert_eq!(config.sampler.satellite_count, 5);
        assert_eq!(config.device.os, std::env::consts::OS);
    }
}
