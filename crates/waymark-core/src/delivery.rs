//! Transport selection, debouncing, and delivery status bookkeeping.
//!
//! Every forwarded sample goes channel-first when the channel is up,
//! with an automatic HTTP fallback on failure; without a channel it
//! goes straight to HTTP. Outcomes are recorded into the sample log
//! before anything else observes them. The fallback after a channel
//! failure runs on the retry path (`resend_*` fields), the same path
//! used by an explicit [`DeliveryCoordinator::retry_send`].

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waymark_types::wire::{LastKnownLocation, LocationPayload, ViewingState};
use waymark_types::{Sample, SendStatus};

use crate::events::{EventDispatcher, SdkEvent};
use crate::sample_log::SampleLog;
use crate::sampler::SampleEnvelope;
use crate::state::SdkState;
use crate::traits::{Channel, ChannelEvent, LocationApi, MethodInvocation, PowerMonitor};

/// Minimum interval between non-forced sends.
pub const SEND_DEBOUNCE: Duration = Duration::from_secs(10);

/// Channel method name carrying a viewing-state change.
pub const VIEWING_STATE_METHOD: &str = "setLocationBeingViewed";

#[derive(Debug, Clone, Copy)]
enum HttpPath {
    Primary,
    Retry,
}

struct Inner {
    api: Arc<dyn LocationApi>,
    channel: Arc<dyn Channel>,
    power: Arc<dyn PowerMonitor>,
    log: SampleLog,
    state: SdkState,
    events: EventDispatcher,
}

/// Drives delivery of forwarded samples across both transports.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    inner: Arc<Inner>,
}

impl DeliveryCoordinator {
    pub fn new(
        api: Arc<dyn LocationApi>,
        channel: Arc<dyn Channel>,
        power: Arc<dyn PowerMonitor>,
        log: SampleLog,
        state: SdkState,
        events: EventDispatcher,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                channel,
                power,
                log,
                state,
                events,
            }),
        }
    }

    /// Consume forwarded samples and channel events until cancelled.
    pub async fn run(
        &self,
        mut input: mpsc::UnboundedReceiver<SampleEnvelope>,
        cancel: CancellationToken,
    ) {
        let mut channel_events = self.inner.channel.events();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Delivery coordinator cancelled");
                    break;
                }
                envelope = input.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.consider_send(&envelope.sample, envelope.force).await;
                        }
                        None => break,
                    }
                }
                event = channel_events.recv() => {
                    match event {
                        Ok(ChannelEvent::Connected) => {
                            info!("Channel connected; reconciling pending samples");
                            self.reconcile_on_connect().await;
                        }
                        Ok(ChannelEvent::Disconnected { reason }) => {
                            info!(reason, "Channel disconnected");
                        }
                        Ok(ChannelEvent::MethodInvoked(invocation)) => {
                            self.handle_method(invocation).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Dropped channel events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    /// Attempt delivery of a sample, subject to the send debounce.
    ///
    /// The channel send is awaited; the HTTP paths run as independent
    /// tasks whose completion updates the log but does not block the
    /// caller.
    pub async fn consider_send(&self, sample: &Sample, force: bool) {
        let now = OffsetDateTime::now_utc();
        if !force {
            if let Some(last) = self.inner.state.last_send_time() {
                let elapsed = now - last;
                if elapsed < SEND_DEBOUNCE {
                    debug!(sample_id = %sample.id, "Send debounced");
                    return;
                }
            }
        }

        let Some(payload) = self.payload_for(sample) else {
            warn!(sample_id = %sample.id, "No active session; dropping send");
            return;
        };

        // Record intent before any attempt
        self.inner.state.set_last_send_time(now);
        self.inner.log.update_send_time(&sample.id, now);

        if self.inner.channel.is_connected() {
            match self.inner.channel.send(&payload).await {
                Ok(()) => {
                    info!(sample_id = %sample.id, "Sample sent via channel");
                    self.inner
                        .log
                        .update_send_status(&sample.id, SendStatus::SentViaChannel, None);
                }
                Err(e) => {
                    warn!(sample_id = %sample.id, error = %e, "Channel send failed; falling back to HTTP");
                    self.inner.log.update_send_status(
                        &sample.id,
                        SendStatus::FailedViaChannel,
                        Some(e.to_string()),
                    );
                    // The channel is not retried; the fallback runs on
                    // the retry path
                    self.spawn_http(sample.id.clone(), payload, HttpPath::Retry);
                }
            }
        } else {
            self.spawn_http(sample.id.clone(), payload, HttpPath::Primary);
        }
    }

    /// Explicit re-attempt over HTTP, recorded on the retry path.
    pub async fn retry_send(&self, sample: &Sample) {
        let Some(payload) = self.payload_for(sample) else {
            warn!(sample_id = %sample.id, "No active session; dropping retry");
            return;
        };
        self.spawn_http(sample.id.clone(), payload, HttpPath::Retry);
    }

    /// Re-attempt delivery of samples queued while disconnected.
    ///
    /// Older eligible samples take the retry path; the currently held
    /// sample goes through `consider_send` with the debounce bypassed.
    async fn reconcile_on_connect(&self) {
        let current = self.inner.state.current_sample();
        let current_id = current.as_ref().map(|s| s.id.clone());

        for stored in self.inner.log.pending().await {
            if Some(&stored.sample.id) != current_id.as_ref() {
                self.retry_send(&stored.sample).await;
            }
        }

        if let Some(sample) = current {
            if !sample.position.is_valid() {
                return;
            }
            let eligible = self
                .inner
                .log
                .get_status(&sample.id)
                .await
                .is_some_and(|status| status.can_send_on_connect());
            if eligible {
                self.consider_send(&sample, true).await;
            }
        }
    }

    /// Dispatch a server-to-device method invocation.
    async fn handle_method(&self, invocation: MethodInvocation) {
        if invocation.method == VIEWING_STATE_METHOD {
            let state: ViewingState = match serde_json::from_str(&invocation.payload) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "Unreadable viewing-state payload");
                    return;
                }
            };
            let force_send = state.is_on && state.send_location_immediately;
            self.inner
                .events
                .send(SdkEvent::ViewingStateChanged { state });
            if force_send {
                if let Some(sample) = self.inner.state.current_sample() {
                    self.consider_send(&sample, true).await;
                }
            }
        } else {
            // Default method: a pushed last-known-location record
            match serde_json::from_str::<LastKnownLocation>(&invocation.payload) {
                Ok(record) => {
                    self.inner.events.send(SdkEvent::UserLocationUpdated {
                        location: record.resolve(),
                    });
                }
                Err(e) => {
                    warn!(method = %invocation.method, error = %e, "Unreadable method payload");
                }
            }
        }
    }

    fn payload_for(&self, sample: &Sample) -> Option<LocationPayload> {
        let user_id = self.inner.state.session_id()?;
        let device_id = self.inner.state.device_id()?;
        Some(LocationPayload::from_sample(
            sample,
            &user_id,
            &device_id,
            self.inner.power.battery(),
        ))
    }

    fn spawn_http(&self, sample_id: String, payload: LocationPayload, path: HttpPath) {
        let api = Arc::clone(&self.inner.api);
        let log = self.inner.log.clone();
        tokio::spawn(async move {
            let now = OffsetDateTime::now_utc();
            let (success, failure) = match path {
                HttpPath::Primary => (SendStatus::SentViaHttp, SendStatus::FailedViaHttp),
                HttpPath::Retry => {
                    log.update_resend_time(&sample_id, now);
                    (SendStatus::SentViaHttpRetry, SendStatus::FailedViaHttpRetry)
                }
            };
            match api.send_location(&payload).await {
                Ok(()) => {
                    info!(sample_id = %sample_id, ?path, "Sample sent via HTTP");
                    match path {
                        HttpPath::Primary => log.update_send_status(&sample_id, success, None),
                        HttpPath::Retry => log.update_resend_status(&sample_id, success, None),
                    }
                }
                Err(e) => {
                    warn!(sample_id = %sample_id, ?path, error = %e, "HTTP send failed");
                    let error = Some(e.to_string());
                    match path {
                        HttpPath::Primary => log.update_send_status(&sample_id, failure, error),
                        HttpPath::Retry => log.update_resend_status(&sample_id, failure, error),
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MemoryStateStore, MockApi, MockChannel, MockPowerMonitor};
    use waymark_store::Store;
    use waymark_types::{AppMode, Position};

    fn sample() -> Sample {
        let position = Position {
            latitude: 47.62,
            longitude: -122.35,
            horizontal_accuracy: 8.0,
            timestamp: OffsetDateTime::now_utc(),
            ..Position::invalid()
        };
        Sample::new(position, AppMode::Foreground)
    }

    struct Fixture {
        coordinator: DeliveryCoordinator,
        api: Arc<MockApi>,
        channel: Arc<MockChannel>,
        log: SampleLog,
        state: SdkState,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(MockApi::default());
        let channel = Arc::new(MockChannel::default());
        let log = SampleLog::new(Store::open_in_memory().unwrap());
        let state = SdkState::new(Arc::new(MemoryStateStore::default()));
        state.ensure_device_id();
        state.set_session_id("user-1");
        let coordinator = DeliveryCoordinator::new(
            Arc::clone(&api) as Arc<dyn LocationApi>,
            Arc::clone(&channel) as Arc<dyn Channel>,
            Arc::new(MockPowerMonitor::default()),
            log.clone(),
            state.clone(),
            EventDispatcher::default(),
        );
        Fixture {
            coordinator,
            api,
            channel,
            log,
            state,
        }
    }

    async fn wait_for_status(log: &SampleLog, id: &str, expected: SendStatus) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if log.get_status(id).await == Some(expected) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("status never became {expected}"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_channel_send_success() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.channel.set_connected(true);

        f.coordinator.consider_send(&sample, true).await;

        assert_eq!(
            f.log.get_status(&sample.id).await,
            Some(SendStatus::SentViaChannel)
        );
        assert_eq!(f.channel.sent().len(), 1);
        assert_eq!(f.channel.sent()[0].user_id, "user-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_channel_failure_falls_back_to_http_retry() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.channel.set_connected(true);
        f.channel.fail_sends("broker rejected");

        f.coordinator.consider_send(&sample, true).await;

        // The fallback supersedes the failed primary attempt
        wait_for_status(&f.log, &sample.id, SendStatus::SentViaHttpRetry).await;
        assert_eq!(f.api.sent_locations().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_channel_goes_straight_to_http() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());

        f.coordinator.consider_send(&sample, true).await;

        wait_for_status(&f.log, &sample.id, SendStatus::SentViaHttp).await;
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_failure_records_error() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.api.fail_sends("503");

        f.coordinator.consider_send(&sample, true).await;

        wait_for_status(&f.log, &sample.id, SendStatus::FailedViaHttp).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debounce_skips_recent_send() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.channel.set_connected(true);
        f.state.set_last_send_time(OffsetDateTime::now_utc());

        f.coordinator.consider_send(&sample, false).await;

        assert_eq!(f.log.get_status(&sample.id).await, Some(SendStatus::Unknown));
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_force_bypasses_debounce() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.channel.set_connected(true);
        f.state.set_last_send_time(OffsetDateTime::now_utc());

        f.coordinator.consider_send(&sample, true).await;

        assert_eq!(
            f.log.get_status(&sample.id).await,
            Some(SendStatus::SentViaChannel)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_send_uses_resend_path() {
        let f = fixture();
        let sample = sample();
        f.log.append(sample.clone());
        f.log
            .update_send_status(&sample.id, SendStatus::FailedViaHttp, Some("503".into()));

        f.coordinator.retry_send(&sample).await;

        wait_for_status(&f.log, &sample.id, SendStatus::SentViaHttpRetry).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_session_drops_send() {
        let f = fixture();
        f.state.clear_session();
        let sample = sample();
        f.log.append(sample.clone());
        f.channel.set_connected(true);

        f.coordinator.consider_send(&sample, true).await;

        assert_eq!(f.log.get_status(&sample.id).await, Some(SendStatus::Unknown));
        assert!(f.channel.sent().is_empty());
    }
}
