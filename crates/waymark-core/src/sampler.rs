//! Geofence-driven sampling.
//!
//! Converts the raw position stream into a throttled stream of durable
//! samples, and manages the background region ring that wakes sampling
//! up cheaply when the device moves away from its last sampled point.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waymark_types::{AppMode, Position, Sample, SendStatus, TrackedLocation};

use crate::events::{EventDispatcher, SdkEvent};
use crate::regions::{region_ring, RegionMirror};
use crate::sample_log::SampleLog;
use crate::state::SdkState;
use crate::traits::{PositionSource, RegionMonitor, SamplingOptions};

/// Sampler tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Ring density: the ring carries `2N` satellites.
    pub satellite_count: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { satellite_count: 5 }
    }
}

/// A sample forwarded downstream, with its debounce-override flag.
#[derive(Debug, Clone)]
pub struct SampleEnvelope {
    pub sample: Sample,
    /// Bypass the send debounce (first sample of the session, or the
    /// app just returned to the foreground).
    pub force: bool,
}

/// Whether a candidate sample should be forwarded downstream.
///
/// A candidate passes only if it is newer than the currently held
/// sample and either there is no current sample, the quality gate is
/// overridden (foreground transition), or its horizontal accuracy is
/// strictly better.
pub(crate) fn should_forward(
    candidate: &Sample,
    current: Option<&Sample>,
    override_quality: bool,
) -> bool {
    match current {
        None => true,
        Some(current) => {
            candidate.position.timestamp > current.position.timestamp
                && (override_quality
                    || candidate.position.horizontal_accuracy
                        < current.position.horizontal_accuracy)
        }
    }
}

/// Background task translating raw readings into durable samples.
pub struct GeofenceSampler {
    positions: Arc<dyn PositionSource>,
    regions: Arc<dyn RegionMonitor>,
    log: SampleLog,
    state: SdkState,
    mirror: RegionMirror,
    events: EventDispatcher,
    out: mpsc::UnboundedSender<SampleEnvelope>,
    mode_rx: watch::Receiver<AppMode>,
    tracking_rx: watch::Receiver<bool>,
    config: SamplerConfig,
}

impl GeofenceSampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        positions: Arc<dyn PositionSource>,
        regions: Arc<dyn RegionMonitor>,
        log: SampleLog,
        state: SdkState,
        mirror: RegionMirror,
        events: EventDispatcher,
        out: mpsc::UnboundedSender<SampleEnvelope>,
        mode_rx: watch::Receiver<AppMode>,
        tracking_rx: watch::Receiver<bool>,
        config: SamplerConfig,
    ) -> Self {
        Self {
            positions,
            regions,
            log,
            state,
            mirror,
            events,
            out,
            mode_rx,
            tracking_rx,
            config,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut readings = self.positions.readings();
        let mut region_events = self.regions.events();

        let mut mode = *self.mode_rx.borrow();
        let mut tracking = *self.tracking_rx.borrow();
        // Survives relaunch so the quality gate keeps working
        let mut current = self.state.current_sample();
        let mut pending_force = current.is_none();

        if tracking {
            self.apply_mode(mode, current.as_ref()).await;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sampler cancelled");
                    break;
                }
                changed = self.tracking_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    tracking = *self.tracking_rx.borrow();
                    if tracking {
                        info!("Tracking started");
                        current = self.state.current_sample();
                        pending_force = current.is_none();
                        self.apply_mode(mode, current.as_ref()).await;
                    } else {
                        info!("Tracking stopped");
                        current = None;
                        self.teardown().await;
                    }
                }
                changed = self.mode_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = *self.mode_rx.borrow();
                    if next == mode {
                        continue;
                    }
                    let became_foreground =
                        next == AppMode::Foreground && mode != AppMode::Foreground;
                    debug!(?mode, ?next, "Execution mode changed");
                    mode = next;
                    if became_foreground {
                        pending_force = true;
                    }
                    if tracking {
                        self.apply_mode(mode, current.as_ref()).await;
                    }
                }
                reading = readings.recv() => {
                    match reading {
                        Ok(position) if tracking => {
                            if let Some(envelope) =
                                self.handle_reading(position, mode, &mut current, &mut pending_force).await
                            {
                                if self.out.send(envelope).is_err() {
                                    debug!("Delivery side is gone; stopping sampler");
                                    break;
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Dropped raw readings");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                event = region_events.recv() => {
                    match event {
                        Ok(event) => {
                            if tracking && mode != AppMode::Foreground {
                                debug!(?event, "Region boundary crossed; requesting fix");
                                if let Err(e) = self.positions.request_fix().await {
                                    warn!(error = %e, "One-shot fix request failed");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Dropped region events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Process one raw reading; returns the envelope to forward, if
    /// the reading survives validation and the quality gate.
    async fn handle_reading(
        &self,
        position: Position,
        mode: AppMode,
        current: &mut Option<Sample>,
        pending_force: &mut bool,
    ) -> Option<SampleEnvelope> {
        if !position.is_valid() {
            debug!("Discarding invalid reading");
            return None;
        }

        let sample = Sample::new(position, mode);
        self.log.append(sample.clone());

        // Re-center the ring on every valid fix while throttled
        if mode != AppMode::Foreground {
            self.register_ring(&sample.position).await;
        }

        let force = *pending_force;
        if !should_forward(&sample, current.as_ref(), force) {
            debug!(sample_id = %sample.id, "Sample superseded before send");
            self.log
                .update_send_status(&sample.id, SendStatus::Ignored, None);
            return None;
        }

        *pending_force = false;
        *current = Some(sample.clone());
        self.state.set_current_sample(&sample);

        self.events.send(SdkEvent::LocationUpdated {
            location: TrackedLocation {
                user_id: self.state.session_id().unwrap_or_default(),
                position: sample.position,
                is_simulated: sample.position.is_simulated,
                app_mode: sample.app_mode,
            },
        });

        Some(SampleEnvelope { sample, force })
    }

    /// Switch the platform facilities to match the execution mode.
    async fn apply_mode(&self, mode: AppMode, current: Option<&Sample>) {
        let config = self.state.remote_config();
        let options = match mode {
            AppMode::Foreground => SamplingOptions {
                distance_filter_m: config.foreground_distance_m,
                desired_accuracy_m: config.desired_accuracy_m,
            },
            AppMode::Background | AppMode::Terminated => SamplingOptions {
                distance_filter_m: config.background_distance_m,
                desired_accuracy_m: config.desired_accuracy_m,
            },
        };
        if let Err(e) = self.positions.start(options).await {
            warn!(error = %e, "Failed to reconfigure position updates");
        }

        if mode == AppMode::Foreground {
            if let Err(e) = self.regions.clear().await {
                warn!(error = %e, "Failed to clear regions");
            }
            self.mirror.clear();
        } else if let Some(sample) = current {
            self.register_ring(&sample.position).await;
        }
    }

    async fn register_ring(&self, center: &Position) {
        let config = self.state.remote_config();
        let ring = region_ring(
            center.latitude,
            center.longitude,
            config.background_distance_m,
            self.config.satellite_count,
        );
        if let Err(e) = self.regions.clear().await {
            warn!(error = %e, "Failed to clear regions");
        }
        match self.regions.register(&ring).await {
            Ok(()) => self.mirror.save(&ring),
            Err(e) => warn!(error = %e, "Failed to register region ring"),
        }
    }

    async fn teardown(&self) {
        if let Err(e) = self.positions.stop().await {
            warn!(error = %e, "Failed to stop position updates");
        }
        if let Err(e) = self.regions.clear().await {
            warn!(error = %e, "Failed to clear regions");
        }
        self.mirror.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Duration, OffsetDateTime};

    fn sample_with(accuracy: f64, at: OffsetDateTime) -> Sample {
        let position = Position {
            latitude: 47.62,
            longitude: -122.35,
            horizontal_accuracy: accuracy,
            timestamp: at,
            ..Position::invalid()
        };
        Sample::new(position, AppMode::Foreground)
    }

    #[test]
    fn test_first_sample_always_forwards() {
        let now = OffsetDateTime::now_utc();
        let candidate = sample_with(50.0, now);
        assert!(should_forward(&candidate, None, false));
    }

    #[test]
    fn test_better_accuracy_forwards() {
        let now = OffsetDateTime::now_utc();
        let current = sample_with(20.0, now);
        let candidate = sample_with(10.0, now + Duration::seconds(1));
        assert!(should_forward(&candidate, Some(&current), false));
    }

    #[test]
    fn test_worse_accuracy_is_gated() {
        let now = OffsetDateTime::now_utc();
        let current = sample_with(10.0, now);
        let candidate = sample_with(30.0, now + Duration::seconds(1));
        assert!(!should_forward(&candidate, Some(&current), false));
    }

    #[test]
    fn test_foreground_transition_overrides_quality_gate() {
        let now = OffsetDateTime::now_utc();
        let current = sample_with(10.0, now);
        let candidate = sample_with(30.0, now + Duration::seconds(1));
        assert!(should_forward(&candidate, Some(&current), true));
    }

    #[test]
    fn test_stale_sample_never_forwards() {
        let now = OffsetDateTime::now_utc();
        let current = sample_with(10.0, now);
        let candidate = sample_with(5.0, now - Duration::seconds(1));
        assert!(!should_forward(&candidate, Some(&current), false));
        // Not even when forced
        assert!(!should_forward(&candidate, Some(&current), true));
    }
}
