//! In-memory doubles for every port, used by tests and downstream
//! consumers that want to exercise the pipeline without platform
//! facilities or network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use waymark_types::wire::{
    Battery, DeviceDescriptor, LastKnownLocation, LocationPayload, LogRequest, LoginRequest,
    LoginResponse, LogoutResponse, SubscribeResponse, SubscriptionRequest,
};
use waymark_types::{DeviceIdentity, Position, RemoteConfig};

use crate::error::{Error, Result};
use crate::regions::Region;
use crate::traits::{
    Channel, ChannelEvent, LocationApi, PositionSource, PowerMonitor, RegionEvent, RegionMonitor,
    SamplingOptions, StateStore,
};

/// Scripted ingestion-service client.
pub struct MockApi {
    auth_key: Mutex<Option<String>>,
    login_response: Mutex<LoginResponse>,
    subscribe_response: Mutex<SubscribeResponse>,
    last_known: Mutex<Option<LastKnownLocation>>,
    sent: Mutex<Vec<LocationPayload>>,
    logs: Mutex<Vec<LogRequest>>,
    logins: Mutex<Vec<LoginRequest>>,
    logouts: Mutex<Vec<String>>,
    fail_sends: Mutex<Option<String>>,
    fail_login: AtomicBool,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            auth_key: Mutex::new(None),
            login_response: Mutex::new(LoginResponse {
                device: DeviceDescriptor {
                    id: "mock-device".to_string(),
                    symmetric_key: "bW9jay1rZXk=".to_string(),
                },
                config: RemoteConfig {
                    channel_host: "hub.mock.invalid".to_string(),
                    ..RemoteConfig::default()
                },
            }),
            subscribe_response: Mutex::new(SubscribeResponse {
                failed_subscriptions: Vec::new(),
                publishers: Vec::new(),
            }),
            last_known: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
            logouts: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(None),
            fail_login: AtomicBool::new(false),
        }
    }
}

impl MockApi {
    /// Make subsequent `send_location` calls fail with the message.
    pub fn fail_sends(&self, message: &str) {
        *self.fail_sends.lock().unwrap() = Some(message.to_string());
    }

    /// Clear a previously scripted send failure.
    pub fn allow_sends(&self) {
        *self.fail_sends.lock().unwrap() = None;
    }

    /// Make subsequent `login` calls fail.
    pub fn fail_login(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    /// Script the login response.
    pub fn set_login_response(&self, response: LoginResponse) {
        *self.login_response.lock().unwrap() = response;
    }

    /// Script the subscribe response.
    pub fn set_subscribe_response(&self, response: SubscribeResponse) {
        *self.subscribe_response.lock().unwrap() = response;
    }

    /// Script the last-known-location response.
    pub fn set_last_known(&self, record: LastKnownLocation) {
        *self.last_known.lock().unwrap() = Some(record);
    }

    /// Payloads submitted via `send_location`.
    pub fn sent_locations(&self) -> Vec<LocationPayload> {
        self.sent.lock().unwrap().clone()
    }

    /// Login requests received.
    pub fn logins(&self) -> Vec<LoginRequest> {
        self.logins.lock().unwrap().clone()
    }

    /// Device ids that logged out.
    pub fn logouts(&self) -> Vec<String> {
        self.logouts.lock().unwrap().clone()
    }

    /// Diagnostic records received.
    pub fn logs(&self) -> Vec<LogRequest> {
        self.logs.lock().unwrap().clone()
    }

    /// The most recently installed auth key.
    pub fn auth_key(&self) -> Option<String> {
        self.auth_key.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocationApi for MockApi {
    fn set_auth_key(&self, auth_key: Option<String>) {
        *self.auth_key.lock().unwrap() = auth_key;
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        self.logins.lock().unwrap().push(request.clone());
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(Error::api(401, "login rejected"));
        }
        Ok(self.login_response.lock().unwrap().clone())
    }

    async fn logout(&self, device_id: &str) -> Result<LogoutResponse> {
        self.logouts.lock().unwrap().push(device_id.to_string());
        Ok(LogoutResponse { result: true })
    }

    async fn last_known_location(&self, user_id: &str) -> Result<LastKnownLocation> {
        self.last_known
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::api(404, format!("no location for {user_id}")))
    }

    async fn subscribe(&self, _request: &SubscriptionRequest) -> Result<SubscribeResponse> {
        Ok(self.subscribe_response.lock().unwrap().clone())
    }

    async fn unsubscribe(&self, _request: &SubscriptionRequest) -> Result<SubscribeResponse> {
        Ok(SubscribeResponse {
            failed_subscriptions: Vec::new(),
            publishers: Vec::new(),
        })
    }

    async fn send_location(&self, payload: &LocationPayload) -> Result<()> {
        if let Some(message) = self.fail_sends.lock().unwrap().clone() {
            return Err(Error::api(503, message));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn upload_log(&self, request: &LogRequest) -> Result<()> {
        self.logs.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Scripted persistent channel.
pub struct MockChannel {
    connected: AtomicBool,
    sent: Mutex<Vec<LocationPayload>>,
    fail_sends: Mutex<Option<String>>,
    connects: Mutex<Vec<(String, DeviceIdentity)>>,
    disconnects: AtomicUsize,
    events: broadcast::Sender<ChannelEvent>,
    /// When set, `connect` immediately reports `Connected`.
    auto_connect: AtomicBool,
}

impl Default for MockChannel {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(None),
            connects: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            events,
            auto_connect: AtomicBool::new(false),
        }
    }
}

impl MockChannel {
    /// Force the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make `connect` succeed immediately and emit `Connected`.
    pub fn auto_connect(&self) {
        self.auto_connect.store(true, Ordering::SeqCst);
    }

    /// Make subsequent channel sends fail with the message.
    pub fn fail_sends(&self, message: &str) {
        *self.fail_sends.lock().unwrap() = Some(message.to_string());
    }

    /// Emit a channel event to subscribers.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Payloads published over the channel.
    pub fn sent(&self) -> Vec<LocationPayload> {
        self.sent.lock().unwrap().clone()
    }

    /// Credentials passed to `connect`.
    pub fn connects(&self) -> Vec<(String, DeviceIdentity)> {
        self.connects.lock().unwrap().clone()
    }

    /// Number of `disconnect` calls.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn connect(&self, host: &str, identity: &DeviceIdentity) -> Result<()> {
        self.connects
            .lock()
            .unwrap()
            .push((host.to_string(), identity.clone()));
        if self.auto_connect.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            self.emit(ChannelEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &LocationPayload) -> Result<()> {
        if let Some(message) = self.fail_sends.lock().unwrap().clone() {
            return Err(Error::channel(message));
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// Recording region monitor.
pub struct MockRegionMonitor {
    registered: Mutex<Vec<Region>>,
    events: broadcast::Sender<RegionEvent>,
}

impl Default for MockRegionMonitor {
    fn default() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            registered: Mutex::new(Vec::new()),
            events,
        }
    }
}

impl MockRegionMonitor {
    /// Emit a boundary-crossing event.
    pub fn emit(&self, event: RegionEvent) {
        let _ = self.events.send(event);
    }

    /// The currently registered region set.
    pub fn registered(&self) -> Vec<Region> {
        self.registered.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegionMonitor for MockRegionMonitor {
    async fn register(&self, regions: &[Region]) -> Result<()> {
        *self.registered.lock().unwrap() = regions.to_vec();
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.registered.lock().unwrap().clear();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RegionEvent> {
        self.events.subscribe()
    }
}

/// Scripted raw-position source.
pub struct MockPositionSource {
    options: Mutex<Option<SamplingOptions>>,
    running: AtomicBool,
    fix_requests: AtomicUsize,
    readings: broadcast::Sender<Position>,
}

impl Default for MockPositionSource {
    fn default() -> Self {
        let (readings, _) = broadcast::channel(64);
        Self {
            options: Mutex::new(None),
            running: AtomicBool::new(false),
            fix_requests: AtomicUsize::new(0),
            readings,
        }
    }
}

impl MockPositionSource {
    /// Push a raw reading to subscribers.
    pub fn push(&self, position: Position) {
        let _ = self.readings.send(position);
    }

    /// The most recently applied sampling options.
    pub fn options(&self) -> Option<SamplingOptions> {
        *self.options.lock().unwrap()
    }

    /// Whether continuous updates are running.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of one-shot fix requests.
    pub fn fix_requests(&self) -> usize {
        self.fix_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionSource for MockPositionSource {
    async fn start(&self, options: SamplingOptions) -> Result<()> {
        *self.options.lock().unwrap() = Some(options);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request_fix(&self) -> Result<()> {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn readings(&self) -> broadcast::Receiver<Position> {
        self.readings.subscribe()
    }
}

/// Fixed battery snapshot.
#[derive(Default)]
pub struct MockPowerMonitor {
    battery: Mutex<Option<Battery>>,
}

impl MockPowerMonitor {
    /// Script the battery snapshot.
    pub fn set_battery(&self, battery: Battery) {
        *self.battery.lock().unwrap() = Some(battery);
    }
}

impl PowerMonitor for MockPowerMonitor {
    fn battery(&self) -> Option<Battery> {
        *self.battery.lock().unwrap()
    }
}

/// In-memory state store.
#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.lock().unwrap().remove(key);
    }
}
