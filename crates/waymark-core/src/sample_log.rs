//! Async facade over the durable sample store.
//!
//! The SQLite store is owned by one blocking task fed through a
//! command queue, so all mutations happen on a single background
//! context in submission order. Mutations are fire-and-forget: a
//! storage failure is logged and swallowed, never surfaced to the
//! delivery path. Reads (`get_status`, `latest`, `pending`, `clear`)
//! await the task's reply.

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use waymark_store::{Store, StoredSample};
use waymark_types::{Sample, SendStatus};

enum StoreCmd {
    Append(Sample),
    UpdateSendTime(String, OffsetDateTime),
    UpdateResendTime(String, OffsetDateTime),
    UpdateSendStatus(String, SendStatus, Option<String>),
    UpdateResendStatus(String, SendStatus, Option<String>),
    EffectiveStatus(String, oneshot::Sender<Option<SendStatus>>),
    Latest(oneshot::Sender<Option<StoredSample>>),
    Pending(oneshot::Sender<Vec<StoredSample>>),
    Clear(oneshot::Sender<()>),
}

/// Handle to the background sample log.
#[derive(Clone)]
pub struct SampleLog {
    tx: mpsc::UnboundedSender<StoreCmd>,
}

impl SampleLog {
    /// Spawn the background task that owns the store.
    pub fn new(store: Store) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || run(store, rx));
        Self { tx }
    }

    /// Append a sample. Fire-and-forget; failures are logged.
    pub fn append(&self, sample: Sample) {
        self.submit(StoreCmd::Append(sample));
    }

    /// Record the primary attempt time.
    pub fn update_send_time(&self, sample_id: &str, at: OffsetDateTime) {
        self.submit(StoreCmd::UpdateSendTime(sample_id.to_string(), at));
    }

    /// Record the retry attempt time.
    pub fn update_resend_time(&self, sample_id: &str, at: OffsetDateTime) {
        self.submit(StoreCmd::UpdateResendTime(sample_id.to_string(), at));
    }

    /// Record the primary attempt outcome.
    pub fn update_send_status(&self, sample_id: &str, status: SendStatus, error: Option<String>) {
        self.submit(StoreCmd::UpdateSendStatus(
            sample_id.to_string(),
            status,
            error,
        ));
    }

    /// Record the retry attempt outcome.
    pub fn update_resend_status(&self, sample_id: &str, status: SendStatus, error: Option<String>) {
        self.submit(StoreCmd::UpdateResendStatus(
            sample_id.to_string(),
            status,
            error,
        ));
    }

    /// Effective delivery status of a sample; `None` when the sample is
    /// missing or its state resolves to none.
    ///
    /// Ordered after previously submitted mutations.
    pub async fn get_status(&self, sample_id: &str) -> Option<SendStatus> {
        let (reply, rx) = oneshot::channel();
        self.submit(StoreCmd::EffectiveStatus(sample_id.to_string(), reply));
        rx.await.ok().flatten()
    }

    /// Most recently recorded sample.
    pub async fn latest(&self) -> Option<StoredSample> {
        let (reply, rx) = oneshot::channel();
        self.submit(StoreCmd::Latest(reply));
        rx.await.ok().flatten()
    }

    /// Samples still eligible for delivery, oldest first.
    pub async fn pending(&self) -> Vec<StoredSample> {
        let (reply, rx) = oneshot::channel();
        self.submit(StoreCmd::Pending(reply));
        rx.await.unwrap_or_default()
    }

    /// Delete every sample and wait for completion.
    pub async fn clear(&self) {
        let (reply, rx) = oneshot::channel();
        self.submit(StoreCmd::Clear(reply));
        let _ = rx.await;
    }

    fn submit(&self, cmd: StoreCmd) {
        if self.tx.send(cmd).is_err() {
            warn!("Sample log task is gone; dropping command");
        }
    }
}

fn run(store: Store, mut rx: mpsc::UnboundedReceiver<StoreCmd>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StoreCmd::Append(sample) => {
                if let Err(e) = store.insert_sample(&sample) {
                    warn!(sample_id = %sample.id, error = %e, "Failed to append sample");
                }
                // Keep the log bounded as it grows
                if let Err(e) = store.prune_old() {
                    warn!(error = %e, "Failed to prune samples");
                }
            }
            StoreCmd::UpdateSendTime(id, at) => {
                if let Err(e) = store.update_send_time(&id, at) {
                    warn!(sample_id = %id, error = %e, "Failed to update send time");
                }
            }
            StoreCmd::UpdateResendTime(id, at) => {
                if let Err(e) = store.update_resend_time(&id, at) {
                    warn!(sample_id = %id, error = %e, "Failed to update resend time");
                }
            }
            StoreCmd::UpdateSendStatus(id, status, error) => {
                if let Err(e) = store.update_send_status(&id, status, error.as_deref()) {
                    warn!(sample_id = %id, error = %e, "Failed to update send status");
                }
            }
            StoreCmd::UpdateResendStatus(id, status, error) => {
                if let Err(e) = store.update_resend_status(&id, status, error.as_deref()) {
                    warn!(sample_id = %id, error = %e, "Failed to update resend status");
                }
            }
            StoreCmd::EffectiveStatus(id, reply) => {
                let status = store.effective_status(&id).unwrap_or_else(|e| {
                    debug!(sample_id = %id, error = %e, "Status lookup failed");
                    None
                });
                let _ = reply.send(status);
            }
            StoreCmd::Latest(reply) => {
                let latest = store.latest_sample().unwrap_or_else(|e| {
                    warn!(error = %e, "Latest-sample lookup failed");
                    None
                });
                let _ = reply.send(latest);
            }
            StoreCmd::Pending(reply) => {
                let pending = store.pending_for_resend().unwrap_or_else(|e| {
                    warn!(error = %e, "Pending-sample lookup failed");
                    Vec::new()
                });
                let _ = reply.send(pending);
            }
            StoreCmd::Clear(reply) => {
                if let Err(e) = store.clear() {
                    warn!(error = %e, "Failed to clear samples");
                }
                let _ = reply.send(());
            }
        }
    }
}
