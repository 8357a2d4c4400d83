//! Storage model types.

use time::OffsetDateTime;

use waymark_types::{Sample, SendStatus};

/// A sample row together with its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    /// The captured sample.
    pub sample: Sample,
    /// Outcome of the primary delivery attempt.
    pub send_status: SendStatus,
    /// Outcome of the retry path, if one was taken.
    pub resend_status: Option<SendStatus>,
    /// When the primary attempt was made.
    pub send_time: Option<OffsetDateTime>,
    /// When the retry attempt was made.
    pub resend_time: Option<OffsetDateTime>,
    /// Message of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl StoredSample {
    /// The delivery state a reader should act on.
    ///
    /// A retry outcome supersedes a failed primary attempt. Samples
    /// whose primary status is `Ignored`, or already carries a
    /// retry-path value, resolve to `None`.
    #[must_use]
    pub fn effective_status(&self) -> Option<SendStatus> {
        match self.send_status {
            SendStatus::Unknown | SendStatus::SentViaChannel | SendStatus::SentViaHttp => {
                Some(self.send_status)
            }
            SendStatus::FailedViaChannel | SendStatus::FailedViaHttp => {
                Some(self.resend_status.unwrap_or(self.send_status))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_types::{AppMode, Position};

    fn stored(send: SendStatus, resend: Option<SendStatus>) -> StoredSample {
        StoredSample {
            sample: Sample::new(Position::invalid(), AppMode::Foreground),
            send_status: send,
            resend_status: resend,
            send_time: None,
            resend_time: None,
            last_error: None,
        }
    }

    #[test]
    fn test_effective_status_retry_supersedes_failure() {
        let row = stored(
            SendStatus::FailedViaChannel,
            Some(SendStatus::SentViaHttpRetry),
        );
        assert_eq!(row.effective_status(), Some(SendStatus::SentViaHttpRetry));
    }

    #[test]
    fn test_effective_status_failure_without_retry() {
        let row = stored(SendStatus::FailedViaHttp, None);
        assert_eq!(row.effective_status(), Some(SendStatus::FailedViaHttp));
    }

    #[test]
    fn test_effective_status_success_ignores_resend() {
        let row = stored(SendStatus::SentViaChannel, Some(SendStatus::FailedViaHttpRetry));
        assert_eq!(row.effective_status(), Some(SendStatus::SentViaChannel));
    }

    #[test]
    fn test_effective_status_none_for_ignored_and_retry_primary() {
        assert_eq!(stored(SendStatus::Ignored, None).effective_status(), None);
        assert_eq!(
            stored(SendStatus::SentViaHttpRetry, None).effective_status(),
            None
        );
    }
}
