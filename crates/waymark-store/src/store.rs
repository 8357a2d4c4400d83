//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{debug, info};

use waymark_types::{AppMode, Position, Sample, SendStatus};

use crate::error::{Error, Result};
use crate::models::StoredSample;
use crate::schema;

/// Maximum number of samples retained after a prune pass.
pub const MAX_RETAINED_SAMPLES: usize = 500;

/// SQLite-based log of captured location samples.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening sample database at {}", path.display());
        let conn = Connection::open(path)?;

        // WAL mode keeps appends cheap while the delivery loop reads
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        // Initialize schema
        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    // === Sample operations ===

    /// Append a freshly captured sample with status `Unknown`.
    pub fn insert_sample(&self, sample: &Sample) -> Result<()> {
        self.conn.execute(
            "INSERT INTO samples (
                id, latitude, longitude, altitude, horizontal_accuracy,
                vertical_accuracy, speed, course, recorded_at, is_simulated,
                app_mode, send_status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                sample.id,
                sample.position.latitude,
                sample.position.longitude,
                sample.position.altitude,
                sample.position.horizontal_accuracy,
                sample.position.vertical_accuracy,
                sample.position.speed,
                sample.position.course,
                timestamp_to_millis(sample.position.timestamp),
                sample.position.is_simulated,
                u8::from(sample.app_mode),
                SendStatus::Unknown.code(),
            ],
        )?;
        debug!(sample_id = %sample.id, "Appended sample");
        Ok(())
    }

    /// Get a sample with its delivery bookkeeping.
    pub fn get_sample(&self, sample_id: &str) -> Result<Option<StoredSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, latitude, longitude, altitude, horizontal_accuracy,
                    vertical_accuracy, speed, course, recorded_at, is_simulated,
                    app_mode, send_status, resend_status, send_time, resend_time,
                    last_error
             FROM samples WHERE id = ?",
        )?;

        let sample = stmt
            .query_row([sample_id], row_to_stored_sample)
            .optional()?;

        Ok(sample)
    }

    /// The most recently recorded sample, if any.
    pub fn latest_sample(&self) -> Result<Option<StoredSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, latitude, longitude, altitude, horizontal_accuracy,
                    vertical_accuracy, speed, course, recorded_at, is_simulated,
                    app_mode, send_status, resend_status, send_time, resend_time,
                    last_error
             FROM samples ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
        )?;

        let sample = stmt.query_row([], row_to_stored_sample).optional()?;

        Ok(sample)
    }

    /// Resolve the delivery state a reader should act on.
    ///
    /// See [`StoredSample::effective_status`] for the resolution rules.
    pub fn effective_status(&self, sample_id: &str) -> Result<Option<SendStatus>> {
        let sample = self
            .get_sample(sample_id)?
            .ok_or_else(|| Error::SampleNotFound(sample_id.to_string()))?;
        Ok(sample.effective_status())
    }

    /// Record when the primary delivery attempt was made.
    ///
    /// A no-op when the sample is absent (already pruned).
    pub fn update_send_time(&self, sample_id: &str, at: OffsetDateTime) -> Result<()> {
        self.conn.execute(
            "UPDATE samples SET send_time = ?2 WHERE id = ?1",
            rusqlite::params![sample_id, timestamp_to_millis(at)],
        )?;
        Ok(())
    }

    /// Record when the retry attempt was made.
    ///
    /// A no-op when the sample is absent (already pruned).
    pub fn update_resend_time(&self, sample_id: &str, at: OffsetDateTime) -> Result<()> {
        self.conn.execute(
            "UPDATE samples SET resend_time = ?2 WHERE id = ?1",
            rusqlite::params![sample_id, timestamp_to_millis(at)],
        )?;
        Ok(())
    }

    /// Record the outcome of the primary delivery attempt.
    ///
    /// The error message is stored only for failure outcomes.
    pub fn update_send_status(
        &self,
        sample_id: &str,
        status: SendStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = if status.is_failure() { error } else { None };
        self.conn.execute(
            "UPDATE samples SET send_status = ?2,
                last_error = COALESCE(?3, last_error)
             WHERE id = ?1",
            rusqlite::params![sample_id, status.code(), error],
        )?;
        debug!(sample_id, %status, "Updated send status");
        Ok(())
    }

    /// Record the outcome of the retry attempt.
    ///
    /// The error message is stored only for failure outcomes.
    pub fn update_resend_status(
        &self,
        sample_id: &str,
        status: SendStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = if status.is_failure() { error } else { None };
        self.conn.execute(
            "UPDATE samples SET resend_status = ?2,
                last_error = COALESCE(?3, last_error)
             WHERE id = ?1",
            rusqlite::params![sample_id, status.code(), error],
        )?;
        debug!(sample_id, %status, "Updated resend status");
        Ok(())
    }

    /// Samples still eligible for delivery once the channel connects,
    /// oldest first.
    pub fn pending_for_resend(&self) -> Result<Vec<StoredSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, latitude, longitude, altitude, horizontal_accuracy,
                    vertical_accuracy, speed, course, recorded_at, is_simulated,
                    app_mode, send_status, resend_status, send_time, resend_time,
                    last_error
             FROM samples ORDER BY recorded_at ASC, rowid ASC",
        )?;

        let samples = stmt
            .query_map([], row_to_stored_sample)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(samples
            .into_iter()
            .filter(|s| {
                s.effective_status()
                    .is_some_and(|status| status.can_send_on_connect())
            })
            .collect())
    }

    /// Delete everything but the newest [`MAX_RETAINED_SAMPLES`] rows.
    ///
    /// Returns the number of rows removed.
    pub fn prune_old(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM samples WHERE id NOT IN (
                SELECT id FROM samples
                ORDER BY recorded_at DESC, rowid DESC
                LIMIT ?1
             )",
            [MAX_RETAINED_SAMPLES],
        )?;
        if removed > 0 {
            debug!(removed, "Pruned old samples");
        }
        Ok(removed)
    }

    /// Delete every sample (logout).
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM samples", [])?;
        Ok(())
    }

    /// Number of retained samples.
    pub fn count(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn timestamp_to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn timestamp_from_millis(ms: i64, column: usize) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Integer, Box::new(e))
    })
}

fn row_to_stored_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSample> {
    let app_mode = AppMode::try_from(row.get::<_, u8>(10)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    let send_status = SendStatus::try_from(row.get::<_, i64>(11)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(11, rusqlite::types::Type::Integer, Box::new(e))
    })?;
    let resend_status = row
        .get::<_, Option<i64>>(12)?
        .map(|code| {
            SendStatus::try_from(code).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    12,
                    rusqlite::types::Type::Integer,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(StoredSample {
        sample: Sample {
            id: row.get(0)?,
            position: Position {
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                altitude: row.get(3)?,
                horizontal_accuracy: row.get(4)?,
                vertical_accuracy: row.get(5)?,
                speed: row.get(6)?,
                course: row.get(7)?,
                timestamp: timestamp_from_millis(row.get(8)?, 8)?,
                is_simulated: row.get(9)?,
            },
            app_mode,
        },
        send_status,
        resend_status,
        send_time: row
            .get::<_, Option<i64>>(13)?
            .map(|ms| timestamp_from_millis(ms, 13))
            .transpose()?,
        resend_time: row
            .get::<_, Option<i64>>(14)?
            .map(|ms| timestamp_from_millis(ms, 14))
            .transpose()?,
        last_error: row.get(15)?,
    })
}
