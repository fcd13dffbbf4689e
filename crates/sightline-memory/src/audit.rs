//! Audit Store.
//!
//! The durable record of everything the perception loop does: sessions,
//! admitted frames, detections, spoken messages, audio playback attempts and
//! failures. Every write is its own autocommit statement; there is no
//! cross-entity atomicity, so a frame row can exist without its detections
//! if a later insert fails. Failed writes are not retried.
//!
//! # Example
//!
//! ```rust
//! use sightline_memory::audit::AuditStore;
//! use sightline_memory::records::AudioOutcome;
//!
//! let store = AuditStore::open_in_memory().unwrap();
//! let session = store.create_session("1.0.0", Some(1), None).unwrap();
//! let frame = store.insert_frame_event(session, 3, 42, 1).unwrap();
//! let msg = store.insert_spoken_message(session, Some(frame), "person", "en").unwrap();
//! let audio = store.start_audio_event(session, msg, Some("USB Speaker")).unwrap();
//! store.finish_audio_event(audio, &AudioOutcome::Succeeded).unwrap();
//! store.end_session(session).unwrap();
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use sightline_types::{BoundingBox, Component, Detection, Severity, SightError};
use thiserror::Error;
use tracing::{debug, info};

use crate::records::{
    AppError, AudioEvent, AudioEventId, AudioOutcome, DetectionId, DetectionRecord, ErrorId,
    FrameEvent, FrameId, MessageId, RunSession, SessionId, SpokenMessage,
};
use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from audit store operations.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("run session {0} has already ended")]
    SessionAlreadyEnded(SessionId),
    #[error("audio event {0} has already reached a terminal state")]
    AudioEventAlreadyFinished(AudioEventId),
    #[error("frame number {got} does not follow {last} in session {session}")]
    NonMonotonicFrame { session: SessionId, last: u64, got: u64 },
    #[error("confidence {0} is outside [0, 1]")]
    InvalidConfidence(f32),
    #[error("spoken message text must not be empty")]
    EmptyMessage,
    #[error("{entity} {id} belongs to session {actual}, not {expected}")]
    SessionMismatch {
        entity: &'static str,
        id: i64,
        expected: SessionId,
        actual: SessionId,
    },
    #[error("value {0} does not fit in an SQLite integer")]
    OutOfRange(u64),
}

impl From<AuditError> for SightError {
    fn from(e: AuditError) -> Self {
        SightError::Persistence(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn now_utc() -> String {
    Utc::now().to_rfc3339()
}

fn sql_int(v: u64) -> Result<i64, AuditError> {
    i64::try_from(v).map_err(|_| AuditError::OutOfRange(v))
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

fn invalid_text(idx: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, value, rusqlite::types::Type::Text)
}

// ─────────────────────────────────────────────────────────────────────────────
// AuditStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed audit trail of the perception loop.
pub struct AuditStore {
    conn: Connection,
}

impl AuditStore {
    /// Open (or create) the audit database at `path`, creating parent
    /// directories as needed and applying pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // A concurrent observer process reads while the loop writes.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "audit database opened");
        Self::init(conn)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, AuditError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(&mut conn)?;
        Ok(Self { conn })
    }

    // ── run_session ──────────────────────────────────────────────────────────

    /// Record the start of a run session.
    pub fn create_session(
        &self,
        app_version: &str,
        model_id: Option<i64>,
        device_notes: Option<&str>,
    ) -> Result<SessionId, AuditError> {
        self.conn.execute(
            "INSERT INTO run_session (start_time_utc, app_version, model_id, device_notes)
             VALUES (?1, ?2, ?3, ?4)",
            params![now_utc(), app_version, model_id, device_notes],
        )?;
        let id = SessionId(self.conn.last_insert_rowid());
        info!(session_id = %id, app_version, "run session created");
        Ok(id)
    }

    /// Stamp the session's end time. Allowed exactly once per session.
    pub fn end_session(&self, session: SessionId) -> Result<(), AuditError> {
        let changed = self.conn.execute(
            "UPDATE run_session SET end_time_utc = ?1 WHERE id = ?2 AND end_time_utc IS NULL",
            params![now_utc(), session.0],
        )?;
        if changed == 0 {
            self.session(session)?;
            return Err(AuditError::SessionAlreadyEnded(session));
        }
        info!(session_id = %session, "run session finalized");
        Ok(())
    }

    pub fn session(&self, session: SessionId) -> Result<RunSession, AuditError> {
        self.conn
            .query_row(
                "SELECT id, start_time_utc, end_time_utc, app_version, model_id, device_notes
                 FROM run_session WHERE id = ?1",
                params![session.0],
                |row| {
                    Ok(RunSession {
                        id: SessionId(row.get(0)?),
                        start_time: parse_ts(1, &row.get::<_, String>(1)?)?,
                        end_time: parse_opt_ts(2, row.get(2)?)?,
                        app_version: row.get(3)?,
                        model_id: row.get(4)?,
                        device_notes: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or(AuditError::NotFound {
                entity: "run_session",
                id: session.0,
            })
    }

    // ── frame_event / detection ──────────────────────────────────────────────

    /// Record an admitted frame.
    ///
    /// Returns [`AuditError::NonMonotonicFrame`] if `frame_number` is not
    /// greater than every frame number already recorded for the session.
    pub fn insert_frame_event(
        &self,
        session: SessionId,
        frame_number: u64,
        detect_ms: u64,
        objects_found: usize,
    ) -> Result<FrameId, AuditError> {
        let last: Option<i64> = self.conn.query_row(
            "SELECT MAX(frame_number) FROM frame_event WHERE session_id = ?1",
            params![session.0],
            |row| row.get(0),
        )?;
        if let Some(last) = last.map(|l| l as u64).filter(|l| frame_number <= *l) {
            return Err(AuditError::NonMonotonicFrame {
                session,
                last,
                got: frame_number,
            });
        }

        self.conn.execute(
            "INSERT INTO frame_event (session_id, frame_number, captured_at_utc, detect_ms, objects_found)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.0,
                sql_int(frame_number)?,
                now_utc(),
                sql_int(detect_ms)?,
                sql_int(objects_found as u64)?,
            ],
        )?;
        let id = FrameId(self.conn.last_insert_rowid());
        debug!(session_id = %session, frame_number, frame_id = %id, "frame_event inserted");
        Ok(id)
    }

    /// Record one detection belonging to `frame`.
    pub fn insert_detection(
        &self,
        session: SessionId,
        frame: FrameId,
        detection: &Detection,
    ) -> Result<DetectionId, AuditError> {
        if !(0.0..=1.0).contains(&detection.confidence) {
            return Err(AuditError::InvalidConfidence(detection.confidence));
        }
        self.check_frame_session(session, frame)?;
        let b = detection.bbox;
        self.conn.execute(
            "INSERT INTO detection
                 (session_id, frame_id, object_label, confidence_0_1, box_x, box_y, box_w, box_h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                session.0,
                frame.0,
                detection.label,
                f64::from(detection.confidence),
                b.x,
                b.y,
                b.w,
                b.h,
            ],
        )?;
        Ok(DetectionId(self.conn.last_insert_rowid()))
    }

    fn check_frame_session(&self, session: SessionId, frame: FrameId) -> Result<(), AuditError> {
        let owner: Option<i64> = self
            .conn
            .query_row(
                "SELECT session_id FROM frame_event WHERE id = ?1",
                params![frame.0],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => Err(AuditError::NotFound {
                entity: "frame_event",
                id: frame.0,
            }),
            Some(actual) if actual != session.0 => Err(AuditError::SessionMismatch {
                entity: "frame_event",
                id: frame.0,
                expected: session,
                actual: SessionId(actual),
            }),
            Some(_) => Ok(()),
        }
    }

    /// All frames of a session in frame-number order.
    pub fn frames_for_session(&self, session: SessionId) -> Result<Vec<FrameEvent>, AuditError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, frame_number, captured_at_utc, detect_ms, objects_found
             FROM frame_event WHERE session_id = ?1 ORDER BY frame_number ASC",
        )?;
        let rows = stmt.query_map(params![session.0], |row| {
            Ok(FrameEvent {
                id: FrameId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                frame_number: row.get::<_, i64>(2)? as u64,
                captured_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                detect_ms: row.get::<_, i64>(4)? as u64,
                objects_found: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn detections_for_frame(&self, frame: FrameId) -> Result<Vec<DetectionRecord>, AuditError> {
        self.query_detections(
            "SELECT id, session_id, frame_id, object_label, confidence_0_1, box_x, box_y, box_w, box_h
             FROM detection WHERE frame_id = ?1 ORDER BY id ASC",
            params![frame.0],
        )
    }

    /// Detections with `id > watermark`, ascending, at most `limit` rows.
    pub fn detections_after(&self, watermark: i64, limit: usize) -> Result<Vec<DetectionRecord>, AuditError> {
        self.query_detections(
            "SELECT id, session_id, frame_id, object_label, confidence_0_1, box_x, box_y, box_w, box_h
             FROM detection WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            params![watermark, sql_int(limit as u64)?],
        )
    }

    /// Highest `detection` and `spoken_message` ids, `0` for an empty table.
    pub fn latest_ids(&self) -> Result<(i64, i64), AuditError> {
        Ok(self.conn.query_row(
            "SELECT (SELECT COALESCE(MAX(id), 0) FROM detection),
                    (SELECT COALESCE(MAX(id), 0) FROM spoken_message)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?)
    }

    fn query_detections(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<DetectionRecord>, AuditError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(DetectionRecord {
                id: DetectionId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                frame_id: FrameId(row.get(2)?),
                label: row.get(3)?,
                confidence: row.get::<_, f64>(4)? as f32,
                bbox: BoundingBox::new(
                    row.get::<_, Option<i32>>(5)?.unwrap_or(0),
                    row.get::<_, Option<i32>>(6)?.unwrap_or(0),
                    row.get::<_, Option<i32>>(7)?.unwrap_or(0),
                    row.get::<_, Option<i32>>(8)?.unwrap_or(0),
                ),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── spoken_message ───────────────────────────────────────────────────────

    /// Record text about to be narrated, optionally bound to a frame of the
    /// same session.
    pub fn insert_spoken_message(
        &self,
        session: SessionId,
        frame: Option<FrameId>,
        text: &str,
        language_code: &str,
    ) -> Result<MessageId, AuditError> {
        if text.trim().is_empty() {
            return Err(AuditError::EmptyMessage);
        }
        if let Some(frame) = frame {
            self.check_frame_session(session, frame)?;
        }
        self.conn.execute(
            "INSERT INTO spoken_message (session_id, frame_id, text_content, language_code, created_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session.0, frame.map(|f| f.0), text, language_code, now_utc()],
        )?;
        Ok(MessageId(self.conn.last_insert_rowid()))
    }

    pub fn messages_for_session(&self, session: SessionId) -> Result<Vec<SpokenMessage>, AuditError> {
        self.query_messages(
            "SELECT id, session_id, frame_id, text_content, language_code, created_at_utc
             FROM spoken_message WHERE session_id = ?1 ORDER BY id ASC",
            params![session.0],
        )
    }

    /// Spoken messages with `id > watermark`, ascending, at most `limit` rows.
    pub fn messages_after(&self, watermark: i64, limit: usize) -> Result<Vec<SpokenMessage>, AuditError> {
        self.query_messages(
            "SELECT id, session_id, frame_id, text_content, language_code, created_at_utc
             FROM spoken_message WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            params![watermark, sql_int(limit as u64)?],
        )
    }

    fn query_messages(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<SpokenMessage>, AuditError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, |row| {
            Ok(SpokenMessage {
                id: MessageId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                frame_id: row.get::<_, Option<i64>>(2)?.map(FrameId),
                text: row.get(3)?,
                language_code: row.get(4)?,
                created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── audio_event ──────────────────────────────────────────────────────────

    /// Record the start of a playback attempt for `message`.
    pub fn start_audio_event(
        &self,
        session: SessionId,
        message: MessageId,
        output_device: Option<&str>,
    ) -> Result<AudioEventId, AuditError> {
        let owner: Option<i64> = self
            .conn
            .query_row(
                "SELECT session_id FROM spoken_message WHERE id = ?1",
                params![message.0],
                |row| row.get(0),
            )
            .optional()?;
        match owner {
            None => {
                return Err(AuditError::NotFound {
                    entity: "spoken_message",
                    id: message.0,
                });
            }
            Some(actual) if actual != session.0 => {
                return Err(AuditError::SessionMismatch {
                    entity: "spoken_message",
                    id: message.0,
                    expected: session,
                    actual: SessionId(actual),
                });
            }
            Some(_) => {}
        }
        self.conn.execute(
            "INSERT INTO audio_event (session_id, message_id, started_at_utc, output_device)
             VALUES (?1, ?2, ?3, ?4)",
            params![session.0, message.0, now_utc(), output_device],
        )?;
        Ok(AudioEventId(self.conn.last_insert_rowid()))
    }

    /// Move an audio event to its terminal state. Allowed exactly once.
    pub fn finish_audio_event(&self, event: AudioEventId, outcome: &AudioOutcome) -> Result<(), AuditError> {
        let changed = self.conn.execute(
            "UPDATE audio_event SET ended_at_utc = ?1, was_successful = ?2, error_text = ?3
             WHERE id = ?4 AND ended_at_utc IS NULL",
            params![now_utc(), outcome.was_successful(), outcome.error_text(), event.0],
        )?;
        if changed == 0 {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM audio_event WHERE id = ?1)",
                params![event.0],
                |row| row.get(0),
            )?;
            return Err(if exists {
                AuditError::AudioEventAlreadyFinished(event)
            } else {
                AuditError::NotFound {
                    entity: "audio_event",
                    id: event.0,
                }
            });
        }
        Ok(())
    }

    pub fn audio_events_for_session(&self, session: SessionId) -> Result<Vec<AudioEvent>, AuditError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, message_id, started_at_utc, ended_at_utc, was_successful,
                    output_device, error_text
             FROM audio_event WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session.0], |row| {
            let was_successful: Option<bool> = row.get(5)?;
            let error_text: Option<String> = row.get(7)?;
            let outcome = was_successful.map(|ok| {
                if ok {
                    AudioOutcome::Succeeded
                } else {
                    AudioOutcome::Failed {
                        error_text: error_text.unwrap_or_default(),
                    }
                }
            });
            Ok(AudioEvent {
                id: AudioEventId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                message_id: MessageId(row.get(2)?),
                started_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                ended_at: parse_opt_ts(4, row.get(4)?)?,
                outcome,
                output_device: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── app_error ────────────────────────────────────────────────────────────

    /// Append an immutable error record.
    pub fn log_error(
        &self,
        session: SessionId,
        component: Component,
        severity: Severity,
        short_message: &str,
        long_details: Option<&str>,
    ) -> Result<ErrorId, AuditError> {
        self.conn.execute(
            "INSERT INTO app_error
                 (session_id, happened_at_utc, component_name, severity, short_message, long_details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.0,
                now_utc(),
                component.as_str(),
                severity.as_str(),
                short_message,
                long_details,
            ],
        )?;
        Ok(ErrorId(self.conn.last_insert_rowid()))
    }

    pub fn errors_for_session(&self, session: SessionId) -> Result<Vec<AppError>, AuditError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, happened_at_utc, component_name, severity, short_message, long_details
             FROM app_error WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session.0], |row| {
            let component: String = row.get(3)?;
            let severity: String = row.get(4)?;
            Ok(AppError {
                id: ErrorId(row.get(0)?),
                session_id: SessionId(row.get(1)?),
                happened_at: parse_ts(2, &row.get::<_, String>(2)?)?,
                component: Component::parse(&component).ok_or_else(|| invalid_text(3, component.clone()))?,
                severity: Severity::parse(&severity).ok_or_else(|| invalid_text(4, severity.clone()))?,
                short_message: row.get(5)?,
                long_details: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ── integrity ────────────────────────────────────────────────────────────

    /// Audio events whose message is bound to a frame outside the message's
    /// session (or whose own session differs from the message's).
    ///
    /// Empty whenever the message/frame links are consistent.
    pub fn orphaned_message_links(&self) -> Result<Vec<AudioEventId>, AuditError> {
        let mut stmt = self.conn.prepare(
            "SELECT ae.id
             FROM audio_event ae
             JOIN spoken_message m ON m.id = ae.message_id
             LEFT JOIN frame_event f ON f.id = m.frame_id
             WHERE ae.session_id != m.session_id
                OR (m.frame_id IS NOT NULL AND (f.id IS NULL OR f.session_id != m.session_id))
             ORDER BY ae.id ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok(AudioEventId(row.get(0)?)))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
