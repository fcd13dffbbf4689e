//! Versioned schema for the audit database.
//!
//! Migrations are applied in order inside one transaction and the reached
//! version is recorded in `PRAGMA user_version`.
//!
//! # Tables
//!
//! | table            | parent(s)                               |
//! |------------------|-----------------------------------------|
//! | `run_session`    | –                                       |
//! | `frame_event`    | `run_session`                           |
//! | `detection`      | `run_session`, `frame_event`            |
//! | `spoken_message` | `run_session`, `frame_event` (nullable) |
//! | `audio_event`    | `run_session`, `spoken_message`         |
//! | `app_error`      | `run_session`                           |

use rusqlite::Connection;

use crate::audit::AuditError;

const MIGRATIONS: &[&str] = &[
    // v1: core audit trail.
    "CREATE TABLE IF NOT EXISTS run_session (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time_utc TEXT    NOT NULL,
        end_time_utc   TEXT,
        app_version    TEXT    NOT NULL,
        model_id       INTEGER,
        device_notes   TEXT
    );

    CREATE TABLE IF NOT EXISTS frame_event (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id      INTEGER NOT NULL REFERENCES run_session(id),
        frame_number    INTEGER NOT NULL CHECK (frame_number > 0),
        captured_at_utc TEXT    NOT NULL,
        detect_ms       INTEGER NOT NULL CHECK (detect_ms >= 0),
        objects_found   INTEGER NOT NULL CHECK (objects_found >= 0),
        UNIQUE (session_id, frame_number)
    );

    CREATE TABLE IF NOT EXISTS detection (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id     INTEGER NOT NULL REFERENCES run_session(id),
        frame_id       INTEGER NOT NULL REFERENCES frame_event(id),
        object_label   TEXT    NOT NULL,
        confidence_0_1 REAL    NOT NULL CHECK (confidence_0_1 BETWEEN 0.0 AND 1.0),
        box_x          INTEGER,
        box_y          INTEGER,
        box_w          INTEGER,
        box_h          INTEGER
    );

    CREATE TABLE IF NOT EXISTS spoken_message (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id     INTEGER NOT NULL REFERENCES run_session(id),
        frame_id       INTEGER REFERENCES frame_event(id),
        text_content   TEXT    NOT NULL CHECK (length(text_content) > 0),
        language_code  TEXT    NOT NULL,
        created_at_utc TEXT    NOT NULL
    );

    CREATE TABLE IF NOT EXISTS audio_event (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id     INTEGER NOT NULL REFERENCES run_session(id),
        message_id     INTEGER NOT NULL REFERENCES spoken_message(id),
        started_at_utc TEXT    NOT NULL,
        ended_at_utc   TEXT,
        was_successful INTEGER CHECK (was_successful IN (0, 1)),
        output_device  TEXT,
        error_text     TEXT,
        CHECK ((ended_at_utc IS NULL) = (was_successful IS NULL))
    );

    CREATE TABLE IF NOT EXISTS app_error (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id      INTEGER NOT NULL REFERENCES run_session(id),
        happened_at_utc TEXT    NOT NULL,
        component_name  TEXT    NOT NULL,
        severity        TEXT    NOT NULL,
        short_message   TEXT    NOT NULL,
        long_details    TEXT
    );

    CREATE TRIGGER IF NOT EXISTS app_error_immutable
    BEFORE UPDATE ON app_error
    BEGIN
        SELECT RAISE(ABORT, 'app_error rows are append-only');
    END;

    CREATE INDEX IF NOT EXISTS idx_frame_event_session    ON frame_event(session_id, frame_number);
    CREATE INDEX IF NOT EXISTS idx_detection_frame        ON detection(frame_id);
    CREATE INDEX IF NOT EXISTS idx_spoken_message_session ON spoken_message(session_id);
    CREATE INDEX IF NOT EXISTS idx_audio_event_message    ON audio_event(message_id);
    CREATE INDEX IF NOT EXISTS idx_app_error_session      ON app_error(session_id);",
];

/// Latest schema version this build understands.
pub fn current_version() -> i64 {
    MIGRATIONS.len() as i64
}

/// Bring `conn` up to [`current_version`].
///
/// # Errors
///
/// Returns [`AuditError::SchemaTooNew`] if the database was written by a
/// newer build, or [`AuditError::Sqlite`] if a migration fails (in which
/// case nothing is applied).
pub fn migrate(conn: &mut Connection) -> Result<(), AuditError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let latest = current_version();

    if version > latest {
        return Err(AuditError::SchemaTooNew {
            found: version,
            supported: latest,
        });
    }
    if version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for sql in &MIGRATIONS[version as usize..] {
        tx.execute_batch(sql)?;
    }
    tx.pragma_update(None, "user_version", latest)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn migrate_creates_six_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(
            table_names(&conn),
            vec!["app_error", "audio_event", "detection", "frame_event", "run_session", "spoken_message"]
        );
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let v: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0)).unwrap();
        assert_eq!(v, current_version());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", current_version() + 1).unwrap();
        assert!(matches!(migrate(&mut conn), Err(AuditError::SchemaTooNew { .. })));
    }
}
