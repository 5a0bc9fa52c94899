use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Activity, FallbackReason, LearningPlan, StatusUpdate, StoredPath};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("activity not found")]
    NotFound,
    #[error("store lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS learning_paths (
    id              TEXT PRIMARY KEY,
    child_id        TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    message         TEXT NOT NULL,
    degraded        INTEGER NOT NULL,
    fallback_reason TEXT
);
CREATE INDEX IF NOT EXISTS idx_learning_paths_child
    ON learning_paths (child_id, created_at);
CREATE TABLE IF NOT EXISTS learning_path_activities (
    path_id     TEXT NOT NULL REFERENCES learning_paths (id) ON DELETE CASCADE,
    activity_id INTEGER NOT NULL,
    position    INTEGER NOT NULL,
    title       TEXT NOT NULL,
    kind        TEXT NOT NULL,
    description TEXT NOT NULL,
    date        TEXT NOT NULL,
    skill_area  TEXT NOT NULL,
    location    TEXT NOT NULL,
    source      TEXT NOT NULL,
    completed   INTEGER NOT NULL DEFAULT 0,
    memo        TEXT,
    PRIMARY KEY (path_id, activity_id)
);
";

const ACTIVITY_COLUMNS: &str =
    "activity_id, title, kind, description, date, completed, skill_area, location, source, memo";

/// Per-child record of the most recent learning path
/// Saving a new plan never touches older ones
#[derive(Clone)]
pub struct PathStore {
    conn: Arc<Mutex<Connection>>,
}

impl PathStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn save(&self, child_id: &str, plan: &LearningPlan) -> Result<StoredPath, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO learning_paths (id, child_id, created_at, message, degraded, fallback_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                child_id,
                created_at,
                plan.message,
                plan.degraded,
                plan.fallback_reason.map(reason_to_str),
            ],
        )?;

        for (position, activity) in plan.activities.iter().enumerate() {
            tx.execute(
                "INSERT INTO learning_path_activities
                 (path_id, activity_id, position, title, kind, description, date,
                  skill_area, location, source, completed, memo)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    id.to_string(),
                    activity.id,
                    position as i64,
                    activity.title,
                    activity.kind,
                    activity.description,
                    activity.date,
                    activity.skill_area,
                    activity.location,
                    activity.source,
                    activity.completed,
                    activity.memo,
                ],
            )?;
        }

        tx.commit()?;

        Ok(StoredPath {
            id,
            child_id: child_id.to_string(),
            created_at,
            plan: plan.clone(),
        })
    }

    pub fn latest(&self, child_id: &str) -> Result<Option<StoredPath>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let header = conn
            .query_row(
                "SELECT id, created_at, message, degraded, fallback_reason
                 FROM learning_paths
                 WHERE child_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![child_id],
                |row| {
                    let id: String = row.get(0)?;
                    let id = Uuid::parse_str(&id)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
                    let created_at: DateTime<Utc> = row.get(1)?;
                    let message: String = row.get(2)?;
                    let degraded: bool = row.get(3)?;
                    let reason: Option<String> = row.get(4)?;
                    Ok((id, created_at, message, degraded, reason))
                },
            )
            .optional()?;

        let Some((id, created_at, message, degraded, reason)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM learning_path_activities
             WHERE path_id = ?1 ORDER BY position"
        ))?;
        let activities = stmt
            .query_map(params![id.to_string()], activity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(StoredPath {
            id,
            child_id: child_id.to_string(),
            created_at,
            plan: LearningPlan {
                activities,
                message,
                degraded,
                fallback_reason: reason.as_deref().and_then(reason_from_str),
            },
        }))
    }

    /// Marks an activity of the child's plans complete or not.
    /// An absent or empty memo keeps the existing one.
    pub fn update_activity_status(
        &self,
        child_id: &str,
        activity_id: i64,
        update: &StatusUpdate,
    ) -> Result<Activity, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let memo = update.memo.as_deref().filter(|m| !m.trim().is_empty());

        let changed = conn.execute(
            "UPDATE learning_path_activities
             SET completed = ?1, memo = COALESCE(?2, memo)
             WHERE activity_id = ?3
               AND path_id IN (SELECT id FROM learning_paths WHERE child_id = ?4)",
            params![update.completed, memo, activity_id, child_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }

        let activity = conn.query_row(
            &format!(
                "SELECT {ACTIVITY_COLUMNS} FROM learning_path_activities
                 WHERE activity_id = ?1
                   AND path_id IN (SELECT id FROM learning_paths WHERE child_id = ?2)
                 LIMIT 1"
            ),
            params![activity_id, child_id],
            activity_from_row,
        )?;
        Ok(activity)
    }
}

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get(0)?,
        title: row.get(1)?,
        kind: row.get(2)?,
        description: row.get(3)?,
        date: row.get(4)?,
        completed: row.get(5)?,
        skill_area: row.get(6)?,
        location: row.get(7)?,
        source: row.get(8)?,
        memo: row.get(9)?,
    })
}

fn reason_to_str(reason: FallbackReason) -> &'static str {
    match reason {
        FallbackReason::UnparseableResponse => "unparseable_response",
        FallbackReason::UpstreamFailure => "upstream_failure",
    }
}

fn reason_from_str(raw: &str) -> Option<FallbackReason> {
    match raw {
        "unparseable_response" => Some(FallbackReason::UnparseableResponse),
        "upstream_failure" => Some(FallbackReason::UpstreamFailure),
        _ => None,
    }
}
