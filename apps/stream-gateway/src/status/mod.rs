use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::CameraId;

/// Lifecycle state of a camera's transcoding stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Stopped,
    Starting,
    Running,
    Error,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Stopped => "stopped",
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Error => "error",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "starting" => StreamState::Starting,
            "running" => StreamState::Running,
            "error" => StreamState::Error,
            _ => StreamState::Stopped,
        }
    }
}

/// Durable status record, the single thing this service persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatusRecord {
    pub camera_id: CameraId,
    pub state: StreamState,
    pub last_error: Option<String>,
    pub last_update: DateTime<Utc>,
}

/// SQLite-backed store for [`StreamStatusRecord`].
///
/// Only the transcode supervisor writes here; everything else reads.
pub struct StatusStore {
    pool: SqlitePool,
}

impl StatusStore {
    pub async fn new(url: &str, max_connections: u32) -> crate::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // A memory database is per-connection; a pool of more than one
        // would hand out empty databases.
        let max_connections = if url.contains(":memory:") { 1 } else { max_connections };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store, used by tests and by deployments that opt out of
    /// durability.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::new("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> crate::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stream_status (
                camera_id INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                last_error TEXT,
                last_update TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(
        &self,
        camera_id: CameraId,
        state: StreamState,
        last_error: Option<&str>,
    ) -> crate::Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO stream_status (camera_id, state, last_error, last_update)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(camera_id) DO UPDATE SET
                state = excluded.state,
                last_error = excluded.last_error,
                last_update = excluded.last_update
            "#,
        )
        .bind(camera_id as i64)
        .bind(state.as_str())
        .bind(last_error)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(camera_id, state = state.as_str(), "Persisted stream status");
        Ok(())
    }

    pub async fn get(&self, camera_id: CameraId) -> crate::Result<Option<StreamStatusRecord>> {
        let row = sqlx::query(
            "SELECT camera_id, state, last_error, last_update FROM stream_status WHERE camera_id = ?1",
        )
        .bind(camera_id as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::record_from_row).transpose()?)
    }

    pub async fn all(&self) -> crate::Result<Vec<StreamStatusRecord>> {
        let rows = sqlx::query(
            "SELECT camera_id, state, last_error, last_update FROM stream_status ORDER BY camera_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| Self::record_from_row(row).map_err(Into::into))
            .collect()
    }

    /// Demote every `running`/`starting` row to `stopped`.
    ///
    /// Called at boot: the registry is empty after a restart, so nothing can
    /// actually be live no matter what the last shutdown left behind.
    pub async fn demote_live_states(&self) -> crate::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stream_status
            SET state = 'stopped', last_update = ?1
            WHERE state IN ('running', 'starting')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let demoted = result.rows_affected();
        if demoted > 0 {
            info!(demoted, "Demoted stale live stream statuses after restart");
        }
        Ok(demoted)
    }

    fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<StreamStatusRecord, sqlx::Error> {
        let camera_id: i64 = row.try_get("camera_id")?;
        let state: String = row.try_get("state")?;
        let last_error: Option<String> = row.try_get("last_error")?;
        let last_update: String = row.try_get("last_update")?;
        let last_update = DateTime::parse_from_rfc3339(&last_update)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
            .with_timezone(&Utc);

        Ok(StreamStatusRecord {
            camera_id: camera_id as CameraId,
            state: StreamState::parse(&state),
            last_error,
            last_update,
        })
    }
}
