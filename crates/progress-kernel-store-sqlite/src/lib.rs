use std::path::Path;

use anyhow::{anyhow, Context, Result};
use progress_kernel_core::UserProgress;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Well-known storage key for the single local progress record.
pub const PROGRESS_STORAGE_KEY: &str = "user-progress";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS progress_records (
  storage_key TEXT PRIMARY KEY,
  payload_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
";

/// Single-record JSON store for the progress ledger.
///
/// The whole [`UserProgress`] record is one row keyed by
/// [`PROGRESS_STORAGE_KEY`], written atomically on every save.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

impl SqliteStore {
    /// Open a SQLite-backed progress store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// Safe to call on every open.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version < 1 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to create progress_records table")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration v1")?;
        tx.commit().context("failed to commit migration v1")
    }

    /// Load the persisted progress record, if a usable one exists.
    ///
    /// A missing row and a payload that no longer deserializes both read as
    /// `None`; the corrupt case is logged and the stale row stays in place
    /// until the next save overwrites it.
    ///
    /// # Errors
    /// Returns an error when the underlying query fails.
    pub fn load_progress(&self) -> Result<Option<UserProgress>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload_json FROM progress_records WHERE storage_key = ?1",
                params![PROGRESS_STORAGE_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query progress record")?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<UserProgress>(&payload) {
            Ok(progress) => Ok(Some(progress)),
            Err(err) => {
                tracing::warn!("Stored progress record is unreadable, starting fresh: {}", err);
                Ok(None)
            }
        }
    }

    /// Persist the whole progress record as one JSON payload.
    ///
    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn save_progress(&mut self, progress: &UserProgress) -> Result<()> {
        let payload_json =
            serde_json::to_string(progress).context("failed to serialize progress record")?;
        let updated_at = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start save transaction")?;
        tx.execute(
            "INSERT INTO progress_records (storage_key, payload_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(storage_key) DO UPDATE SET
               payload_json = excluded.payload_json,
               updated_at = excluded.updated_at",
            params![PROGRESS_STORAGE_KEY, payload_json, updated_at],
        )
        .context("failed to upsert progress record")?;
        tx.commit().context("failed to commit progress record")
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format rfc3339 timestamp")
}
