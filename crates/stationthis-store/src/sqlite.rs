//! SQLite record store
//!
//! Uuids and JSON payloads are stored as TEXT; timestamps go through the
//! sqlx chrono codec. Run updates carry a `version` guard in the WHERE
//! clause and step terminalization a `status = 'pending'` guard, so a lost
//! race surfaces as zero affected rows rather than a silent overwrite.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use stationthis_core::error::{Error, Result};
use stationthis_core::model::{Run, StepResult};
use stationthis_core::store::{RecordStore, RunPatch, StepOutcome};
use tracing::{debug, instrument};
use uuid::Uuid;

/// SQLite-backed `RecordStore`
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Wrap an existing connection pool
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and ensure the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(store_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(store_err)?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Get a reference to the underlying connection pool
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the tables and indexes if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                definition_id TEXT NOT NULL,
                initiator_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                total_cost REAL NOT NULL,
                step_result_ids TEXT NOT NULL,
                initial_context TEXT NOT NULL,
                failure_reason TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                updated_at TEXT NOT NULL,
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS step_results (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                tool_id TEXT NOT NULL,
                delivery TEXT NOT NULL,
                external_ref TEXT,
                inputs TEXT NOT NULL,
                raw_response TEXT,
                output TEXT,
                status TEXT NOT NULL,
                cost REAL NOT NULL,
                duration_ms INTEGER,
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_step_results_run ON step_results (run_id)")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_step_results_external_ref
            ON step_results (external_ref) WHERE external_ref IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    fn row_to_run(row: SqliteRow) -> Result<Run> {
        Ok(Run {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            definition_id: row.get("definition_id"),
            initiator_id: row.get("initiator_id"),
            kind: row.get::<String, _>("kind").parse().map_err(Error::Store)?,
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(Error::Store)?,
            total_cost: row.get("total_cost"),
            step_result_ids: from_json(&row.get::<String, _>("step_result_ids"))?,
            initial_context: from_json(&row.get::<String, _>("initial_context"))?,
            failure_reason: row.get("failure_reason"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            updated_at: row.get("updated_at"),
            version: row.get("version"),
        })
    }

    fn row_to_step(row: SqliteRow) -> Result<StepResult> {
        let raw_response = match row.get::<Option<String>, _>("raw_response") {
            Some(raw) => Some(from_json(&raw)?),
            None => None,
        };
        let output = match row.get::<Option<String>, _>("output") {
            Some(raw) => Some(from_json(&raw)?),
            None => None,
        };

        Ok(StepResult {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            run_id: parse_uuid(&row.get::<String, _>("run_id"))?,
            step_index: row.get::<i64, _>("step_index") as u32,
            tool_id: row.get("tool_id"),
            delivery: row
                .get::<String, _>("delivery")
                .parse()
                .map_err(Error::Store)?,
            external_ref: row.get("external_ref"),
            inputs: from_json(&row.get::<String, _>("inputs"))?,
            raw_response,
            output,
            status: row
                .get::<String, _>("status")
                .parse()
                .map_err(Error::Store)?,
            cost: row.get("cost"),
            duration_ms: row.get("duration_ms"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO runs (
                id, definition_id, initiator_id, kind, status,
                total_cost, step_result_ids, initial_context, failure_reason,
                started_at, completed_at, updated_at, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(&run.definition_id)
        .bind(&run.initiator_id)
        .bind(run.kind.as_str())
        .bind(run.status.as_str())
        .bind(run.total_cost)
        .bind(to_json(&run.step_result_ids)?)
        .bind(to_json(&run.initial_context)?)
        .bind(&run.failure_reason)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.updated_at)
        .bind(run.version)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(run_id = %run.id, "created run record");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_run(&self, id: Uuid) -> Result<Run> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .ok_or(Error::RunNotFound(id))?;

        Self::row_to_run(row)
    }

    #[instrument(skip(self, patch))]
    async fn update_run(&self, id: Uuid, expected_version: i64, patch: RunPatch) -> Result<Run> {
        let mut run = self.get_run(id).await?;
        if run.status.is_terminal() {
            return Err(Error::RunTerminal {
                id,
                status: run.status,
            });
        }
        if run.version != expected_version {
            return Err(Error::VersionConflict(id));
        }

        patch.apply_to(&mut run);

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?, total_cost = ?, step_result_ids = ?,
                failure_reason = ?, completed_at = ?, updated_at = ?, version = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.total_cost)
        .bind(to_json(&run.step_result_ids)?)
        .bind(&run.failure_reason)
        .bind(run.completed_at)
        .bind(run.updated_at)
        .bind(run.version)
        .bind(id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        // A concurrent writer bumped the version between the read and here.
        if result.rows_affected() == 0 {
            return Err(Error::VersionConflict(id));
        }
        Ok(run)
    }

    #[instrument(skip(self, record), fields(step_id = %record.id, run_id = %record.run_id))]
    async fn create_step_result(&self, record: &StepResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO step_results (
                id, run_id, step_index, tool_id, delivery, external_ref,
                inputs, raw_response, output, status, cost, duration_ms,
                error, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.run_id.to_string())
        .bind(i64::from(record.step_index))
        .bind(&record.tool_id)
        .bind(record.delivery.as_str())
        .bind(&record.external_ref)
        .bind(to_json(&record.inputs)?)
        .bind(record.raw_response.as_ref().map(to_json).transpose()?)
        .bind(record.output.as_ref().map(to_json).transpose()?)
        .bind(record.status.as_str())
        .bind(record.cost)
        .bind(record.duration_ms)
        .bind(&record.error)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(step_id = %record.id, "created step result");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_step_result(&self, id: Uuid) -> Result<StepResult> {
        let row = sqlx::query("SELECT * FROM step_results WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .ok_or_else(|| Error::StepNotFound(id.to_string()))?;

        Self::row_to_step(row)
    }

    #[instrument(skip(self))]
    async fn find_step_by_external_ref(&self, external_ref: &str) -> Result<Option<StepResult>> {
        let row = sqlx::query("SELECT * FROM step_results WHERE external_ref = ?")
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.map(Self::row_to_step).transpose()
    }

    #[instrument(skip(self))]
    async fn attach_external_ref(&self, id: Uuid, external_ref: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE step_results SET external_ref = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(external_ref)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            // Missing record reports as StepNotFound from the fetch.
            let existing = self.get_step_result(id).await?;
            return Err(Error::StepAlreadyTerminal(existing.id));
        }
        Ok(())
    }

    #[instrument(skip(self, outcome))]
    async fn complete_step_result(&self, id: Uuid, outcome: StepOutcome) -> Result<StepResult> {
        let (raw_response, output, cost, duration_ms, error) = match &outcome {
            StepOutcome::Success {
                raw,
                output,
                cost,
                duration_ms,
            } => (
                Some(to_json(raw)?),
                Some(to_json(output)?),
                *cost,
                *duration_ms,
                None,
            ),
            StepOutcome::Failed { error, cost } => (None, None, *cost, None, Some(error.clone())),
        };

        let result = sqlx::query(
            r#"
            UPDATE step_results
            SET status = ?, raw_response = ?, output = ?, cost = ?,
                duration_ms = ?, error = ?, completed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(outcome.status().as_str())
        .bind(raw_response)
        .bind(output)
        .bind(cost)
        .bind(duration_ms)
        .bind(error)
        .bind(Utc::now())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            let existing = self.get_step_result(id).await?;
            return Err(Error::StepAlreadyTerminal(existing.id));
        }
        self.get_step_result(id).await
    }

    #[instrument(skip(self))]
    async fn list_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>> {
        let rows = sqlx::query("SELECT * FROM step_results WHERE run_id = ? ORDER BY rowid ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        rows.into_iter().map(Self::row_to_step).collect()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

fn store_err(e: impl std::fmt::Display) -> Error {
    Error::Store(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(store_err)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(store_err)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(store_err)
}
