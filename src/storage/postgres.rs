//! PostgreSQL job store.
//!
//! Persists jobs, plans and audit entries with sqlx. Jobs are written with a
//! plain insert and mutated through partial updates built from `JobUpdate`;
//! plans are upserted (one live plan per job); audit entries are append-only.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StorageError;
use crate::job::{AuditEntry, AuditPhase, Job, JobState, JobType, JobUpdate, Plan, PlanStep};

use super::migrations::MigrationRunner;
use super::{JobFilter, JobStore};
use async_trait::async_trait;

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Connects to the database and returns a new store.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }
}

/// Maps a jobs row into the domain type.
fn job_from_row(row: &PgRow) -> Result<Job, StorageError> {
    let job_type_raw: String = row.get("job_type");
    let state_raw: String = row.get("state");

    let job_type = JobType::from_str(&job_type_raw).map_err(|message| StorageError::Decode {
        column: "job_type".to_string(),
        message,
    })?;
    let state = JobState::from_str(&state_raw).map_err(|message| StorageError::Decode {
        column: "state".to_string(),
        message,
    })?;

    Ok(Job {
        id: row.get("id"),
        user_id: row.get("user_id"),
        job_type,
        state,
        payload: row.get("payload"),
        result: row.get("result"),
        error_code: row.get("error_code"),
        error_message: row.get("error_message"),
        error_detail: row.get("error_detail"),
        error_gateway_url: row.get("error_gateway_url"),
        failed_phase: row.get("failed_phase"),
        ai_provider: row.get("ai_provider"),
        ai_model: row.get("ai_model"),
        ai_key_source: row.get("ai_key_source"),
        ai_fallback_reason: row.get("ai_fallback_reason"),
        quality_score: row.get("quality_score"),
        requires_strict_validation: row.get("requires_strict_validation"),
        requires_approval: row.get("requires_approval"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, user_id, job_type, state, payload, result,
                error_code, error_message, error_detail, error_gateway_url, failed_phase,
                ai_provider, ai_model, ai_key_source, ai_fallback_reason,
                quality_score, requires_strict_validation, requires_approval,
                approved_by, approved_at, created_at, updated_at, started_at, finished_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14, $15,
                $16, $17, $18,
                $19, $20, $21, $22, $23, $24
            )
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(job.job_type.as_str())
        .bind(job.state.as_str())
        .bind(&job.payload)
        .bind(&job.result)
        .bind(&job.error_code)
        .bind(&job.error_message)
        .bind(&job.error_detail)
        .bind(&job.error_gateway_url)
        .bind(&job.failed_phase)
        .bind(&job.ai_provider)
        .bind(&job.ai_model)
        .bind(&job.ai_key_source)
        .bind(&job.ai_fallback_reason)
        .bind(job.quality_score)
        .bind(job.requires_strict_validation)
        .bind(job.requires_approval)
        .bind(&job.approved_by)
        .bind(job.approved_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StorageError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_job(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError> {
        let mut sets: Vec<String> = Vec::new();
        let mut param_idx = 1;

        // Build SET clauses dynamically, one per populated field
        let mut push_set = |column: &str| {
            sets.push(format!("{column} = ${param_idx}"));
            param_idx += 1;
        };

        if update.state.is_some() {
            push_set("state");
        }
        if update.result.is_some() {
            push_set("result");
        }
        if update.error_code.is_some() {
            push_set("error_code");
        }
        if update.error_message.is_some() {
            push_set("error_message");
        }
        if update.error_detail.is_some() {
            push_set("error_detail");
        }
        if update.error_gateway_url.is_some() {
            push_set("error_gateway_url");
        }
        if update.failed_phase.is_some() {
            push_set("failed_phase");
        }
        if update.ai_provider.is_some() {
            push_set("ai_provider");
        }
        if update.ai_model.is_some() {
            push_set("ai_model");
        }
        if update.ai_key_source.is_some() {
            push_set("ai_key_source");
        }
        if update.ai_fallback_reason.is_some() {
            push_set("ai_fallback_reason");
        }
        if update.quality_score.is_some() {
            push_set("quality_score");
        }
        if update.approved_by.is_some() {
            push_set("approved_by");
        }
        if update.approved_at.is_some() {
            push_set("approved_at");
        }
        if update.started_at.is_some() {
            push_set("started_at");
        }
        if update.finished_at.is_some() {
            push_set("finished_at");
        }

        sets.push("updated_at = NOW()".to_string());

        let query = format!(
            "UPDATE jobs SET {} WHERE id = ${param_idx}",
            sets.join(", ")
        );

        let mut sqlx_query = sqlx::query(&query);

        if let Some(state) = update.state {
            sqlx_query = sqlx_query.bind(state.as_str());
        }
        if let Some(ref result) = update.result {
            sqlx_query = sqlx_query.bind(result);
        }
        if let Some(ref code) = update.error_code {
            sqlx_query = sqlx_query.bind(code);
        }
        if let Some(ref message) = update.error_message {
            sqlx_query = sqlx_query.bind(message);
        }
        if let Some(ref detail) = update.error_detail {
            sqlx_query = sqlx_query.bind(detail);
        }
        if let Some(ref url) = update.error_gateway_url {
            sqlx_query = sqlx_query.bind(url);
        }
        if let Some(ref phase) = update.failed_phase {
            sqlx_query = sqlx_query.bind(phase);
        }
        if let Some(ref provider) = update.ai_provider {
            sqlx_query = sqlx_query.bind(provider);
        }
        if let Some(ref model) = update.ai_model {
            sqlx_query = sqlx_query.bind(model);
        }
        if let Some(ref source) = update.ai_key_source {
            sqlx_query = sqlx_query.bind(source);
        }
        if let Some(ref reason) = update.ai_fallback_reason {
            sqlx_query = sqlx_query.bind(reason);
        }
        if let Some(score) = update.quality_score {
            sqlx_query = sqlx_query.bind(score);
        }
        if let Some(ref approver) = update.approved_by {
            sqlx_query = sqlx_query.bind(approver);
        }
        if let Some(at) = update.approved_at {
            sqlx_query = sqlx_query.bind(at);
        }
        if let Some(at) = update.started_at {
            sqlx_query = sqlx_query.bind(at);
        }
        if let Some(at) = update.finished_at {
            sqlx_query = sqlx_query.bind(at);
        }

        let result = sqlx_query.bind(job_id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RowNotFound {
                entity: "job".to_string(),
                id: job_id,
            });
        }

        Ok(())
    }

    async fn upsert_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        let steps_json = serde_json::to_value(&plan.steps)?;

        sqlx::query(
            r#"
            INSERT INTO plans (job_id, steps, rationale, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (job_id) DO UPDATE SET
                steps = EXCLUDED.steps,
                rationale = EXCLUDED.rationale,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(plan.job_id)
        .bind(&steps_json)
        .bind(&plan.rationale)
        .bind(plan.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_plan(&self, job_id: Uuid) -> Result<Option<Plan>, StorageError> {
        let row = sqlx::query(
            "SELECT job_id, steps, rationale, created_at FROM plans WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let steps_json: serde_json::Value = row.get("steps");
        let steps: Vec<PlanStep> = serde_json::from_value(steps_json)?;

        Ok(Some(Plan {
            job_id: row.get("job_id"),
            steps,
            rationale: row.get("rationale"),
            created_at: row.get("created_at"),
        }))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO audit_entries (id, job_id, phase, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(entry.phase.as_str())
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit(&self, job_id: Uuid) -> Result<Vec<AuditEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, phase, payload, created_at
            FROM audit_entries
            WHERE job_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let phase_raw: String = row.get("phase");
            let phase =
                AuditPhase::from_str(&phase_raw).map_err(|message| StorageError::Decode {
                    column: "phase".to_string(),
                    message,
                })?;
            let created_at: DateTime<Utc> = row.get("created_at");

            entries.push(AuditEntry {
                id: row.get("id"),
                job_id: row.get("job_id"),
                phase,
                payload: row.get("payload"),
                created_at,
            });
        }

        Ok(entries)
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StorageError> {
        let mut query = String::from("SELECT * FROM jobs");

        let mut conditions = Vec::new();
        let mut param_idx = 1;

        // Build WHERE clause dynamically
        if filter.user_id.is_some() {
            conditions.push(format!("user_id = ${param_idx}"));
            param_idx += 1;
        }

        if filter.state.is_some() {
            conditions.push(format!("state = ${param_idx}"));
            param_idx += 1;
        }

        if filter.job_type.is_some() {
            conditions.push(format!("job_type = ${param_idx}"));
            param_idx += 1;
        }

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY created_at DESC");

        if filter.limit.is_some() {
            query.push_str(&format!(" LIMIT ${param_idx}"));
        }

        let mut sqlx_query = sqlx::query(&query);

        if let Some(user_id) = filter.user_id {
            sqlx_query = sqlx_query.bind(user_id);
        }

        if let Some(state) = filter.state {
            sqlx_query = sqlx_query.bind(state.as_str());
        }

        if let Some(job_type) = filter.job_type {
            sqlx_query = sqlx_query.bind(job_type.as_str());
        }

        if let Some(limit) = filter.limit {
            sqlx_query = sqlx_query.bind(limit);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(job_from_row(&row)?);
        }

        Ok(jobs)
    }
}
