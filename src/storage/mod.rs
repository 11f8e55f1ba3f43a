//! Job persistence.
//!
//! The `JobStore` trait is the single persistence seam the orchestrator
//! depends on. Two implementations exist:
//! - **postgres**: sqlx-backed store for real deployments
//! - **MemoryJobStore**: Mutex-guarded maps for tests and store-less runs
//!
//! The store is the source of truth for job state; in-memory state machine
//! caches are reconciled against it on every operation.

pub mod migrations;
pub mod postgres;
pub mod schema;

use crate::error::StorageError;
use crate::job::{AuditEntry, Job, JobState, JobType, JobUpdate, Plan};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

// Re-export main types for convenience
pub use migrations::{AppliedMigration, MigrationRunner};
pub use postgres::PgJobStore;

/// Persistence contract for jobs, plans and audit entries.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a newly submitted job.
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Fetches a job by id. Returns `None` when no such job exists.
    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StorageError>;

    /// Applies a partial update; fields left `None` are unchanged.
    async fn update_job(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError>;

    /// Writes the job's plan, replacing any previous one.
    async fn upsert_plan(&self, plan: &Plan) -> Result<(), StorageError>;

    /// Fetches the job's plan, if one was produced.
    async fn get_plan(&self, job_id: Uuid) -> Result<Option<Plan>, StorageError>;

    /// Appends one audit entry. Entries are never mutated or deleted.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError>;

    /// Lists a job's audit entries in recording order.
    async fn list_audit(&self, job_id: Uuid) -> Result<Vec<AuditEntry>, StorageError>;

    /// Lists jobs matching the filter, newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StorageError>;
}

/// Filter criteria for listing jobs.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    /// Filter by owner.
    pub user_id: Option<Uuid>,
    /// Filter by lifecycle state.
    pub state: Option<JobState>,
    /// Filter by job type.
    pub job_type: Option<JobType>,
    /// Maximum number of results.
    pub limit: Option<i64>,
}

impl JobFilter {
    /// Creates a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the owner filter.
    pub fn with_user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the state filter.
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the job type filter.
    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// In-memory job store.
///
/// Backs tests and runs without a configured database. Same contract as the
/// Postgres store, including `RowNotFound` on updates to missing jobs.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    plans: Mutex<HashMap<Uuid, Plan>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many jobs are stored.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("lock not poisoned").len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StorageError> {
        self.jobs
            .lock()
            .expect("lock not poisoned")
            .insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StorageError> {
        Ok(self
            .jobs
            .lock()
            .expect("lock not poisoned")
            .get(&job_id)
            .cloned())
    }

    async fn update_job(&self, job_id: Uuid, update: &JobUpdate) -> Result<(), StorageError> {
        let mut jobs = self.jobs.lock().expect("lock not poisoned");
        match jobs.get_mut(&job_id) {
            Some(job) => {
                update.apply_to(job);
                Ok(())
            }
            None => Err(StorageError::RowNotFound {
                entity: "job".to_string(),
                id: job_id,
            }),
        }
    }

    async fn upsert_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        self.plans
            .lock()
            .expect("lock not poisoned")
            .insert(plan.job_id, plan.clone());
        Ok(())
    }

    async fn get_plan(&self, job_id: Uuid) -> Result<Option<Plan>, StorageError> {
        Ok(self
            .plans
            .lock()
            .expect("lock not poisoned")
            .get(&job_id)
            .cloned())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StorageError> {
        self.audit
            .lock()
            .expect("lock not poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn list_audit(&self, job_id: Uuid) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(self
            .audit
            .lock()
            .expect("lock not poisoned")
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.lock().expect("lock not poisoned");

        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| filter.user_id.map_or(true, |id| job.user_id == id))
            .filter(|job| filter.state.map_or(true, |state| job.state == state))
            .filter(|job| filter.job_type.map_or(true, |kind| job.job_type == kind))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }

        Ok(matched)
    }
}
