//! Database schema constants.
//!
//! All SQL schema definitions for the PostgreSQL job store. The caps on the
//! error columns match the classifier's persistence limits.

/// SQL schema for creating the jobs table.
pub const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    job_type VARCHAR(50) NOT NULL,
    state VARCHAR(50) NOT NULL,
    payload JSONB NOT NULL,
    result JSONB,
    error_code VARCHAR(100),
    error_message VARCHAR(500),
    error_detail VARCHAR(1000),
    error_gateway_url VARCHAR(255),
    failed_phase VARCHAR(50),
    ai_provider VARCHAR(50),
    ai_model VARCHAR(255),
    ai_key_source VARCHAR(20),
    ai_fallback_reason VARCHAR(100),
    quality_score DOUBLE PRECISION,
    requires_strict_validation BOOLEAN NOT NULL DEFAULT FALSE,
    requires_approval BOOLEAN NOT NULL DEFAULT FALSE,
    approved_by VARCHAR(255),
    approved_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
)
"#;

/// SQL schema for creating the plans table. One live plan per job.
pub const CREATE_PLANS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    job_id UUID PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    steps JSONB NOT NULL,
    rationale TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the audit_entries table.
pub const CREATE_AUDIT_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS audit_entries (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    phase VARCHAR(20) NOT NULL,
    payload JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Index creation statements, one per query (prepared statements cannot
/// carry multiple commands).
pub const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_jobs_user_id ON jobs(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_entries_job_id ON audit_entries(job_id)",
];

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_JOBS_TABLE,
        CREATE_PLANS_TABLE,
        CREATE_AUDIT_ENTRIES_TABLE,
    ];
    statements.extend(CREATE_INDEXES);
    statements
}

/// Table names in the schema.
pub mod tables {
    /// Jobs table name.
    pub const JOBS: &str = "jobs";
    /// Plans table name.
    pub const PLANS: &str = "plans";
    /// Audit entries table name.
    pub const AUDIT_ENTRIES: &str = "audit_entries";
}
