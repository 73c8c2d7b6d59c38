//! `SQLite` schema definitions for erdispatch.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the hospitals table.
pub const CREATE_HOSPITALS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS hospitals (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    address TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    beds_available INTEGER NOT NULL,
    beds_total INTEGER NOT NULL,
    beds_updated_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the department offerings table.
pub const CREATE_HOSPITAL_DEPARTMENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS hospital_departments (
    hospital_id TEXT NOT NULL,
    department TEXT NOT NULL,
    PRIMARY KEY (hospital_id, department)
)
";

/// SQL statement to create an index on department for matching.
pub const CREATE_DEPARTMENT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_hospital_departments_department
ON hospital_departments(department)
";

/// SQL statement to create the admin link table.
pub const CREATE_HOSPITAL_ADMINS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS hospital_admins (
    user_id TEXT PRIMARY KEY,
    hospital_id TEXT NOT NULL
)
";

/// SQL statement to create the emergency calls table.
///
/// Patient details and recommended departments are stored as JSON text.
pub const CREATE_EMERGENCY_CALLS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS emergency_calls (
    id TEXT PRIMARY KEY,
    requester_id TEXT NOT NULL,
    patient_json TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    status TEXT NOT NULL,
    recommended_departments TEXT NOT NULL,
    accepted_hospital_id TEXT,
    accepted_hospital_name TEXT,
    broadcast_round INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    accepted_at TEXT,
    completed_at TEXT
)
";

/// SQL statement to create an index on status for pending/accepted views.
pub const CREATE_CALL_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_emergency_calls_status ON emergency_calls(status, created_at)
";

/// SQL statement to create the broadcast target table.
pub const CREATE_CALL_TARGETS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS call_targets (
    call_id TEXT NOT NULL,
    hospital_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (call_id, hospital_id)
)
";

/// SQL statement to create an index on targeted hospital for pending views.
pub const CREATE_TARGET_HOSPITAL_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_call_targets_hospital ON call_targets(hospital_id)
";

/// SQL statement to create the rejection table.
pub const CREATE_CALL_REJECTIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS call_rejections (
    call_id TEXT NOT NULL,
    hospital_id TEXT NOT NULL,
    rejected_at TEXT NOT NULL,
    PRIMARY KEY (call_id, hospital_id)
)
";

/// SQL statement to create the per-hospital archive of completed calls.
pub const CREATE_COMPLETED_CASES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS completed_cases (
    hospital_id TEXT NOT NULL,
    call_id TEXT NOT NULL,
    requester_id TEXT NOT NULL,
    record_json TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    PRIMARY KEY (hospital_id, call_id)
)
";

/// SQL statement to create an index on requester for history lookups.
pub const CREATE_COMPLETED_REQUESTER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_completed_cases_requester
ON completed_cases(requester_id, completed_at DESC)
";

/// SQL statement to create the re-broadcast lineage table.
///
/// One row per superseded call, pointing at the call that replaced it.
/// Rows outlive both calls so that a follower who only saw the old call
/// disappear can still find its replacement.
pub const CREATE_CALL_LINEAGE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS call_lineage (
    predecessor_id TEXT PRIMARY KEY,
    successor_id TEXT NOT NULL,
    superseded_at TEXT NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_HOSPITALS_TABLE,
    CREATE_HOSPITAL_DEPARTMENTS_TABLE,
    CREATE_DEPARTMENT_INDEX,
    CREATE_HOSPITAL_ADMINS_TABLE,
    CREATE_EMERGENCY_CALLS_TABLE,
    CREATE_CALL_STATUS_INDEX,
    CREATE_CALL_TARGETS_TABLE,
    CREATE_TARGET_HOSPITAL_INDEX,
    CREATE_CALL_REJECTIONS_TABLE,
    CREATE_COMPLETED_CASES_TABLE,
    CREATE_COMPLETED_REQUESTER_INDEX,
    CREATE_CALL_LINEAGE_TABLE,
    CREATE_METADATA_TABLE,
];
