//! Storage layer for erdispatch.
//!
//! This module provides `SQLite`-based persistent storage for hospitals,
//! emergency calls and the per-hospital archive of completed cases. Every
//! multi-step write runs inside a `BEGIN IMMEDIATE` transaction, which makes
//! the read-check-write sequences (accept, complete, re-broadcast) atomic
//! across threads and across processes sharing the database file.

pub mod migrations;
pub mod schema;
pub mod subscription;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Params, Row, Transaction,
    TransactionBehavior,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::department::Department;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::model::{
    new_id, Beds, CallStatus, CompletedCase, EmergencyCall, Hospital, NewCall, NewHospital,
    PatientInfo,
};

pub use subscription::{
    CallChange, CallQuery, ChangeKind, Subscription, SubscriptionHandle, SubscriptionSet,
};

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default interval at which subscriptions re-query the database.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest re-broadcast chain followed when resolving a replacement.
const MAX_LINEAGE_HOPS: usize = 8;

/// Capacity of the in-process commit notification channel.
const COMMIT_CHANNEL_CAPACITY: usize = 64;

const CALL_COLUMNS: &str = "id, requester_id, patient_json, latitude, longitude, status, \
     recommended_departments, accepted_hospital_id, accepted_hospital_name, broadcast_round, \
     revision, created_at, accepted_at, completed_at";

const HOSPITAL_COLUMNS: &str =
    "id, name, address, latitude, longitude, beds_available, beds_total, beds_updated_at";

/// Result of swapping out a pending call.
#[derive(Debug, Clone, PartialEq)]
pub enum Supersede {
    /// The pending call was deleted, and the replacement (if any) created.
    Replaced(Option<EmergencyCall>),
    /// A hospital accepted the call first; nothing was written.
    Accepted(EmergencyCall),
    /// The call no longer exists.
    Gone,
}

/// Storage engine for dispatch records.
///
/// Cloning a `Store` is cheap; clones share the connection and the commit
/// notification channel.
#[derive(Debug, Clone)]
pub struct Store {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Arc<Mutex<Connection>>,
    /// Signalled after every committed write.
    commits: broadcast::Sender<u64>,
    sequence: Arc<AtomicU64>,
    poll_interval: Duration,
}

impl Store {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self::from_connection(path, conn))
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self::from_connection(path, conn))
    }

    fn from_connection(path: PathBuf, conn: Connection) -> Self {
        let (commits, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);
        Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            commits,
            sequence: Arc::new(AtomicU64::new(0)),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval at which subscriptions created from this store
    /// re-query the database.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection lock poisoned"))
    }

    /// Announce a committed write to in-process subscribers.
    fn publish(&self) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers is fine
        let _ = self.commits.send(sequence);
    }

    // === Hospitals ===

    /// Register a hospital and link it to its administrator in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the admin already has a hospital,
    /// or an error if the database operation fails.
    pub fn register_hospital(&self, admin_user_id: &str, hospital: &NewHospital) -> Result<Hospital> {
        if hospital.name.trim().is_empty() {
            return Err(Error::invalid_input("병원 이름을 입력해주세요."));
        }
        if hospital.beds.available > hospital.beds.total {
            return Err(Error::invalid_input("병상 수를 올바르게 입력해주세요."));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT hospital_id FROM hospital_admins WHERE user_id = ?1",
                [admin_user_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::invalid_input("이미 병원이 등록된 계정입니다."));
        }

        let id = new_id();
        tx.execute(
            r"
            INSERT INTO hospitals
                (id, name, address, latitude, longitude, beds_available, beds_total, beds_updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                id,
                hospital.name,
                hospital.address,
                hospital.location.latitude,
                hospital.location.longitude,
                hospital.beds.available,
                hospital.beds.total,
                hospital.beds.last_updated.map(timestamp),
            ],
        )?;
        for department in &hospital.available_departments {
            tx.execute(
                "INSERT OR IGNORE INTO hospital_departments (hospital_id, department) VALUES (?1, ?2)",
                params![id, department.korean_name()],
            )?;
        }
        tx.execute(
            "INSERT INTO hospital_admins (user_id, hospital_id) VALUES (?1, ?2)",
            params![admin_user_id, id],
        )?;

        let registered = load_hospital(&tx, &id)?
            .ok_or_else(|| Error::internal("registered hospital vanished"))?;
        tx.commit()?;

        info!(hospital = %id, admin = admin_user_id, "Registered hospital {}", registered.name);
        Ok(registered)
    }

    /// Get a hospital by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_hospital(&self, hospital_id: &str) -> Result<Option<Hospital>> {
        let conn = self.lock()?;
        load_hospital(&conn, hospital_id)
    }

    /// Resolve the hospital an admin acts for.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn hospital_for_admin(&self, user_id: &str) -> Result<Option<Hospital>> {
        let conn = self.lock()?;
        let hospital_id: Option<String> = conn
            .query_row(
                "SELECT hospital_id FROM hospital_admins WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        match hospital_id {
            Some(id) => load_hospital(&conn, &id),
            None => Ok(None),
        }
    }

    /// List every hospital, by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_hospitals(&self) -> Result<Vec<Hospital>> {
        let conn = self.lock()?;
        load_hospitals(
            &conn,
            &format!("SELECT {HOSPITAL_COLUMNS} FROM hospitals ORDER BY name, id"),
            [],
        )
    }

    /// List hospitals offering at least one of `departments`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn hospitals_offering_any(&self, departments: &[Department]) -> Result<Vec<Hospital>> {
        if departments.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; departments.len()].join(", ");
        let sql = format!(
            r"
            SELECT {HOSPITAL_COLUMNS} FROM hospitals
            WHERE id IN (
                SELECT hospital_id FROM hospital_departments WHERE department IN ({placeholders})
            )
            ORDER BY name, id
            "
        );

        let conn = self.lock()?;
        load_hospitals(
            &conn,
            &sql,
            params_from_iter(departments.iter().map(|d| d.korean_name())),
        )
    }

    /// Replace a hospital's bed counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HospitalNotFound`] if the hospital doesn't exist.
    pub fn update_beds(&self, hospital_id: &str, beds: Beds) -> Result<Hospital> {
        if beds.available > beds.total {
            return Err(Error::invalid_input("병상 수를 올바르게 입력해주세요."));
        }

        let conn = self.lock()?;
        let affected = conn.execute(
            r"
            UPDATE hospitals SET beds_available = ?2, beds_total = ?3, beds_updated_at = ?4
            WHERE id = ?1
            ",
            params![
                hospital_id,
                beds.available,
                beds.total,
                timestamp(beds.last_updated.unwrap_or_else(Utc::now)),
            ],
        )?;
        if affected == 0 {
            return Err(Error::HospitalNotFound(hospital_id.to_string()));
        }

        debug!(hospital = hospital_id, available = beds.available, total = beds.total, "Updated beds");
        load_hospital(&conn, hospital_id)?
            .ok_or_else(|| Error::HospitalNotFound(hospital_id.to_string()))
    }

    /// Add a department to a hospital's offering.
    ///
    /// Returns `false` if the hospital already offered it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HospitalNotFound`] if the hospital doesn't exist.
    pub fn add_department(&self, hospital_id: &str, department: Department) -> Result<bool> {
        let conn = self.lock()?;
        ensure_hospital(&conn, hospital_id)?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO hospital_departments (hospital_id, department) VALUES (?1, ?2)",
            params![hospital_id, department.korean_name()],
        )?;
        Ok(affected > 0)
    }

    /// Remove a department from a hospital's offering.
    ///
    /// Returns `false` if the hospital didn't offer it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HospitalNotFound`] if the hospital doesn't exist.
    pub fn remove_department(&self, hospital_id: &str, department: Department) -> Result<bool> {
        let conn = self.lock()?;
        ensure_hospital(&conn, hospital_id)?;
        let affected = conn.execute(
            "DELETE FROM hospital_departments WHERE hospital_id = ?1 AND department = ?2",
            params![hospital_id, department.korean_name()],
        )?;
        Ok(affected > 0)
    }

    // === Calls ===

    /// Create a pending call broadcast to `call.targeted_hospital_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the target list is empty, or an
    /// error if the database operation fails.
    pub fn create_call(&self, call: &NewCall) -> Result<EmergencyCall> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let created = insert_call(&tx, call)?;
        tx.commit()?;
        self.publish();

        info!(
            call = %created.id,
            round = created.broadcast_round,
            targets = created.targeted_hospital_ids.len(),
            "Created emergency call"
        );
        Ok(created)
    }

    /// Get a call by its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the row is malformed.
    pub fn get_call(&self, call_id: &str) -> Result<Option<EmergencyCall>> {
        let conn = self.lock()?;
        load_call(&conn, call_id)
    }

    /// Accept a call on behalf of a hospital.
    ///
    /// Reads the call and writes the acceptance in one immediate transaction,
    /// so of any number of concurrent attempts at most one succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call doesn't exist
    /// - [`Error::AlreadyHandled`] if the call is no longer pending
    /// - [`Error::PermissionDenied`] if the hospital was not a broadcast target
    pub fn accept_call(&self, call_id: &str, hospital_id: &str) -> Result<EmergencyCall> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let call = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        if call.status != CallStatus::Pending {
            return Err(Error::AlreadyHandled {
                call_id: call_id.to_string(),
            });
        }
        if !call.targets(hospital_id) {
            return Err(Error::permission_denied(format!(
                "hospital {hospital_id} was not asked to take call {call_id}"
            )));
        }

        let hospital_name: String = tx
            .query_row(
                "SELECT name FROM hospitals WHERE id = ?1",
                [hospital_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::HospitalNotFound(hospital_id.to_string()))?;

        tx.execute(
            r"
            UPDATE emergency_calls
            SET status = ?2, accepted_hospital_id = ?3, accepted_hospital_name = ?4,
                accepted_at = ?5, revision = revision + 1
            WHERE id = ?1 AND status = ?6
            ",
            params![
                call_id,
                CallStatus::Accepted.as_str(),
                hospital_id,
                hospital_name,
                timestamp(Utc::now()),
                CallStatus::Pending.as_str(),
            ],
        )?;

        let accepted = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        tx.commit()?;
        self.publish();

        info!(call = call_id, hospital = hospital_id, "Call accepted");
        Ok(accepted)
    }

    /// Record that a hospital declines a call.
    ///
    /// Set-union semantics: rejecting twice leaves the hospital in
    /// `rejected_by` once. The call's status is unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call doesn't exist
    /// - [`Error::PermissionDenied`] if the hospital was not a broadcast target
    pub fn reject_call(&self, call_id: &str, hospital_id: &str) -> Result<EmergencyCall> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let call = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        if !call.targets(hospital_id) {
            return Err(Error::permission_denied(format!(
                "hospital {hospital_id} was not asked to take call {call_id}"
            )));
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO call_rejections (call_id, hospital_id, rejected_at) VALUES (?1, ?2, ?3)",
            params![call_id, hospital_id, timestamp(Utc::now())],
        )?;
        if inserted > 0 {
            tx.execute(
                "UPDATE emergency_calls SET revision = revision + 1 WHERE id = ?1",
                [call_id],
            )?;
        }

        let call = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        tx.commit()?;
        if inserted > 0 {
            self.publish();
            debug!(call = call_id, hospital = hospital_id, "Call rejected");
        }
        Ok(call)
    }

    /// Complete an accepted call: archive a completed copy under the
    /// accepting hospital and delete the live call in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call doesn't exist
    /// - [`Error::PermissionDenied`] if the call is not accepted by `hospital_id`;
    ///   nothing is written in that case
    pub fn complete_call(&self, call_id: &str, hospital_id: &str) -> Result<CompletedCase> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let call = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        if call.status != CallStatus::Accepted
            || call.accepted_hospital_id.as_deref() != Some(hospital_id)
        {
            return Err(Error::permission_denied(format!(
                "call {call_id} is not accepted by hospital {hospital_id}"
            )));
        }

        let now = Utc::now();
        let mut archived = call;
        archived.status = CallStatus::Completed;
        archived.completed_at = Some(now);
        archived.revision += 1;

        tx.execute(
            r"
            INSERT INTO completed_cases (hospital_id, call_id, requester_id, record_json, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                hospital_id,
                call_id,
                archived.requester_id,
                serde_json::to_string(&archived)?,
                timestamp(now),
            ],
        )?;
        delete_call_rows(&tx, call_id)?;
        tx.commit()?;
        self.publish();

        info!(call = call_id, hospital = hospital_id, "Call completed and archived");
        Ok(CompletedCase {
            hospital_id: hospital_id.to_string(),
            call: archived,
        })
    }

    /// Delete a pending call and, optionally, create its replacement, in one
    /// transaction that only proceeds while the call is still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn supersede_call(&self, call_id: &str, replacement: Option<&NewCall>) -> Result<Supersede> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(call) = load_call(&tx, call_id)? else {
            return Ok(Supersede::Gone);
        };
        if call.status != CallStatus::Pending {
            return Ok(Supersede::Accepted(call));
        }

        delete_call_rows(&tx, call_id)?;
        let created = replacement.map(|new| insert_call(&tx, new)).transpose()?;
        if let Some(new) = &created {
            tx.execute(
                "INSERT OR REPLACE INTO call_lineage (predecessor_id, successor_id, superseded_at) VALUES (?1, ?2, ?3)",
                params![call_id, new.id, timestamp(Utc::now())],
            )?;
        }
        tx.commit()?;
        self.publish();

        match &created {
            Some(new) => info!(old = call_id, new = %new.id, round = new.broadcast_round, "Call re-broadcast"),
            None => info!(call = call_id, "Call withdrawn"),
        }
        Ok(Supersede::Replaced(created))
    }

    /// The live call that replaced `call_id` in a re-broadcast, following the
    /// lineage to its newest link.
    ///
    /// Returns `None` if `call_id` was never superseded by a replacement, or
    /// if the newest replacement no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn replacement_for(&self, call_id: &str) -> Result<Option<EmergencyCall>> {
        let conn = self.lock()?;
        let mut newest: Option<String> = None;
        for _ in 0..MAX_LINEAGE_HOPS {
            let from = newest.as_deref().unwrap_or(call_id);
            let next: Option<String> = conn
                .query_row(
                    "SELECT successor_id FROM call_lineage WHERE predecessor_id = ?1",
                    [from],
                    |row| row.get(0),
                )
                .optional()?;
            match next {
                Some(id) => newest = Some(id),
                None => break,
            }
        }
        newest.map_or(Ok(None), |id| load_call(&conn, &id))
    }

    /// Cancel a pending call on behalf of its requester.
    ///
    /// # Errors
    ///
    /// - [`Error::CallNotFound`] if the call doesn't exist
    /// - [`Error::PermissionDenied`] if `requester_id` did not raise the call
    /// - [`Error::AlreadyHandled`] if a hospital has accepted it
    pub fn cancel_call(&self, call_id: &str, requester_id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let call = load_call(&tx, call_id)?.ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        if call.requester_id != requester_id {
            return Err(Error::permission_denied(format!(
                "call {call_id} belongs to another requester"
            )));
        }
        if call.status != CallStatus::Pending {
            return Err(Error::AlreadyHandled {
                call_id: call_id.to_string(),
            });
        }

        delete_call_rows(&tx, call_id)?;
        tx.commit()?;
        self.publish();

        info!(call = call_id, "Call cancelled by requester");
        Ok(())
    }

    /// Pending calls broadcast to a hospital that it has not declined,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn pending_calls_for(&self, hospital_id: &str) -> Result<Vec<EmergencyCall>> {
        let conn = self.lock()?;
        load_calls(
            &conn,
            &format!(
                r"
                SELECT {CALL_COLUMNS} FROM emergency_calls c
                WHERE c.status = 'pending'
                  AND EXISTS (SELECT 1 FROM call_targets t WHERE t.call_id = c.id AND t.hospital_id = ?1)
                  AND NOT EXISTS (SELECT 1 FROM call_rejections r WHERE r.call_id = c.id AND r.hospital_id = ?1)
                ORDER BY c.created_at DESC
                "
            ),
            [hospital_id],
        )
    }

    /// Calls a hospital has accepted and not yet completed, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn accepted_calls_for(&self, hospital_id: &str) -> Result<Vec<EmergencyCall>> {
        let conn = self.lock()?;
        load_calls(
            &conn,
            &format!(
                r"
                SELECT {CALL_COLUMNS} FROM emergency_calls
                WHERE status = 'accepted' AND accepted_hospital_id = ?1
                ORDER BY accepted_at DESC
                "
            ),
            [hospital_id],
        )
    }

    /// First-round pending calls created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stale_pending_calls(&self, cutoff: DateTime<Utc>) -> Result<Vec<EmergencyCall>> {
        let conn = self.lock()?;
        load_calls(
            &conn,
            &format!(
                r"
                SELECT {CALL_COLUMNS} FROM emergency_calls
                WHERE status = 'pending' AND broadcast_round = 0 AND created_at < ?1
                ORDER BY created_at
                "
            ),
            [timestamp(cutoff)],
        )
    }

    /// Run a subscription query once.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn query_calls(&self, query: &CallQuery) -> Result<Vec<EmergencyCall>> {
        match query {
            CallQuery::Call(id) => Ok(self.get_call(id)?.into_iter().collect()),
            CallQuery::PendingFor(hospital_id) => self.pending_calls_for(hospital_id),
            CallQuery::AcceptedBy(hospital_id) => self.accepted_calls_for(hospital_id),
        }
    }

    /// Follow the result set of `query`.
    ///
    /// The current matches are delivered first, as additions.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial query fails.
    pub fn subscribe(&self, query: CallQuery) -> Result<Subscription> {
        // Subscribe before the initial query so no commit falls in between
        let commits = self.commits.subscribe();
        let initial = self.query_calls(&query)?;
        debug!(query = %query, initial = initial.len(), "Subscription opened");
        Ok(Subscription::new(
            self.clone(),
            query,
            commits,
            self.poll_interval,
            initial,
        ))
    }

    // === Archive ===

    /// Completed cases raised by a requester, across every hospital's
    /// archive, newest completion first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a record is malformed.
    pub fn completed_cases_for_requester(&self, requester_id: &str) -> Result<Vec<CompletedCase>> {
        let conn = self.lock()?;
        load_completed(
            &conn,
            r"
            SELECT hospital_id, call_id, record_json FROM completed_cases
            WHERE requester_id = ?1 ORDER BY completed_at DESC
            ",
            [requester_id],
        )
    }

    /// A hospital's archive, newest completion first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a record is malformed.
    pub fn completed_cases_for_hospital(&self, hospital_id: &str) -> Result<Vec<CompletedCase>> {
        let conn = self.lock()?;
        load_completed(
            &conn,
            r"
            SELECT hospital_id, call_id, record_json FROM completed_cases
            WHERE hospital_id = ?1 ORDER BY completed_at DESC
            ",
            [hospital_id],
        )
    }
}

/// Render a timestamp the way it is stored: fixed-width RFC 3339 in UTC, so
/// that string order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(entity: &'static str, id: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::decode(entity, id, format!("bad timestamp {value:?}: {e}")))
}

fn parse_optional_timestamp(
    entity: &'static str,
    id: &str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(entity, id, v)).transpose()
}

fn ensure_hospital(conn: &Connection, hospital_id: &str) -> Result<()> {
    let exists: Option<i32> = conn
        .query_row("SELECT 1 FROM hospitals WHERE id = ?1", [hospital_id], |row| {
            row.get(0)
        })
        .optional()?;
    exists
        .map(|_| ())
        .ok_or_else(|| Error::HospitalNotFound(hospital_id.to_string()))
}

fn id_list(conn: &Connection, sql: &str, key: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

// === Hospital rows ===

struct HospitalRow {
    id: String,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    beds_available: u32,
    beds_total: u32,
    beds_updated_at: Option<String>,
}

impl HospitalRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            beds_available: row.get(5)?,
            beds_total: row.get(6)?,
            beds_updated_at: row.get(7)?,
        })
    }

    fn into_hospital(self, departments: Vec<String>) -> Result<Hospital> {
        const ENTITY: &str = "hospital";

        let location = GeoPoint::new(self.latitude, self.longitude)
            .map_err(|e| Error::decode(ENTITY, &self.id, e.to_string()))?;
        if self.beds_available > self.beds_total {
            return Err(Error::decode(
                ENTITY,
                &self.id,
                format!(
                    "available beds {} exceed total {}",
                    self.beds_available, self.beds_total
                ),
            ));
        }
        let last_updated = parse_optional_timestamp(ENTITY, &self.id, self.beds_updated_at.as_deref())?;

        let mut available_departments = departments
            .iter()
            .map(|d| {
                d.parse::<Department>()
                    .map_err(|_| Error::decode(ENTITY, &self.id, format!("unknown department {d:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        available_departments.sort_unstable();

        Ok(Hospital {
            id: self.id,
            name: self.name,
            address: self.address,
            location,
            beds: Beds {
                available: self.beds_available,
                total: self.beds_total,
                last_updated,
            },
            available_departments,
        })
    }
}

fn finish_hospital(conn: &Connection, row: HospitalRow) -> Result<Hospital> {
    let departments = id_list(
        conn,
        "SELECT department FROM hospital_departments WHERE hospital_id = ?1",
        &row.id,
    )?;
    row.into_hospital(departments)
}

fn load_hospital(conn: &Connection, hospital_id: &str) -> Result<Option<Hospital>> {
    let row = conn
        .query_row(
            &format!("SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE id = ?1"),
            [hospital_id],
            HospitalRow::from_row,
        )
        .optional()?;
    row.map(|r| finish_hospital(conn, r)).transpose()
}

fn load_hospitals(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<Hospital>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, HospitalRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| finish_hospital(conn, r)).collect()
}

// === Call rows ===

struct CallRow {
    id: String,
    requester_id: String,
    patient_json: String,
    latitude: f64,
    longitude: f64,
    status: String,
    departments_json: String,
    accepted_hospital_id: Option<String>,
    accepted_hospital_name: Option<String>,
    broadcast_round: i64,
    revision: i64,
    created_at: String,
    accepted_at: Option<String>,
    completed_at: Option<String>,
}

impl CallRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            requester_id: row.get(1)?,
            patient_json: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            status: row.get(5)?,
            departments_json: row.get(6)?,
            accepted_hospital_id: row.get(7)?,
            accepted_hospital_name: row.get(8)?,
            broadcast_round: row.get(9)?,
            revision: row.get(10)?,
            created_at: row.get(11)?,
            accepted_at: row.get(12)?,
            completed_at: row.get(13)?,
        })
    }

    fn into_call(self, targeted_hospital_ids: Vec<String>, rejected_by: Vec<String>) -> Result<EmergencyCall> {
        const ENTITY: &str = "call";
        let id = self.id;
        let bad = |message: String| Error::decode(ENTITY, &id, message);

        let status: CallStatus = self
            .status
            .parse()
            .map_err(|_| bad(format!("unknown status {:?}", self.status)))?;
        let patient_info: PatientInfo = serde_json::from_str(&self.patient_json)
            .map_err(|e| bad(format!("malformed patient info: {e}")))?;
        let recommended_departments: Vec<Department> = serde_json::from_str(&self.departments_json)
            .map_err(|e| bad(format!("malformed departments: {e}")))?;
        let location = GeoPoint::new(self.latitude, self.longitude).map_err(|e| bad(e.to_string()))?;
        let broadcast_round = u32::try_from(self.broadcast_round)
            .map_err(|_| bad(format!("bad broadcast round {}", self.broadcast_round)))?;
        let revision = u64::try_from(self.revision)
            .map_err(|_| bad(format!("bad revision {}", self.revision)))?;
        if status == CallStatus::Accepted && self.accepted_hospital_id.is_none() {
            return Err(bad("accepted call without accepting hospital".to_string()));
        }

        let created_at = parse_timestamp(ENTITY, &id, &self.created_at)?;
        let accepted_at = parse_optional_timestamp(ENTITY, &id, self.accepted_at.as_deref())?;
        let completed_at = parse_optional_timestamp(ENTITY, &id, self.completed_at.as_deref())?;

        Ok(EmergencyCall {
            id,
            requester_id: self.requester_id,
            patient_info,
            location,
            status,
            targeted_hospital_ids,
            recommended_departments,
            accepted_hospital_id: self.accepted_hospital_id,
            accepted_hospital_name: self.accepted_hospital_name,
            rejected_by,
            broadcast_round,
            revision,
            created_at,
            accepted_at,
            completed_at,
        })
    }
}

fn finish_call(conn: &Connection, row: CallRow) -> Result<EmergencyCall> {
    let targets = id_list(
        conn,
        "SELECT hospital_id FROM call_targets WHERE call_id = ?1 ORDER BY position",
        &row.id,
    )?;
    let rejected_by = id_list(
        conn,
        "SELECT hospital_id FROM call_rejections WHERE call_id = ?1 ORDER BY rowid",
        &row.id,
    )?;
    row.into_call(targets, rejected_by)
}

fn load_call(conn: &Connection, call_id: &str) -> Result<Option<EmergencyCall>> {
    let row = conn
        .query_row(
            &format!("SELECT {CALL_COLUMNS} FROM emergency_calls WHERE id = ?1"),
            [call_id],
            CallRow::from_row,
        )
        .optional()?;
    row.map(|r| finish_call(conn, r)).transpose()
}

fn load_calls(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<EmergencyCall>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, CallRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(|r| finish_call(conn, r)).collect()
}

fn insert_call(tx: &Transaction<'_>, call: &NewCall) -> Result<EmergencyCall> {
    if call.targeted_hospital_ids.is_empty() {
        return Err(Error::invalid_input("call must target at least one hospital"));
    }

    let id = new_id();
    tx.execute(
        r"
        INSERT INTO emergency_calls
            (id, requester_id, patient_json, latitude, longitude, status,
             recommended_departments, broadcast_round, revision, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)
        ",
        params![
            id,
            call.requester_id,
            serde_json::to_string(&call.patient_info)?,
            call.location.latitude,
            call.location.longitude,
            CallStatus::Pending.as_str(),
            serde_json::to_string(&call.recommended_departments)?,
            call.broadcast_round,
            timestamp(Utc::now()),
        ],
    )?;

    for (position, hospital_id) in (0_i64..).zip(&call.targeted_hospital_ids) {
        tx.execute(
            "INSERT OR IGNORE INTO call_targets (call_id, hospital_id, position) VALUES (?1, ?2, ?3)",
            params![id, hospital_id, position],
        )?;
    }
    let now = timestamp(Utc::now());
    for hospital_id in &call.rejected_by {
        tx.execute(
            "INSERT OR IGNORE INTO call_rejections (call_id, hospital_id, rejected_at) VALUES (?1, ?2, ?3)",
            params![id, hospital_id, now],
        )?;
    }

    load_call(tx, &id)?.ok_or_else(|| Error::internal("inserted call vanished"))
}

fn delete_call_rows(tx: &Transaction<'_>, call_id: &str) -> Result<()> {
    tx.execute("DELETE FROM call_targets WHERE call_id = ?1", [call_id])?;
    tx.execute("DELETE FROM call_rejections WHERE call_id = ?1", [call_id])?;
    tx.execute("DELETE FROM emergency_calls WHERE id = ?1", [call_id])?;
    Ok(())
}

// === Archive rows ===

fn load_completed(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<CompletedCase>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(hospital_id, call_id, record_json)| {
            let call: EmergencyCall = serde_json::from_str(&record_json)
                .map_err(|e| Error::decode("completed case", &call_id, e.to_string()))?;
            if call.status != CallStatus::Completed {
                return Err(Error::decode(
                    "completed case",
                    &call_id,
                    format!("archived with status {}", call.status),
                ));
            }
            Ok(CompletedCase { hospital_id, call })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::testutil::{self, Fixture};

    #[test]
    fn test_register_and_resolve_admin() {
        let fx = Fixture::new();
        let hospital = fx.store.hospital_for_admin("admin-near").unwrap().unwrap();

        assert_eq!(hospital.id, fx.near);
        assert_eq!(hospital.available_departments, vec![Department::InternalMedicine]);
        assert!(fx.store.hospital_for_admin("nobody").unwrap().is_none());
    }

    #[test]
    fn test_register_twice_for_same_admin_fails() {
        let fx = Fixture::new();
        let again = NewHospital::new("다른 병원", "서울", testutil::origin());

        let err = fx.store.register_hospital("admin-near", &again).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_register_defaults() {
        let store = Store::open_in_memory().unwrap();
        let hospital = store
            .register_hospital("admin", &NewHospital::new("새 병원", "서울 중구", testutil::origin()))
            .unwrap();

        assert_eq!(hospital.beds.total, 20);
        assert_eq!(hospital.beds.available, 5);
        assert!(hospital.available_departments.is_empty());
    }

    #[test]
    fn test_hospitals_offering_any() {
        let fx = Fixture::new();

        let internal = fx
            .store
            .hospitals_offering_any(&[Department::InternalMedicine])
            .unwrap();
        let ids: Vec<_> = internal.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&fx.near.as_str()));
        assert!(ids.contains(&fx.far.as_str()));
        assert!(!ids.contains(&fx.mid.as_str()));

        let both = fx
            .store
            .hospitals_offering_any(&[Department::InternalMedicine, Department::ThoracicSurgery])
            .unwrap();
        assert!(both.iter().any(|h| h.id == fx.mid));

        assert!(fx.store.hospitals_offering_any(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_update_beds() {
        let fx = Fixture::new();
        let updated = fx.store.update_beds(&fx.near, Beds::new(30, 12).unwrap()).unwrap();
        assert_eq!(updated.beds.total, 30);
        assert_eq!(updated.beds.available, 12);
        assert!(updated.beds.last_updated.is_some());

        let err = fx.store.update_beds("missing", Beds::new(1, 1).unwrap()).unwrap_err();
        assert!(matches!(err, Error::HospitalNotFound(_)));
    }

    #[test]
    fn test_department_set_semantics() {
        let fx = Fixture::new();

        assert!(fx.store.add_department(&fx.near, Department::Pediatrics).unwrap());
        assert!(!fx.store.add_department(&fx.near, Department::Pediatrics).unwrap());
        assert!(fx.store.remove_department(&fx.near, Department::Pediatrics).unwrap());
        assert!(!fx.store.remove_department(&fx.near, Department::Pediatrics).unwrap());

        assert!(fx.store.add_department("missing", Department::Pediatrics).is_err());
    }

    #[test]
    fn test_create_and_get_call() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near, &fx.far]);

        let loaded = fx.store.get_call(&call.id).unwrap().unwrap();
        assert_eq!(loaded, call);
        assert_eq!(loaded.status, CallStatus::Pending);
        assert_eq!(loaded.targeted_hospital_ids, vec![fx.near.clone(), fx.far.clone()]);
        assert_eq!(loaded.revision, 0);
        assert!(fx.store.get_call("missing").unwrap().is_none());
    }

    #[test]
    fn test_create_call_without_targets_fails() {
        let fx = Fixture::new();
        let no_targets: [&str; 0] = [];
        let err = fx.store.create_call(&fx.new_call(&no_targets)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_accept_call() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near, &fx.far]);

        let accepted = fx.store.accept_call(&call.id, &fx.near).unwrap();
        assert_eq!(accepted.status, CallStatus::Accepted);
        assert_eq!(accepted.accepted_hospital_id.as_deref(), Some(fx.near.as_str()));
        assert_eq!(accepted.accepted_hospital_name.as_deref(), Some("가까운병원"));
        assert!(accepted.accepted_at.is_some());
        assert_eq!(accepted.revision, 1);

        let err = fx.store.accept_call(&call.id, &fx.far).unwrap_err();
        assert!(err.is_already_handled());
    }

    #[test]
    fn test_accept_by_untargeted_hospital_is_denied() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let err = fx.store.accept_call(&call.id, &fx.far).unwrap_err();
        assert!(err.is_permission_error());
        assert_eq!(fx.store.get_call(&call.id).unwrap().unwrap().status, CallStatus::Pending);
    }

    #[test]
    fn test_accept_missing_call() {
        let fx = Fixture::new();
        let err = fx.store.accept_call("missing", &fx.near).unwrap_err();
        assert!(matches!(err, Error::CallNotFound(_)));
    }

    #[test]
    fn test_concurrent_accepts_have_one_winner() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near, &fx.far]);

        let attempts: Vec<_> = [fx.near.clone(), fx.far.clone()]
            .into_iter()
            .map(|hospital| {
                let store = fx.store.clone();
                let call_id = call.id.clone();
                thread::spawn(move || store.accept_call(&call_id, &hospital))
            })
            .collect();
        let results: Vec<_> = attempts.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| r.as_ref().is_err_and(Error::is_already_handled))
                .count(),
            1
        );
    }

    #[test]
    fn test_concurrent_accepts_across_connections() {
        let path = testutil::temp_db_path("race");
        let fx = Fixture::open(&path);
        let call = fx.pending_call(&[&fx.near, &fx.mid, &fx.far]);

        let attempts: Vec<_> = [fx.near.clone(), fx.mid.clone(), fx.far.clone()]
            .into_iter()
            .map(|hospital| {
                let path = path.clone();
                let call_id = call.id.clone();
                thread::spawn(move || {
                    let store = Store::open(&path).unwrap();
                    store.accept_call(&call_id, &hospital)
                })
            })
            .collect();
        let results: Vec<_> = attempts.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(Error::is_already_handled));

        let stored = fx.store.get_call(&call.id).unwrap().unwrap();
        assert_eq!(stored.accepted_hospital_id, winners[0].accepted_hospital_id);

        drop(fx);
        testutil::remove_db(&path);
    }

    #[test]
    fn test_reject_is_idempotent() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near, &fx.far]);

        let once = fx.store.reject_call(&call.id, &fx.near).unwrap();
        let twice = fx.store.reject_call(&call.id, &fx.near).unwrap();

        assert_eq!(twice.rejected_by, vec![fx.near.clone()]);
        assert_eq!(twice.status, CallStatus::Pending);
        assert_eq!(once.revision, twice.revision);
        assert!(fx.store.pending_calls_for(&fx.near).unwrap().is_empty());
        assert_eq!(fx.store.pending_calls_for(&fx.far).unwrap().len(), 1);
    }

    #[test]
    fn test_reject_by_untargeted_hospital_is_denied() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let err = fx.store.reject_call(&call.id, &fx.far).unwrap_err();
        assert!(err.is_permission_error());
        let err = fx.store.reject_call(&call.id, "no-such-hospital").unwrap_err();
        assert!(err.is_permission_error());

        let stored = fx.store.get_call(&call.id).unwrap().unwrap();
        assert!(stored.rejected_by.is_empty());
        assert_eq!(stored.revision, call.revision);
    }

    #[test]
    fn test_reject_missing_call() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.store.reject_call("missing", &fx.near).unwrap_err(),
            Error::CallNotFound(_)
        ));
    }

    #[test]
    fn test_complete_archives_and_deletes() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        fx.store.accept_call(&call.id, &fx.near).unwrap();

        let case = fx.store.complete_call(&call.id, &fx.near).unwrap();
        assert_eq!(case.hospital_id, fx.near);
        assert_eq!(case.call.status, CallStatus::Completed);
        assert!(case.call.completed_at.is_some());
        assert_eq!(case.hospital_name(), "가까운병원");

        assert!(fx.store.get_call(&call.id).unwrap().is_none());
        let archive = fx.store.completed_cases_for_hospital(&fx.near).unwrap();
        assert_eq!(archive, vec![case.clone()]);
        let history = fx
            .store
            .completed_cases_for_requester(testutil::REQUESTER)
            .unwrap();
        assert_eq!(history, vec![case]);
    }

    #[test]
    fn test_complete_by_other_hospital_writes_nothing() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near, &fx.far]);
        fx.store.accept_call(&call.id, &fx.near).unwrap();

        let err = fx.store.complete_call(&call.id, &fx.far).unwrap_err();
        assert!(err.is_permission_error());

        assert!(fx.store.get_call(&call.id).unwrap().is_some());
        assert!(fx.store.completed_cases_for_hospital(&fx.far).unwrap().is_empty());
        assert!(fx.store.completed_cases_for_hospital(&fx.near).unwrap().is_empty());
    }

    #[test]
    fn test_complete_pending_call_is_denied() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let err = fx.store.complete_call(&call.id, &fx.near).unwrap_err();
        assert!(err.is_permission_error());
    }

    #[test]
    fn test_supersede_pending_call() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let mut replacement = fx.new_call(&[&fx.far]);
        replacement.broadcast_round = 1;
        replacement.rejected_by = vec![fx.near.clone()];

        let Supersede::Replaced(Some(new)) =
            fx.store.supersede_call(&call.id, Some(&replacement)).unwrap()
        else {
            panic!("expected a replacement");
        };
        assert_eq!(new.broadcast_round, 1);
        assert_eq!(new.rejected_by, vec![fx.near.clone()]);
        assert!(fx.store.get_call(&call.id).unwrap().is_none());
    }

    #[test]
    fn test_replacement_for_follows_lineage() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        assert!(fx.store.replacement_for(&call.id).unwrap().is_none());

        let mut replacement = fx.new_call(&[&fx.near, &fx.mid]);
        replacement.broadcast_round = 1;
        let Supersede::Replaced(Some(new)) =
            fx.store.supersede_call(&call.id, Some(&replacement)).unwrap()
        else {
            panic!("expected a replacement");
        };

        let found = fx.store.replacement_for(&call.id).unwrap().unwrap();
        assert_eq!(found.id, new.id);
        assert_eq!(found.requester_id, testutil::REQUESTER);

        // A second hop is followed to the newest call
        let Supersede::Replaced(Some(newest)) =
            fx.store.supersede_call(&new.id, Some(&replacement)).unwrap()
        else {
            panic!("expected a replacement");
        };
        assert_eq!(fx.store.replacement_for(&call.id).unwrap().unwrap().id, newest.id);
    }

    #[test]
    fn test_withdrawn_call_has_no_replacement() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        fx.store.supersede_call(&call.id, None).unwrap();

        assert!(fx.store.replacement_for(&call.id).unwrap().is_none());
    }

    #[test]
    fn test_supersede_accepted_call_writes_nothing() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        fx.store.accept_call(&call.id, &fx.near).unwrap();

        let outcome = fx
            .store
            .supersede_call(&call.id, Some(&fx.new_call(&[&fx.far])))
            .unwrap();
        assert!(matches!(outcome, Supersede::Accepted(ref c) if c.id == call.id));
        assert!(fx.store.pending_calls_for(&fx.far).unwrap().is_empty());
    }

    #[test]
    fn test_withdraw_and_gone() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        assert_eq!(
            fx.store.supersede_call(&call.id, None).unwrap(),
            Supersede::Replaced(None)
        );
        assert_eq!(fx.store.supersede_call(&call.id, None).unwrap(), Supersede::Gone);
    }

    #[test]
    fn test_cancel_call() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let err = fx.store.cancel_call(&call.id, "someone-else").unwrap_err();
        assert!(err.is_permission_error());

        fx.store.cancel_call(&call.id, testutil::REQUESTER).unwrap();
        assert!(fx.store.get_call(&call.id).unwrap().is_none());
    }

    #[test]
    fn test_cancel_accepted_call_fails() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        fx.store.accept_call(&call.id, &fx.near).unwrap();

        let err = fx.store.cancel_call(&call.id, testutil::REQUESTER).unwrap_err();
        assert!(err.is_already_handled());
    }

    #[test]
    fn test_stale_pending_calls() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(fx.store.stale_pending_calls(past).unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::hours(1);
        let stale = fx.store.stale_pending_calls(future).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, call.id);
    }

    #[test]
    fn test_malformed_status_is_a_decode_error() {
        let fx = Fixture::new();
        let call = fx.pending_call(&[&fx.near]);
        fx.store
            .lock()
            .unwrap()
            .execute(
                "UPDATE emergency_calls SET status = 'lost' WHERE id = ?1",
                [&call.id],
            )
            .unwrap();

        let err = fx.store.get_call(&call.id).unwrap_err();
        assert!(matches!(err, Error::Decode { entity: "call", .. }));
    }

    #[test]
    fn test_malformed_department_is_a_decode_error() {
        let fx = Fixture::new();
        fx.store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO hospital_departments (hospital_id, department) VALUES (?1, '치과')",
                [&fx.near],
            )
            .unwrap();

        let err = fx.store.get_hospital(&fx.near).unwrap_err();
        assert!(matches!(err, Error::Decode { entity: "hospital", .. }));
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = std::env::temp_dir().join(format!("erdispatch_test_{}", new_id()));
        let path = dir.join("nested").join("dispatch.db");

        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path);

        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_timestamp_is_sortable() {
        let earlier = timestamp(Utc::now());
        let later = timestamp(Utc::now() + chrono::Duration::milliseconds(5));
        assert!(earlier < later);
        assert!(earlier.ends_with('Z'));
    }
}
