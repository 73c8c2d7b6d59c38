//! Core record types for erdispatch.
//!
//! This module defines the typed records that cross the datastore boundary:
//! emergency calls, hospitals, and archived (completed) cases.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::department::Department;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;

/// Length of generated record ids.
const ID_LEN: usize = 20;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate an opaque record id.
///
/// Ids are the BLAKE3 hash of the current time, the process id and a
/// process-local counter, truncated to 20 hex characters.
#[must_use]
pub fn new_id() -> String {
    let mut hasher = blake3::Hasher::new();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&ID_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let mut id = hasher.finalize().to_hex().to_string();
    id.truncate(ID_LEN);
    id
}

/// Lifecycle state of an emergency call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Broadcast to targeted hospitals, nobody has accepted yet.
    Pending,
    /// One hospital accepted the patient.
    Accepted,
    /// The accepting hospital finished treatment; only seen in archives.
    Completed,
}

impl CallStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "completed" => Ok(Self::Completed),
            other => Err(Error::invalid_input(format!("unknown call status: {other}"))),
        }
    }
}

/// Patient details collected by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    /// Patient name.
    pub name: String,
    /// Age in years, when known.
    pub age: Option<u32>,
    /// Gender as reported.
    pub gender: String,
    /// Chief complaint, free text.
    pub symptom: String,
    /// Anything else worth passing on.
    #[serde(default)]
    pub other_info: String,
}

impl PatientInfo {
    /// Check the required fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.symptom.trim().is_empty() {
            return Err(Error::invalid_input("주요 증상을 입력해주세요."));
        }
        if self.name.trim().is_empty() || self.gender.trim().is_empty() {
            return Err(Error::invalid_input(
                "환자 이름, 나이, 성별은 필수 정보입니다.",
            ));
        }
        Ok(())
    }
}

/// An emergency dispatch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyCall {
    /// Opaque id.
    pub id: String,
    /// The paramedic who raised the call.
    pub requester_id: String,
    /// Patient details.
    pub patient_info: PatientInfo,
    /// Where the patient is.
    pub location: GeoPoint,
    /// Current lifecycle state.
    pub status: CallStatus,
    /// Hospitals the call was broadcast to.
    pub targeted_hospital_ids: Vec<String>,
    /// Departments the symptom was classified into.
    pub recommended_departments: Vec<Department>,
    /// Hospital that won the accept race.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_hospital_id: Option<String>,
    /// Display name of the accepting hospital.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_hospital_name: Option<String>,
    /// Hospitals that declined the call.
    pub rejected_by: Vec<String>,
    /// 0 for the first broadcast, 1 after radius expansion.
    pub broadcast_round: u32,
    /// Bumped on every write.
    pub revision: u64,
    /// When the call was created.
    pub created_at: DateTime<Utc>,
    /// When the call was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the call was completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EmergencyCall {
    /// Whether `hospital_id` was among the broadcast targets.
    #[must_use]
    pub fn targets(&self, hospital_id: &str) -> bool {
        self.targeted_hospital_ids.iter().any(|h| h == hospital_id)
    }

    /// Whether `hospital_id` has declined the call.
    #[must_use]
    pub fn is_rejected_by(&self, hospital_id: &str) -> bool {
        self.rejected_by.iter().any(|h| h == hospital_id)
    }
}

/// Everything needed to create a call; the store fills in the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCall {
    /// The paramedic raising the call.
    pub requester_id: String,
    /// Patient details.
    pub patient_info: PatientInfo,
    /// Where the patient is.
    pub location: GeoPoint,
    /// Hospitals to broadcast to; must not be empty.
    pub targeted_hospital_ids: Vec<String>,
    /// Classification result.
    pub recommended_departments: Vec<Department>,
    /// Hospitals known to have declined an earlier broadcast.
    pub rejected_by: Vec<String>,
    /// Broadcast round of this call.
    pub broadcast_round: u32,
}

/// Bed availability of a hospital.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beds {
    /// Free beds.
    pub available: u32,
    /// All beds.
    pub total: u32,
    /// When the counts were last changed.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Beds {
    /// Validate and build a bed count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `available` exceeds `total`.
    pub fn new(total: u32, available: u32) -> Result<Self> {
        if available > total {
            return Err(Error::invalid_input("병상 수를 올바르게 입력해주세요."));
        }
        Ok(Self {
            available,
            total,
            last_updated: Some(Utc::now()),
        })
    }
}

/// A receiving hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hospital {
    /// Opaque id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Position of the emergency room.
    pub location: GeoPoint,
    /// Bed availability.
    pub beds: Beds,
    /// Departments the hospital accepts patients for.
    pub available_departments: Vec<Department>,
}

impl Hospital {
    /// Whether the hospital offers any of `departments`.
    #[must_use]
    pub fn offers_any(&self, departments: &[Department]) -> bool {
        self.available_departments
            .iter()
            .any(|d| departments.contains(d))
    }
}

/// Hospital registration input.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHospital {
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: String,
    /// Position of the emergency room.
    pub location: GeoPoint,
    /// Initial bed counts.
    pub beds: Beds,
    /// Initial departments.
    pub available_departments: Vec<Department>,
}

impl NewHospital {
    /// Registration with the default bed counts (20 total, 5 free) and no
    /// departments.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            location,
            beds: Beds {
                available: 5,
                total: 20,
                last_updated: Some(Utc::now()),
            },
            available_departments: Vec::new(),
        }
    }
}

/// An archived call held in a hospital's completed-case collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedCase {
    /// The archiving hospital.
    pub hospital_id: String,
    /// Copy of the call with `status = completed` and `completed_at` set.
    pub call: EmergencyCall,
}

impl CompletedCase {
    /// Name of the hospital that treated the patient.
    #[must_use]
    pub fn hospital_name(&self) -> &str {
        self.call
            .accepted_hospital_name
            .as_deref()
            .unwrap_or("병원 정보 없음")
    }
}
