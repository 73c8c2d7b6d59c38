//! Error types for erdispatch.
//!
//! This module defines all error types used throughout the erdispatch crate.
//! Domain failures (no hospital in range, lost accept race, ...) and
//! infrastructure failures share one enum so callers can `?` through both,
//! and [`Error::user_message`] turns any of them into the short text shown
//! to an end user.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for erdispatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Dispatch Errors ===
    /// The requester's current location is not known.
    #[error("requester location is unavailable")]
    LocationUnavailable,

    /// No hospital offering a recommended department was found at any radius.
    #[error("no matching hospital within {} m", format_radii(.radii_m))]
    NoHospitalMatch {
        /// Every radius that was searched, in metres.
        radii_m: Vec<f64>,
    },

    /// The model answer did not name any known department.
    #[error("could not classify symptom: {answer:?}")]
    ClassificationFailed {
        /// The raw model answer.
        answer: String,
    },

    /// The call is no longer pending; another hospital got there first.
    #[error("call {call_id} has already been handled")]
    AlreadyHandled {
        /// The call that was contested.
        call_id: String,
    },

    /// The actor is not allowed to perform the operation.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// Why the operation was refused.
        reason: String,
    },

    /// A datastore or model call failed in transit.
    #[error("network failure: {message}")]
    NetworkFailure {
        /// Description of what went wrong.
        message: String,
    },

    /// The call does not exist (it may have been completed or withdrawn).
    #[error("call not found: {0}")]
    CallNotFound(String),

    /// The hospital does not exist.
    #[error("hospital not found: {0}")]
    HospitalNotFound(String),

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A stored row did not match the expected record shape.
    #[error("malformed {entity} record {id}: {message}")]
    Decode {
        /// Kind of record being decoded.
        entity: &'static str,
        /// Id of the offending row.
        id: String,
        /// What was wrong with it.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for erdispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkFailure {
            message: err.to_string(),
        }
    }
}

fn format_radii(radii_m: &[f64]) -> String {
    radii_m
        .iter()
        .map(|r| format!("{r:.0}"))
        .collect::<Vec<_>>()
        .join("/")
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a permission denied error.
    #[must_use]
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Create a network failure error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a record decode error.
    #[must_use]
    pub fn decode(entity: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            entity,
            id: id.into(),
            message: message.into(),
        }
    }

    /// Check if this error means another hospital won the accept race.
    #[must_use]
    pub fn is_already_handled(&self) -> bool {
        matches!(self, Self::AlreadyHandled { .. })
    }

    /// Check if this error is a permission issue.
    #[must_use]
    pub fn is_permission_error(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error means the search came up empty.
    #[must_use]
    pub fn is_no_hospital_match(&self) -> bool {
        matches!(self, Self::NoHospitalMatch { .. })
    }

    /// Short message suitable for showing to the person who triggered the
    /// operation. Every kind maps to something the user can act on by
    /// resubmitting.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::LocationUnavailable => {
                "현재 위치를 가져올 수 없습니다. GPS를 확인해주세요.".to_string()
            }
            Self::NoHospitalMatch { .. } => "조건에 맞는 병원이 주변에 없습니다.".to_string(),
            Self::ClassificationFailed { .. } => {
                "증상에 맞는 진료과를 찾지 못했습니다.".to_string()
            }
            Self::AlreadyHandled { .. } => "이미 다른 병원에서 수락한 요청입니다.".to_string(),
            Self::PermissionDenied { reason } => format!("권한이 없습니다: {reason}"),
            Self::NetworkFailure { .. } => {
                "네트워크 오류가 발생했습니다. 다시 시도해주세요.".to_string()
            }
            Self::CallNotFound(_) => "요청 문서를 찾을 수 없습니다.".to_string(),
            Self::HospitalNotFound(_) => "병원 정보를 찾을 수 없습니다.".to_string(),
            Self::InvalidInput(message) => message.clone(),
            other => format!("오류가 발생했습니다: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LocationUnavailable;
        assert_eq!(err.to_string(), "requester location is unavailable");

        let err = Error::internal("test error");
        assert_eq!(err.to_string(), "internal error: test error");
    }

    #[test]
    fn test_no_hospital_match_lists_radii() {
        let err = Error::NoHospitalMatch {
            radii_m: vec![5000.0, 10000.0, 20000.0],
        };
        assert_eq!(err.to_string(), "no matching hospital within 5000/10000/20000 m");
        assert!(err.is_no_hospital_match());
    }

    #[test]
    fn test_already_handled() {
        let err = Error::AlreadyHandled {
            call_id: "C1".to_string(),
        };
        assert!(err.is_already_handled());
        assert!(err.to_string().contains("C1"));
        assert!(!Error::LocationUnavailable.is_already_handled());
    }

    #[test]
    fn test_permission_error() {
        let err = Error::permission_denied("call accepted by another hospital");
        assert!(err.is_permission_error());
        assert!(err.to_string().contains("another hospital"));
        assert!(!Error::LocationUnavailable.is_permission_error());
    }

    #[test]
    fn test_network_error() {
        let err = Error::network("connection refused");
        assert_eq!(err.to_string(), "network failure: connection refused");
    }

    #[test]
    fn test_decode_error_display() {
        let err = Error::decode("call", "abc", "unknown status 'lost'");
        let msg = err.to_string();
        assert!(msg.contains("call"));
        assert!(msg.contains("abc"));
        assert!(msg.contains("unknown status"));
    }

    #[test]
    fn test_classification_failed_display() {
        let err = Error::ClassificationFailed {
            answer: "잘 모르겠습니다".to_string(),
        };
        assert!(err.to_string().contains("잘 모르겠습니다"));
    }

    #[test]
    fn test_user_messages_are_short() {
        let errors = [
            Error::LocationUnavailable,
            Error::NoHospitalMatch { radii_m: vec![] },
            Error::ClassificationFailed {
                answer: String::new(),
            },
            Error::AlreadyHandled {
                call_id: "C1".to_string(),
            },
            Error::network("timeout"),
        ];
        for err in errors {
            let msg = err.user_message();
            assert!(!msg.is_empty());
            assert!(!msg.contains('\n'));
        }
    }

    #[test]
    fn test_invalid_input_user_message_passthrough() {
        let err = Error::invalid_input("환자 이름은 필수 정보입니다.");
        assert_eq!(err.user_message(), "환자 이름은 필수 정보입니다.");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "radii must not be empty".to_string(),
        };
        assert!(err.to_string().contains("radii must not be empty"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
