//! The closed list of medical departments.
//!
//! Hospitals advertise the departments they can receive patients for, and
//! symptom classification maps free text onto the same list. Departments are
//! stored and exchanged under their Korean names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A medical department a hospital can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Department {
    /// 가정의학과
    FamilyMedicine,
    /// 내과
    InternalMedicine,
    /// 마취통증의학과
    Anesthesiology,
    /// 병리과
    Pathology,
    /// 비뇨의학과
    Urology,
    /// 산부인과
    ObstetricsGynecology,
    /// 성형외과
    PlasticSurgery,
    /// 소아청소년과
    Pediatrics,
    /// 신경외과
    Neurosurgery,
    /// 안과
    Ophthalmology,
    /// 영상의학과
    Radiology,
    /// 응급의학과
    EmergencyMedicine,
    /// 이비인후과
    Otolaryngology,
    /// 재활의학과
    RehabilitationMedicine,
    /// 정신건강의학과
    Psychiatry,
    /// 정형외과
    Orthopedics,
    /// 직업환경의학과
    OccupationalMedicine,
    /// 진단검사의학과
    LaboratoryMedicine,
    /// 피부과
    Dermatology,
    /// 핵의학과
    NuclearMedicine,
    /// 흉부외과
    ThoracicSurgery,
}

impl Department {
    /// Every department, in Korean alphabetical order.
    pub const ALL: [Department; 21] = [
        Self::FamilyMedicine,
        Self::InternalMedicine,
        Self::Anesthesiology,
        Self::Pathology,
        Self::Urology,
        Self::ObstetricsGynecology,
        Self::PlasticSurgery,
        Self::Pediatrics,
        Self::Neurosurgery,
        Self::Ophthalmology,
        Self::Radiology,
        Self::EmergencyMedicine,
        Self::Otolaryngology,
        Self::RehabilitationMedicine,
        Self::Psychiatry,
        Self::Orthopedics,
        Self::OccupationalMedicine,
        Self::LaboratoryMedicine,
        Self::Dermatology,
        Self::NuclearMedicine,
        Self::ThoracicSurgery,
    ];

    /// Departments a symptom may be classified into. Emergency medicine is
    /// left out: every emergency qualifies, so it carries no signal.
    #[must_use]
    pub fn classifiable() -> impl Iterator<Item = Department> {
        Self::ALL
            .into_iter()
            .filter(|d| *d != Self::EmergencyMedicine)
    }

    /// The Korean name used in storage and model prompts.
    #[must_use]
    pub fn korean_name(self) -> &'static str {
        match self {
            Self::FamilyMedicine => "가정의학과",
            Self::InternalMedicine => "내과",
            Self::Anesthesiology => "마취통증의학과",
            Self::Pathology => "병리과",
            Self::Urology => "비뇨의학과",
            Self::ObstetricsGynecology => "산부인과",
            Self::PlasticSurgery => "성형외과",
            Self::Pediatrics => "소아청소년과",
            Self::Neurosurgery => "신경외과",
            Self::Ophthalmology => "안과",
            Self::Radiology => "영상의학과",
            Self::EmergencyMedicine => "응급의학과",
            Self::Otolaryngology => "이비인후과",
            Self::RehabilitationMedicine => "재활의학과",
            Self::Psychiatry => "정신건강의학과",
            Self::Orthopedics => "정형외과",
            Self::OccupationalMedicine => "직업환경의학과",
            Self::LaboratoryMedicine => "진단검사의학과",
            Self::Dermatology => "피부과",
            Self::NuclearMedicine => "핵의학과",
            Self::ThoracicSurgery => "흉부외과",
        }
    }

    /// ASCII slug accepted on the command line.
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Self::FamilyMedicine => "family-medicine",
            Self::InternalMedicine => "internal-medicine",
            Self::Anesthesiology => "anesthesiology",
            Self::Pathology => "pathology",
            Self::Urology => "urology",
            Self::ObstetricsGynecology => "obstetrics-gynecology",
            Self::PlasticSurgery => "plastic-surgery",
            Self::Pediatrics => "pediatrics",
            Self::Neurosurgery => "neurosurgery",
            Self::Ophthalmology => "ophthalmology",
            Self::Radiology => "radiology",
            Self::EmergencyMedicine => "emergency-medicine",
            Self::Otolaryngology => "otolaryngology",
            Self::RehabilitationMedicine => "rehabilitation-medicine",
            Self::Psychiatry => "psychiatry",
            Self::Orthopedics => "orthopedics",
            Self::OccupationalMedicine => "occupational-medicine",
            Self::LaboratoryMedicine => "laboratory-medicine",
            Self::Dermatology => "dermatology",
            Self::NuclearMedicine => "nuclear-medicine",
            Self::ThoracicSurgery => "thoracic-surgery",
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.korean_name())
    }
}

impl FromStr for Department {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|d| d.korean_name() == s || d.slug().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::invalid_input(format!("unknown department: {s}")))
    }
}

impl TryFrom<String> for Department {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Department> for String {
    fn from(value: Department) -> Self {
        value.korean_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_korean_and_slug() {
        assert_eq!("내과".parse::<Department>().unwrap(), Department::InternalMedicine);
        assert_eq!(
            " 흉부외과 ".parse::<Department>().unwrap(),
            Department::ThoracicSurgery
        );
        assert_eq!(
            "Thoracic-Surgery".parse::<Department>().unwrap(),
            Department::ThoracicSurgery
        );
        assert!("치과".parse::<Department>().is_err());
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Department::ALL.iter().map(|d| d.korean_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Department::ALL.len());
    }

    #[test]
    fn test_classifiable_excludes_emergency_medicine() {
        let list: Vec<_> = Department::classifiable().collect();
        assert_eq!(list.len(), 20);
        assert!(!list.contains(&Department::EmergencyMedicine));
    }

    #[test]
    fn test_serde_uses_korean_name() {
        let json = serde_json::to_string(&Department::Pediatrics).unwrap();
        assert_eq!(json, "\"소아청소년과\"");
        let back: Department = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Department::Pediatrics);
        assert!(serde_json::from_str::<Department>("\"없는과\"").is_err());
    }
}
