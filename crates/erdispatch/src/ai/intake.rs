//! Decoding the conversational intake's final answer.
//!
//! During intake the model asks the paramedic questions in free text. Once
//! the paramedic confirms, the model answers with a JSON object
//! `{"status": "완료", "patientInfo": {...}}`, sometimes inside a code fence.

use serde::Deserialize;

use crate::model::PatientInfo;

use super::extract_json;

/// Status value marking a finished intake.
const STATUS_COMPLETE: &str = "완료";

/// What a model reply during intake means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeReply {
    /// The model collected everything; dispatch can start.
    Complete(PatientInfo),
    /// The model is still talking to the user; show it the text.
    Continue(String),
}

#[derive(Debug, Deserialize)]
struct FinalAnswer {
    status: String,
    #[serde(rename = "patientInfo")]
    patient_info: Option<IntakePatient>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntakePatient {
    name: String,
    age: i64,
    gender: String,
    symptom: String,
    #[serde(default)]
    other_info: String,
}

impl IntakePatient {
    fn into_patient(self) -> Option<PatientInfo> {
        let patient = PatientInfo {
            name: self.name,
            age: Some(u32::try_from(self.age).ok()?),
            gender: self.gender,
            symptom: self.symptom,
            other_info: self.other_info,
        };
        patient.validate().ok().map(|()| patient)
    }
}

/// Interpret one model reply from the intake conversation.
///
/// Anything that is not a complete, well-formed final answer is treated as
/// conversation and returned as [`IntakeReply::Continue`].
#[must_use]
pub fn parse_intake_reply(reply: &str) -> IntakeReply {
    extract_json(reply)
        .and_then(|json| serde_json::from_str::<FinalAnswer>(json).ok())
        .filter(|answer| answer.status == STATUS_COMPLETE)
        .and_then(|answer| answer.patient_info)
        .and_then(IntakePatient::into_patient)
        .map_or_else(|| IntakeReply::Continue(reply.trim().to_string()), IntakeReply::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FINAL: &str = r#"{"status": "완료", "patientInfo": {"name": "김철수", "age": 52, "gender": "남성", "symptom": "가슴 통증", "otherInfo": "고혈압 약 복용"}}"#;

    #[test]
    fn test_complete_reply() {
        let IntakeReply::Complete(patient) = parse_intake_reply(FINAL) else {
            panic!("expected a complete intake");
        };
        assert_eq!(patient.name, "김철수");
        assert_eq!(patient.age, Some(52));
        assert_eq!(patient.symptom, "가슴 통증");
        assert_eq!(patient.other_info, "고혈압 약 복용");
    }

    #[test]
    fn test_fenced_reply() {
        let fenced = format!("```json\n{FINAL}\n```");
        assert!(matches!(parse_intake_reply(&fenced), IntakeReply::Complete(_)));
    }

    #[test]
    fn test_question_is_continue() {
        let reply = parse_intake_reply("환자분의 나이는 어떻게 되나요?");
        assert_eq!(
            reply,
            IntakeReply::Continue("환자분의 나이는 어떻게 되나요?".to_string())
        );
    }

    #[test]
    fn test_unfinished_status_is_continue() {
        let reply = r#"{"status": "진행중", "patientInfo": null}"#;
        assert!(matches!(parse_intake_reply(reply), IntakeReply::Continue(_)));
    }

    #[test]
    fn test_non_integer_age_is_continue() {
        let reply = FINAL.replace("52", "\"쉰둘\"");
        assert!(matches!(parse_intake_reply(&reply), IntakeReply::Continue(_)));
    }

    #[test]
    fn test_missing_symptom_is_continue() {
        let reply = FINAL.replace("가슴 통증", "");
        assert!(matches!(parse_intake_reply(&reply), IntakeReply::Continue(_)));
    }

    #[test]
    fn test_other_info_defaults_to_empty() {
        let reply = r#"{"status":"완료","patientInfo":{"name":"이영희","age":7,"gender":"여","symptom":"고열"}}"#;
        let IntakeReply::Complete(patient) = parse_intake_reply(reply) else {
            panic!("expected a complete intake");
        };
        assert!(patient.other_info.is_empty());
    }
}
