//! Requester history and model-assisted analysis of completed cases.

use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ai::{extract_json, GenerativeModel};
use crate::error::{Error, Result};
use crate::model::CompletedCase;

/// Offset of the local time zone the digest is rendered in (KST).
const LOCAL_OFFSET_SECS: i32 = 9 * 3600;

const TIME_FALLBACK: &str = "시간대 분석 결과를 가져올 수 없습니다.";
const SYMPTOM_FALLBACK: &str = "주요 증상 분석 결과를 가져올 수 없습니다.";
const UNKNOWN: &str = "정보 없음";

/// What the model made of a requester's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseAnalysis {
    /// When emergencies tend to happen.
    pub time_analysis: String,
    /// Which symptoms come up most.
    pub symptom_analysis: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAnalysis {
    time_analysis: Option<String>,
    symptom_analysis: Option<String>,
}

fn local_time(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return UNKNOWN.to_string();
    };
    match FixedOffset::east_opt(LOCAL_OFFSET_SECS) {
        Some(offset) => at.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S").to_string(),
        None => at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Render completed cases as the plain-text digest handed to the model.
#[must_use]
pub fn case_digest(cases: &[CompletedCase]) -> String {
    let mut out = format!("총 {}건의 이송 기록 데이터입니다.\n\n", cases.len());
    for (index, case) in cases.iter().enumerate() {
        let patient = &case.call.patient_info;
        let age = patient
            .age
            .map_or_else(|| UNKNOWN.to_string(), |a| a.to_string());

        // Writing to a String cannot fail
        let _ = writeln!(out, "[기록 {}]", index + 1);
        let _ = writeln!(out, "- 환자 이름: {}", patient.name);
        let _ = writeln!(out, "- 나이: {age}");
        let _ = writeln!(out, "- 성별: {}", patient.gender);
        let _ = writeln!(out, "- 주요 증상: {}", patient.symptom);
        let _ = writeln!(out, "- 기타 정보: {}", patient.other_info);
        let _ = writeln!(out, "- 이송 병원: {}", case.hospital_name());
        let _ = writeln!(out, "- 요청 시각: {}", local_time(Some(case.call.created_at)));
        let _ = writeln!(out, "- 완료 시각: {}", local_time(case.call.completed_at));
        out.push_str("---\n\n");
    }
    out
}

fn prompt(digest: &str) -> String {
    format!(
        "아래 출동 기록을 분석해 timeAnalysis(응급 상황이 주로 발생하는 시간대)와 \
         symptomAnalysis(가장 자주 발생하는 주요 증상)를 \
         {{\"timeAnalysis\": \"...\", \"symptomAnalysis\": \"...\"}} 형식의 JSON 객체로만 응답해주세요.\n\n\
         [분석할 데이터]\n{digest}"
    )
}

fn parse_analysis(answer: &str) -> CaseAnalysis {
    let raw = extract_json(answer)
        .and_then(|json| serde_json::from_str::<RawAnalysis>(json).ok())
        .unwrap_or_else(|| {
            warn!("Model analysis was not a JSON object");
            RawAnalysis::default()
        });

    CaseAnalysis {
        time_analysis: raw
            .time_analysis
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| TIME_FALLBACK.to_string()),
        symptom_analysis: raw
            .symptom_analysis
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| SYMPTOM_FALLBACK.to_string()),
    }
}

/// Ask `model` for time-of-day and symptom trends in `cases`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if there are no cases, or
/// [`Error::NetworkFailure`] if the model call fails.
pub async fn analyze(model: &dyn GenerativeModel, cases: &[CompletedCase]) -> Result<CaseAnalysis> {
    if cases.is_empty() {
        return Err(Error::invalid_input("분석할 데이터가 없습니다."));
    }

    let digest = case_digest(cases);
    debug!(cases = cases.len(), digest_len = digest.len(), "Analyzing history");
    let answer = model.generate(&prompt(&digest)).await?;
    Ok(parse_analysis(&answer))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::testutil::{self, Fixture, ScriptedModel};

    fn completed_case(fx: &Fixture) -> CompletedCase {
        let call = fx.pending_call(&[&fx.near]);
        fx.store.accept_call(&call.id, &fx.near).unwrap();
        fx.store.complete_call(&call.id, &fx.near).unwrap()
    }

    #[test]
    fn test_digest_layout() {
        let fx = Fixture::new();
        let case = completed_case(&fx);
        let digest = case_digest(&[case.clone(), case]);

        assert!(digest.starts_with("총 2건의 이송 기록 데이터입니다."));
        assert!(digest.contains("[기록 1]"));
        assert!(digest.contains("[기록 2]"));
        assert!(digest.contains("- 주요 증상: 가슴 통증"));
        assert!(digest.contains("- 이송 병원: 가까운병원"));
        assert_eq!(digest.matches("---").count(), 2);
    }

    #[test]
    fn test_digest_unknown_age() {
        let fx = Fixture::new();
        let mut case = completed_case(&fx);
        case.call.patient_info.age = None;
        assert!(case_digest(&[case]).contains("- 나이: 정보 없음"));
    }

    #[test]
    fn test_local_time_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(local_time(Some(at)), "2024-05-01 21:30:00");
        assert_eq!(local_time(None), "정보 없음");
    }

    #[test]
    fn test_parse_analysis() {
        let analysis = parse_analysis(
            "```json\n{\"timeAnalysis\": \"야간 집중\", \"symptomAnalysis\": \"흉통 다수\"}\n```",
        );
        assert_eq!(analysis.time_analysis, "야간 집중");
        assert_eq!(analysis.symptom_analysis, "흉통 다수");
    }

    #[test]
    fn test_parse_analysis_fallbacks() {
        let analysis = parse_analysis("{\"timeAnalysis\": \"야간 집중\"}");
        assert_eq!(analysis.time_analysis, "야간 집중");
        assert_eq!(analysis.symptom_analysis, SYMPTOM_FALLBACK);

        let analysis = parse_analysis("분석할 수 없습니다");
        assert_eq!(analysis.time_analysis, TIME_FALLBACK);
        assert_eq!(analysis.symptom_analysis, SYMPTOM_FALLBACK);
    }

    #[tokio::test]
    async fn test_analyze_empty_history_skips_model() {
        let model = ScriptedModel::new(["{}"]);
        let err = analyze(&model, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(model.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_sends_digest() {
        let fx = Fixture::new();
        let case = completed_case(&fx);
        let model = ScriptedModel::new([
            r#"{"timeAnalysis": "오후 집중", "symptomAnalysis": "흉통"}"#,
        ]);

        let analysis = analyze(&model, &[case]).await.unwrap();
        assert_eq!(analysis.time_analysis, "오후 집중");
        assert!(model.prompts()[0].contains("[기록 1]"));
        assert!(model.prompts()[0].contains(testutil::PATIENT_NAME));
    }
}
