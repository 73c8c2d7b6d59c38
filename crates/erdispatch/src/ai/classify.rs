//! Symptom to department classification.

use tracing::{debug, info};

use crate::department::Department;
use crate::error::{Error, Result};

use super::GenerativeModel;

/// Build the classification prompt for `symptom`.
fn prompt(symptom: &str, max: usize) -> String {
    let departments = Department::classifiable()
        .map(Department::korean_name)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "환자의 주요 증상은 '{symptom}' 입니다. 이 증상과 가장 관련성이 높은 진료과를 \
         다음 목록에서 최대 {max}개 골라주세요: [{departments}]. 다른 설명은 모두 제외하고, \
         쉼표(,)로 구분된 진료과 이름만 응답해주세요."
    )
}

/// Parse a comma-separated department answer.
///
/// Names outside the classifiable list are dropped, duplicates collapsed,
/// and at most `max` departments kept in answer order.
#[must_use]
pub fn parse_departments(answer: &str, max: usize) -> Vec<Department> {
    let mut departments = Vec::with_capacity(max);
    for name in answer.split([',', '\n']) {
        if departments.len() >= max {
            break;
        }
        let name = name.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '.');
        if name.is_empty() {
            continue;
        }
        match name.parse::<Department>() {
            Ok(Department::EmergencyMedicine) | Err(_) => {
                debug!(name, "Dropping unusable department from model answer");
            }
            Ok(department) if !departments.contains(&department) => departments.push(department),
            Ok(_) => {}
        }
    }
    departments
}

/// Ask `model` which departments fit `symptom`.
///
/// # Errors
///
/// - [`Error::InvalidInput`] if the symptom is blank
/// - [`Error::ClassificationFailed`] if the answer names no usable department
/// - [`Error::NetworkFailure`] if the model call fails
pub async fn classify_symptom(
    model: &dyn GenerativeModel,
    symptom: &str,
    max: usize,
) -> Result<Vec<Department>> {
    if symptom.trim().is_empty() {
        return Err(Error::invalid_input("주요 증상을 입력해주세요."));
    }

    let answer = model.generate(&prompt(symptom.trim(), max)).await?;
    let departments = parse_departments(&answer, max);
    if departments.is_empty() {
        return Err(Error::ClassificationFailed { answer });
    }

    info!(?departments, "Classified symptom");
    Ok(departments)
}
