//! Core data types for the validation pipeline.
//!
//! These are the shapes that cross component boundaries: the caller-supplied
//! validation context, the coded clinical-decision-support result, and the
//! suggested diagnosis/procedure codes inside it.

use serde::{Deserialize, Serialize};

/// Patient descriptor used only for record linkage.
///
/// This struct never reaches the prompt builder or any model backend; the
/// dictation text is the only patient-derived input that crosses the process
/// boundary, and only after redaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientInfo {
    /// Internal patient identifier (chart/record linkage)
    pub patient_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl PatientInfo {
    pub fn new(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            first_name: None,
            last_name: None,
        }
    }
}

/// Ephemeral per-call context supplied by the caller.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub patient: PatientInfo,
    pub user_id: i64,
    pub organization_id: i64,
    /// Existing order to validate against; a draft order is bootstrapped
    /// when absent.
    pub order_id: Option<i64>,
    /// Re-validation after a clinician disputed an initial rejection.
    pub is_override: bool,
}

impl ValidationContext {
    pub fn new(patient: PatientInfo, user_id: i64, organization_id: i64) -> Self {
        Self {
            patient,
            user_id,
            organization_id,
            order_id: None,
            is_override: false,
        }
    }

    pub fn with_order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_override(mut self, is_override: bool) -> Self {
        self.is_override = is_override;
        self
    }
}

/// Appropriateness status of a validated order.
///
/// The interpreter guarantees every result carries one of these four values;
/// anything it cannot map degrades to `NeedsClarification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Appropriate,
    Inappropriate,
    NeedsClarification,
    Override,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Appropriate => "Appropriate",
            ValidationStatus::Inappropriate => "Inappropriate",
            ValidationStatus::NeedsClarification => "NeedsClarification",
            ValidationStatus::Override => "Override",
        }
    }
}

/// A suggested diagnosis or procedure code.
///
/// Always a `{code, description}` pair — never a bare string and never null.
/// Description defaults to empty when the model omitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedCode {
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl SuggestedCode {
    pub fn new(code: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            confidence: None,
        }
    }
}

/// The pipeline's output: a structured, coded decision-support result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub status: ValidationStatus,
    /// Numeric appropriateness score, clamped to 0-100.
    pub compliance_score: f64,
    /// Clinician-facing feedback text.
    pub feedback: String,
    pub suggested_diagnosis_codes: Vec<SuggestedCode>,
    pub suggested_procedure_codes: Vec<SuggestedCode>,
    /// Diagnostic reasoning trail; not guaranteed user-facing.
    pub internal_reasoning: String,
}

/// What `run_validation` hands back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub order_id: i64,
    pub attempt_number: u32,
    pub result: ValidationResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_as_str() {
        assert_eq!(ValidationStatus::Appropriate.as_str(), "Appropriate");
        assert_eq!(
            ValidationStatus::NeedsClarification.as_str(),
            "NeedsClarification"
        );
    }

    #[test]
    fn test_validation_result_serializes_camel_case() {
        let result = ValidationResult {
            status: ValidationStatus::Appropriate,
            compliance_score: 92.0,
            feedback: "Supports CT with contrast".to_string(),
            suggested_diagnosis_codes: vec![SuggestedCode::new("K35.80", "Acute appendicitis")],
            suggested_procedure_codes: vec![],
            internal_reasoning: String::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["complianceScore"], 92.0);
        assert_eq!(json["suggestedDiagnosisCodes"][0]["code"], "K35.80");
        assert!(json["suggestedDiagnosisCodes"][0].get("confidence").is_none());
    }

    #[test]
    fn test_suggested_code_description_defaults_empty() {
        let code: SuggestedCode = serde_json::from_str(r#"{"code":"74177"}"#).unwrap();
        assert_eq!(code.code, "74177");
        assert_eq!(code.description, "");
        assert!(code.confidence.is_none());
    }

    #[test]
    fn test_context_builder() {
        let ctx = ValidationContext::new(PatientInfo::new("pat-1"), 7, 42)
            .with_order(1001)
            .with_override(true);
        assert_eq!(ctx.order_id, Some(1001));
        assert!(ctx.is_override);
        assert_eq!(ctx.organization_id, 42);
    }
}
