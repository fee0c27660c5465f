//! Response interpretation: from raw model text to a ValidationResult.
//!
//! The upstream model is not a typed API — its output may be wrapped in
//! markdown fences, use variant field names, carry unescaped newlines, or be
//! cut off mid-structure. Interpretation is split into a typed core,
//! `parse`, which either returns a fully validated result or a structured
//! [`ParseError`], and an explicit degrade step, `recover`, which pattern-
//! matches whatever partial data survives and assembles a
//! `NeedsClarification` result. The orchestrator — not this module — decides
//! to degrade, so no error is ever swallowed implicitly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{SuggestedCode, ValidationResult, ValidationStatus};

/// Cap on codes recovered by pattern matching from a malformed response.
const MAX_RECOVERED_CODES: usize = 10;

/// Structured failure from the typed parsing core.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("No JSON payload found in model output")]
    NoJsonFound,

    #[error("JSON parsing failed: {0}")]
    JsonParsing(String),

    #[error("Required field missing: {0}")]
    MissingField(&'static str),

    #[error("Unrecognized validation status: {0:?}")]
    InvalidStatus(String),

    #[error("Compliance score is not numeric: {0:?}")]
    InvalidScore(String),
}

// ============================================================================
// JSON payload extraction
// ============================================================================

/// Locate the JSON payload inside raw model output.
///
/// Tries, in order: a ```json fence (case-insensitive), any fence whose body
/// starts with `{`, and finally the first balanced `{...}` object in the
/// text. An unterminated object is returned as-is for the repair pass.
fn extract_json_block(raw: &str) -> Result<String, ParseError> {
    let lower = raw.to_lowercase();

    if let Some(start) = lower.find("```json") {
        let body_start = start + "```json".len();
        let body = &raw[body_start..];
        let end = body.find("```").unwrap_or(body.len());
        return Ok(body[..end].trim().to_string());
    }

    if let Some(start) = raw.find("```") {
        let body = &raw[start + 3..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if block.starts_with('{') {
                return Ok(block.to_string());
            }
        }
    }

    first_balanced_object(raw).ok_or(ParseError::NoJsonFound)
}

/// Scan for the first balanced top-level `{...}`, respecting JSON string
/// syntax. Returns the tail from `{` when the object never closes so the
/// truncation repair can finish it.
fn first_balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    Some(text[start..].to_string())
}

/// Escape literal newlines inside JSON strings — a common model error.
fn fix_json_newlines(json: &str) -> String {
    let mut result = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in json.chars() {
        if escape_next {
            result.push(ch);
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                result.push(ch);
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
                result.push(ch);
            }
            '\n' if in_string => result.push_str("\\n"),
            '\r' if in_string => {}
            _ => result.push(ch),
        }
    }
    result
}

/// Close unmatched brackets left behind when the model was cut off.
fn fix_truncated_json(json: &str) -> String {
    let mut brace_count = 0i32;
    let mut bracket_count = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in json.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => brace_count -= 1,
            '[' if !in_string => bracket_count += 1,
            ']' if !in_string => bracket_count -= 1,
            _ => {}
        }
    }

    if brace_count <= 0 && bracket_count <= 0 {
        return json.to_string();
    }

    let mut repaired = json.trim_end().to_string();
    if in_string {
        repaired.push('"');
    }
    for _ in 0..bracket_count.max(0) {
        repaired.push(']');
    }
    for _ in 0..brace_count.max(0) {
        repaired.push('}');
    }
    repaired
}

// ============================================================================
// Field normalization
// ============================================================================

/// Collapse a field name onto its lookup form: lower-cased, alphanumerics
/// only. Maps "validationStatus", "Validation_Status" and "validation status"
/// to the same key.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

const STATUS_KEYS: &[&str] = &["validationstatus", "status", "appropriatenessstatus"];
const SCORE_KEYS: &[&str] = &["compliancescore", "score", "compliancerating"];
const FEEDBACK_KEYS: &[&str] = &["feedback", "feedbacktext", "comments"];
const DIAGNOSIS_KEYS: &[&str] = &[
    "suggestedicd10codes",
    "suggesteddiagnosiscodes",
    "icd10codes",
    "diagnosiscodes",
    "icdcodes",
];
const PROCEDURE_KEYS: &[&str] = &[
    "suggestedcptcodes",
    "suggestedprocedurecodes",
    "cptcodes",
    "procedurecodes",
];
const REASONING_KEYS: &[&str] = &["internalreasoning", "reasoning", "rationale", "explanation"];

fn lookup<'a>(fields: &'a HashMap<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| fields.get(*k))
}

/// Map a raw status string onto the canonical enum, case-insensitively and
/// through a small synonym set.
pub fn parse_status(raw: &str) -> Result<ValidationStatus, ParseError> {
    let folded = normalize_key(raw);
    match folded.as_str() {
        "appropriate" | "valid" | "approved" => Ok(ValidationStatus::Appropriate),
        "inappropriate" | "notappropriate" | "rejected" => Ok(ValidationStatus::Inappropriate),
        "needsclarification" | "clarificationneeded" | "clarification" | "unclear"
        | "indeterminate" => Ok(ValidationStatus::NeedsClarification),
        "override" | "overridden" | "overrideapproved" => Ok(ValidationStatus::Override),
        _ => Err(ParseError::InvalidStatus(raw.to_string())),
    }
}

/// Normalize a suggested-code array: every element becomes `{code,
/// description}`; bare strings are promoted, null/invalid entries dropped.
/// Idempotent — normalizing an already-normalized array is the identity.
pub fn normalize_codes(value: &Value) -> Vec<SuggestedCode> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let mut codes = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(code) if !code.trim().is_empty() => {
                codes.push(SuggestedCode::new(code.trim(), ""));
            }
            Value::Object(map) => {
                let mut fields: HashMap<String, Value> = HashMap::new();
                for (k, v) in map {
                    fields.insert(normalize_key(k), v.clone());
                }
                let code = fields
                    .get("code")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .unwrap_or_default();
                if code.is_empty() {
                    continue;
                }
                let description = fields
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let confidence = fields
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .map(|c| c as f32);
                codes.push(SuggestedCode {
                    code: code.to_string(),
                    description,
                    confidence,
                });
            }
            _ => {}
        }
    }
    codes
}

fn parse_score(value: &Value) -> Result<f64, ParseError> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score
        .map(|s| s.clamp(0.0, 100.0))
        .ok_or_else(|| ParseError::InvalidScore(value.to_string()))
}

// ============================================================================
// Recovery patterns
// ============================================================================

static DEFAULT_SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:compliance[\s_-]*score|score)\s*(?:is|of|[:=])?\s*(\d{1,3})").unwrap()
});

static DEFAULT_FEEDBACK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?im)^\s*"?feedback"?\s*[:\-]\s*"?([^"\n]+)"?\s*,?\s*$"#).unwrap());

/// ICD-10-shaped token: letter (not U), two digits, optional dotted suffix.
static DEFAULT_DIAGNOSIS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-TV-Z]\d{2}(?:\.\d{1,4})?\b").unwrap());

/// CPT token restricted to the imaging range (7xxxx) — bare five-digit runs
/// elsewhere in prose are more often quantities than procedure codes.
static DEFAULT_PROCEDURE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b7\d{4}\b").unwrap());

/// The recoverable-pattern set used by the degraded extractor.
///
/// Model failure modes drift over time; deployments extend these lists
/// rather than patching the extractor.
pub struct RecoveryPatterns {
    pub score: Vec<Regex>,
    pub feedback: Vec<Regex>,
    pub diagnosis_code: Vec<Regex>,
    pub procedure_code: Vec<Regex>,
}

impl Default for RecoveryPatterns {
    fn default() -> Self {
        Self {
            score: vec![DEFAULT_SCORE_PATTERN.clone()],
            feedback: vec![DEFAULT_FEEDBACK_PATTERN.clone()],
            diagnosis_code: vec![DEFAULT_DIAGNOSIS_PATTERN.clone()],
            procedure_code: vec![DEFAULT_PROCEDURE_PATTERN.clone()],
        }
    }
}

impl RecoveryPatterns {
    fn first_capture(&self, patterns: &[Regex], text: &str) -> Option<String> {
        patterns.iter().find_map(|p| {
            p.captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
    }

    fn all_matches(&self, patterns: &[Regex], text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for pattern in patterns {
            for found in pattern.find_iter(text) {
                let token = found.as_str().to_string();
                if !seen.contains(&token) {
                    seen.push(token);
                }
                if seen.len() >= MAX_RECOVERED_CODES {
                    return seen;
                }
            }
        }
        seen
    }
}

// ============================================================================
// Interpreter
// ============================================================================

/// Typed parse plus pattern-based recovery over raw model output.
pub struct ResponseInterpreter {
    recovery: RecoveryPatterns,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self {
            recovery: RecoveryPatterns::default(),
        }
    }
}

impl ResponseInterpreter {
    pub fn new(recovery: RecoveryPatterns) -> Self {
        Self { recovery }
    }

    /// Parse raw model output into a fully validated result.
    ///
    /// Any failure surfaces as a [`ParseError`]; callers choose whether to
    /// degrade via [`recover`](Self::recover).
    pub fn parse(&self, raw: &str) -> Result<ValidationResult, ParseError> {
        let block = extract_json_block(raw)?;
        let repaired = fix_truncated_json(&fix_json_newlines(&block));

        let value: Value = serde_json::from_str(&repaired)
            .map_err(|e| ParseError::JsonParsing(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(ParseError::JsonParsing(
                "payload is not a JSON object".to_string(),
            ));
        };

        let mut fields: HashMap<String, Value> = HashMap::new();
        for (k, v) in map {
            fields.insert(normalize_key(&k), v);
        }

        let status_value = lookup(&fields, STATUS_KEYS)
            .and_then(|v| v.as_str())
            .ok_or(ParseError::MissingField("validationStatus"))?;
        let status = parse_status(status_value)?;

        let score = parse_score(
            lookup(&fields, SCORE_KEYS).ok_or(ParseError::MissingField("complianceScore"))?,
        )?;

        let feedback = lookup(&fields, FEEDBACK_KEYS)
            .and_then(|v| v.as_str())
            .ok_or(ParseError::MissingField("feedback"))?
            .trim()
            .to_string();

        let diagnosis_value =
            lookup(&fields, DIAGNOSIS_KEYS).ok_or(ParseError::MissingField("suggestedICD10Codes"))?;
        let procedure_value =
            lookup(&fields, PROCEDURE_KEYS).ok_or(ParseError::MissingField("suggestedCPTCodes"))?;

        let internal_reasoning = lookup(&fields, REASONING_KEYS)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        debug!("Parsed model response with status {:?}", status);

        Ok(ValidationResult {
            status,
            compliance_score: score,
            feedback,
            suggested_diagnosis_codes: normalize_codes(diagnosis_value),
            suggested_procedure_codes: normalize_codes(procedure_value),
            internal_reasoning,
        })
    }

    /// Best-effort partial extraction when normal parsing failed.
    ///
    /// Always produces a well-formed `NeedsClarification` result — never an
    /// error — so the pipeline's caller sees a usable value.
    pub fn recover(&self, raw: &str, error: &ParseError) -> ValidationResult {
        warn!("Degrading model response after parse failure: {}", error);

        let score = self
            .recovery
            .first_capture(&self.recovery.score, raw)
            .and_then(|s| s.parse::<f64>().ok())
            .map(|s| s.clamp(0.0, 100.0))
            .unwrap_or(0.0);

        let feedback = self
            .recovery
            .first_capture(&self.recovery.feedback, raw)
            .unwrap_or_else(|| {
                "The validation response could not be fully processed. Please retry or provide \
                 additional clinical detail."
                    .to_string()
            });

        let diagnosis_codes = self
            .recovery
            .all_matches(&self.recovery.diagnosis_code, raw)
            .into_iter()
            .map(|code| SuggestedCode::new(&code, ""))
            .collect();
        let procedure_codes = self
            .recovery
            .all_matches(&self.recovery.procedure_code, raw)
            .into_iter()
            .map(|code| SuggestedCode::new(&code, ""))
            .collect();

        ValidationResult {
            status: ValidationStatus::NeedsClarification,
            compliance_score: score,
            feedback,
            suggested_diagnosis_codes: diagnosis_codes,
            suggested_procedure_codes: procedure_codes,
            internal_reasoning: format!(
                "Response processing error: {}. Result assembled by partial extraction.",
                error
            ),
        }
    }

    /// Convenience wrapper: parse, degrading on any failure.
    pub fn interpret(&self, raw: &str) -> ValidationResult {
        match self.parse(raw) {
            Ok(result) => result,
            Err(e) => self.recover(raw, &e),
        }
    }
}
