//! PHI redaction for clinical dictation.
//!
//! Every piece of dictation passes through [`redact`] before it is allowed to
//! leave the process boundary toward a model backend. Patterns cover the
//! identifier classes that show up in free-text orders: emails, phone
//! numbers, patient names adjacent to labels, dates of birth, and medical
//! record numbers (labeled or bare digit runs).
//!
//! Redaction is total: unmatched text passes through unchanged and no input
//! can make it panic. Under-redaction is a correctness bug caught by tests,
//! not a runtime failure.

use once_cell::sync::Lazy;
use regex::Regex;

// Pre-compiled patterns (compiled once, used on every call)

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]\d{4}\b").unwrap()
});

/// Labeled date of birth: "DOB: 01/02/1980", "date of birth 1980-02-01"
static DOB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:dob|date of birth|born(?: on)?)\s*[:\-]?\s*\d{1,4}[/\-.]\d{1,2}[/\-.]\d{1,4}\b",
    )
    .unwrap()
});

/// Labeled medical record number: "MRN: 12345678", "medical record # A1234567"
static MRN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:mrn|medical record(?: number)?)\s*[:#]?\s*[A-Z0-9][A-Z0-9\-]{4,11}\b")
        .unwrap()
});

/// Bare MRN-shaped token: an unbroken run of 7-10 digits. Long enough to
/// clear CPT codes (5 digits) and ICD-10 codes (alphanumeric).
static BARE_MRN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{7,10}\b").unwrap());

/// Name adjacent to a patient label: "patient: John Smith", "pt name Jane Doe".
/// The label is kept so the sentence still reads; only the name is masked.
static LABELED_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:\b[Pp]atient(?: [Nn]ame)?|\b[Pp]t(?: [Nn]ame)?|\b[Nn]ame)\s*[:\-]?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2})",
    )
    .unwrap()
});

/// Strip personally identifying text from raw dictation.
///
/// Returns the input with each recognized identifier replaced by a class
/// mask token. Text that matches no pattern is returned unchanged.
pub fn redact(text: &str) -> String {
    let mut out = EMAIL_PATTERN.replace_all(text, "[REDACTED-EMAIL]").into_owned();
    out = PHONE_PATTERN.replace_all(&out, "[REDACTED-PHONE]").into_owned();
    out = DOB_PATTERN.replace_all(&out, "[REDACTED-DOB]").into_owned();
    out = MRN_PATTERN.replace_all(&out, "[REDACTED-MRN]").into_owned();
    out = BARE_MRN_PATTERN.replace_all(&out, "[REDACTED-MRN]").into_owned();
    out = LABELED_NAME_PATTERN
        .replace_all(&out, |caps: &regex::Captures| {
            let full = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let label_len = full.len().saturating_sub(name.len());
            format!("{}[REDACTED-NAME]", &full[..label_len])
        })
        .into_owned();
    out
}
