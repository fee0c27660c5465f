//! Versioned prompt templates and the prompt builder.
//!
//! The active template is read from the template store (the relational
//! store's "active default" row in production; an in-memory store here).
//! The builder interpolates the sanitized dictation, a size-bounded
//! rendering of the retrieved context, and the feedback word limit into the
//! template. The word limit is enforced by instruction inside the prompt —
//! never by truncating the model's output afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::search::{RetrievedContext, SearchResult};
use crate::store::StoreError;

/// Hard ceiling on dictation words sent to the model; longer dictations are
/// middle-truncated, keeping the opening complaint and the recent tail.
const MAX_DICTATION_WORDS: usize = 4_000;
/// Dictations below these floors carry too little signal to validate.
const MIN_DICTATION_CHARS: usize = 10;
const MIN_DICTATION_WORDS: usize = 3;

/// A versioned prompt template row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub version: u32,
    pub body: String,
    pub is_default: bool,
}

/// Read access to prompt templates ("active default" lookup).
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn active_template(&self) -> Result<PromptTemplate, StoreError>;
}

/// In-memory template store seeded with the built-in default template.
pub struct InMemoryTemplateStore {
    templates: RwLock<Vec<PromptTemplate>>,
}

impl Default for InMemoryTemplateStore {
    fn default() -> Self {
        Self {
            templates: RwLock::new(vec![PromptTemplate {
                name: "order-validation".to_string(),
                version: 3,
                body: DEFAULT_VALIDATION_TEMPLATE.to_string(),
                is_default: true,
            }]),
        }
    }
}

impl InMemoryTemplateStore {
    pub async fn insert(&self, template: PromptTemplate) {
        let mut templates = self.templates.write().await;
        if template.is_default {
            for existing in templates.iter_mut() {
                existing.is_default = false;
            }
        }
        templates.push(template);
    }
}

#[async_trait]
impl TemplateStore for InMemoryTemplateStore {
    async fn active_template(&self) -> Result<PromptTemplate, StoreError> {
        self.templates
            .read()
            .await
            .iter()
            .find(|t| t.is_default)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("active default prompt template".to_string()))
    }
}

/// Built-in validation template. Placeholders: `{{instructions}}`,
/// `{{context}}`, `{{dictation}}`, `{{word_limit}}`.
pub const DEFAULT_VALIDATION_TEMPLATE: &str = r#"You are a clinical decision support assistant reviewing an imaging order for appropriateness. {{instructions}}

Use the reference codes below when suggesting diagnoses and procedures. Suggest only codes supported by the dictation.

{{context}}

DICTATION:
{{dictation}}

RESPOND WITH ONLY THIS JSON STRUCTURE - NO OTHER TEXT:
{"validationStatus":"Appropriate | Inappropriate | NeedsClarification","complianceScore":0,"feedback":"string","suggestedICD10Codes":[{"code":"string","description":"string"}],"suggestedCPTCodes":[{"code":"string","description":"string"}],"internalReasoning":"string"}

Rules:
- Your entire response must be valid JSON - nothing else
- complianceScore is a whole number from 0 to 100
- Keep the feedback field under {{word_limit}} words
- Use empty arrays [] when no codes apply
- Do NOT include patient names or other identifying details in any field
"#;

const STANDARD_INSTRUCTIONS: &str = "Decide whether the requested study is appropriate \
for the clinical indication described in the dictation.";

const OVERRIDE_INSTRUCTIONS: &str = "The ordering clinician has reviewed a prior rejection \
of this order and is re-submitting it with their clinical judgment. Re-evaluate the order \
giving weight to the clinician's stated rationale; if you still cannot support it, say \
exactly what additional documentation would change the assessment.";

/// Validate and bound raw dictation before it enters the prompt.
///
/// Empty or near-empty dictation is an input error; over-long dictation is
/// middle-truncated with an explicit omission marker.
pub fn prepare_dictation(dictation: &str) -> Result<String, String> {
    let trimmed = dictation.trim();

    if trimmed.is_empty() {
        return Err("Dictation text cannot be empty".to_string());
    }
    if trimmed.len() < MIN_DICTATION_CHARS {
        return Err(format!(
            "Dictation too short ({} characters). Minimum {} characters required.",
            trimmed.len(),
            MIN_DICTATION_CHARS
        ));
    }
    let word_count = trimmed.split_whitespace().count();
    if word_count < MIN_DICTATION_WORDS {
        return Err(format!(
            "Dictation has too few words ({} words). Minimum {} words required.",
            word_count, MIN_DICTATION_WORDS
        ));
    }

    if word_count > MAX_DICTATION_WORDS {
        Ok(truncate_dictation(trimmed, word_count))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Keep 20% from the start (presentation, chief complaint) and 80% from the
/// end (the requested study and recent findings).
fn truncate_dictation(dictation: &str, word_count: usize) -> String {
    let words: Vec<&str> = dictation.split_whitespace().collect();
    let start_words = MAX_DICTATION_WORDS / 5;
    let end_words = MAX_DICTATION_WORDS - start_words;
    let omitted = word_count - MAX_DICTATION_WORDS;

    tracing::warn!(
        "Dictation truncated: {} words -> {} words ({} omitted from middle)",
        word_count,
        MAX_DICTATION_WORDS,
        omitted
    );

    format!(
        "{}\n[... {} words omitted ...]\n{}",
        words[..start_words].join(" "),
        omitted,
        words[word_count - end_words..].join(" ")
    )
}

/// Render the retrieved context as a bounded reference section.
pub fn render_context(context: &RetrievedContext, max_entries: usize, max_chars: usize) -> String {
    let mut out = String::new();

    render_section(
        &mut out,
        "RELEVANT DIAGNOSIS CODES (ICD-10):",
        &context.diagnosis,
        max_entries,
    );
    render_section(
        &mut out,
        "RELEVANT PROCEDURE CODES (CPT):",
        &context.procedure,
        max_entries,
    );

    if out.is_empty() {
        out.push_str("No reference codes matched the dictation.");
    }
    if out.len() > max_chars {
        out.truncate(max_chars);
        // Cut on a line boundary so the prompt stays readable
        if let Some(last_newline) = out.rfind('\n') {
            out.truncate(last_newline);
        }
    }
    out
}

fn render_section(out: &mut String, header: &str, results: &[SearchResult], max_entries: usize) {
    if results.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(header);
    out.push('\n');
    for result in results.iter().take(max_entries) {
        out.push_str(&format!(
            "- {}: {}\n",
            result.entry.code, result.entry.description
        ));
    }
}

/// Interpolate the template into the final model input string.
pub fn build_validation_prompt(
    template: &PromptTemplate,
    dictation: &str,
    rendered_context: &str,
    word_limit: usize,
    is_override: bool,
) -> String {
    let instructions = if is_override {
        OVERRIDE_INSTRUCTIONS
    } else {
        STANDARD_INSTRUCTIONS
    };

    template
        .body
        .replace("{{instructions}}", instructions)
        .replace("{{context}}", rendered_context)
        .replace("{{dictation}}", dictation)
        .replace("{{word_limit}}", &word_limit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CodeCatalogEntry;

    fn sample_context() -> RetrievedContext {
        RetrievedContext {
            diagnosis: vec![SearchResult {
                entry: CodeCatalogEntry::new("K35.80", "Acute appendicitis, unspecified"),
                score: 3.1,
            }],
            procedure: vec![SearchResult {
                entry: CodeCatalogEntry::new("74177", "CT abdomen and pelvis with contrast"),
                score: 53.0,
            }],
        }
    }

    async fn active_template() -> PromptTemplate {
        InMemoryTemplateStore::default()
            .active_template()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_store_has_active_template() {
        let template = active_template().await;
        assert!(template.is_default);
        assert!(template.body.contains("{{dictation}}"));
        assert!(template.body.contains("{{word_limit}}"));
    }

    #[tokio::test]
    async fn test_insert_new_default_replaces_marker() {
        let store = InMemoryTemplateStore::default();
        store
            .insert(PromptTemplate {
                name: "order-validation".to_string(),
                version: 4,
                body: "v4 {{dictation}}".to_string(),
                is_default: true,
            })
            .await;
        let active = store.active_template().await.unwrap();
        assert_eq!(active.version, 4);
    }

    #[tokio::test]
    async fn test_build_interpolates_everything() {
        let template = active_template().await;
        let context = render_context(&sample_context(), 5, 4_000);
        let prompt =
            build_validation_prompt(&template, "RLQ pain, r/o appendicitis", &context, 120, false);
        assert!(prompt.contains("RLQ pain, r/o appendicitis"));
        assert!(prompt.contains("K35.80"));
        assert!(prompt.contains("74177"));
        assert!(prompt.contains("under 120 words"));
        assert!(!prompt.contains("{{"));
    }

    #[tokio::test]
    async fn test_override_switches_instruction_branch() {
        let template = active_template().await;
        let normal = build_validation_prompt(&template, "some dictation here", "", 100, false);
        let override_prompt =
            build_validation_prompt(&template, "some dictation here", "", 100, true);
        assert!(!normal.contains("prior rejection"));
        assert!(override_prompt.contains("prior rejection"));
    }

    #[test]
    fn test_render_context_caps_entries() {
        let mut context = sample_context();
        for i in 0..20 {
            context.procedure.push(SearchResult {
                entry: CodeCatalogEntry::new(&format!("7{:04}", i), "Filler study"),
                score: 1.0,
            });
        }
        let rendered = render_context(&context, 3, 10_000);
        assert_eq!(rendered.matches("- 7").count(), 3);
    }

    #[test]
    fn test_render_context_respects_char_budget() {
        let context = sample_context();
        let rendered = render_context(&context, 5, 60);
        assert!(rendered.len() <= 60);
    }

    #[test]
    fn test_render_context_empty() {
        let rendered = render_context(&RetrievedContext::default(), 5, 1_000);
        assert!(rendered.contains("No reference codes"));
    }

    #[test]
    fn test_prepare_dictation_rejects_empty_and_short() {
        assert!(prepare_dictation("").is_err());
        assert!(prepare_dictation("   ").is_err());
        assert!(prepare_dictation("CT now").is_err());
    }

    #[test]
    fn test_prepare_dictation_passes_normal_text() {
        let text = "43 y/o male, RLQ pain, r/o appendicitis, request CT abdomen/pelvis w/ contrast";
        assert_eq!(prepare_dictation(text).unwrap(), text);
    }

    #[test]
    fn test_prepare_dictation_truncates_middle() {
        let words: Vec<String> = (0..10_000).map(|i| format!("w{}", i)).collect();
        let prepared = prepare_dictation(&words.join(" ")).unwrap();
        assert!(prepared.contains("w0"));
        assert!(prepared.contains("w9999"));
        assert!(prepared.contains("words omitted"));
        assert!(prepared.split_whitespace().count() <= MAX_DICTATION_WORDS + 10);
    }
}
