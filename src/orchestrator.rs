//! The validation orchestrator: sequences the pipeline end to end.
//!
//! Redaction, keyword extraction, context retrieval, prompt building, model
//! invocation and interpretation run in strict order. Every collaborator is
//! an explicit injected interface, so tests substitute fakes without shared
//! process state. Only input and transport/bootstrap failures cross this
//! boundary as errors; interpretation failures degrade and persistence
//! failures are logged and swallowed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::CatalogIndex;
use crate::config::EngineConfig;
use crate::interpreter::ResponseInterpreter;
use crate::invoker::{HttpChatBackend, ModelBackend, ModelError, ModelInvoker};
use crate::keywords::KeywordExtractor;
use crate::prompt::{build_validation_prompt, prepare_dictation, render_context, TemplateStore};
use crate::redaction::redact;
use crate::search::ContextRetriever;
use crate::store::{AttemptStore, OrderStore, StoreError, UsageStore, ValidationAttempt};
use crate::types::{ValidationContext, ValidationOutcome};
use crate::vocabulary::Vocabulary;

/// Failures that cross the `run_validation` boundary.
///
/// Exactly two shapes reach callers: bad input, and infrastructure failure
/// (model backends terminally down, or the order row unavailable). Malformed
/// model output never appears here — it degrades inside the pipeline.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error("Model backend failure: {0}")]
    Model(#[from] ModelError),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

/// Owns the pipeline components and their injected collaborators.
pub struct ValidationOrchestrator {
    extractor: KeywordExtractor,
    retriever: ContextRetriever,
    templates: Arc<dyn TemplateStore>,
    invoker: ModelInvoker,
    interpreter: ResponseInterpreter,
    orders: Arc<dyn OrderStore>,
    attempts: Arc<dyn AttemptStore>,
    feedback_word_limit: usize,
    context_entry_limit: usize,
    context_char_budget: usize,
    test_mode: bool,
}

impl ValidationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        vocabulary: Vocabulary,
        catalog: Arc<dyn CatalogIndex>,
        templates: Arc<dyn TemplateStore>,
        orders: Arc<dyn OrderStore>,
        attempts: Arc<dyn AttemptStore>,
        usage: Arc<dyn UsageStore>,
        primary: Arc<dyn ModelBackend>,
        fallback: Option<Arc<dyn ModelBackend>>,
    ) -> Self {
        Self {
            extractor: KeywordExtractor::new(vocabulary),
            retriever: ContextRetriever::new(
                catalog,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            templates,
            invoker: ModelInvoker::new(primary, fallback, usage),
            interpreter: ResponseInterpreter::default(),
            orders,
            attempts,
            feedback_word_limit: config.feedback_word_limit,
            context_entry_limit: config.context_entry_limit,
            context_char_budget: config.context_char_budget,
            test_mode: config.test_mode,
        }
    }

    /// Build an orchestrator with HTTP backends from the config's backend
    /// settings and the vocabulary resource (built-in lists when no path is
    /// configured).
    pub fn from_config(
        config: &EngineConfig,
        catalog: Arc<dyn CatalogIndex>,
        templates: Arc<dyn TemplateStore>,
        orders: Arc<dyn OrderStore>,
        attempts: Arc<dyn AttemptStore>,
        usage: Arc<dyn UsageStore>,
    ) -> anyhow::Result<Self> {
        let vocabulary = match &config.vocabulary_path {
            Some(path) => Vocabulary::from_file(path)?,
            None => Vocabulary::default(),
        };
        let primary: Arc<dyn ModelBackend> =
            Arc::new(HttpChatBackend::new(config.primary_backend.clone())?);
        let fallback: Option<Arc<dyn ModelBackend>> = match &config.fallback_backend {
            Some(backend_config) => Some(Arc::new(HttpChatBackend::new(backend_config.clone())?)),
            None => None,
        };
        Ok(Self::new(
            config, vocabulary, catalog, templates, orders, attempts, usage, primary, fallback,
        ))
    }

    /// Run the full validation pipeline for one dictation.
    pub async fn run_validation(
        &self,
        dictation: &str,
        ctx: &ValidationContext,
    ) -> Result<ValidationOutcome, ValidationError> {
        if ctx.patient.patient_id.trim().is_empty() {
            return Err(ValidationError::InvalidInput(
                "Patient identifier is required".to_string(),
            ));
        }
        let prepared = prepare_dictation(dictation).map_err(ValidationError::InvalidInput)?;

        // Anchor every attempt to an order id, bootstrapping a draft when
        // the caller has none yet.
        let order_id = match ctx.order_id {
            Some(id) => {
                self.orders
                    .get(id)
                    .await?
                    .ok_or(ValidationError::OrderNotFound(id))?;
                id
            }
            None => {
                self.orders
                    .create_draft(ctx.user_id, ctx.organization_id)
                    .await?
            }
        };
        let attempt_number = self.attempts.reserve_attempt_number(order_id).await?;

        let sanitized = redact(&prepared);
        let keywords = self.extractor.extract(&sanitized);
        info!(
            "Validating order {} attempt {} ({} keywords)",
            order_id,
            attempt_number,
            keywords.len()
        );

        let context = self
            .retriever
            .retrieve_context(&keywords, self.context_entry_limit)
            .await;

        let template = self.templates.active_template().await?;
        let rendered_context = render_context(
            &context,
            self.context_entry_limit,
            self.context_char_budget,
        );
        let prompt = build_validation_prompt(
            &template,
            &sanitized,
            &rendered_context,
            self.feedback_word_limit,
            ctx.is_override,
        );

        let reply = self.invoker.invoke(&prompt).await?;

        // The single, explicit degrade point: parse failures become a
        // NeedsClarification result instead of an error.
        let result = match self.interpreter.parse(&reply.content) {
            Ok(result) => result,
            Err(parse_error) => self.interpreter.recover(&reply.content, &parse_error),
        };

        if self.test_mode {
            info!("Test mode: skipping attempt persistence for order {}", order_id);
        } else {
            let attempt = ValidationAttempt {
                id: Uuid::new_v4(),
                order_id,
                attempt_number,
                input_text: sanitized,
                status: result.status,
                compliance_score: result.compliance_score,
                diagnosis_codes: result.suggested_diagnosis_codes.clone(),
                procedure_codes: result.suggested_procedure_codes.clone(),
                user_id: ctx.user_id,
                created_at: Utc::now(),
            };
            // The clinical result is already computed; a failed audit write
            // must not take it away from the caller.
            if let Err(e) = self.attempts.record_attempt(attempt).await {
                warn!(
                    "Failed to record validation attempt {} for order {}: {}",
                    attempt_number, order_id, e
                );
            }
        }

        info!(
            "Order {} attempt {} validated: {:?} (score {})",
            order_id, attempt_number, result.status, result.compliance_score
        );

        Ok(ValidationOutcome {
            order_id,
            attempt_number,
            result,
        })
    }
}
