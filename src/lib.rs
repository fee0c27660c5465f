//! Clinical order validation pipeline.
//!
//! Takes free-text clinical dictation and returns a structured, coded
//! decision-support result by prompting an LLM backend, with a
//! de-identification guarantee, deterministic context retrieval over the
//! code catalogs, tolerant response parsing, and provider fallback on
//! transport failure.
//!
//! The pipeline runs as a strict sequence per call:
//! redaction → keyword extraction → context retrieval → prompt building →
//! model invocation → interpretation, with the attempt recorded for audit
//! before the result is returned.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod interpreter;
pub mod invoker;
pub mod keywords;
pub mod orchestrator;
pub mod prompt;
pub mod redaction;
pub mod search;
pub mod store;
pub mod types;
pub mod vocabulary;


pub use catalog::{CatalogIndex, CatalogKind, CodeCatalogEntry, InMemoryCatalog};
pub use config::EngineConfig;
pub use interpreter::{ParseError, RecoveryPatterns, ResponseInterpreter};
pub use invoker::{BackendConfig, HttpChatBackend, ModelBackend, ModelError, ModelInvoker};
pub use keywords::{Keyword, KeywordCategory, KeywordExtractor};
pub use orchestrator::{ValidationError, ValidationOrchestrator};
pub use prompt::{InMemoryTemplateStore, PromptTemplate, TemplateStore};
pub use redaction::redact;
pub use search::{ContextQuery, ContextRetriever, RetrievedContext, SearchResult};
pub use store::{
    AttemptStore, InMemoryAttemptStore, InMemoryOrderStore, InMemoryUsageStore, ModelUsageRecord,
    Order, OrderStatus, OrderStore, StoreError, UsageStore, ValidationAttempt,
};
pub use types::{
    PatientInfo, SuggestedCode, ValidationContext, ValidationOutcome, ValidationResult,
    ValidationStatus,
};
pub use vocabulary::Vocabulary;
