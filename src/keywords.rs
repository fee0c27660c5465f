//! Keyword extraction from sanitized dictation.
//!
//! Tokenizes on word boundaries, lower-cases, and classifies each token
//! against the vocabulary lists. Classification is first-match-wins in a
//! fixed priority order (anatomy, modality, symptom, abbreviation). Tokens
//! found in no list are discarded — only medically meaningful tokens reach
//! context retrieval. Source order is preserved so context construction is
//! reproducible.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::vocabulary::Vocabulary;

/// Category assigned to an extracted keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeywordCategory {
    Anatomy,
    Modality,
    Symptom,
    Abbreviation,
}

/// A normalized token with its assigned category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyword {
    pub text: String,
    pub category: KeywordCategory,
}

/// Classifies dictation tokens against an injected vocabulary.
pub struct KeywordExtractor {
    vocabulary: Vocabulary,
}

impl KeywordExtractor {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    /// Extract categorized keywords from sanitized text.
    ///
    /// Duplicates collapse to their first occurrence; discovery order is
    /// preserved.
    pub fn extract(&self, text: &str) -> Vec<Keyword> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut keywords = Vec::new();

        for raw in text.split_whitespace() {
            let token = normalize_token(raw);
            if token.is_empty() {
                continue;
            }

            if let Some(category) = self.classify(&token) {
                if seen.insert(token.clone()) {
                    keywords.push(Keyword {
                        text: token,
                        category,
                    });
                }
                continue;
            }

            // Slash compounds like "abdomen/pelvis" match no list as a whole;
            // fall back to per-segment lookup. "r/o" never reaches this path
            // because the full token matches the abbreviation list.
            if token.contains('/') {
                for segment in token.split('/') {
                    let segment = normalize_token(segment);
                    if segment.is_empty() {
                        continue;
                    }
                    if let Some(category) = self.classify(&segment) {
                        if seen.insert(segment.clone()) {
                            keywords.push(Keyword {
                                text: segment,
                                category,
                            });
                        }
                    }
                }
            }
        }

        keywords
    }

    /// First-match-wins category lookup: anatomy, then modality, then
    /// symptom, then abbreviation.
    fn classify(&self, token: &str) -> Option<KeywordCategory> {
        if self.vocabulary.anatomy.contains(token) {
            Some(KeywordCategory::Anatomy)
        } else if self.vocabulary.modality.contains(token) {
            Some(KeywordCategory::Modality)
        } else if self.vocabulary.symptom.contains(token) {
            Some(KeywordCategory::Symptom)
        } else if self.vocabulary.abbreviation.contains(token) {
            Some(KeywordCategory::Abbreviation)
        } else {
            None
        }
    }
}

/// Lower-case and trim surrounding punctuation, keeping internal slashes and
/// hyphens so tokens like "r/o", "w/" and "x-ray" survive intact.
fn normalize_token(raw: &str) -> String {
    raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '/')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> KeywordExtractor {
        KeywordExtractor::new(Vocabulary::default())
    }

    #[test]
    fn test_extract_rlq_dictation() {
        let text = "43 y/o male, RLQ pain, r/o appendicitis, request CT abdomen/pelvis w/ contrast";
        let keywords = extractor().extract(text);

        let find = |t: &str| keywords.iter().find(|k| k.text == t);
        assert_eq!(find("abdomen").unwrap().category, KeywordCategory::Anatomy);
        assert_eq!(find("pelvis").unwrap().category, KeywordCategory::Anatomy);
        assert_eq!(find("ct").unwrap().category, KeywordCategory::Modality);
        assert_eq!(find("pain").unwrap().category, KeywordCategory::Symptom);
        assert_eq!(find("r/o").unwrap().category, KeywordCategory::Abbreviation);
    }

    #[test]
    fn test_unknown_tokens_discarded() {
        let keywords = extractor().extract("the quick patient requests something");
        assert!(keywords.is_empty());
    }

    #[test]
    fn test_source_order_preserved() {
        let keywords = extractor().extract("pain in the abdomen, order ct");
        let texts: Vec<&str> = keywords.iter().map(|k| k.text.as_str()).collect();
        assert_eq!(texts, vec!["pain", "abdomen", "ct"]);
    }

    #[test]
    fn test_duplicates_collapse_to_first() {
        let keywords = extractor().extract("pain pain abdomen pain");
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].text, "pain");
        assert_eq!(keywords[1].text, "abdomen");
    }

    #[test]
    fn test_priority_order_is_fixed() {
        // "contrast" only appears in the modality list; make sure a term
        // present in an earlier list wins even if a later list also has it.
        let mut vocab = Vocabulary::default();
        vocab.symptom.insert("contrast".to_string());
        let keywords = KeywordExtractor::new(vocab).extract("with contrast");
        assert_eq!(keywords[0].category, KeywordCategory::Modality);
    }

    #[test]
    fn test_punctuation_trimmed() {
        let keywords = extractor().extract("(pain), abdomen. CT;");
        let texts: Vec<&str> = keywords.iter().map(|k| k.text.as_str()).collect();
        assert_eq!(texts, vec!["pain", "abdomen", "ct"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(extractor().extract("").is_empty());
        assert!(extractor().extract("   \t  ").is_empty());
    }
}
