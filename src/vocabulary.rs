//! Categorized clinical vocabulary for keyword extraction.
//!
//! Four fixed term lists (anatomy, modality, symptom/condition,
//! abbreviation) drive token classification. The vocabulary is an ordinary
//! value — built-in defaults or loaded from a JSON resource file — so a
//! deployment can tune it without touching code.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Term lists keyed by category. All terms are stored lower-cased.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    pub anatomy: HashSet<String>,
    pub modality: HashSet<String>,
    pub symptom: HashSet<String>,
    pub abbreviation: HashSet<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            anatomy: term_set(&[
                "head", "brain", "skull", "sinus", "orbit", "neck", "spine", "cervical",
                "thoracic", "lumbar", "sacrum", "chest", "thorax", "lung", "heart", "mediastinum",
                "abdomen", "abdominal", "pelvis", "pelvic", "liver", "pancreas", "spleen",
                "kidney", "renal", "bladder", "appendix", "bowel", "colon", "stomach",
                "shoulder", "elbow", "wrist", "hand", "hip", "knee", "ankle", "foot", "femur",
                "tibia", "humerus", "extremity", "breast", "thyroid", "aorta", "gallbladder",
            ]),
            modality: term_set(&[
                "ct", "mri", "mr", "xray", "x-ray", "radiograph", "ultrasound", "us", "pet",
                "pet-ct", "nuclear", "fluoroscopy", "mammogram", "mammography", "angiogram",
                "angiography", "dexa", "doppler", "contrast", "noncontrast", "gadolinium",
                "scan", "imaging", "tomography",
            ]),
            symptom: term_set(&[
                "pain", "ache", "swelling", "mass", "lump", "fever", "nausea", "vomiting",
                "headache", "dizziness", "syncope", "fatigue", "weakness", "numbness",
                "tingling", "bleeding", "cough", "dyspnea", "palpitations", "tenderness",
                "trauma", "injury", "fracture", "appendicitis", "cholecystitis", "pancreatitis",
                "diverticulitis", "pneumonia", "embolism", "stenosis", "obstruction", "stone",
                "tumor", "cancer", "lesion", "infection", "seizure", "stroke", "hematuria",
                "jaundice", "distension",
            ]),
            abbreviation: term_set(&[
                "r/o", "s/p", "c/o", "w/", "w/o", "f/u", "h/o", "y/o", "rlq", "llq", "ruq",
                "luq", "sob", "cp", "htn", "dm", "copd", "chf", "cva", "mi", "uti", "dvt",
                "pe", "ca", "fx", "hx", "px", "abd", "bilat", "prn", "stat", "nos",
            ]),
        }
    }
}

fn term_set(terms: &[&str]) -> HashSet<String> {
    terms.iter().map(|t| t.to_lowercase()).collect()
}

impl Vocabulary {
    /// Load a vocabulary from a JSON resource file.
    ///
    /// The file carries the same shape as the serialized struct; terms are
    /// lower-cased on load so lookups stay case-insensitive.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary file {:?}", path))?;
        let raw: Vocabulary = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse vocabulary file {:?}", path))?;
        Ok(Self {
            anatomy: lower_all(raw.anatomy),
            modality: lower_all(raw.modality),
            symptom: lower_all(raw.symptom),
            abbreviation: lower_all(raw.abbreviation),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.anatomy.is_empty()
            && self.modality.is_empty()
            && self.symptom.is_empty()
            && self.abbreviation.is_empty()
    }

    pub fn term_count(&self) -> usize {
        self.anatomy.len() + self.modality.len() + self.symptom.len() + self.abbreviation.len()
    }
}

fn lower_all(set: HashSet<String>) -> HashSet<String> {
    set.into_iter().map(|t| t.to_lowercase()).collect()
}
