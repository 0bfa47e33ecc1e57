use crate::corpus::embed_weighted;
use crate::normalize::Normalizer;
use crate::session::SessionContext;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Partial weight given to related terms injected by semantic expansion.
pub const EXPANSION_WEIGHT: f32 = 0.5;
/// Queries shorter than this many tokens get history blended in.
pub const SHORT_QUERY_TOKENS: usize = 4;
/// Blend weights for the last three history entries, most recent first,
/// each scaled by the session confidence.
pub const HISTORY_BLEND: [f32; 3] = [0.4, 0.3, 0.2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Definition,
    Comparison,
    List,
    /// Domain-specific: answered by the external router, not the corpus.
    Calculation,
    General,
}

impl Intent {
    pub fn all() -> [Intent; 5] {
        [
            Intent::Definition,
            Intent::Comparison,
            Intent::List,
            Intent::Calculation,
            Intent::General,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Intent::Definition => "definition",
            Intent::Comparison => "comparison",
            Intent::List => "list",
            Intent::Calculation => "calculation",
            Intent::General => "general",
        }
    }
}

lazy_static! {
    /// Ordered dispatch table: the first matching rule wins. The ordering is
    /// a priority policy; General is the catch-all when nothing matches.
    static ref INTENT_RULES: Vec<(Intent, Regex)> = vec![
        (
            Intent::Definition,
            Regex::new(r"(?i)^\s*(what\s+(is|are)\b|define\b|meaning\s+of\b|explain\b)").unwrap(),
        ),
        (
            Intent::Comparison,
            Regex::new(r"(?i)\b(compare|versus|vs\.?|difference\s+between)\b").unwrap(),
        ),
        (
            Intent::List,
            Regex::new(r"(?i)\b(list\b|examples?\s+of|types?\s+of|kinds?\s+of)").unwrap(),
        ),
        (
            Intent::Calculation,
            Regex::new(r"(?i)(\d+\s*[-+*/^]\s*\d+|\b(calculate|compute|convert|how\s+many)\b)")
                .unwrap(),
        ),
    ];
    static ref RELATED_TERMS: HashMap<&'static str, &'static [&'static str]> = {
        let pairs: &[(&str, &[&str])] = &[
            ("quantum", &["qubit", "superposition"]),
            ("qubit", &["quantum", "superposition"]),
            ("neural", &["network", "learning"]),
            ("network", &["neural", "node"]),
            ("learning", &["training", "model"]),
            ("energy", &["power", "solar"]),
            ("space", &["orbit", "planet"]),
            ("cell", &["biology", "organism"]),
            ("climate", &["warming", "carbon"]),
            ("internet", &["network", "protocol"]),
            ("encryption", &["cipher", "security"]),
        ];
        pairs.iter().copied().collect()
    };
}

/// Concept tags: a token matches a concept when it appears in the concept's
/// keyword list. Keyword entries are stem-consistent with the normalizer.
pub const CONCEPTS: &[(&str, &[&str])] = &[
    (
        "computing",
        &["computer", "processor", "algorithm", "software", "hardware", "comput", "program"],
    ),
    (
        "physics",
        &["quantum", "qubit", "particle", "photon", "superposition", "relativity", "atom"],
    ),
    (
        "ai",
        &["artificial", "intelligence", "neural", "model", "training", "learning", "machine"],
    ),
    (
        "biology",
        &["cell", "organism", "gene", "protein", "evolution", "dna"],
    ),
    (
        "energy",
        &["solar", "power", "battery", "fusion", "renewable", "electricity"],
    ),
    (
        "space",
        &["planet", "orbit", "star", "galaxy", "telescope", "satellite"],
    ),
];

pub fn related_terms(token: &str) -> Option<&'static [&'static str]> {
    RELATED_TERMS.get(token).copied()
}

/// Ephemeral weighted view of one query; discarded after the query
/// completes except for what the session history copies out.
#[derive(Debug, Clone)]
pub struct QueryVector {
    pub raw: String,
    pub tokens: Vec<String>,
    pub phrases: HashSet<String>,
    pub weights: HashMap<String, f32>,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    pub vector: QueryVector,
    pub intent: Intent,
    pub concepts: Vec<String>,
}

pub fn detect_intent(raw: &str) -> Intent {
    for (intent, rule) in INTENT_RULES.iter() {
        if rule.is_match(raw) {
            return *intent;
        }
    }
    Intent::General
}

/// Turn a raw query plus session context into a weighted term vector,
/// detected intent, and concept tags.
pub fn analyze(raw: &str, session: &SessionContext, normalizer: &mut Normalizer) -> AnalyzedQuery {
    let tokens = normalizer.normalize(raw);

    let mut weights: HashMap<String, f32> = HashMap::new();
    for token in &tokens {
        *weights.entry(token.clone()).or_insert(0.0) += 1.0;
    }

    // Semantic expansion adds related terms at partial weight; it never
    // replaces the original token.
    for token in &tokens {
        if let Some(related) = related_terms(token) {
            for term in related {
                *weights.entry(term.to_string()).or_insert(0.0) += EXPANSION_WEIGHT;
            }
        }
    }

    // Short queries lean on recent history, most recent weighted highest.
    if tokens.len() < SHORT_QUERY_TOKENS && !session.history.is_empty() {
        for (i, entry) in session.history.iter().rev().take(HISTORY_BLEND.len()).enumerate() {
            let blend = HISTORY_BLEND[i] * session.confidence;
            if blend <= 0.0 {
                continue;
            }
            for token in normalizer.normalize(&entry.query) {
                *weights.entry(token).or_insert(0.0) += blend;
            }
        }
    }

    let mut phrases: HashSet<String> = HashSet::new();
    for window in tokens.windows(2) {
        phrases.insert(window.join(" "));
    }
    for window in tokens.windows(3) {
        phrases.insert(window.join(" "));
    }

    let weighted: Vec<(String, f32)> = weights
        .iter()
        .map(|(t, w)| (t.clone(), *w))
        .collect();
    let embedding = embed_weighted(&weighted);

    let token_set: HashSet<&str> = tokens.iter().map(|s| s.as_str()).collect();
    let concepts: Vec<String> = CONCEPTS
        .iter()
        .filter(|(_, kws)| kws.iter().any(|k| token_set.contains(k)))
        .map(|(name, _)| name.to_string())
        .collect();

    let intent = detect_intent(raw);
    tracing::debug!(
        intent = intent.label(),
        tokens = tokens.len(),
        concepts = concepts.len(),
        "query analyzed"
    );

    AnalyzedQuery {
        vector: QueryVector {
            raw: raw.to_string(),
            tokens,
            phrases,
            weights,
            embedding,
        },
        intent,
        concepts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HistoryEntry;

    #[test]
    fn intent_rules_fire_in_priority_order() {
        assert_eq!(detect_intent("what is quantum computing"), Intent::Definition);
        assert_eq!(detect_intent("compare solar and wind"), Intent::Comparison);
        assert_eq!(detect_intent("list examples of planets"), Intent::List);
        assert_eq!(detect_intent("calculate 12 * 9"), Intent::Calculation);
        assert_eq!(detect_intent("tell me about black holes"), Intent::General);
        // Definition is checked before comparison, so a leading "what is"
        // wins even when comparison words appear later.
        assert_eq!(
            detect_intent("what is the difference between ram and rom"),
            Intent::Definition
        );
    }

    #[test]
    fn expansion_adds_partial_weight_terms() {
        let session = SessionContext::default();
        let mut n = Normalizer::new();
        let analyzed = analyze("quantum mechanics basics today", &session, &mut n);
        assert_eq!(analyzed.vector.weights.get("qubit"), Some(&EXPANSION_WEIGHT));
        // The original token keeps its full count.
        assert_eq!(analyzed.vector.weights.get("quantum"), Some(&1.0));
    }

    #[test]
    fn short_queries_blend_history() {
        let mut session = SessionContext::default();
        session.confidence = 1.0;
        session.note_query(
            HistoryEntry {
                query: "solar panels".to_string(),
                topic: Some("energy".to_string()),
                intent: Intent::General,
                concepts: vec![],
                timestamp: 0,
            },
            None,
        );
        let mut n = Normalizer::new();
        let analyzed = analyze("tell me", &session, &mut n);
        assert!(analyzed.vector.weights.contains_key("solar"));
        // Long queries do not blend.
        let analyzed = analyze("quantum computers use many qubits daily", &session, &mut n);
        assert!(!analyzed.vector.weights.contains_key("solar"));
    }

    #[test]
    fn concepts_come_from_keyword_membership() {
        let session = SessionContext::default();
        let mut n = Normalizer::new();
        let analyzed = analyze("how do qubits work", &session, &mut n);
        assert!(analyzed.concepts.contains(&"physics".to_string()));
    }
}
