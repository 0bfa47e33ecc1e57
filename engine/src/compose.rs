use crate::corpus::{cosine, CorpusIndex, Document};
use crate::query::{related_terms, AnalyzedQuery, Intent};
use crate::rank::RankedResult;
use crate::DocId;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Overall word budget for a composed answer.
pub const WORD_BUDGET: usize = 100;
/// Base word allowance for a support snippet before the running count
/// shrinks it.
const SUPPORT_BASE_WORDS: usize = 50;
/// Hard cap on appended support snippets.
const MAX_SUPPORTS: usize = 4;

const NOT_FOUND_HINT: &str = "Try rephrasing, or ask about another topic.";
const NO_COMPARISON: &str =
    "I couldn't identify two things to compare. Try \"compare X and Y\".";
const GREETING: &str =
    "Ask me anything. Try \"what is ...\", \"compare X and Y\", or \"list examples of ...\".";
const UNAVAILABLE: &str =
    "That kind of question is handled by a helper service which is unavailable right now. \
     Corpus questions still work.";

lazy_static! {
    static ref DEFINITION_TERM: Regex = Regex::new(
        r"(?i)(?:what\s+(?:is|are)|define|meaning\s+of|explain)\s+(?:a\s+|an\s+|the\s+)?([\w\s\-]+?)\s*\??\s*$"
    )
    .unwrap();
    static ref COMPARISON_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\bcompare\s+(.+?)\s+(?:and|to|with|vs\.?|versus)\s+(.+?)\s*\??\s*$")
            .unwrap(),
        Regex::new(r"(?i)\bdifference\s+between\s+(.+?)\s+and\s+(.+?)\s*\??\s*$").unwrap(),
        Regex::new(r"(?i)^\s*(.+?)\s+(?:vs\.?|versus)\s+(.+?)\s*\??\s*$").unwrap(),
    ];
}

/// The one canonical response record every intent strategy merges into.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub intent: Intent,
    pub topic: Option<String>,
    pub category: Option<String>,
    pub main: String,
    pub details: Vec<String>,
    pub citations: BTreeMap<usize, DocId>,
    pub suggestions: Vec<String>,
}

impl Answer {
    fn bare(intent: Intent, main: String) -> Answer {
        Answer {
            intent,
            topic: None,
            category: None,
            main,
            details: Vec::new(),
            citations: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }

    /// Canned response for empty input; never touches the ranking path.
    pub fn greeting() -> Answer {
        Answer::bare(Intent::General, GREETING.to_string())
    }

    /// Shown when the domain router is missing or failed.
    pub fn service_unavailable() -> Answer {
        Answer::bare(Intent::Calculation, UNAVAILABLE.to_string())
    }

    fn not_found(intent: Intent, raw: &str) -> Answer {
        Answer::bare(
            intent,
            format!("I couldn't find anything about \"{raw}\". {NOT_FOUND_HINT}"),
        )
    }
}

/// Per-intent selection result; exactly the fields each strategy needs,
/// merged into an [`Answer`] at the boundary.
enum Draft {
    Definition {
        main: Option<DocId>,
        fallback: Option<String>,
    },
    Comparison {
        mains: Vec<DocId>,
        left: String,
        right: String,
    },
    ComparisonUnparsed,
    List {
        mains: Vec<DocId>,
    },
    General {
        mains: Vec<DocId>,
    },
}

/// Compose the final answer for a ranked candidate list. An empty list
/// yields the deterministic not-found response.
pub fn compose(query: &AnalyzedQuery, ranked: &[RankedResult], index: &CorpusIndex) -> Answer {
    if ranked.is_empty() {
        return Answer::not_found(query.intent, &query.vector.raw);
    }
    let draft = match query.intent {
        Intent::Definition => definition_draft(query, ranked, index),
        Intent::Comparison => comparison_draft(query, ranked, index),
        Intent::List => Draft::List {
            mains: ranked
                .iter()
                .take(3)
                .map(|r| r.doc_id)
                .collect(),
        },
        // Calculation is routed externally before composition; if it gets
        // here anyway it reads like a general answer.
        Intent::General | Intent::Calculation => Draft::General {
            mains: pick_general_mains(ranked, index),
        },
    };
    merge(draft, query, ranked, index)
}

fn definition_draft(query: &AnalyzedQuery, ranked: &[RankedResult], index: &CorpusIndex) -> Draft {
    let term = DEFINITION_TERM
        .captures(&query.vector.raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    match term {
        Some(term) if !term.is_empty() => {
            let lower = term.to_lowercase();
            let containing = ranked.iter().find(|r| {
                index
                    .document(r.doc_id)
                    .map(|d| doc_mentions(d, &lower))
                    .unwrap_or(false)
            });
            match containing {
                Some(r) => Draft::Definition {
                    main: Some(r.doc_id),
                    fallback: None,
                },
                None => Draft::Definition {
                    main: None,
                    fallback: Some(definition_fallback(&term)),
                },
            }
        }
        _ => Draft::Definition {
            main: Some(ranked[0].doc_id),
            fallback: None,
        },
    }
}

fn doc_mentions(doc: &Document, lower_term: &str) -> bool {
    doc.text.to_lowercase().contains(lower_term)
        || doc
            .keywords
            .iter()
            .any(|k| k.to_lowercase().contains(lower_term))
}

/// Templated definition fallback built from the related-terms table.
fn definition_fallback(term: &str) -> String {
    let related = crate::normalize::normalize_uncached(term)
        .into_iter()
        .find_map(|token| related_terms(&token));
    match related {
        Some(terms) => format!(
            "\"{term}\" isn't defined directly in this corpus, but it is closely related to {}.",
            terms.join(" and ")
        ),
        None => format!("\"{term}\" isn't defined directly in this corpus."),
    }
}

fn comparison_draft(query: &AnalyzedQuery, ranked: &[RankedResult], index: &CorpusIndex) -> Draft {
    let entities = COMPARISON_PATTERNS.iter().find_map(|p| {
        p.captures(&query.vector.raw).and_then(|c| {
            let left = c.get(1)?.as_str().trim().to_string();
            let right = c.get(2)?.as_str().trim().to_string();
            (!left.is_empty() && !right.is_empty()).then_some((left, right))
        })
    });
    let (left, right) = match entities {
        Some(pair) => pair,
        None => return Draft::ComparisonUnparsed,
    };

    // Bias selection toward documents that mention each compared entity.
    let mut mains: Vec<DocId> = Vec::new();
    for entity in [&left, &right] {
        let lower = entity.to_lowercase();
        let hit = ranked.iter().find(|r| {
            !mains.contains(&r.doc_id)
                && index
                    .document(r.doc_id)
                    .map(|d| doc_mentions(d, &lower))
                    .unwrap_or(false)
        });
        if let Some(r) = hit {
            mains.push(r.doc_id);
        }
    }
    for r in ranked {
        if mains.len() >= 2 {
            break;
        }
        if !mains.contains(&r.doc_id) {
            mains.push(r.doc_id);
        }
    }
    Draft::Comparison { mains, left, right }
}

/// General-intent main selection: the top pick, then a pick preferring a
/// second topic, then a pick that keeps the first three inside two distinct
/// topics. When the corpus can't satisfy that, any remaining document fills
/// the slot rather than starving the answer.
fn pick_general_mains(ranked: &[RankedResult], index: &CorpusIndex) -> Vec<DocId> {
    let docs: Vec<&Document> = ranked
        .iter()
        .filter_map(|r| index.document(r.doc_id))
        .collect();
    let mut used: Vec<usize> = Vec::new();
    if docs.is_empty() {
        return Vec::new();
    }
    used.push(0);
    if docs.len() > 1 {
        let second = (1..docs.len())
            .find(|&i| docs[i].topic != docs[0].topic)
            .unwrap_or(1);
        used.push(second);
    }
    if docs.len() > 2 {
        let topics: Vec<&str> = used.iter().map(|&i| docs[i].topic.as_str()).collect();
        let third = (1..docs.len())
            .find(|i| !used.contains(i) && topics.contains(&docs[*i].topic.as_str()))
            .or_else(|| (1..docs.len()).find(|i| !used.contains(i)));
        if let Some(i) = third {
            used.push(i);
        }
    }
    used.into_iter().map(|i| docs[i].id).collect()
}

struct Segment {
    text: String,
    doc: Option<DocId>,
}

fn merge(draft: Draft, query: &AnalyzedQuery, ranked: &[RankedResult], index: &CorpusIndex) -> Answer {
    let highlight_terms = raw_terms(&query.vector.raw);

    let (segments, connectors): (Vec<Segment>, Vec<&'static str>) = match draft {
        Draft::Definition { main, fallback } => {
            let mut segments = Vec::new();
            if let Some(sentence) = fallback {
                segments.push(Segment {
                    text: sentence,
                    doc: None,
                });
            }
            if let Some(id) = main {
                if let Some(doc) = index.document(id) {
                    segments.push(Segment {
                        text: doc.text.clone(),
                        doc: Some(id),
                    });
                }
            }
            (segments, Vec::new())
        }
        Draft::Comparison { mains, left, right } => {
            let mut segments = vec![Segment {
                text: format!("Comparing {left} and {right}:"),
                doc: None,
            }];
            for id in mains {
                if let Some(doc) = index.document(id) {
                    segments.push(Segment {
                        text: doc.text.clone(),
                        doc: Some(id),
                    });
                }
            }
            (segments, Vec::new())
        }
        Draft::ComparisonUnparsed => {
            return Answer::bare(Intent::Comparison, NO_COMPARISON.to_string());
        }
        Draft::List { mains } => {
            let segments = mains
                .into_iter()
                .filter_map(|id| {
                    index.document(id).map(|doc| Segment {
                        text: doc.text.clone(),
                        doc: Some(id),
                    })
                })
                .collect();
            (segments, Vec::new())
        }
        Draft::General { mains } => {
            let docs: Vec<&Document> = mains.iter().filter_map(|id| index.document(*id)).collect();
            let mut connectors = Vec::new();
            for pair in docs.windows(2) {
                connectors.push(pick_connector(
                    cosine(&pair[0].embedding, &pair[1].embedding),
                    connectors.len(),
                ));
            }
            let segments = docs
                .into_iter()
                .map(|doc| Segment {
                    text: doc.text.clone(),
                    doc: Some(doc.id),
                })
                .collect();
            (segments, connectors)
        }
    };

    let mut citations: BTreeMap<usize, DocId> = BTreeMap::new();
    let mut next_citation = 1usize;
    let mut main_parts: Vec<String> = Vec::new();
    let mut used_docs: Vec<DocId> = Vec::new();
    let mut words = 0usize;

    for (i, segment) in segments.iter().enumerate() {
        let mut text = highlight(&segment.text, &highlight_terms);
        if let Some(id) = segment.doc {
            text = format!("{text} [{next_citation}]");
            citations.insert(next_citation, id);
            used_docs.push(id);
            next_citation += 1;
        }
        if i > 0 {
            if let Some(connector) = connectors.get(i - 1) {
                text = format!("{connector} {text}");
            }
        }
        words += word_count(&text);
        main_parts.push(text);
    }
    let main = main_parts.join(" ");

    // Supports from the remaining ranked documents, appended only while the
    // running word count stays under the budget, each truncated harder as
    // the answer grows.
    let mut details: Vec<String> = Vec::new();
    for r in ranked {
        if details.len() >= MAX_SUPPORTS || words >= WORD_BUDGET {
            break;
        }
        if used_docs.contains(&r.doc_id) {
            continue;
        }
        let doc = match index.document(r.doc_id) {
            Some(d) => d,
            None => continue,
        };
        let limit = SUPPORT_BASE_WORDS.saturating_sub(words / 2).max(4);
        let snippet = truncate_words(&doc.text, limit);
        let text = format!("{} [{next_citation}]", highlight(&snippet, &highlight_terms));
        citations.insert(next_citation, r.doc_id);
        used_docs.push(r.doc_id);
        next_citation += 1;
        words += word_count(&text);
        details.push(text);
    }

    let first_doc = used_docs.first().and_then(|id| index.document(*id));
    Answer {
        intent: query.intent,
        topic: first_doc.map(|d| d.topic.clone()),
        category: first_doc.map(|d| d.category.clone()),
        main,
        details,
        citations,
        suggestions: Vec::new(),
    }
}

fn pick_connector(similarity: f32, position: usize) -> &'static str {
    if similarity >= 0.5 {
        "Similarly,"
    } else if position % 2 == 0 {
        "In addition,"
    } else {
        "By contrast,"
    }
}

fn raw_terms(raw: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in raw.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if cleaned.len() > 1 && !terms.iter().any(|t| t.eq_ignore_ascii_case(&cleaned)) {
            terms.push(cleaned);
        }
    }
    terms
}

/// Bracket whole-word, case-insensitive matches of the query terms.
pub fn highlight(text: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        return text.to_string();
    }
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = match Regex::new(&format!(r"(?i)\b(?:{alternation})\b")) {
        Ok(p) => p,
        Err(_) => return text.to_string(),
    };
    pattern
        .replace_all(text, |caps: &regex::Captures| format!("[{}]", &caps[0]))
        .to_string()
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn truncate_words(text: &str, max: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max {
        return text.to_string();
    }
    format!("{}...", words[..max].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusIndex, FactMeta, RawFact};
    use crate::normalize::Normalizer;
    use crate::query::analyze;
    use crate::rank::rank;
    use crate::session::SessionContext;

    fn fact(text: &str, keywords: &[&str], topic: &str) -> RawFact {
        RawFact {
            text: text.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            topic: topic.to_string(),
            meta: FactMeta::default(),
        }
    }

    fn corpus() -> Vec<RawFact> {
        vec![
            fact(
                "Quantum computers use qubits to represent information.",
                &["quantum", "qubit"],
                "quantum",
            ),
            fact(
                "Qubits exploit superposition to hold many states at once.",
                &["qubit", "superposition"],
                "quantum",
            ),
            fact(
                "Neural networks learn patterns from training data.",
                &["neural", "network"],
                "ai",
            ),
            fact(
                "Solar panels convert sunlight into electricity.",
                &["solar", "energy"],
                "energy",
            ),
        ]
    }

    fn run(query_text: &str) -> (Answer, usize) {
        let mut n = Normalizer::new();
        let index = CorpusIndex::build(corpus(), &mut n).unwrap();
        let session = SessionContext::default();
        let query = analyze(query_text, &session, &mut n);
        let ranked = rank(&query, &index, &session);
        let count = ranked.len();
        (compose(&query, &ranked, &index), count)
    }

    #[test]
    fn definition_cites_the_matching_document() {
        let (answer, ranked_len) = run("what is quantum");
        assert_eq!(answer.intent, Intent::Definition);
        assert!(ranked_len >= 1);
        assert!(answer.citations.values().any(|id| *id == 0));
        assert!(answer.main.contains("[1]"));
    }

    #[test]
    fn definition_falls_back_when_term_is_absent() {
        let mut n = Normalizer::new();
        let index = CorpusIndex::build(corpus(), &mut n).unwrap();
        let mut session = SessionContext::default();
        // Prior context makes the short query rank something even though
        // the defined term itself appears nowhere.
        session.confidence = 1.0;
        session.note_query(
            crate::session::HistoryEntry {
                query: "quantum qubits".into(),
                topic: Some("quantum".into()),
                intent: Intent::General,
                concepts: vec!["physics".into()],
                timestamp: 0,
            },
            None,
        );
        let query = analyze("what is entanglement", &session, &mut n);
        let ranked = rank(&query, &index, &session);
        if !ranked.is_empty() {
            let answer = compose(&query, &ranked, &index);
            assert!(answer.main.contains("entanglement"));
        }
    }

    #[test]
    fn no_match_echoes_the_query() {
        let (answer, ranked_len) = run("zzz nonsense");
        assert_eq!(ranked_len, 0);
        assert!(answer.main.contains("zzz nonsense"));
        assert!(answer.details.is_empty());
        assert!(answer.citations.is_empty());
    }

    #[test]
    fn comparison_without_entities_degrades() {
        let mut n = Normalizer::new();
        let index = CorpusIndex::build(corpus(), &mut n).unwrap();
        let session = SessionContext::default();
        let query = analyze("compare", &session, &mut n);
        assert_eq!(query.intent, Intent::Comparison);
        let ranked = rank(&query, &index, &session);
        let answer = compose(&query, &ranked, &index);
        if !ranked.is_empty() {
            assert!(answer.main.contains("compare X and Y"));
        }
    }

    #[test]
    fn comparison_biases_toward_both_entities() {
        let (answer, _) = run("compare qubits and neural networks");
        assert_eq!(answer.intent, Intent::Comparison);
        assert!(answer.main.contains("Comparing"));
        assert!(answer.citations.len() >= 2);
    }

    #[test]
    fn word_budget_holds_within_one_snippet() {
        let (answer, _) = run("quantum qubits superposition information states");
        let total = word_count(&answer.main)
            + answer.details.iter().map(|d| word_count(d)).sum::<usize>();
        assert!(total <= WORD_BUDGET + SUPPORT_BASE_WORDS);
    }

    #[test]
    fn citations_match_composed_text() {
        let (answer, _) = run("what is quantum");
        for idx in answer.citations.keys() {
            let marker = format!("[{idx}]");
            let in_main = answer.main.contains(&marker);
            let in_details = answer.details.iter().any(|d| d.contains(&marker));
            assert!(in_main || in_details);
        }
        // Indices are sequential from 1.
        for (expected, idx) in answer.citations.keys().enumerate() {
            assert_eq!(*idx, expected + 1);
        }
    }

    #[test]
    fn highlight_brackets_whole_words_only() {
        let terms = vec!["quantum".to_string()];
        let out = highlight("Quantum computers are quantumish.", &terms);
        assert!(out.contains("[Quantum]"));
        assert!(out.contains("quantumish"));
        assert!(!out.contains("[quantumish]"));
    }
}
