use crate::corpus::{cosine, subwords, CorpusIndex, Document};
use crate::query::AnalyzedQuery;
use crate::session::SessionContext;
use crate::DocId;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::HashSet;
use time::OffsetDateTime;

/// Results at or below this score are filtered out.
pub const SCORE_THRESHOLD: f32 = 0.1;
/// How many top results receive the view-count side effect.
pub const TOP_VIEWED: usize = 8;

const K1: f32 = 1.2;
const B: f32 = 0.75;

const W_BM25: f32 = 0.45;
const W_PHRASE: f32 = 0.20;
const W_FUZZY: f32 = 0.15;
const W_DENSE: f32 = 0.10;

const BOOST_TOPIC: f32 = 0.2;
const BOOST_CATEGORY: f32 = 0.15;
const BOOST_CONCEPT: f32 = 0.15;
const BOOST_SUBTOPIC_LITERAL: f32 = 0.1;
const BOOST_CATEGORY_LITERAL: f32 = 0.1;
const BOOST_PERSONALIZATION: f32 = 0.2;

/// Jaccard similarity a document token must clear to count as fuzzy match.
const FUZZY_SIM_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub bm25: f32,
    pub phrase: f32,
    pub fuzzy: f32,
    pub dense: f32,
    pub boosts: f32,
    pub doc_weight: f32,
}

/// Transient scored view of one document; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub doc_id: DocId,
    pub score: f32,
    pub breakdown: ScoreBreakdown,
}

/// Score every document against the query and return the candidates above
/// the threshold, sorted descending. The sort is stable, so equal scores
/// keep corpus order. This is a pure read; the view side effect is applied
/// separately through [`record_views`].
pub fn rank(
    query: &AnalyzedQuery,
    index: &CorpusIndex,
    session: &SessionContext,
) -> Vec<RankedResult> {
    let raw_lower = query.vector.raw.to_lowercase();
    let mut results: Vec<RankedResult> = index
        .documents
        .iter()
        .filter_map(|doc| {
            let breakdown = score_document(query, doc, index, session, &raw_lower);
            let score = (W_BM25 * breakdown.bm25
                + W_PHRASE * breakdown.phrase
                + W_FUZZY * breakdown.fuzzy
                + W_DENSE * breakdown.dense
                + breakdown.boosts)
                * breakdown.doc_weight;
            (score > SCORE_THRESHOLD).then(|| RankedResult {
                doc_id: doc.id,
                score,
                breakdown,
            })
        })
        .collect();
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    tracing::debug!(candidates = results.len(), "ranked query");
    results
}

fn score_document(
    query: &AnalyzedQuery,
    doc: &Document,
    index: &CorpusIndex,
    session: &SessionContext,
    raw_lower: &str,
) -> ScoreBreakdown {
    // BM25 over every term shared by the query weight map and the document,
    // each contribution scaled by the query-side term weight.
    let mut bm25 = 0.0f32;
    let len_norm = K1 * (1.0 - B + B * doc.doc_length as f32 / index.average_doc_length);
    for (term, q_weight) in &query.vector.weights {
        if let Some(&tf) = doc.term_freq.get(term) {
            let idf = index.idf.get(term).copied().unwrap_or(0.0);
            bm25 += q_weight * idf * tf * (K1 + 1.0) / (tf + len_norm);
        }
    }

    let matched_phrases = query
        .vector
        .phrases
        .iter()
        .filter(|p| doc.phrases.contains(*p))
        .count();
    let phrase = matched_phrases as f32 / query.vector.phrases.len().max(1) as f32;

    let fuzzy = fuzzy_bonus(query, doc, index);
    let dense = cosine(&query.vector.embedding, &doc.embedding);

    let mut boosts = 0.0f32;
    if let Some(topic) = &session.current_topic {
        if doc.topic == *topic {
            boosts += BOOST_TOPIC;
        }
    }
    if let Some(category) = &session.current_category {
        if doc.category == *category {
            boosts += BOOST_CATEGORY;
        }
    }
    if doc.concepts.iter().any(|c| query.concepts.contains(c)) {
        boosts += BOOST_CONCEPT;
    }
    if doc
        .subtopics
        .iter()
        .any(|s| raw_lower.contains(&s.to_lowercase()))
    {
        boosts += BOOST_SUBTOPIC_LITERAL;
    }
    if raw_lower.contains(&doc.category.to_lowercase()) {
        boosts += BOOST_CATEGORY_LITERAL;
    }
    if !session.history.is_empty() {
        let hits = session
            .history
            .iter()
            .filter(|h| h.concepts.iter().any(|c| doc.concepts.contains(c)))
            .count();
        boosts += BOOST_PERSONALIZATION * hits as f32 / session.history.len() as f32;
    }

    ScoreBreakdown {
        bm25,
        phrase,
        fuzzy,
        dense,
        boosts,
        doc_weight: doc.weight,
    }
}

/// For each query token, look for any document token whose IDF-weighted
/// trigram Jaccard similarity clears the threshold.
fn fuzzy_bonus(query: &AnalyzedQuery, doc: &Document, index: &CorpusIndex) -> f32 {
    if query.vector.tokens.is_empty() {
        return 0.0;
    }
    let doc_tokens: HashSet<&str> = doc.tokens.iter().map(|s| s.as_str()).collect();
    let mut matches = 0usize;
    for q_token in &query.vector.tokens {
        let q_grams: HashSet<String> = subwords(q_token).into_iter().collect();
        if q_grams.is_empty() {
            continue;
        }
        let hit = doc_tokens.iter().any(|d_token| {
            let d_grams: HashSet<String> = subwords(d_token).into_iter().collect();
            if d_grams.is_empty() {
                return false;
            }
            weighted_jaccard(&q_grams, &d_grams, index) > FUZZY_SIM_THRESHOLD
        });
        if hit {
            matches += 1;
        }
    }
    let ratio = matches as f32 / query.vector.tokens.len() as f32;
    (0.25 * ratio).min(0.5)
}

fn weighted_jaccard(a: &HashSet<String>, b: &HashSet<String>, index: &CorpusIndex) -> f32 {
    let gram_idf = |g: &String| index.idf.get(g).copied().unwrap_or(1.0);
    let inter: f32 = a.intersection(b).map(gram_idf).sum();
    let union: f32 = a.union(b).map(gram_idf).sum();
    if union == 0.0 {
        return 0.0;
    }
    inter / union
}

/// Ranking side effect: the top results get a view bump and the adaptive
/// weight update. Called once per processed query, after scoring.
pub fn record_views(index: &mut CorpusIndex, results: &[RankedResult]) {
    let now = OffsetDateTime::now_utc();
    for result in results.iter().take(TOP_VIEWED) {
        if let Some(doc) = index.document_mut(result.doc_id) {
            doc.view_count += 1.0;
            doc.last_viewed_at = now;
            doc.refresh_weight();
        }
    }
}

/// Feedback entry point, called from outside the ranking path. Adjusts the
/// feedback score and immediately re-clamps the weight.
pub fn apply_feedback(index: &mut CorpusIndex, doc_id: DocId, delta: i32) -> Result<()> {
    if delta != 1 && delta != -1 {
        bail!("feedback delta must be +1 or -1, got {delta}");
    }
    match index.document_mut(doc_id) {
        Some(doc) => {
            doc.feedback += delta;
            doc.refresh_weight();
            tracing::debug!(doc_id, delta, weight = doc.weight, "feedback applied");
            Ok(())
        }
        None => bail!("unknown document id {doc_id}"),
    }
}
