use crate::normalize::Normalizer;
use crate::query::CONCEPTS;
use crate::DocId;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use time::OffsetDateTime;

/// Dimension of the hashed-trigram pseudo-embedding.
pub const EMBED_DIM: usize = 100;
/// A heavily down-voted document never drops below this weight.
pub const WEIGHT_FLOOR: f32 = 0.7;
pub const WEIGHT_CEIL: f32 = 1.0;
pub const DEFAULT_WEIGHT: f32 = 0.8;
/// Daily multiplicative decay applied to restored view counts.
pub const VIEW_DECAY_PER_DAY: f32 = 0.95;

#[derive(Debug, Clone, Deserialize)]
pub struct RawFact {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub meta: FactMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactMeta {
    #[serde(default)]
    pub subtopics: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<f32>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// One indexed corpus snippet: immutable content plus the mutable relevance
/// state the ranker and the feedback path are allowed to touch.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocId,
    pub text: String,
    pub keywords: Vec<String>,
    pub topic: String,
    pub category: String,
    pub subtopics: Vec<String>,
    pub tokens: Vec<String>,
    pub term_freq: HashMap<String, f32>,
    pub phrases: HashSet<String>,
    pub embedding: Vec<f32>,
    pub doc_length: usize,
    pub concepts: Vec<String>,
    pub view_count: f32,
    pub feedback: i32,
    pub last_viewed_at: OffsetDateTime,
    pub weight: f32,
}

impl Document {
    /// The only rule through which `weight` changes. Always re-clamps.
    pub fn refresh_weight(&mut self) {
        let adjusted =
            self.weight + 0.04 * (1.0 + self.view_count).ln() + 0.02 * self.feedback as f32;
        self.weight = adjusted.clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
    }

    /// Fade stale popularity: 0.95 per full day since the last view.
    pub fn apply_view_decay(&mut self, now: OffsetDateTime) {
        let days = (now - self.last_viewed_at).whole_days();
        if days > 0 {
            self.view_count *= VIEW_DECAY_PER_DAY.powi(days as i32);
        }
    }
}

pub struct CorpusIndex {
    pub documents: Vec<Document>,
    pub document_frequency: HashMap<String, u32>,
    pub idf: HashMap<String, f32>,
    pub average_doc_length: f32,
    pub subtopic_index: HashMap<String, Vec<DocId>>,
    pub category_index: HashMap<String, Vec<DocId>>,
}

impl CorpusIndex {
    /// Build the full index over a validated corpus. Facts missing text or
    /// keywords are rejected here with a warning; an empty corpus after
    /// validation is a configuration error.
    pub fn build(facts: Vec<RawFact>, normalizer: &mut Normalizer) -> Result<CorpusIndex> {
        let mut rejected = 0usize;
        let accepted: Vec<RawFact> = facts
            .into_iter()
            .filter(|f| {
                let ok = !f.text.trim().is_empty() && !f.keywords.is_empty();
                if !ok {
                    rejected += 1;
                }
                ok
            })
            .collect();
        if rejected > 0 {
            tracing::warn!(rejected, "dropped malformed corpus entries");
        }
        if accepted.is_empty() {
            bail!("corpus is empty after validation; cannot build an index");
        }

        let now = OffsetDateTime::now_utc();
        let mut documents = Vec::with_capacity(accepted.len());
        let mut document_frequency: HashMap<String, u32> = HashMap::new();
        let mut subtopic_index: HashMap<String, Vec<DocId>> = HashMap::new();
        let mut category_index: HashMap<String, Vec<DocId>> = HashMap::new();
        let mut total_tokens = 0usize;

        for (i, fact) in accepted.into_iter().enumerate() {
            let id = i as DocId;
            let source = format!(
                "{} {} {}",
                fact.text,
                fact.keywords.join(" "),
                fact.meta.subtopics.join(" ")
            );
            let tokens = normalizer.normalize(&source);
            total_tokens += tokens.len();

            let mut term_freq: HashMap<String, f32> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_insert(0.0) += 1.0;
                for sub in subwords(token) {
                    *term_freq.entry(sub).or_insert(0.0) += 1.0;
                }
            }
            let mut phrases: HashSet<String> = HashSet::new();
            for window in tokens.windows(2) {
                let bigram = window.join(" ");
                *term_freq.entry(bigram.clone()).or_insert(0.0) += 1.0;
                phrases.insert(bigram);
            }
            for window in tokens.windows(3) {
                phrases.insert(window.join(" "));
            }

            for term in term_freq.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }

            let weighted: Vec<(String, f32)> =
                tokens.iter().map(|t| (t.clone(), 1.0)).collect();
            let embedding = embed_weighted(&weighted);

            let token_set: HashSet<&str> = tokens.iter().map(|s| s.as_str()).collect();
            let concepts: Vec<String> = CONCEPTS
                .iter()
                .filter(|(_, kws)| kws.iter().any(|k| token_set.contains(k)))
                .map(|(name, _)| name.to_string())
                .collect();

            let category = fact
                .meta
                .category
                .clone()
                .unwrap_or_else(|| "general".to_string());
            for sub in &fact.meta.subtopics {
                subtopic_index
                    .entry(sub.to_lowercase())
                    .or_default()
                    .push(id);
            }
            category_index
                .entry(category.to_lowercase())
                .or_default()
                .push(id);

            let weight = fact
                .meta
                .priority
                .unwrap_or(DEFAULT_WEIGHT)
                .clamp(WEIGHT_FLOOR, WEIGHT_CEIL);
            let topic = if fact.topic.trim().is_empty() {
                "general".to_string()
            } else {
                fact.topic.clone()
            };

            documents.push(Document {
                id,
                doc_length: tokens.len(),
                text: fact.text,
                keywords: fact.keywords,
                topic,
                category,
                subtopics: fact.meta.subtopics,
                tokens,
                term_freq,
                phrases,
                embedding,
                concepts,
                view_count: 0.0,
                feedback: 0,
                last_viewed_at: now,
                weight,
            });
        }

        let n = documents.len() as f32;
        let idf = document_frequency
            .iter()
            .map(|(term, &df)| {
                let df = df as f32;
                (term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();
        let average_doc_length = total_tokens as f32 / n;

        tracing::info!(
            docs = documents.len(),
            terms = document_frequency.len(),
            avg_len = average_doc_length,
            "corpus indexed"
        );

        Ok(CorpusIndex {
            documents,
            document_frequency,
            idf,
            average_doc_length,
            subtopic_index,
            category_index,
        })
    }

    pub fn document(&self, id: DocId) -> Option<&Document> {
        self.documents.get(id as usize)
    }

    pub fn document_mut(&mut self, id: DocId) -> Option<&mut Document> {
        self.documents.get_mut(id as usize)
    }

    pub fn by_subtopic(&self, subtopic: &str) -> &[DocId] {
        self.subtopic_index
            .get(&subtopic.to_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn by_category(&self, category: &str) -> &[DocId] {
        self.category_index
            .get(&category.to_lowercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Load a corpus file: a JSON array of raw facts.
pub fn load_corpus_file<P: AsRef<Path>>(path: P) -> Result<Vec<RawFact>> {
    let raw = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading corpus file {}", path.as_ref().display()))?;
    let facts: Vec<RawFact> = serde_json::from_str(&raw).context("parsing corpus JSON")?;
    Ok(facts)
}

/// 3-character subwords, only for tokens longer than three characters.
pub fn subwords(token: &str) -> Vec<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 3 {
        return Vec::new();
    }
    (0..=chars.len() - 3)
        .map(|i| chars[i..i + 3].iter().collect())
        .collect()
}

fn bucket(gram: &str) -> usize {
    let mut h: u64 = 0;
    for b in gram.bytes() {
        h = (h.wrapping_mul(131).wrapping_add(b as u64)) % 2_147_483_647;
    }
    ((h & 0x7fff_ffff) as usize) % EMBED_DIM
}

/// Hashed-trigram pseudo-embedding over weighted terms, L2-normalized.
/// Terms with no eligible subwords contribute nothing; a fully ineligible
/// input yields the zero vector.
pub fn embed_weighted(terms: &[(String, f32)]) -> Vec<f32> {
    let mut pairs: Vec<(String, f32)> = Vec::new();
    for (term, w) in terms {
        for sub in subwords(term) {
            pairs.push((sub, *w));
        }
    }
    let mut v = vec![0.0f32; EMBED_DIM];
    if pairs.is_empty() {
        return v;
    }
    // Sorted accumulation keeps the float sum order-independent of the
    // caller's map iteration order.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let n = pairs.len() as f32;
    for (sub, w) in &pairs {
        v[bucket(sub)] += w / n;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity, defined as 0 when either vector has zero magnitude.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
