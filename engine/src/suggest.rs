use crate::corpus::CorpusIndex;
use crate::query::{AnalyzedQuery, Intent};
use crate::rank::RankedResult;
use crate::session::SessionContext;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on emitted follow-up chips.
pub const MAX_SUGGESTIONS: usize = 8;
/// Chips longer than this are dropped, not truncated.
pub const MAX_CHIP_LEN: usize = 50;

/// Share of session history above which an intent counts as
/// over-represented, which widens the "how does X work" pool.
const INTENT_DOMINANCE: f32 = 0.5;

/// Derives deduplicated follow-up chips from ranked results, query tokens,
/// and session history. The pool is shuffled before truncation, so chip
/// order is deliberately not reproducible.
pub struct SuggestionGenerator {
    rng_state: u64,
}

impl SuggestionGenerator {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self::with_seed(seed)
    }

    /// Fixed seed, for tests that need a stable shuffle.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng_state: seed | 1,
        }
    }

    pub fn generate(
        &mut self,
        query: &AnalyzedQuery,
        ranked: &[RankedResult],
        index: &CorpusIndex,
        session: &SessionContext,
    ) -> Vec<String> {
        let mut pool: Vec<String> = Vec::new();

        // Short excerpts of lower-ranked documents become chips directly.
        for result in ranked.iter().skip(3).take(3) {
            if let Some(doc) = index.document(result.doc_id) {
                let excerpt: Vec<&str> = doc.text.split_whitespace().take(6).collect();
                pool.push(excerpt.join(" ").trim_end_matches('.').to_string());
            }
        }

        // "How does X work?" over query tokens; a session stuck on one
        // intent gets more of these to break the pattern.
        let dominated = session.intent_share(query.intent) > INTENT_DOMINANCE;
        let how_many = if dominated { 3 } else { 1 };
        for token in query.vector.tokens.iter().take(how_many) {
            pool.push(format!("How does {token} work?"));
        }

        let topic = ranked
            .first()
            .and_then(|r| index.document(r.doc_id))
            .map(|d| d.topic.clone())
            .or_else(|| session.current_topic.clone());
        if let Some(topic) = &topic {
            pool.push(format!("What is the future of {topic}?"));
        }

        // Cross-topic comparison chip when the conversation just moved.
        if let (Some(current), Some(last)) = (&session.current_topic, &session.last_topic) {
            if current != last {
                pool.push(format!("Compare {current} to {last}"));
            }
        }

        for concept in &query.concepts {
            pool.push(format!("Tell me more about {concept}"));
        }

        // Nudge toward the intent this session has touched least recently.
        if let Some(topic) = &topic {
            pool.push(match session.least_recent_intent() {
                Intent::Definition => format!("What is {topic}?"),
                Intent::Comparison => format!("Compare {topic} to something else"),
                Intent::List => format!("List examples of {topic}"),
                Intent::Calculation => "How many qubits does a computer need?".to_string(),
                Intent::General => format!("Tell me about {topic}"),
            });
        }

        let mut chips: Vec<String> = Vec::new();
        for chip in pool {
            let chip = chip.trim().to_string();
            if chip.is_empty() || chip.chars().count() > MAX_CHIP_LEN {
                continue;
            }
            if chips.iter().any(|c| c.eq_ignore_ascii_case(&chip)) {
                continue;
            }
            chips.push(chip);
        }
        self.shuffle(&mut chips);
        chips.truncate(MAX_SUGGESTIONS);
        chips
    }

    fn next(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.rng_state
    }

    fn random_range(&mut self, min: usize, max: usize) -> usize {
        min + (self.next() as usize) % (max - min)
    }

    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.random_range(0, i + 1);
            items.swap(i, j);
        }
    }
}

impl Default for SuggestionGenerator {
    fn default() -> Self {
        Self::new()
    }
}
