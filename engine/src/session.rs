use crate::query::Intent;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Bounded history ring; oldest entries are evicted first.
pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub query: String,
    pub topic: Option<String>,
    pub intent: Intent,
    pub concepts: Vec<String>,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Process-lifetime conversational state for one session. Never shared
/// across sessions; persisted and restored through the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub current_topic: Option<String>,
    pub last_topic: Option<String>,
    pub current_category: Option<String>,
    pub history: VecDeque<HistoryEntry>,
    pub confidence: f32,
    pub intent_frequency: HashMap<Intent, u32>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            current_topic: None,
            last_topic: None,
            current_category: None,
            history: VecDeque::new(),
            confidence: 0.5,
            intent_frequency: HashMap::new(),
        }
    }
}

impl SessionContext {
    /// Record a processed query: history ring, topic shift, intent counter.
    pub fn note_query(&mut self, entry: HistoryEntry, category: Option<String>) {
        *self.intent_frequency.entry(entry.intent).or_insert(0) += 1;
        if entry.topic != self.current_topic {
            self.last_topic = self.current_topic.take();
        }
        self.current_topic = entry.topic.clone();
        self.current_category = category;
        self.history.push_back(entry);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// Exponential confidence blend: a scoring hit pulls confidence toward
    /// the (capped) top score, a miss decays it.
    pub fn observe_outcome(&mut self, top_score: Option<f32>) {
        self.confidence = match top_score {
            Some(score) => 0.7 * self.confidence + 0.3 * score.min(1.0),
            None => 0.7 * self.confidence,
        }
        .clamp(0.0, 1.0);
    }

    pub fn intent_share(&self, intent: Intent) -> f32 {
        let total: u32 = self.intent_frequency.values().sum();
        if total == 0 {
            return 0.0;
        }
        *self.intent_frequency.get(&intent).unwrap_or(&0) as f32 / total as f32
    }

    /// The intent used least recently, judged by its last appearance in the
    /// history ring; never-used intents are stalest of all. Ties fall back
    /// to declaration order. Used to nudge suggestions toward unexplored
    /// ground.
    pub fn least_recent_intent(&self) -> Intent {
        let last_seen = |intent: Intent| {
            self.history
                .iter()
                .rposition(|entry| entry.intent == intent)
                .map(|i| i as i64)
                .unwrap_or(-1)
        };
        Intent::all()
            .into_iter()
            .min_by_key(|i| last_seen(*i))
            .unwrap_or(Intent::General)
    }
}
