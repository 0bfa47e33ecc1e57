use crate::corpus::CorpusIndex;
use crate::session::SessionContext;
use crate::DocId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const SESSIONS_TREE: &str = "sessions";
const COUNTERS_TREE: &str = "counters";
const BOOKMARKS_TREE: &str = "bookmarks";

/// Bookmarked queries kept per session; oldest evicted first.
pub const BOOKMARK_CAPACITY: usize = 50;

/// Persisted per-document relevance counters for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocCounters {
    pub view_count: f32,
    pub feedback: i32,
    /// Unix seconds of the last view.
    pub last_viewed_at: i64,
    pub weight: f32,
}

/// Key-value persistence for session state, document counters, and
/// bookmarks. The store is optional end to end: when it is absent or any
/// read fails, callers get empty defaults and the engine keeps serving.
#[derive(Clone)]
pub struct SessionStore {
    db: Option<sled::Db>,
}

impl SessionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> SessionStore {
        match sled::open(path.as_ref()) {
            Ok(db) => {
                tracing::info!(path = %path.as_ref().display(), "session store opened");
                SessionStore { db: Some(db) }
            }
            Err(err) => {
                tracing::warn!(%err, "session store unavailable; continuing without persistence");
                SessionStore { db: None }
            }
        }
    }

    pub fn disabled() -> SessionStore {
        SessionStore { db: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    fn tree(&self, name: &str) -> Option<sled::Tree> {
        let db = self.db.as_ref()?;
        match db.open_tree(name) {
            Ok(tree) => Some(tree),
            Err(err) => {
                tracing::warn!(%err, name, "failed to open store tree");
                None
            }
        }
    }

    fn read<T: for<'de> Deserialize<'de>>(&self, tree_name: &str, key: &str) -> Option<T> {
        let tree = self.tree(tree_name)?;
        match tree.get(key.as_bytes()) {
            Ok(Some(bytes)) => match bincode::deserialize(&bytes) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(%err, tree_name, key, "discarding corrupt store entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, tree_name, key, "store read failed");
                None
            }
        }
    }

    fn write<T: Serialize>(&self, tree_name: &str, key: &str, value: &T) {
        let Some(tree) = self.tree(tree_name) else {
            return;
        };
        match bincode::serialize(value) {
            Ok(bytes) => {
                if let Err(err) = tree.insert(key.as_bytes(), bytes) {
                    tracing::warn!(%err, tree_name, key, "store write failed");
                }
            }
            Err(err) => {
                tracing::warn!(%err, tree_name, key, "store serialization failed");
            }
        }
    }

    pub fn load_session(&self, session_id: &str) -> Option<SessionContext> {
        self.read(SESSIONS_TREE, session_id)
    }

    pub fn save_session(&self, session_id: &str, session: &SessionContext) {
        self.write(SESSIONS_TREE, session_id, session);
    }

    pub fn load_counters(&self, session_id: &str) -> HashMap<DocId, DocCounters> {
        self.read(COUNTERS_TREE, session_id).unwrap_or_default()
    }

    pub fn save_counters(&self, session_id: &str, index: &CorpusIndex) {
        let counters: HashMap<DocId, DocCounters> = index
            .documents
            .iter()
            .map(|doc| {
                (
                    doc.id,
                    DocCounters {
                        view_count: doc.view_count,
                        feedback: doc.feedback,
                        last_viewed_at: doc.last_viewed_at.unix_timestamp(),
                        weight: doc.weight,
                    },
                )
            })
            .collect();
        self.write(COUNTERS_TREE, session_id, &counters);
    }

    pub fn load_bookmarks(&self, session_id: &str) -> Vec<String> {
        self.read(BOOKMARKS_TREE, session_id).unwrap_or_default()
    }

    pub fn save_bookmarks(&self, session_id: &str, bookmarks: &[String]) {
        self.write(BOOKMARKS_TREE, session_id, &bookmarks.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Intent;
    use crate::session::HistoryEntry;

    #[test]
    fn disabled_store_reads_empty() {
        let store = SessionStore::disabled();
        assert!(!store.is_enabled());
        assert!(store.load_session("s").is_none());
        assert!(store.load_counters("s").is_empty());
        assert!(store.load_bookmarks("s").is_empty());
    }

    #[test]
    fn session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("store"));
        assert!(store.is_enabled());

        let mut session = SessionContext::default();
        session.note_query(
            HistoryEntry {
                query: "what is quantum".into(),
                topic: Some("quantum".into()),
                intent: Intent::Definition,
                concepts: vec!["physics".into()],
                timestamp: 1,
            },
            Some("science".into()),
        );
        store.save_session("abc", &session);

        let restored = store.load_session("abc").unwrap();
        assert_eq!(restored.current_topic.as_deref(), Some("quantum"));
        assert_eq!(restored.history.len(), 1);
        assert_eq!(
            restored.intent_frequency.get(&Intent::Definition),
            Some(&1)
        );
        assert!(store.load_session("other").is_none());
    }

    #[test]
    fn bookmarks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("store"));
        store.save_bookmarks("s", &["a".into(), "b".into()]);
        assert_eq!(store.load_bookmarks("s"), vec!["a", "b"]);
    }
}
