use crate::cache::FifoCache;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Capacity of the normalization cache. Eviction is insertion-order FIFO,
/// not LRU: a cache hit does not extend an entry's lifetime.
pub const CACHE_CAPACITY: usize = 1000;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}][\p{L}\p{N}_'\-]*").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
    static ref ALIASES: HashMap<&'static str, &'static str> = {
        let pairs: &[(&str, &str)] = &[
            ("ai", "artificial intelligence"),
            ("ml", "machine learning"),
            ("dl", "deep learning"),
            ("nn", "neural network"),
            ("qc", "quantum computing"),
            ("cpu", "central processing unit"),
            ("gpu", "graphics processing unit"),
            ("db", "database"),
            ("os", "operating system"),
            ("vr", "virtual reality"),
        ];
        pairs.iter().copied().collect()
    };
    static ref SYNONYMS: HashMap<&'static str, &'static [&'static str]> = {
        let pairs: &[(&str, &[&str])] = &[
            ("fast", &["quick"]),
            ("big", &["large"]),
            ("small", &["tiny"]),
            ("computer", &["machine"]),
            ("picture", &["image"]),
            ("build", &["construct"]),
            ("begin", &["start"]),
            ("smart", &["intelligent"]),
        ];
        pairs.iter().copied().collect()
    };
}

/// Suffixes tried in order; the first one that matches while leaving a stem
/// of at least three characters is stripped. Nothing more sophisticated than
/// single-pass suffix removal happens here.
const SUFFIXES: &[&str] = &[
    "ization", "ational", "fulness", "ousness", "iveness", "tional", "ations", "ingly", "ments",
    "ation", "ness", "ions", "ing", "ies", "ed", "ly", "es", "s",
];

fn stem(token: &str) -> String {
    for suffix in SUFFIXES {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.chars().count() >= 3 {
                return base.to_string();
            }
        }
    }
    token.to_string()
}

/// Split a compound piece on separators and internal case boundaries, so
/// "snake_case" and "camelCase" both yield two tokens.
fn split_composite(piece: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for ch in piece.chars() {
        if ch == '_' || ch == '-' || ch == '\'' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(ch);
        prev_lower = ch.is_lowercase();
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn push_token(out: &mut Vec<String>, sub: &str) {
    let stemmed = stem(&sub.to_lowercase());
    if stemmed.chars().count() < 2 || STOPWORDS.contains(stemmed.as_str()) {
        return;
    }
    out.push(stemmed);
}

/// Full normalization pipeline without the cache: NFKC fold, alphanumeric
/// scan, alias expansion, synonym injection, composite split, suffix stem,
/// lowercase, stop-word and single-character removal.
pub fn normalize_uncached(text: &str) -> Vec<String> {
    let folded = text.nfkc().collect::<String>();
    let mut tokens = Vec::new();
    for mat in RE.find_iter(&folded) {
        let piece = mat.as_str();
        let key = piece.to_lowercase();
        match ALIASES.get(key.as_str()) {
            Some(expansion) => {
                for word in expansion.split_whitespace() {
                    for sub in split_composite(word) {
                        push_token(&mut tokens, &sub);
                    }
                }
            }
            None => {
                for sub in split_composite(piece) {
                    push_token(&mut tokens, &sub);
                }
            }
        }
        // Synonyms add related terms alongside the original token.
        if let Some(related) = SYNONYMS.get(key.as_str()) {
            for word in related.iter() {
                push_token(&mut tokens, word);
            }
        }
    }
    tokens
}

/// Tokenizer with a bounded FIFO result cache keyed by the exact input.
pub struct Normalizer {
    cache: FifoCache<String, Vec<String>>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            cache: FifoCache::new(CACHE_CAPACITY),
        }
    }

    pub fn normalize(&mut self, text: &str) -> Vec<String> {
        if let Some(cached) = self.cache.get(&text.to_string()) {
            return cached.clone();
        }
        let tokens = normalize_uncached(text);
        self.cache.insert(text.to_string(), tokens.clone());
        tokens
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_suffixes_and_stopwords() {
        let toks = normalize_uncached("The computers are calculating quickly");
        assert!(toks.contains(&"computer".to_string()));
        assert!(toks.contains(&"calculat".to_string()));
        assert!(toks.contains(&"quick".to_string()));
        assert!(!toks.contains(&"the".to_string()));
        assert!(!toks.contains(&"are".to_string()));
    }

    #[test]
    fn expands_aliases_into_words() {
        let toks = normalize_uncached("what is AI");
        assert!(toks.contains(&"artificial".to_string()));
        assert!(toks.contains(&"intelligence".to_string()));
        assert!(!toks.contains(&"ai".to_string()));
    }

    #[test]
    fn synonyms_add_rather_than_replace() {
        let toks = normalize_uncached("fast networks");
        assert!(toks.contains(&"fast".to_string()));
        assert!(toks.contains(&"quick".to_string()));
    }

    #[test]
    fn splits_compound_tokens() {
        let toks = normalize_uncached("snake_case and camelCase");
        assert!(toks.contains(&"snake".to_string()));
        assert!(toks.contains(&"case".to_string()));
        assert!(toks.contains(&"camel".to_string()));
    }

    #[test]
    fn folds_unicode() {
        let toks = normalize_uncached("café menus");
        assert!(toks.contains(&"café".to_string()) || toks.contains(&"cafe".to_string()));
        assert!(toks.contains(&"menu".to_string()));
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(normalize_uncached("").is_empty());
        assert!(normalize_uncached("?!   ...").is_empty());
    }

    #[test]
    fn cache_returns_identical_result() {
        let mut n = Normalizer::new();
        let a = n.normalize("quantum computers");
        let b = n.normalize("quantum computers");
        assert_eq!(a, b);
    }
}
