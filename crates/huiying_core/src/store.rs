//! Keyword rule store.
//!
//! Maps each keyword to an ordered, non-empty list of candidate replies.
//! Insertion order is significant: the matcher walks keywords in the order
//! they were first added, and the first hit wins.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Outcomes
// ============================================================================

/// Result of [`KeywordStore::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The keyword did not exist and was created with a single reply.
    Created,
    /// The keyword existed and the reply was appended.
    Appended,
    /// The keyword already had this exact reply; nothing changed.
    Duplicate,
}

// ============================================================================
// Raw (pre-normalization) input
// ============================================================================

/// Reply value as it may appear in a hand-edited rules file: either a list
/// or a legacy single scalar.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawReplies {
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
}

impl RawReplies {
    fn into_replies(self) -> Vec<String> {
        match self {
            RawReplies::Many(values) => values.into_iter().filter_map(value_to_reply).collect(),
            RawReplies::One(value) => value_to_reply(value).into_iter().collect(),
        }
    }
}

fn value_to_reply(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// KeywordStore
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeywordStore {
    rules: IndexMap<String, Vec<String>>,
}

impl KeywordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from raw file contents, coercing scalars into
    /// one-element lists and dropping keywords left without replies.
    pub fn from_raw(raw: IndexMap<String, RawReplies>) -> Self {
        let rules = raw
            .into_iter()
            .map(|(keyword, replies)| (keyword, replies.into_replies()))
            .collect();
        let mut store = Self { rules };
        store.normalize();
        store
    }

    /// Build a store from already-canonical pairs. Later duplicates of a
    /// keyword replace earlier ones but keep the first position.
    pub fn from_pairs<K, R, I>(pairs: I) -> Self
    where
        K: Into<String>,
        R: Into<String>,
        I: IntoIterator<Item = (K, Vec<R>)>,
    {
        let rules = pairs
            .into_iter()
            .map(|(k, replies)| (k.into(), replies.into_iter().map(Into::into).collect()))
            .collect();
        let mut store = Self { rules };
        store.normalize();
        store
    }

    /// Enforce the non-empty invariant. Idempotent.
    pub fn normalize(&mut self) {
        self.rules.retain(|keyword, replies| {
            if replies.is_empty() {
                tracing::warn!("关键词 '{}' 没有任何回复内容，已忽略", keyword);
                false
            } else {
                true
            }
        });
    }

    /// Add `reply` under `keyword`.
    pub fn add(&mut self, keyword: &str, reply: &str) -> AddOutcome {
        match self.rules.get_mut(keyword) {
            Some(replies) if replies.iter().any(|r| r == reply) => AddOutcome::Duplicate,
            Some(replies) => {
                replies.push(reply.to_string());
                AddOutcome::Appended
            }
            None => {
                self.rules.insert(keyword.to_string(), vec![reply.to_string()]);
                AddOutcome::Created
            }
        }
    }

    /// Delete a keyword. Returns whether it existed.
    pub fn remove(&mut self, keyword: &str) -> bool {
        self.rules.shift_remove(keyword).is_some()
    }

    /// `(1-based index, keyword, replies)` in insertion order.
    /// Call again to restart.
    pub fn list(&self) -> impl Iterator<Item = (usize, &str, &[String])> + '_ {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, (keyword, replies))| (i + 1, keyword.as_str(), replies.as_slice()))
    }

    /// Swap in a whole new mapping (used by reload).
    pub fn replace_all(&mut self, other: KeywordStore) {
        self.rules = other.rules;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.rules.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn get(&self, keyword: &str) -> Option<&[String]> {
        self.rules.get(keyword).map(Vec::as_slice)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.rules.contains_key(keyword)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
