//! First-match-wins keyword matching.
//!
//! A [`MatchEngine`] is built once per store/settings snapshot. Building it
//! screens and compiles every regex keyword up front; keywords that fail
//! screening or compilation are reported once and then ignored, so a single
//! bad pattern never blocks the keywords after it.

use rand::Rng;
use regex::{Regex, RegexBuilder};

use crate::config::Settings;
use crate::safety::{check_pattern, UnsafePattern};
use crate::selector::select_reply_with;
use crate::store::KeywordStore;

/// Upper bound on the compiled size of one keyword pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: String,
    pub reply: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("可能存在安全风险: {0}")]
    Unsafe(#[from] UnsafePattern),
    #[error("正则表达式无效: {0}")]
    Invalid(String),
    #[error("正则表达式过于复杂: {0}")]
    TooComplex(String),
}

/// Screen and compile a keyword for regex mode.
///
/// Screening runs on the case-folded text. Case-insensitivity itself is
/// applied through the regex engine so escapes like `\D` keep their meaning.
pub fn compile_pattern(keyword: &str, case_sensitive: bool) -> Result<Regex, PatternError> {
    let screened = fold(keyword, case_sensitive);
    check_pattern(&screened)?;

    RegexBuilder::new(keyword)
        .case_insensitive(!case_sensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| match e {
            regex::Error::Syntax(msg) => PatternError::Invalid(msg),
            other => PatternError::TooComplex(other.to_string()),
        })
}

fn fold(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

// ============================================================================
// MatchEngine
// ============================================================================

#[derive(Debug)]
enum Matcher {
    /// Folded keyword, searched as a plain substring.
    Substring(String),
    Pattern(Regex),
}

#[derive(Debug)]
struct CompiledRule {
    keyword: String,
    replies: Vec<String>,
    matcher: Matcher,
}

#[derive(Debug, Default)]
pub struct MatchEngine {
    rules: Vec<CompiledRule>,
    case_sensitive: bool,
    skipped: Vec<String>,
}

impl MatchEngine {
    pub fn build(store: &KeywordStore, settings: &Settings) -> Self {
        let mut rules = Vec::with_capacity(store.len());
        let mut skipped = Vec::new();

        for (keyword, replies) in store.iter() {
            if keyword.is_empty() {
                tracing::warn!("跳过空关键词");
                skipped.push(keyword.to_string());
                continue;
            }

            let matcher = if settings.enable_regex {
                match compile_pattern(keyword, settings.case_sensitive) {
                    Ok(re) => Matcher::Pattern(re),
                    Err(PatternError::TooComplex(e)) => {
                        tracing::error!("正则表达式 '{}' 编译时发生未知错误，跳过: {}", keyword, e);
                        skipped.push(keyword.to_string());
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("正则表达式 '{}' {}，跳过", keyword, e);
                        skipped.push(keyword.to_string());
                        continue;
                    }
                }
            } else {
                Matcher::Substring(fold(keyword, settings.case_sensitive))
            };

            rules.push(CompiledRule {
                keyword: keyword.to_string(),
                replies: replies.to_vec(),
                matcher,
            });
        }

        Self {
            rules,
            case_sensitive: settings.case_sensitive,
            skipped,
        }
    }

    /// Keywords that will never match under the current settings.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn find(&self, message: &str) -> Option<KeywordMatch> {
        self.find_with(message, &mut rand::thread_rng())
    }

    /// Return the first keyword (in store order) found in `message`, with
    /// one of its replies picked by `rng`.
    pub fn find_with<R: Rng + ?Sized>(&self, message: &str, rng: &mut R) -> Option<KeywordMatch> {
        if message.is_empty() || self.rules.is_empty() {
            return None;
        }

        let folded = fold(message, self.case_sensitive);

        let rule = self.rules.iter().find(|rule| match &rule.matcher {
            Matcher::Substring(needle) => folded.contains(needle.as_str()),
            Matcher::Pattern(re) => re.is_match(message),
        })?;

        Some(KeywordMatch {
            keyword: rule.keyword.clone(),
            reply: select_reply_with(&rule.replies, rng),
        })
    }
}

/// One-shot match without keeping the compiled engine around.
pub fn match_message(message: &str, store: &KeywordStore, settings: &Settings) -> Option<KeywordMatch> {
    if message.is_empty() || store.is_empty() {
        return None;
    }
    MatchEngine::build(store, settings).find(message)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(enable_regex: bool, case_sensitive: bool) -> Settings {
        Settings {
            enable_regex,
            case_sensitive,
            ..Settings::default()
        }
    }

    fn greetings() -> KeywordStore {
        KeywordStore::from_pairs([("你好", vec!["你好！", "嗨！"])])
    }

    #[test]
    fn test_substring_match_returns_configured_reply() {
        let m = match_message("你好呀", &greetings(), &settings(false, false)).unwrap();
        assert_eq!(m.keyword, "你好");
        assert!(["你好！", "嗨！"].contains(&m.reply.as_str()));
    }

    #[test]
    fn test_no_match_returns_none() {
        assert!(match_message("早上好", &greetings(), &settings(false, false)).is_none());
    }

    #[test]
    fn test_empty_message_or_store() {
        assert!(match_message("", &greetings(), &settings(false, false)).is_none());
        assert!(match_message("你好", &KeywordStore::new(), &settings(false, false)).is_none());
    }

    #[test]
    fn test_case_folding() {
        let store = KeywordStore::from_pairs([("Hello", vec!["hi"])]);
        assert!(match_message("oh HELLO there", &store, &settings(false, false)).is_some());
        assert!(match_message("oh HELLO there", &store, &settings(false, true)).is_none());
        assert!(match_message("oh Hello there", &store, &settings(false, true)).is_some());
    }

    #[test]
    fn test_first_match_wins() {
        let store = KeywordStore::from_pairs([("早", vec!["first"]), ("早安", vec!["second"])]);
        let engine = MatchEngine::build(&store, &settings(false, false));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let m = engine.find_with("早安呀", &mut rng).unwrap();
            assert_eq!(m.keyword, "早");
            assert_eq!(m.reply, "first");
        }
    }

    #[test]
    fn test_regex_anchor() {
        let store = KeywordStore::from_pairs([("^test", vec!["ok"])]);
        let s = settings(true, false);
        assert!(match_message("testing", &store, &s).is_some());
        assert!(match_message("a test", &store, &s).is_none());
    }

    #[test]
    fn test_substring_mode_treats_pattern_literally() {
        let store = KeywordStore::from_pairs([("^test", vec!["ok"])]);
        assert!(match_message("testing", &store, &settings(false, false)).is_none());
        assert!(match_message("say ^test", &store, &settings(false, false)).is_some());
    }

    #[test]
    fn test_regex_case_insensitive_keeps_escape_meaning() {
        // \D must stay "non-digit" even though the message is matched case-insensitively
        let store = KeywordStore::from_pairs([(r"^\D+$", vec!["letters"])]);
        let s = settings(true, false);
        assert!(match_message("ABC", &store, &s).is_some());
        assert!(match_message("123", &store, &s).is_none());
    }

    #[test]
    fn test_unsafe_pattern_skipped_but_later_keywords_match() {
        let long = "a".repeat(150);
        let store = KeywordStore::from_pairs([
            ("(a+)+$", vec!["bad"]),
            (long.as_str(), vec!["too long"]),
            ("aaa", vec!["good"]),
        ]);
        let engine = MatchEngine::build(&store, &settings(true, false));
        assert_eq!(engine.skipped().len(), 2);
        let m = engine.find(&"a".repeat(200)).unwrap();
        assert_eq!(m.reply, "good");
    }

    #[test]
    fn test_invalid_pattern_skipped() {
        let store = KeywordStore::from_pairs([("([", vec!["broken"]), ("ok", vec!["fine"])]);
        let engine = MatchEngine::build(&store, &settings(true, false));
        assert_eq!(engine.skipped(), ["(["]);
        assert_eq!(engine.find("ok ([").unwrap().reply, "fine");
    }

    #[test]
    fn test_compile_pattern_errors() {
        assert!(matches!(compile_pattern("(?:x)", false), Err(PatternError::Unsafe(_))));
        assert!(matches!(compile_pattern("[z-a]", false), Err(PatternError::Invalid(_))));
        assert!(compile_pattern("^hi", false).is_ok());
    }

    #[test]
    fn test_empty_keyword_never_matches() {
        let store = KeywordStore::from_pairs([("", vec!["everything"])]);
        assert!(match_message("anything", &store, &settings(false, false)).is_none());
    }
}
