//! Regex pattern screening.
//!
//! A static, best-effort filter over the pattern *text*: it rejects
//! constructs commonly associated with catastrophic backtracking before a
//! keyword is ever compiled. It is a heuristic, not a complexity proof, and
//! it will reject some perfectly safe patterns. The pattern itself is never
//! executed here.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Patterns longer than this (in characters) are rejected outright.
pub const MAX_PATTERN_CHARS: usize = 100;

/// Literal fragments that are refused wherever they appear.
const FORBIDDEN_FRAGMENTS: &[&str] = &["(?:", "(?!", "(?<", "*+", "+*", "**", "++"];

/// A group containing a quantifier (or brace) that is itself followed by `+`,
/// e.g. `(a+)+` or `(x{2})  +`.
static NESTED_QUANTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*[+*{][^()]*\)\s*\+").unwrap());

/// Two or more `{...}` repetition constructs in one pattern.
static REPEATED_BRACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}[^{}]*\{[^{}]*\}").unwrap());

// ============================================================================
// Rejection reasons
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafePattern {
    TooLong { chars: usize },
    Forbidden(&'static str),
    NestedQuantifier,
    RepeatedBraces,
}

impl fmt::Display for UnsafePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafePattern::TooLong { chars } => {
                write!(f, "pattern is {} chars (max {})", chars, MAX_PATTERN_CHARS)
            }
            UnsafePattern::Forbidden(fragment) => write!(f, "contains '{}'", fragment),
            UnsafePattern::NestedQuantifier => write!(f, "quantified group followed by '+'"),
            UnsafePattern::RepeatedBraces => write!(f, "more than one {{...}} repetition"),
        }
    }
}

impl std::error::Error for UnsafePattern {}

// ============================================================================
// Checks
// ============================================================================

/// Screen `pattern`, returning the first reason it is considered risky.
pub fn check_pattern(pattern: &str) -> Result<(), UnsafePattern> {
    let chars = pattern.chars().count();
    if chars > MAX_PATTERN_CHARS {
        return Err(UnsafePattern::TooLong { chars });
    }

    if let Some(fragment) = FORBIDDEN_FRAGMENTS.iter().copied().find(|f| pattern.contains(*f)) {
        return Err(UnsafePattern::Forbidden(fragment));
    }

    if NESTED_QUANTIFIER.is_match(pattern) {
        return Err(UnsafePattern::NestedQuantifier);
    }

    if REPEATED_BRACES.is_match(pattern) {
        return Err(UnsafePattern::RepeatedBraces);
    }

    Ok(())
}

pub fn is_safe_pattern(pattern: &str) -> bool {
    check_pattern(pattern).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_patterns() {
        assert!(is_safe_pattern("^test"));
        assert!(is_safe_pattern("你好|嗨"));
        assert!(is_safe_pattern(r"\d+ 元"));
        assert!(is_safe_pattern("a{2,3}b"));
        assert!(is_safe_pattern("(ab)+"));
    }

    #[test]
    fn test_rejects_long_patterns() {
        let long = "a".repeat(150);
        assert_eq!(check_pattern(&long), Err(UnsafePattern::TooLong { chars: 150 }));
        assert!(is_safe_pattern(&"a".repeat(MAX_PATTERN_CHARS)));
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        // 60 CJK chars = 180 bytes, still under the limit
        assert!(is_safe_pattern(&"好".repeat(60)));
    }

    #[test]
    fn test_rejects_forbidden_groups() {
        assert_eq!(check_pattern("(?:ab)"), Err(UnsafePattern::Forbidden("(?:")));
        assert_eq!(check_pattern("foo(?!bar)"), Err(UnsafePattern::Forbidden("(?!")));
        assert_eq!(check_pattern("(?<=x)y"), Err(UnsafePattern::Forbidden("(?<")));
    }

    #[test]
    fn test_rejects_adjacent_quantifiers() {
        for p in ["a*+", "a+*", "a**", "a++"] {
            assert!(!is_safe_pattern(p), "{} should be rejected", p);
        }
    }

    #[test]
    fn test_rejects_nested_quantifiers() {
        assert_eq!(check_pattern("(a+)+"), Err(UnsafePattern::NestedQuantifier));
        assert_eq!(check_pattern("(a*) +"), Err(UnsafePattern::NestedQuantifier));
        assert_eq!(check_pattern("(x{2})+"), Err(UnsafePattern::NestedQuantifier));
    }

    #[test]
    fn test_rejects_repeated_braces() {
        assert_eq!(check_pattern("a{2}b{3}"), Err(UnsafePattern::RepeatedBraces));
    }

    #[test]
    fn test_non_capturing_with_nested_quantifier_is_rejected() {
        assert!(!is_safe_pattern("(?:a+)+$"));
    }
}
