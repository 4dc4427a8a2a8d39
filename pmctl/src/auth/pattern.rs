//! Resource pattern language for scoping role permission grants.
//!
//! A grant may carry a pattern limiting it to part of the resource tree. Resource paths are
//! slash-separated (`tenant`, `tenant/namespace`, `tenant/namespace/topic`). Patterns are parsed
//! once into a [`ResourcePattern`]:
//!
//! | stored pattern      | variant                          | matches                                   |
//! |---------------------|----------------------------------|-------------------------------------------|
//! | `NULL`              | [`ResourcePattern::Any`]         | every path                                |
//! | `acme/*`            | [`ResourcePattern::PrefixSlashStar`]  | `acme` itself and anything under `acme/`  |
//! | `acme/**`           | [`ResourcePattern::PrefixDoubleStar`] | any path starting with `acme`             |
//! | `acme/*/orders`     | [`ResourcePattern::Glob`]        | shell glob, `*` crosses `/`               |
//! | `acme/prod/orders`  | [`ResourcePattern::Exact`]       | that path only                            |
//!
//! Matching is total: it never fails and never allocates on the hot path beyond the parse.

use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePattern {
    Any,
    Exact(String),
    /// `prefix/*`: the prefix itself and everything below it.
    PrefixSlashStar(String),
    /// `prefix/**`: any path with this string prefix.
    PrefixDoubleStar(String),
    Glob(Glob),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("resource pattern cannot be empty")]
    Empty,
    #[error("resource pattern cannot contain whitespace or control characters")]
    InvalidCharacter,
    #[error("resource pattern has an unterminated character class")]
    UnterminatedClass,
}

impl ResourcePattern {
    /// Interpret a stored pattern column. Never fails: rows are validated on write, and anything
    /// unexpected degrades to the most literal reading of the string.
    pub fn parse(pattern: Option<&str>) -> Self {
        let Some(pattern) = pattern else {
            return ResourcePattern::Any;
        };

        if let Some(prefix) = pattern.strip_suffix("/**") {
            ResourcePattern::PrefixDoubleStar(prefix.to_string())
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            ResourcePattern::PrefixSlashStar(prefix.to_string())
        } else if pattern.contains('*') {
            ResourcePattern::Glob(Glob::compile(pattern))
        } else {
            ResourcePattern::Exact(pattern.to_string())
        }
    }

    /// Validate a pattern submitted for storage.
    pub fn validate(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if pattern.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(PatternError::InvalidCharacter);
        }
        if pattern.contains('*') && !pattern.ends_with("/*") && !pattern.ends_with("/**") {
            Glob::check_classes(pattern)?;
        }
        Ok(Self::parse(Some(pattern)))
    }

    pub fn matches(&self, resource_path: &str) -> bool {
        match self {
            ResourcePattern::Any => true,
            ResourcePattern::Exact(p) => p == resource_path,
            ResourcePattern::PrefixSlashStar(prefix) => {
                resource_path == prefix
                    || resource_path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            ResourcePattern::PrefixDoubleStar(prefix) => resource_path.starts_with(prefix.as_str()),
            ResourcePattern::Glob(glob) => glob.source == resource_path || glob.matches(resource_path),
        }
    }
}

impl FromStr for ResourcePattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(s)
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePattern::Any => f.write_str("*"),
            ResourcePattern::Exact(p) => f.write_str(p),
            ResourcePattern::PrefixSlashStar(p) => write!(f, "{p}/*"),
            ResourcePattern::PrefixDoubleStar(p) => write!(f, "{p}/**"),
            ResourcePattern::Glob(g) => f.write_str(&g.source),
        }
    }
}

/// Convenience wrapper over [`ResourcePattern::parse`] for one-off checks.
pub fn matches(pattern: Option<&str>, resource_path: &str) -> bool {
    ResourcePattern::parse(pattern).matches(resource_path)
}

/// fnmatch-style glob: `*` any run (including `/`), `?` one character, `[...]`/`[!...]` classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    source: String,
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::AnyRun => true,
            Token::Class { negated, ranges } => ranges.iter().any(|(lo, hi)| (*lo..=*hi).contains(&c)) != *negated,
        }
    }
}

impl Glob {
    fn compile(source: &str) -> Self {
        let chars: Vec<char> = source.chars().collect();
        let mut tokens = Vec::with_capacity(chars.len());
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => {
                    // Consecutive stars are equivalent to one
                    if tokens.last() != Some(&Token::AnyRun) {
                        tokens.push(Token::AnyRun);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => match parse_class(&chars, i) {
                    Some((token, next)) => {
                        tokens.push(token);
                        i = next;
                    }
                    None => {
                        tokens.push(Token::Literal('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Literal(c));
                    i += 1;
                }
            }
        }
        Self {
            source: source.to_string(),
            tokens,
        }
    }

    fn check_classes(source: &str) -> Result<(), PatternError> {
        let chars: Vec<char> = source.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            if *c == '[' && parse_class(&chars, i).is_none() {
                return Err(PatternError::UnterminatedClass);
            }
        }
        Ok(())
    }

    /// Greedy matcher with single-star backtracking; linear in practice for resource paths.
    fn matches(&self, input: &str) -> bool {
        let text: Vec<char> = input.chars().collect();
        let (mut t, mut p) = (0usize, 0usize);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(token) if token.matches_char(text[t]) => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((star_p, star_t)) => {
                        p = star_p + 1;
                        t = star_t + 1;
                        backtrack = Some((star_p, star_t + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::AnyRun)
    }
}

/// Parse a `[...]` class starting at `start`. Returns the token and the index after `]`.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start + 1;
    let negated = matches!(chars.get(i), Some('!'));
    if negated {
        i += 1;
    }

    let mut ranges = Vec::new();
    let mut first = true;
    while i < chars.len() {
        let c = chars[i];
        if c == ']' && !first {
            return Some((Token::Class { negated, ranges }, i + 1));
        }
        first = false;
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|e| *e != ']') {
            ranges.push((c, chars[i + 2]));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_pattern_matches_everything() {
        for path in ["", "acme", "acme/prod", "acme/prod/orders", "*"] {
            assert!(matches(None, path), "path: {path}");
        }
    }

    #[test]
    fn test_pattern_table() {
        let cases: &[(&str, &str, bool)] = &[
            // exact
            ("acme/prod/orders", "acme/prod/orders", true),
            ("acme/prod/orders", "acme/prod/orders2", false),
            ("acme/prod/orders", "acme/prod", false),
            // prefix with /*
            ("acme/*", "acme", true),
            ("acme/*", "acme/prod", true),
            ("acme/*", "acme/prod/orders", true),
            ("acme/*", "acmecorp/prod", false),
            ("acme/*", "other/prod/orders", false),
            ("acme/prod/*", "acme/prod", true),
            ("acme/prod/*", "acme/staging/orders", false),
            // deep wildcard with /**
            ("acme/**", "acme/prod/orders", true),
            ("acme/**", "acme", true),
            ("acme/**", "acmecorp/prod", true),
            ("acme/**", "other", false),
            // glob
            ("acme/*/orders", "acme/prod/orders", true),
            ("acme/*/orders", "acme/prod/eu/orders", true),
            ("acme/*/orders", "acme/prod/payments", false),
            ("*/prod/*-events", "acme/prod/click-events", true),
            ("acme/prod/order?*", "acme/prod/orders", true),
            ("acme/prod/order?*", "acme/prod/order", false),
            // `?` and `[...]` only act as wildcards once the pattern contains `*`
            ("acme/prod/order?", "acme/prod/orders", false),
            ("acme/prod/order?", "acme/prod/order?", true),
            ("acme/[ps]rod", "acme/prod", false),
            ("acme/[ps]*/orders", "acme/prod/orders", true),
            ("acme/[ps]*/orders", "acme/staging/orders", true),
            ("acme/[!ps]*/orders", "acme/prod/orders", false),
            ("acme/[!ps]*/orders", "acme/dev/orders", true),
            ("*", "anything/at/all", true),
            ("*", "", true),
            ("a*b*c", "abc", true),
            ("a*b*c", "aXbYbZc", true),
            ("a*b*c", "aXbYbZ", false),
        ];

        for (pattern, path, expected) in cases {
            assert_eq!(
                matches(Some(pattern), path),
                *expected,
                "pattern {pattern:?} against {path:?}"
            );
        }
    }

    #[test]
    fn test_slash_star_property() {
        let prefixes = ["acme", "acme/prod", "a"];
        let paths = ["acme", "acme/", "acme/prod", "acme/prod/orders", "acmex", "a", "a/b", "", "b/acme"];
        for prefix in prefixes {
            let pattern = format!("{prefix}/*");
            for path in paths {
                let expected = path == prefix || path.starts_with(&format!("{prefix}/"));
                assert_eq!(matches(Some(&pattern), path), expected, "{pattern} vs {path}");
            }
        }
    }

    #[test]
    fn test_double_star_property() {
        let prefixes = ["acme", "acme/prod", "a"];
        let paths = ["acme", "acme/prod", "acme/prod/orders", "acmex", "a", "a/b", "", "b/acme"];
        for prefix in prefixes {
            let pattern = format!("{prefix}/**");
            for path in paths {
                assert_eq!(matches(Some(&pattern), path), path.starts_with(prefix), "{pattern} vs {path}");
            }
        }
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(ResourcePattern::parse(None), ResourcePattern::Any);
        assert_eq!(
            ResourcePattern::parse(Some("acme/*")),
            ResourcePattern::PrefixSlashStar("acme".to_string())
        );
        assert_eq!(
            ResourcePattern::parse(Some("acme/**")),
            ResourcePattern::PrefixDoubleStar("acme".to_string())
        );
        assert_eq!(
            ResourcePattern::parse(Some("acme/prod")),
            ResourcePattern::Exact("acme/prod".to_string())
        );
        assert!(matches!(ResourcePattern::parse(Some("acme/*/x")), ResourcePattern::Glob(_)));
    }

    #[test]
    fn test_display_roundtrips_source() {
        for source in ["acme/*", "acme/**", "acme/*/orders", "acme/prod/orders"] {
            assert_eq!(ResourcePattern::parse(Some(source)).to_string(), source);
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(ResourcePattern::validate(""), Err(PatternError::Empty));
        assert_eq!(ResourcePattern::validate("acme prod"), Err(PatternError::InvalidCharacter));
        assert_eq!(ResourcePattern::validate("acme/[ab*"), Err(PatternError::UnterminatedClass));
        assert!(ResourcePattern::validate("acme/*").is_ok());
        assert!(ResourcePattern::validate("acme/[ab]*").is_ok());
        assert!("acme/prod/orders".parse::<ResourcePattern>().is_ok());
    }

    #[test]
    fn test_unterminated_class_is_literal_when_stored() {
        // A row written before validation existed still behaves deterministically
        assert!(matches(Some("acme/[x*"), "acme/[xyz"));
        assert!(!matches(Some("acme/[x*"), "acme/x"));
    }

    #[test]
    fn test_literal_pattern_text_matches_itself() {
        for pattern in ["acme/*", "acme/**", "acme/[ab]*"] {
            assert!(matches(Some(pattern), pattern), "{pattern}");
        }
    }
}
