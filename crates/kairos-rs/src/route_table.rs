//! Route table: an ordered list of route rules with first-match-wins semantics.
//!
//! Unlike a specificity-sorted matcher, this table never reorders rules:
//! operators encode priority by placement, and `find` must be deterministic
//! across restarts for a given rule set.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use crate::models::route::{MatchType, RouteRule};

#[derive(Debug, Error, Clone)]
pub enum RouteMatchError {
    #[error("no route matches path {path}")]
    NoMatch { path: String },
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },
    #[error("regex compilation error: {0}")]
    RegexError(String),
}

/// A route rule paired with its memoised compiled regex, if `match_type` is `regex`.
struct CompiledRule {
    rule: RouteRule,
    /// `None` for non-regex rules. `Some(Err)` means compilation failed and
    /// this rule is demoted to "never match" — sticky, reported once at load.
    compiled: OnceCell<Option<Arc<Regex>>>,
}

impl CompiledRule {
    fn new(rule: RouteRule) -> Self {
        Self {
            rule,
            compiled: OnceCell::new(),
        }
    }

    fn regex(&self) -> Option<Arc<Regex>> {
        self.compiled
            .get_or_init(|| {
                if self.rule.match_type != MatchType::Regex {
                    return None;
                }
                match Regex::new(&self.rule.path) {
                    Ok(re) => Some(Arc::new(re)),
                    Err(e) => {
                        log::warn!(
                            "route {} has invalid regex pattern, it will never match: {}",
                            self.rule.path,
                            e
                        );
                        None
                    }
                }
            })
            .clone()
    }

    fn matches(&self, path: &str) -> bool {
        match self.rule.match_type {
            MatchType::Exact => self.rule.path == path,
            MatchType::Prefix => path.starts_with(&self.rule.path),
            MatchType::Regex => match self.regex() {
                Some(re) => re.is_match(path),
                None => false,
            },
        }
    }
}

/// Immutable, load-ordered table of route rules.
///
/// Built once from a `GatewayConfig` and swapped in atomically on reload
/// (see `config::hot_reload`); readers never see a partially updated table.
pub struct RouteTable {
    rules: Vec<CompiledRule>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self {
            rules: rules.into_iter().map(CompiledRule::new).collect(),
        }
    }

    /// Scans rules in load order, returning the first whose predicate matches.
    pub fn find(&self, path: &str) -> Result<&RouteRule, RouteMatchError> {
        self.rules
            .iter()
            .find(|r| r.matches(path))
            .map(|r| &r.rule)
            .ok_or_else(|| RouteMatchError::NoMatch {
                path: path.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(path: &str, match_type: MatchType, service: &str) -> RouteRule {
        RouteRule {
            path: path.to_string(),
            match_type,
            service: service.to_string(),
            target_path: None,
            require_auth: false,
            timeout_s: 0,
            retries: 0,
            lb_strategy: Default::default(),
            rate_limit: None,
            breaker: None,
            cache: None,
        }
    }

    #[test]
    fn exact_beats_prefix_by_load_order() {
        let table = RouteTable::new(vec![
            rule("/a/b", MatchType::Exact, "s1"),
            rule("/a", MatchType::Prefix, "s2"),
        ]);
        assert_eq!(table.find("/a/b").unwrap().service, "s1");
        assert_eq!(table.find("/a/c").unwrap().service, "s2");
    }

    #[test]
    fn load_order_is_preserved_not_resorted() {
        // a broader prefix placed first wins even though a narrower one
        // follows — specificity is the operator's job, not ours.
        let table = RouteTable::new(vec![
            rule("/api", MatchType::Prefix, "broad"),
            rule("/api/v1", MatchType::Prefix, "narrow"),
        ]);
        assert_eq!(table.find("/api/v1/users").unwrap().service, "broad");
    }

    #[test]
    fn no_match_is_reported() {
        let table = RouteTable::new(vec![rule("/a", MatchType::Exact, "s1")]);
        assert!(matches!(
            table.find("/b"),
            Err(RouteMatchError::NoMatch { .. })
        ));
    }

    #[test]
    fn invalid_regex_never_matches_but_does_not_panic() {
        let table = RouteTable::new(vec![rule("(unclosed", MatchType::Regex, "s1")]);
        assert!(table.find("anything").is_err());
    }

    #[test]
    fn determinism_across_repeated_calls() {
        let table = RouteTable::new(vec![
            rule(r"^/a/\d+$", MatchType::Regex, "s1"),
            rule("/a", MatchType::Prefix, "s2"),
        ]);
        let first = table.find("/a/123").map(|r| r.service.clone());
        let second = table.find("/a/123").map(|r| r.service.clone());
        assert_eq!(first.ok(), second.ok());
    }
}
