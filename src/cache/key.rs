//! Cache key construction and pattern matching

use crate::cache::types::CacheKey;
use serde::{Deserialize, Serialize};

/// Kind prefix for structured cache keys
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Single record fetched by id
    Record,

    /// Result of a list or search query
    Query,

    /// Aggregate or computed value
    Aggregate,

    /// Custom kind
    Custom(String),
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Record => write!(f, "record"),
            KeyKind::Query => write!(f, "query"),
            KeyKind::Aggregate => write!(f, "aggregate"),
            KeyKind::Custom(s) => write!(f, "{}", s),
        }
    }
}

/// Cache key builder producing `kind:identifier?k=v&...`
pub struct CacheKeyBuilder {
    kind: KeyKind,
    identifier: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(kind: KeyKind) -> Self {
        Self {
            kind,
            identifier: String::new(),
            params: Vec::new(),
        }
    }

    /// Set the primary identifier
    pub fn identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = id.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Build the cache key
    ///
    /// Parameters are sorted so the same logical request always maps to
    /// the same key.
    pub fn build(mut self) -> CacheKey {
        let mut key = format!("{}:{}", self.kind, self.identifier);

        if !self.params.is_empty() {
            self.params.sort();
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}

/// Match a key against a prefix or glob pattern.
///
/// `*` matches any run of characters and `?` exactly one. A pattern with
/// no wildcard is treated as a prefix.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains(['*', '?']) {
        return key.starts_with(pattern);
    }

    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ki;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}

/// Turn a prefix into a store-side glob (`user:` -> `user:*`)
pub fn to_glob(pattern: &str) -> String {
    if pattern.contains(['*', '?']) {
        pattern.to_string()
    } else {
        format!("{}*", pattern)
    }
}
