//! Variable context - `{name}` interpolation scoped per branch of the task tree
//!
//! A context is cheap to clone: both maps sit behind an `Arc` and are only
//! copied when a branch writes to them, so every composite task can hand its
//! children an independent view without affecting siblings.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("placeholder pattern is valid")
    })
}

/// Ordered key/value environment used for string interpolation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    vars: Arc<BTreeMap<String, String>>,
    /// Values fixed from the command line, they win over anything set later
    overrides: Arc<BTreeMap<String, String>>,
}

impl Context {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            vars: Arc::new(vars),
            overrides: Arc::default(),
        }
    }

    /// Attach overrides that shadow every regular entry
    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    /// Look up a variable, overrides first
    pub fn get(&self, key: &str) -> Option<&str> {
        self.overrides
            .get(key)
            .or_else(|| self.vars.get(key))
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a variable in this branch only
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        Arc::make_mut(&mut self.vars).insert(key.into(), value.into());
    }

    /// Independent copy for a child branch
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Effective variables (overrides applied), in key order
    pub fn entries(&self) -> BTreeMap<String, String> {
        let mut merged = (*self.vars).clone();
        for (k, v) in self.overrides.iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Substitute `{key}` placeholders.
    ///
    /// Unknown keys stay untouched. Substitution is a single pass, so values
    /// that themselves contain braces are never expanded again.
    pub fn interpolate<'a>(&self, text: &'a str) -> Cow<'a, str> {
        placeholder().replace_all(text, |caps: &Captures<'_>| match self.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
    }

    /// Parse `key=value,key2=value2` as given on the command line.
    ///
    /// Malformed items are skipped.
    pub fn parse_assignments(arg: &str) -> BTreeMap<String, String> {
        arg.split(',')
            .filter_map(|item| item.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }
}

/// Names of all placeholders in `text`, in order of appearance
pub fn placeholders(text: &str) -> Vec<String> {
    placeholder()
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect()
}
