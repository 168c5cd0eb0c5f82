//! Filter registry for template interpolation.
//!
//! Filters are unary transforms applied left-to-right in `{{ expr|a|b }}`. The
//! registry is an explicit object owned by the [`Environment`]; there is no
//! process-wide filter table.
//!
//! The special [`Filter::Raw`] entry (registered as `raw`) performs no
//! transformation; its presence in a chain turns off auto-escaping for that
//! interpolation.
//!
//! A filter name that is not registered is a compile error. Exposing an
//! arbitrary function to templates requires registering it with
//! [`FilterRegistry::add`].
//!
//! # Built-in filters
//!
//! | name | effect |
//! |------|--------|
//! | `raw` | disables auto-escaping |
//! | `escape`, `e` | HTML-escapes the value |
//! | `upper`, `lower`, `capitalize`, `title`, `trim` | string case/whitespace |
//! | `length` | characters in a string, items in an array/object |
//! | `reverse`, `first`, `last` | strings and arrays |
//! | `json` | JSON encoding |
//! | `nl2br` | newline to `<br />` |
//! | `striptags` | removes `<…>` tags |
//!
//! [`Environment`]: super::Environment

use anyhow::{Result, bail};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use strsim::levenshtein;

use crate::constants::{MAX_SUGGESTIONS, SIMILARITY_THRESHOLD_PERCENT};

/// Signature of a transform filter.
pub type FilterFn = dyn Fn(&Value) -> Result<Value> + Send + Sync;

/// A registered filter.
#[derive(Clone)]
pub enum Filter {
    /// Unary transform applied to the current value.
    Transform(Arc<FilterFn>),
    /// Pass-through marker that disables auto-escaping.
    Raw,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Transform(_) => f.write_str("Filter::Transform(..)"),
            Filter::Raw => f.write_str("Filter::Raw"),
        }
    }
}

/// Name → filter mapping.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FilterRegistry {
    /// A registry containing only `raw`.
    pub fn empty() -> Self {
        let mut filters = HashMap::new();
        filters.insert("raw".to_string(), Filter::Raw);
        Self { filters }
    }

    /// A registry with every built-in filter.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.add("escape", |v| Ok(Value::String(escape_html(&stringify(v)))));
        registry.add("e", |v| Ok(Value::String(escape_html(&stringify(v)))));
        registry.add("upper", |v| Ok(Value::String(stringify(v).to_uppercase())));
        registry.add("lower", |v| Ok(Value::String(stringify(v).to_lowercase())));
        registry.add("capitalize", |v| Ok(Value::String(capitalize(&stringify(v)))));
        registry.add("title", |v| {
            let s = stringify(v);
            let titled: Vec<String> = s.split(' ').map(capitalize).collect();
            Ok(Value::String(titled.join(" ")))
        });
        registry.add("trim", |v| Ok(Value::String(stringify(v).trim().to_string())));
        registry.add("length", length);
        registry.add("reverse", reverse);
        registry.add("first", |v| first_or_last(v, true));
        registry.add("last", |v| first_or_last(v, false));
        registry.add("json", |v| Ok(Value::String(serde_json::to_string(v)?)));
        registry.add("nl2br", |v| Ok(Value::String(stringify(v).replace('\n', "<br />\n"))));
        registry.add("striptags", |v| {
            static TAGS: LazyLock<Regex> =
                LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex is valid"));
            Ok(Value::String(TAGS.replace_all(&stringify(v), "").into_owned()))
        });

        registry
    }

    /// Register (or replace) a transform filter.
    pub fn add<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registering filter '{}'", name);
        self.filters.insert(name, Filter::Transform(Arc::new(filter)));
    }

    /// Look up a filter by name.
    pub fn resolve(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered names close to `name`, best match first.
    pub fn suggestions(&self, name: &str) -> Vec<String> {
        suggest(name, self.filters.keys().map(String::as_str))
    }
}

/// Candidates within the similarity threshold of `target`, closest first.
pub(crate) fn suggest<'a>(target: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<String> {
    let max_distance = (target.chars().count() * SIMILARITY_THRESHOLD_PERCENT / 100).max(1);
    let mut scored: Vec<(usize, &str)> = candidates
        .map(|c| (levenshtein(target, c), c))
        .filter(|(d, _)| *d <= max_distance)
        .collect();
    scored.sort();
    scored.into_iter().take(MAX_SUGGESTIONS).map(|(_, c)| c.to_string()).collect()
}

/// HTML-escapes `&`, `<`, `>`, `"` and `'`. Operates on `char`s, so multi-byte
/// UTF-8 text passes through untouched.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Output form of a value: strings verbatim, `null` empty, everything else as JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn length(value: &Value) -> Result<Value> {
    let len = match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => stringify(other).chars().count(),
    };
    Ok(Value::from(len))
}

fn reverse(value: &Value) -> Result<Value> {
    match value {
        Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        Value::Object(_) => bail!("cannot reverse an object"),
        other => Ok(Value::String(stringify(other).chars().rev().collect())),
    }
}

fn first_or_last(value: &Value, first: bool) -> Result<Value> {
    match value {
        Value::Array(items) => {
            let item = if first { items.first() } else { items.last() };
            Ok(item.cloned().unwrap_or(Value::Null))
        }
        Value::String(s) => {
            let c = if first { s.chars().next() } else { s.chars().next_back() };
            Ok(c.map(|c| Value::String(c.to_string())).unwrap_or(Value::Null))
        }
        Value::Null => Ok(Value::Null),
        other => bail!("expected a string or array, found {}", value_kind(other)),
    }
}

/// Short type name of a value, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
