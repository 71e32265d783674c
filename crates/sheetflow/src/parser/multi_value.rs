//! Normalization of fields that pack several tokens into one cell.

use super::record::{FieldValue, Record};

/// The set of field names treated as multi-value for one file format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValueFields {
    names: Vec<String>,
}

impl MultiValueFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Replaces every designated field named in `header` with its token
    /// list. A designated column with no cell in this row becomes an empty
    /// list; designated fields the file does not have are left out.
    pub fn apply(&self, header: &[String], record: &mut Record) {
        for name in self.names.iter().filter(|n| header.contains(n)) {
            let tokens = normalize(record.get(name));
            record.insert(name.clone(), FieldValue::List(tokens));
        }
    }
}

/// Splits a raw multi-value cell into trimmed, non-empty tokens.
pub fn normalize(value: Option<&FieldValue>) -> Vec<String> {
    match value {
        None => Vec::new(),
        Some(FieldValue::List(items)) => items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => split_tokens(&other.to_string()),
    }
}

fn split_tokens(raw: &str) -> Vec<String> {
    strip_wrapping_quotes(raw.trim())
        .split([',', '|'])
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_wrapping_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return &s[1..s.len() - 1];
        }
    }
    s
}
