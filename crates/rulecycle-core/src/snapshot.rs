//! Observed host facts for a single cycle.
//!
//! A `StateSnapshot` is produced once per cycle by a `StateProbe`, handed to
//! the selection engine by reference, and dropped at the end of the cycle.
//! There is no way to mutate a snapshot after it is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A single observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fact {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Fact {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Fact::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Fact::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Fact::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Fact::Bool(_) => "bool",
            Fact::Number(_) => "number",
            Fact::Text(_) => "text",
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fact::Bool(b) => write!(f, "{b}"),
            Fact::Number(n) => write!(f, "{n}"),
            Fact::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Fact {
    fn from(v: bool) -> Self {
        Fact::Bool(v)
    }
}

impl From<f64> for Fact {
    fn from(v: f64) -> Self {
        Fact::Number(v)
    }
}

impl From<i64> for Fact {
    fn from(v: i64) -> Self {
        Fact::Number(v as f64)
    }
}

impl From<&str> for Fact {
    fn from(v: &str) -> Self {
        Fact::Text(v.to_string())
    }
}

impl From<String> for Fact {
    fn from(v: String) -> Self {
        Fact::Text(v)
    }
}

// ---------------------------------------------------------------------------
// StateSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    facts: BTreeMap<String, Fact>,
}

impl StateSnapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Fact> {
        self.facts.get(name)
    }

    /// Boolean view of a fact. Missing or non-boolean facts read as `false`.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(Fact::as_bool).unwrap_or(false)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fact)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Fact>> FromIterator<(K, V)> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            facts: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    facts: BTreeMap<String, Fact>,
}

impl SnapshotBuilder {
    pub fn fact(mut self, name: impl Into<String>, value: impl Into<Fact>) -> Self {
        self.facts.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Fact>) {
        self.facts.insert(name.into(), value.into());
    }

    pub fn build(self) -> StateSnapshot {
        StateSnapshot { facts: self.facts }
    }
}
