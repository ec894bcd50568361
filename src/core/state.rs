//! World state: a mapping from string keys to typed scalar values.
//!
//! These types define the stable vocabulary shared by every other component.
//! They are deterministic: `stringify` output depends only on contents, never
//! on insertion order, because it doubles as the dedup key for A* search.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar fact value. The variant set is closed so JSON round-trips are
/// lossless; consumers with richer types must coerce at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// The current state of the world as a set of key-value facts.
///
/// Also used for state *fragments*: action preconditions and effects, and a
/// goal's desired state, are all partial world states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldState(BTreeMap<String, Value>);

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact, overwriting any existing value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Absent keys are a normal outcome, not an error.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// True if every key in `conditions` is present and equal in self.
    /// An empty fragment matches any state.
    pub fn matches(&self, conditions: &WorldState) -> bool {
        conditions
            .0
            .iter()
            .all(|(key, expected)| self.0.get(key) == Some(expected))
    }

    /// Merge `changes` into this state, overwriting existing values.
    pub fn apply(&mut self, changes: &WorldState) {
        for (key, value) in &changes.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Keys that differ between this state and another, in sorted order.
    pub fn diff(&self, other: &WorldState) -> Vec<String> {
        let mut differences: Vec<String> = self
            .0
            .iter()
            .filter(|(key, value)| other.0.get(*key) != Some(value))
            .map(|(key, _)| key.clone())
            .collect();

        for key in other.0.keys() {
            if !self.0.contains_key(key) {
                differences.push(key.clone());
            }
        }

        differences.sort();
        differences
    }

    /// Heuristic distance to a goal fragment: the count of keys in `goal`
    /// that are absent or unequal here. Used as the A* heuristic.
    pub fn distance(&self, goal: &WorldState) -> usize {
        goal.0
            .iter()
            .filter(|(key, expected)| self.0.get(*key) != Some(expected))
            .count()
    }

    /// Deterministic rendering with keys sorted lexicographically.
    ///
    /// The planner keys its closed set on this string, so two states with the
    /// same facts must always stringify identically.
    pub fn stringify(&self) -> String {
        if self.0.is_empty() {
            return "{}".to_string();
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

impl fmt::Display for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stringify())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for WorldState {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut state = WorldState::new();
        for (key, value) in iter {
            state.set(key, value);
        }
        state
    }
}
