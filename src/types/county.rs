//! County records and the per-state snapshot built from them

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// One county as the upstream feature service reports it.
///
/// Both fields are kept as raw JSON so that a single malformed county is
/// rejected on its own instead of failing the whole page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawCountyRecord {
    #[serde(rename = "STATE_NAME", default)]
    pub state_name: Option<Value>,
    #[serde(rename = "POPULATION", default)]
    pub population: Option<Value>,
}

impl RawCountyRecord {
    pub fn new(state_name: impl Into<Value>, population: impl Into<Value>) -> Self {
        Self {
            state_name: Some(state_name.into()),
            population: Some(population.into()),
        }
    }
}

/// A county that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub state_name: String,
    pub population: u64,
}

/// Why a raw county was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingState,
    EmptyState,
    MissingPopulation,
    NonNumericPopulation,
    NonFinitePopulation,
    NegativePopulation,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingState => "missing_state",
            RejectReason::EmptyState => "empty_state",
            RejectReason::MissingPopulation => "missing_population",
            RejectReason::NonNumericPopulation => "non_numeric_population",
            RejectReason::NonFinitePopulation => "non_finite_population",
            RejectReason::NegativePopulation => "negative_population",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State name → total population, in first-seen order.
///
/// Keys are exact: "Texas" and "TEXAS" are separate entries. Lookups that
/// ignore case go through [`Snapshot::get_ignore_case`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    /// Build a snapshot from (state, population) pairs, summing repeated states.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut snapshot = Self::default();
        for (state, population) in pairs {
            snapshot.add(state.as_ref(), population);
        }
        snapshot
    }

    /// Add to a state's running total, creating the entry on first sight.
    pub(crate) fn add(&mut self, state: &str, population: u64) {
        match self.index.get(state) {
            Some(&i) => {
                let total = &mut self.entries[i].1;
                *total = total.saturating_add(population);
            }
            None => {
                self.index.insert(state.to_string(), self.entries.len());
                self.entries.push((state.to_string(), population));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-sensitive lookup
    pub fn get_exact(&self, state: &str) -> Option<u64> {
        self.index.get(state).map(|&i| self.entries[i].1)
    }

    /// Case-insensitive lookup returning the stored key.
    ///
    /// When several keys differ only by case, an exact match wins, then the
    /// first-seen key.
    pub fn get_ignore_case(&self, state: &str) -> Option<(&str, u64)> {
        if let Some(&i) = self.index.get(state) {
            let (name, population) = &self.entries[i];
            return Some((name.as_str(), *population));
        }
        let wanted = state.to_lowercase();
        self.entries
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
            .map(|(name, population)| (name.as_str(), *population))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(name, pop)| (name.as_str(), *pop))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn populations(&self) -> Vec<u64> {
        self.entries.iter().map(|(_, pop)| *pop).collect()
    }

    /// Sum over all states
    pub fn total(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, (_, pop)| acc.saturating_add(*pop))
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, population) in &self.entries {
            map.serialize_entry(name, population)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = Snapshot;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of state name to non-negative integer population")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Snapshot, A::Error> {
                let mut snapshot = Snapshot::default();
                while let Some((name, population)) = access.next_entry::<String, u64>()? {
                    if snapshot.index.contains_key(&name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate state: {}",
                            name
                        )));
                    }
                    snapshot.add(&name, population);
                }
                Ok(snapshot)
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}

/// The committed snapshot together with the time it was swapped in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampedSnapshot {
    pub snapshot: Snapshot,
    pub updated_at: DateTime<Utc>,
}
