//! County record normalization
//!
//! Validates one untrusted upstream county and coerces it into a
//! `(state, population)` pair. A bad record is a skip decision, never an
//! error for the batch.

use crate::types::{NormalizedRecord, RawCountyRecord, RejectReason};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Largest integer an f64 holds exactly (2^53 - 1)
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_991.0;

/// Normalize a single raw county.
///
/// Rules:
/// - state name must be a string that is non-empty after trimming; the
///   trimmed form becomes the key
/// - population may be a JSON number or a numeric string; it must be
///   finite and non-negative. A fractional count is rounded to the
///   nearest whole number, halves away from zero (`10.5` becomes `11`)
///
/// # Examples
/// ```
/// use statepop::services::normalizer::normalize_record;
/// use statepop::types::RawCountyRecord;
///
/// let rec = normalize_record(&RawCountyRecord::new("Texas", "100")).unwrap();
/// assert_eq!(rec.state_name, "Texas");
/// assert_eq!(rec.population, 100);
/// ```
pub fn normalize_record(raw: &RawCountyRecord) -> Result<NormalizedRecord, RejectReason> {
    let state_name = normalize_state(raw.state_name.as_ref())?;
    let population = normalize_population(raw.population.as_ref())?;
    Ok(NormalizedRecord {
        state_name,
        population,
    })
}

fn normalize_state(value: Option<&Value>) -> Result<String, RejectReason> {
    // Non-string names (numbers, objects) count as missing
    let name = match value {
        Some(Value::String(s)) => s.trim(),
        _ => return Err(RejectReason::MissingState),
    };
    if name.is_empty() {
        return Err(RejectReason::EmptyState);
    }
    Ok(name.to_string())
}

fn normalize_population(value: Option<&Value>) -> Result<u64, RejectReason> {
    match value {
        None | Some(Value::Null) => Err(RejectReason::MissingPopulation),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                return Ok(v);
            }
            if n.as_i64().is_some() {
                return Err(RejectReason::NegativePopulation);
            }
            match n.as_f64() {
                Some(f) => from_float(f),
                None => Err(RejectReason::NonNumericPopulation),
            }
        }
        Some(Value::String(s)) => parse_population_str(s),
        Some(_) => Err(RejectReason::NonNumericPopulation),
    }
}

fn parse_population_str(s: &str) -> Result<u64, RejectReason> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RejectReason::NonNumericPopulation);
    }
    if let Ok(v) = s.parse::<u64>() {
        return Ok(v);
    }
    if s.parse::<i64>().is_ok() {
        return Err(RejectReason::NegativePopulation);
    }
    match s.parse::<f64>() {
        Ok(f) => from_float(f),
        Err(_) => Err(RejectReason::NonNumericPopulation),
    }
}

fn from_float(f: f64) -> Result<u64, RejectReason> {
    if !f.is_finite() {
        return Err(RejectReason::NonFinitePopulation);
    }
    if f < 0.0 {
        return Err(RejectReason::NegativePopulation);
    }
    let whole = f.round();
    if whole > MAX_EXACT_FLOAT {
        return Err(RejectReason::NonFinitePopulation);
    }
    Ok(whole as u64)
}

/// Rejection counts for one batch, keyed by reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectionTally {
    by_reason: BTreeMap<RejectReason, usize>,
}

impl RejectionTally {
    pub fn record(&mut self, reason: RejectReason) {
        *self.by_reason.entry(reason).or_insert(0) += 1;
    }

    pub fn total(&self) -> usize {
        self.by_reason.values().sum()
    }

    pub fn count(&self, reason: RejectReason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.by_reason.is_empty()
    }

    /// e.g. "empty_state=1, non_numeric_population=2"
    pub fn summary(&self) -> String {
        self.by_reason
            .iter()
            .map(|(reason, n)| format!("{}={}", reason, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Normalize a whole batch, keeping survivors in input order.
pub fn normalize_batch(raws: &[RawCountyRecord]) -> (Vec<NormalizedRecord>, RejectionTally) {
    let mut accepted = Vec::with_capacity(raws.len());
    let mut tally = RejectionTally::default();

    for raw in raws {
        match normalize_record(raw) {
            Ok(record) => accepted.push(record),
            Err(reason) => tally.record(reason),
        }
    }

    (accepted, tally)
}
