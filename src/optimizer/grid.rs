//! Hyperparameter grids and their deterministic enumeration

use crate::error::{Result, TabtuneError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only when integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

/// One full assignment of grid values, keys in grid declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamCandidate(IndexMap<String, ParamValue>);

impl ParamCandidate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParamCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// Ordered mapping `name -> values`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid(IndexMap<String, Vec<ParamValue>>);

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to append a hyperparameter; re-adding a name replaces
    /// its values but keeps its original position
    pub fn with_param<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.0
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn values(&self, name: &str) -> Option<&[ParamValue]> {
        self.0.get(name).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject grids that cannot produce a candidate
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(TabtuneError::ConfigError(
                "parameter grid is empty".to_string(),
            ));
        }
        if let Some((name, _)) = self.0.iter().find(|(_, values)| values.is_empty()) {
            return Err(TabtuneError::ConfigError(format!(
                "parameter '{}' has no values",
                name
            )));
        }
        self.checked_total()?;
        Ok(())
    }

    /// Product of the per-key list lengths
    pub fn total_count(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }
        self.checked_total().unwrap_or(usize::MAX)
    }

    fn checked_total(&self) -> Result<usize> {
        self.0.values().try_fold(1usize, |acc, values| {
            acc.checked_mul(values.len())
                .ok_or_else(|| TabtuneError::ConfigError("parameter grid is too large".to_string()))
        })
    }

    /// Candidate at `index` in enumeration order (last-declared key varies fastest)
    pub fn candidate_at(&self, index: usize) -> Option<ParamCandidate> {
        if index >= self.total_count() {
            return None;
        }
        let mut remainder = index;
        let mut picked: Vec<(&String, &ParamValue)> = Vec::with_capacity(self.0.len());
        for (name, values) in self.0.iter().rev() {
            picked.push((name, &values[remainder % values.len()]));
            remainder /= values.len();
        }
        Some(ParamCandidate(
            picked
                .into_iter()
                .rev()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        ))
    }

    /// Enumerate every candidate from the start
    pub fn iter(&self) -> CandidateIter<'_> {
        CandidateIter {
            grid: self,
            next: 0,
            total: self.total_count(),
        }
    }
}

impl<'a> IntoIterator for &'a ParameterGrid {
    type Item = ParamCandidate;
    type IntoIter = CandidateIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(String, Vec<ParamValue>)> for ParameterGrid {
    fn from_iter<I: IntoIterator<Item = (String, Vec<ParamValue>)>>(iter: I) -> Self {
        ParameterGrid(iter.into_iter().collect())
    }
}

/// Cartesian-product iterator over a grid
#[derive(Debug, Clone)]
pub struct CandidateIter<'a> {
    grid: &'a ParameterGrid,
    next: usize,
    total: usize,
}

impl CandidateIter<'_> {
    /// Number of candidates in the full enumeration
    pub fn total_count(&self) -> usize {
        self.total
    }
}

impl Iterator for CandidateIter<'_> {
    type Item = ParamCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let candidate = self.grid.candidate_at(self.next);
        self.next += 1;
        candidate
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CandidateIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_key_varies_fastest() {
        let grid = ParameterGrid::new()
            .with_param("a", [1i64, 2])
            .with_param("b", [10i64, 20]);

        let candidates: Vec<ParamCandidate> = grid.iter().collect();
        let expected = vec![
            ParamCandidate::new().with("a", 1i64).with("b", 10i64),
            ParamCandidate::new().with("a", 1i64).with("b", 20i64),
            ParamCandidate::new().with("a", 2i64).with("b", 10i64),
            ParamCandidate::new().with("a", 2i64).with("b", 20i64),
        ];
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_total_count_and_restart() {
        let grid = ParameterGrid::new()
            .with_param("x", [1i64, 2, 3])
            .with_param("y", [true, false])
            .with_param("z", [0.1, 0.2]);
        assert_eq!(grid.total_count(), 12);
        assert_eq!(grid.iter().len(), 12);

        let first: Vec<_> = grid.iter().collect();
        let second: Vec<_> = grid.iter().collect();
        assert_eq!(first, second);
        assert_eq!(grid.candidate_at(11).as_ref(), first.last());
        assert!(grid.candidate_at(12).is_none());
    }

    #[test]
    fn test_structural_errors() {
        assert!(ParameterGrid::new().validate().is_err());
        let empty_list = ParameterGrid::new()
            .with_param("a", [1i64])
            .with_param("b", Vec::<i64>::new());
        assert!(matches!(empty_list.validate(), Err(TabtuneError::ConfigError(_))));
        assert_eq!(empty_list.total_count(), 0);
        assert_eq!(empty_list.iter().count(), 0);
    }

    #[test]
    fn test_grid_json_keeps_declaration_order() {
        let grid: ParameterGrid =
            serde_json::from_str(r#"{"num_leaves": [40, 60], "reg_alpha": [0, 0.5], "verbose": [false]}"#)
                .unwrap();
        assert_eq!(grid.names().collect::<Vec<_>>(), vec!["num_leaves", "reg_alpha", "verbose"]);
        assert_eq!(grid.values("reg_alpha").unwrap()[0], ParamValue::Int(0));
        assert_eq!(grid.values("reg_alpha").unwrap()[1], ParamValue::Float(0.5));
        assert_eq!(grid.values("verbose").unwrap()[0], ParamValue::Bool(false));
    }

    #[test]
    fn test_candidate_display() {
        let candidate = ParamCandidate::new().with("a", 1i64).with("lr", 0.01);
        assert_eq!(candidate.to_string(), "{a=1, lr=0.01}");
    }
}
