//! Normalised, deterministically ordered result records.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::index::{ShutdownKey, VariableKey};
use crate::instance::ModelInstance;
use crate::solve::SolveOutcome;

/// Row label of a result record.
///
/// The variant order is the row order: the three header rows, then the
/// shutdown flags, then the variables (inventories before flows).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Status,
    Termination,
    Objective,
    Shutdown(ShutdownKey),
    Variable(VariableKey),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Status => f.write_str("status"),
            RowKey::Termination => f.write_str("termination"),
            RowKey::Objective => f.write_str("objective"),
            RowKey::Shutdown(key) => write!(f, "{}", key),
            RowKey::Variable(key) => write!(f, "{}", key),
        }
    }
}

impl Serialize for RowKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(value) => Some(*value),
            Cell::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(text) => Some(text),
            Cell::Number(_) => None,
        }
    }
}

/// One scenario's column: every row of the model with its value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    entries: Vec<(RowKey, Cell)>,
}

impl ResultRecord {
    pub fn rows(&self) -> impl Iterator<Item = &RowKey> {
        self.entries.iter().map(|(row, _)| row)
    }

    pub fn entries(&self) -> &[(RowKey, Cell)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: &RowKey) -> Option<&Cell> {
        self.entries
            .binary_search_by(|(key, _)| key.cmp(row))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn value(&self, row: &RowKey) -> Option<f64> {
        self.get(row).and_then(Cell::as_number)
    }

    pub fn status(&self) -> Option<&str> {
        self.get(&RowKey::Status).and_then(Cell::as_text)
    }

    pub fn termination(&self) -> Option<&str> {
        self.get(&RowKey::Termination).and_then(Cell::as_text)
    }

    pub fn objective(&self) -> Option<f64> {
        self.value(&RowKey::Objective)
    }

    pub(crate) fn into_cells(self) -> Vec<Cell> {
        self.entries.into_iter().map(|(_, cell)| cell).collect()
    }
}

/// The row labels every record of `instance` carries, in record order
pub fn row_keys(instance: &ModelInstance) -> Vec<RowKey> {
    let mut rows = vec![RowKey::Status, RowKey::Termination, RowKey::Objective];
    rows.extend(instance.shutdown_flags().map(|(key, _)| RowKey::Shutdown(key.clone())));
    rows.extend(instance.variables().iter().cloned().map(RowKey::Variable));
    rows.sort();
    rows
}

/// Turn a solve outcome into a record. Non-optimal outcomes record an
/// objective of 0 and every variable at 0, so all records share one row set.
pub fn extract(instance: &ModelInstance, outcome: &SolveOutcome) -> ResultRecord {
    let optimal = outcome.is_optimal();
    let objective = if optimal { outcome.objective.unwrap_or(0.0) } else { 0.0 };

    let mut entries = vec![
        (RowKey::Status, Cell::Text(outcome.status.to_string())),
        (RowKey::Termination, Cell::Text(outcome.termination.to_string())),
        (RowKey::Objective, Cell::Number(objective)),
    ];
    entries.extend(
        instance
            .shutdown_flags()
            .map(|(key, flag)| (RowKey::Shutdown(key.clone()), Cell::Number(if flag { 1.0 } else { 0.0 }))),
    );
    entries.extend(instance.variables().iter().map(|key| {
        let value = if optimal {
            outcome.values.get(key).copied().unwrap_or(0.0)
        } else {
            0.0
        };
        (RowKey::Variable(key.clone()), Cell::Number(value))
    }));
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    ResultRecord { entries }
}
