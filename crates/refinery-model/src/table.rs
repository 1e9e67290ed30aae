use serde::Serialize;

use crate::error::ModelError;
use crate::extract::{Cell, ResultRecord, RowKey};
use crate::scenario::ScenarioId;

/// Scenario comparison: one row per record key, one column per scenario in run order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTable {
    rows: Vec<RowKey>,
    columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub scenario: ScenarioId,
    pub cells: Vec<Cell>,
}

impl ComparisonTable {
    pub fn new(rows: Vec<RowKey>) -> Self {
        Self {
            rows,
            columns: Vec::new(),
        }
    }

    /// Append a scenario's record as the last column. The record must carry
    /// exactly the table's rows, in the same order.
    pub fn push_column(&mut self, scenario: ScenarioId, record: ResultRecord) -> Result<(), ModelError> {
        if self.columns.iter().any(|c| c.scenario == scenario) {
            return Err(ModelError::DuplicateScenario(scenario));
        }
        if record.len() != self.rows.len() || !record.rows().eq(self.rows.iter()) {
            return Err(ModelError::MisalignedRecord(scenario));
        }
        self.columns.push(Column {
            scenario,
            cells: record.into_cells(),
        });
        Ok(())
    }

    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &ScenarioId> {
        self.columns.iter().map(|c| &c.scenario)
    }

    pub fn column(&self, scenario: &ScenarioId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.scenario == scenario)
    }

    pub fn cell(&self, row: &RowKey, scenario: &ScenarioId) -> Option<&Cell> {
        let index = self.rows.binary_search(row).ok()?;
        self.column(scenario)?.cells.get(index)
    }

    pub fn value(&self, row: &RowKey, scenario: &ScenarioId) -> Option<f64> {
        self.cell(row, scenario).and_then(Cell::as_number)
    }

    pub fn text(&self, row: &RowKey, scenario: &ScenarioId) -> Option<&str> {
        self.cell(row, scenario).and_then(Cell::as_text)
    }

    /// Values of one row across all scenarios, in column order
    pub fn row_values(&self, row: &RowKey) -> Option<Vec<&Cell>> {
        let index = self.rows.binary_search(row).ok()?;
        self.columns.iter().map(|c| c.cells.get(index)).collect()
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
