//! Reshape-on-read: collapse one column level of a price table.
//!
//! Selecting `PX_LAST` by field level turns a `(field, identifier)` table into
//! a date × identifier frame. Forward fill is opt-in because it alters the
//! retrieved values; it only fills gaps that follow an observation.

use crate::error::DataError;
use crate::table::PriceTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which column level the selection key is matched against (and dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnLevel {
    /// Key is a field name; resulting columns are identifiers.
    #[default]
    Field,
    /// Key is an identifier; resulting columns are fields.
    Identifier,
}

impl fmt::Display for ColumnLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLevel::Field => f.write_str("field"),
            ColumnLevel::Identifier => f.write_str("identifier"),
        }
    }
}

impl FromStr for ColumnLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "field" => Ok(ColumnLevel::Field),
            "identifier" | "ticker" | "security" => Ok(ColumnLevel::Identifier),
            other => Err(format!("unknown column level '{other}'")),
        }
    }
}

/// Single-level frame indexed by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFrame {
    /// The label that was selected (and dropped from the columns).
    pub key: String,
    pub level: ColumnLevel,
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<String>,
    /// Column-major: `values[col][row]`.
    pub values: Vec<Vec<Option<f64>>>,
}

impl FieldFrame {
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(&self.values[idx])
    }

    pub fn get(&self, date: NaiveDate, column: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.column(column)?[row]
    }

    /// Latest non-missing value of a column.
    pub fn last_valid(&self, column: &str) -> Option<(NaiveDate, f64)> {
        let col = self.column(column)?;
        self.dates
            .iter()
            .zip(col)
            .rev()
            .find_map(|(d, v)| v.map(|v| (*d, v)))
    }
}

/// Select the sub-table labelled `key` at `level`, optionally forward-filling.
pub fn select_field(
    table: &PriceTable,
    key: &str,
    level: ColumnLevel,
    fill_forward: bool,
) -> Result<FieldFrame, DataError> {
    let selected: Vec<(usize, String)> = table
        .columns()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match level {
            ColumnLevel::Field if c.field == key => Some((i, c.identifier.clone())),
            ColumnLevel::Identifier if c.identifier == key => Some((i, c.field.clone())),
            _ => None,
        })
        .collect();

    if selected.is_empty() {
        let available = match level {
            ColumnLevel::Field => table.fields(),
            ColumnLevel::Identifier => table.identifiers(),
        };
        return Err(DataError::FieldNotFound {
            field: key.to_string(),
            available: available.into_iter().map(String::from).collect(),
        });
    }

    let mut values: Vec<Vec<Option<f64>>> = selected
        .iter()
        .map(|(col, _)| table.rows().iter().map(|row| row[*col]).collect())
        .collect();

    if fill_forward {
        for column in &mut values {
            forward_fill(column);
        }
    }

    Ok(FieldFrame {
        key: key.to_string(),
        level,
        dates: table.dates().to_vec(),
        columns: selected.into_iter().map(|(_, name)| name).collect(),
        values,
    })
}

/// Replace each gap with the most recent preceding value. Leading gaps stay empty.
pub fn forward_fill(column: &mut [Option<f64>]) {
    let mut last = None;
    for cell in column.iter_mut() {
        match cell {
            Some(v) => last = Some(*v),
            None => *cell = last,
        }
    }
}
