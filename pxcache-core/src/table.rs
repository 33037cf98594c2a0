//! Wide-format result tables and the long → wide pivot.
//!
//! A [`PriceTable`] has one row per date and one column per
//! `(field, identifier)` pair. A [`ReferenceTable`] has one row per
//! identifier and one column per field. Both are built from provider rows
//! and are what the CSV cache persists.

use crate::error::DataError;
use crate::provider::{HistoricalRow, ReferenceRow};
use crate::query::{PriceQuery, ReferenceQuery};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Two-level column label of a price table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey {
    pub field: String,
    pub identifier: String,
}

impl ColumnKey {
    pub fn new(field: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            identifier: identifier.into(),
        }
    }
}

/// Wide historical table: rows = dates (ascending), columns = (field, identifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    columns: Vec<ColumnKey>,
    /// Row-major: `values[row][col]`.
    values: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn new(
        dates: Vec<NaiveDate>,
        columns: Vec<ColumnKey>,
        values: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, DataError> {
        if dates.len() != values.len() {
            return Err(DataError::Shape(format!(
                "{} dates but {} value rows",
                dates.len(),
                values.len()
            )));
        }
        if let Some((i, row)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(DataError::Shape(format!(
                "row {i} has {} cells, expected {}",
                row.len(),
                columns.len()
            )));
        }
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DataError::Shape(
                "dates must be strictly ascending".into(),
            ));
        }
        let unique: BTreeSet<&ColumnKey> = columns.iter().collect();
        if unique.len() != columns.len() {
            return Err(DataError::Shape("duplicate column label".into()));
        }
        Ok(Self {
            dates,
            columns,
            values,
        })
    }

    /// Pivot long-format provider rows into a wide table.
    ///
    /// Columns are ordered by requested field, then by requested identifier;
    /// identifiers the provider returned without being asked for are appended
    /// in first-seen order. Rows for unrequested fields are dropped. Repeated
    /// observations for the same cell keep the last value.
    pub fn from_long(rows: Vec<HistoricalRow>, query: &PriceQuery) -> Result<Self, DataError> {
        let mut identifiers: Vec<String> = query.identifiers().to_vec();
        let mut cells: HashMap<(NaiveDate, ColumnKey), Option<f64>> = HashMap::new();
        let mut dates = BTreeSet::new();

        for row in rows {
            if !query.fields().contains(&row.field) {
                continue;
            }
            if !identifiers.contains(&row.identifier) {
                identifiers.push(row.identifier.clone());
            }
            dates.insert(row.date);
            let value = row.value.filter(|v| v.is_finite());
            cells.insert((row.date, ColumnKey::new(row.field, row.identifier)), value);
        }

        let present: BTreeSet<&ColumnKey> = cells.keys().map(|(_, key)| key).collect();
        let columns: Vec<ColumnKey> = query
            .fields()
            .iter()
            .flat_map(|field| {
                identifiers
                    .iter()
                    .map(move |id| ColumnKey::new(field.clone(), id.clone()))
            })
            .filter(|key| present.contains(key))
            .collect();

        if columns.is_empty() {
            return Err(DataError::NoData(query.identifiers().join(", ")));
        }

        let dates: Vec<NaiveDate> = dates.into_iter().collect();
        let values = dates
            .iter()
            .map(|date| {
                columns
                    .iter()
                    .map(|key| cells.get(&(*date, key.clone())).copied().flatten())
                    .collect()
            })
            .collect();

        Self::new(dates, columns, values)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.values
    }

    pub fn height(&self) -> usize {
        self.dates.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.columns.is_empty()
    }

    /// Distinct fields in column order.
    pub fn fields(&self) -> Vec<&str> {
        distinct(self.columns.iter().map(|c| c.field.as_str()))
    }

    /// Distinct identifiers in column order.
    pub fn identifiers(&self) -> Vec<&str> {
        distinct(self.columns.iter().map(|c| c.identifier.as_str()))
    }

    pub fn column_index(&self, field: &str, identifier: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.field == field && c.identifier == identifier)
    }

    pub fn get(&self, date: NaiveDate, field: &str, identifier: &str) -> Option<f64> {
        let col = self.column_index(field, identifier)?;
        let row = self.dates.binary_search(&date).ok()?;
        self.values[row][col]
    }

    /// Every non-missing cell as `(date, column, value)`.
    pub fn observations(&self) -> impl Iterator<Item = (NaiveDate, &ColumnKey, f64)> + '_ {
        self.dates.iter().zip(&self.values).flat_map(move |(date, row)| {
            self.columns
                .iter()
                .zip(row)
                .filter_map(move |(key, &v)| v.map(|v| (*date, key, v)))
        })
    }

    pub fn missing_identifiers(&self, requested: &[String]) -> Vec<String> {
        missing(requested, &self.identifiers())
    }

    pub fn missing_fields(&self, requested: &[String]) -> Vec<String> {
        missing(requested, &self.fields())
    }
}

/// Wide reference table: rows = identifiers, columns = fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTable {
    identifiers: Vec<String>,
    fields: Vec<String>,
    /// Row-major: `values[row][col]`.
    values: Vec<Vec<Option<String>>>,
}

impl ReferenceTable {
    pub fn new(
        identifiers: Vec<String>,
        fields: Vec<String>,
        values: Vec<Vec<Option<String>>>,
    ) -> Result<Self, DataError> {
        if identifiers.len() != values.len() {
            return Err(DataError::Shape(format!(
                "{} identifiers but {} value rows",
                identifiers.len(),
                values.len()
            )));
        }
        if values.iter().any(|row| row.len() != fields.len()) {
            return Err(DataError::Shape(format!(
                "every row must have {} cells",
                fields.len()
            )));
        }
        Ok(Self {
            identifiers,
            fields,
            values,
        })
    }

    /// Pivot long-format reference rows: one row per identifier, one column per field.
    ///
    /// Only fields the provider actually returned become columns, in requested order.
    pub fn from_long(rows: Vec<ReferenceRow>, query: &ReferenceQuery) -> Result<Self, DataError> {
        let mut identifiers: Vec<String> = Vec::new();
        let mut cells: HashMap<(String, String), String> = HashMap::new();

        for row in rows {
            if !query.fields().contains(&row.field) {
                continue;
            }
            if !identifiers.contains(&row.identifier) {
                identifiers.push(row.identifier.clone());
            }
            cells.insert((row.identifier, row.field), row.value);
        }

        // requested identifiers first, in request order
        identifiers.sort_by_key(|id| {
            query
                .identifiers()
                .iter()
                .position(|q| q == id)
                .unwrap_or(usize::MAX)
        });

        let fields: Vec<String> = query
            .fields()
            .iter()
            .filter(|f| cells.keys().any(|(_, field)| field == *f))
            .cloned()
            .collect();

        if fields.is_empty() {
            return Err(DataError::NoData(query.identifiers().join(", ")));
        }

        let values = identifiers
            .iter()
            .map(|id| {
                fields
                    .iter()
                    .map(|f| cells.get(&(id.clone(), f.clone())).cloned())
                    .collect()
            })
            .collect();

        Self::new(identifiers, fields, values)
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.values
    }

    pub fn get(&self, identifier: &str, field: &str) -> Option<&str> {
        let row = self.identifiers.iter().position(|i| i == identifier)?;
        let col = self.fields.iter().position(|f| f == field)?;
        self.values[row][col].as_deref()
    }

    pub fn missing_identifiers(&self, requested: &[String]) -> Vec<String> {
        let have: Vec<&str> = self.identifiers.iter().map(String::as_str).collect();
        missing(requested, &have)
    }

    pub fn missing_fields(&self, requested: &[String]) -> Vec<String> {
        let have: Vec<&str> = self.fields.iter().map(String::as_str).collect();
        missing(requested, &have)
    }
}

fn distinct<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for label in labels {
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

fn missing(requested: &[String], have: &[&str]) -> Vec<String> {
    requested
        .iter()
        .filter(|r| !have.contains(&r.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Frequency;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn hrow(date: &str, id: &str, field: &str, value: f64) -> HistoricalRow {
        HistoricalRow {
            date: d(date),
            identifier: id.into(),
            field: field.into(),
            value: Some(value),
        }
    }

    fn query(ids: &[&str], fields: &[&str]) -> PriceQuery {
        PriceQuery::new(
            ids.iter().map(|s| s.to_string()).collect(),
            "20240101",
            "20240131",
            Frequency::Daily,
            fields.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn pivot_orders_columns_by_field_then_identifier() {
        let rows = vec![
            hrow("2024-01-03", "MSFT", "PX_OPEN", 370.0),
            hrow("2024-01-02", "AAPL", "PX_LAST", 185.6),
            hrow("2024-01-02", "MSFT", "PX_LAST", 370.9),
            hrow("2024-01-02", "AAPL", "PX_OPEN", 187.1),
            hrow("2024-01-03", "AAPL", "PX_LAST", 184.2),
        ];
        let table =
            PriceTable::from_long(rows, &query(&["AAPL", "MSFT"], &["PX_LAST", "PX_OPEN"]))
                .unwrap();

        assert_eq!(
            table.columns(),
            &[
                ColumnKey::new("PX_LAST", "AAPL"),
                ColumnKey::new("PX_LAST", "MSFT"),
                ColumnKey::new("PX_OPEN", "AAPL"),
                ColumnKey::new("PX_OPEN", "MSFT"),
            ]
        );
        assert_eq!(table.dates(), &[d("2024-01-02"), d("2024-01-03")]);
        assert_eq!(table.get(d("2024-01-03"), "PX_LAST", "AAPL"), Some(184.2));
        // MSFT has no PX_LAST on the 3rd
        assert_eq!(table.get(d("2024-01-03"), "PX_LAST", "MSFT"), None);
    }

    #[test]
    fn pivot_drops_unrequested_fields_and_nan() {
        let mut rows = vec![
            hrow("2024-01-02", "AAPL", "PX_LAST", 185.6),
            hrow("2024-01-02", "AAPL", "PX_VOLUME", 1e6),
        ];
        rows.push(HistoricalRow {
            value: Some(f64::NAN),
            ..hrow("2024-01-03", "AAPL", "PX_LAST", 0.0)
        });

        let table = PriceTable::from_long(rows, &query(&["AAPL"], &["PX_LAST"])).unwrap();
        assert_eq!(table.fields(), vec!["PX_LAST"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.get(d("2024-01-03"), "PX_LAST", "AAPL"), None);
    }

    #[test]
    fn pivot_of_nothing_is_no_data() {
        let err = PriceTable::from_long(Vec::new(), &query(&["AAPL"], &["PX_LAST"])).unwrap_err();
        assert!(matches!(err, DataError::NoData(_)));
    }

    #[test]
    fn duplicate_observation_keeps_last() {
        let rows = vec![
            hrow("2024-01-02", "AAPL", "PX_LAST", 1.0),
            hrow("2024-01-02", "AAPL", "PX_LAST", 2.0),
        ];
        let table = PriceTable::from_long(rows, &query(&["AAPL"], &["PX_LAST"])).unwrap();
        assert_eq!(table.get(d("2024-01-02"), "PX_LAST", "AAPL"), Some(2.0));
    }

    #[test]
    fn new_rejects_ragged_rows() {
        let err = PriceTable::new(
            vec![d("2024-01-02")],
            vec![ColumnKey::new("PX_LAST", "A"), ColumnKey::new("PX_LAST", "B")],
            vec![vec![Some(1.0)]],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::Shape(_)));
    }

    #[test]
    fn new_rejects_unsorted_dates() {
        let err = PriceTable::new(
            vec![d("2024-01-03"), d("2024-01-02")],
            vec![ColumnKey::new("PX_LAST", "A")],
            vec![vec![Some(1.0)], vec![Some(2.0)]],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::Shape(_)));
    }

    #[test]
    fn reference_pivot_keeps_request_order() {
        let q = ReferenceQuery::new(
            vec!["MSFT".into(), "AAPL".into()],
            vec!["SECURITY_DES".into(), "CNTRY_OF_RISK".into(), "NAME".into()],
        )
        .unwrap();
        let rows = vec![
            ReferenceRow {
                identifier: "AAPL".into(),
                field: "CNTRY_OF_RISK".into(),
                value: "US".into(),
            },
            ReferenceRow {
                identifier: "AAPL".into(),
                field: "SECURITY_DES".into(),
                value: "AAPL US".into(),
            },
            ReferenceRow {
                identifier: "MSFT".into(),
                field: "SECURITY_DES".into(),
                value: "MSFT US".into(),
            },
        ];

        let table = ReferenceTable::from_long(rows, &q).unwrap();
        assert_eq!(table.identifiers(), &["MSFT".to_string(), "AAPL".to_string()]);
        assert_eq!(
            table.fields(),
            &["SECURITY_DES".to_string(), "CNTRY_OF_RISK".to_string()]
        );
        assert_eq!(table.get("MSFT", "CNTRY_OF_RISK"), None);
        assert_eq!(table.get("AAPL", "CNTRY_OF_RISK"), Some("US"));
        assert_eq!(table.missing_fields(q.fields()), vec!["NAME".to_string()]);
    }

    #[test]
    fn coverage_helpers_report_gaps() {
        let rows = vec![hrow("2024-01-02", "AAPL", "PX_LAST", 1.0)];
        let table = PriceTable::from_long(rows, &query(&["AAPL"], &["PX_LAST"])).unwrap();
        let wanted = vec!["AAPL".to_string(), "MSFT".to_string()];
        assert_eq!(table.missing_identifiers(&wanted), vec!["MSFT".to_string()]);
        assert!(table.missing_fields(&["PX_LAST".to_string()]).is_empty());
    }
}
