//! Flat-file CSV cache for result tables.
//!
//! Layout: `{dir}/{stem}.csv`, where the stem comes from the query key
//! (`PxData_DAILY_20200101_20200110`, `RefData_<digest>`, ...).
//!
//! Price tables carry two header rows:
//!
//! ```text
//! Field,PX_LAST,PX_LAST
//! Date,AAPL US Equity,MSFT US Equity
//! 2020-01-02,300.35,160.62
//! ```
//!
//! Reference tables carry one:
//!
//! ```text
//! Ticker,SECURITY_DES,CNTRY_OF_RISK
//! AAPL US Equity,AAPL US,US
//! ```
//!
//! Writes are atomic (write to `.tmp`, rename into place). The cache never
//! touches the process working directory; every path is joined onto `dir`.

use crate::error::DataError;
use crate::table::{ColumnKey, PriceTable, ReferenceTable};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const CACHE_EXTENSION: &str = "csv";

const FIELD_HEADER: &str = "Field";
const DATE_HEADER: &str = "Date";
const TICKER_HEADER: &str = "Ticker";
const CSV_DATE_FORMAT: &str = "%Y-%m-%d";

/// What a cache file holds, judged by its filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Price,
    Reference,
}

impl CacheKind {
    fn of_stem(stem: &str) -> Option<Self> {
        if stem.starts_with("PxData_") {
            Some(CacheKind::Price)
        } else if stem == "RefData" || stem.starts_with("RefData_") {
            Some(CacheKind::Reference)
        } else {
            None
        }
    }
}

/// A file found in the cache directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub stem: String,
    pub kind: CacheKind,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Local>>,
}

/// The CSV cache rooted at one output directory.
#[derive(Debug, Clone)]
pub struct CsvCache {
    dir: PathBuf,
}

impl CsvCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory of the cache.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{stem}.csv`
    pub fn path_for(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{stem}.{CACHE_EXTENSION}"))
    }

    pub fn contains(&self, stem: &str) -> bool {
        self.path_for(stem).is_file()
    }

    /// Create the cache directory if needed. Returns `true` if it was created.
    pub fn ensure_dir(&self) -> Result<bool, DataError> {
        if self.dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).map_err(|e| DataError::io(&self.dir, e))?;
        Ok(true)
    }

    pub fn write_price_table(&self, stem: &str, table: &PriceTable) -> Result<PathBuf, DataError> {
        self.write_atomic(stem, |wtr| write_price_records(wtr, table))
    }

    pub fn read_price_table(&self, stem: &str) -> Result<PriceTable, DataError> {
        let path = self.path_for(stem);
        let records = read_records(&path)?;
        let mut iter = records.into_iter();

        let fields = iter
            .next()
            .ok_or_else(|| DataError::corrupt(&path, "missing field header row"))?;
        let ids = iter
            .next()
            .ok_or_else(|| DataError::corrupt(&path, "missing identifier header row"))?;
        if fields.len() != ids.len() {
            return Err(DataError::corrupt(&path, "header rows differ in width"));
        }

        let columns: Vec<ColumnKey> = fields
            .iter()
            .zip(ids.iter())
            .skip(1)
            .map(|(f, i)| ColumnKey::new(f, i))
            .collect();

        let mut dates = Vec::new();
        let mut values = Vec::new();
        for (n, record) in iter.enumerate() {
            if record.len() != fields.len() {
                return Err(DataError::corrupt(
                    &path,
                    format!("data row {n} has {} cells, expected {}", record.len(), fields.len()),
                ));
            }
            let label = record.get(0).unwrap_or_default();
            let date = parse_row_date(label).ok_or_else(|| {
                DataError::corrupt(&path, format!("unparseable date '{label}' in row {n}"))
            })?;
            let row = record
                .iter()
                .skip(1)
                .map(|cell| {
                    parse_cell(cell).map_err(|_| {
                        DataError::corrupt(&path, format!("non-numeric value '{cell}' on {date}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            dates.push(date);
            values.push(row);
        }

        PriceTable::new(dates, columns, values).map_err(|e| DataError::corrupt(&path, e.to_string()))
    }

    pub fn write_reference_table(
        &self,
        stem: &str,
        table: &ReferenceTable,
    ) -> Result<PathBuf, DataError> {
        self.write_atomic(stem, |wtr| write_reference_records(wtr, table))
    }

    pub fn read_reference_table(&self, stem: &str) -> Result<ReferenceTable, DataError> {
        let path = self.path_for(stem);
        let mut iter = read_records(&path)?.into_iter();

        let header = iter
            .next()
            .ok_or_else(|| DataError::corrupt(&path, "missing header row"))?;
        let fields: Vec<String> = header.iter().skip(1).map(String::from).collect();

        let mut identifiers = Vec::new();
        let mut values = Vec::new();
        for (n, record) in iter.enumerate() {
            if record.len() != header.len() {
                return Err(DataError::corrupt(
                    &path,
                    format!("row {n} has {} cells, expected {}", record.len(), header.len()),
                ));
            }
            identifiers.push(record.get(0).unwrap_or_default().to_string());
            values.push(
                record
                    .iter()
                    .skip(1)
                    .map(|cell| (!cell.is_empty()).then(|| cell.to_string()))
                    .collect(),
            );
        }

        ReferenceTable::new(identifiers, fields, values)
            .map_err(|e| DataError::corrupt(&path, e.to_string()))
    }

    /// Delete a cache file. Returns `true` if something was removed.
    pub fn remove(&self, stem: &str) -> Result<bool, DataError> {
        let path = self.path_for(stem);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|e| DataError::io(&path, e))?;
        Ok(true)
    }

    /// All recognised cache files, sorted by stem. A missing directory is an empty cache.
    pub fn list(&self) -> Result<Vec<CacheEntry>, DataError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| DataError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| DataError::io(&self.dir, e))?;
            let path = entry.path();

            // skip .tmp leftovers and foreign files
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let Some(kind) = CacheKind::of_stem(&stem) else {
                continue;
            };

            let meta = entry.metadata().map_err(|e| DataError::io(&path, e))?;
            entries.push(CacheEntry {
                stem,
                kind,
                size_bytes: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Local>::from),
                path,
            });
        }

        entries.sort_by(|a, b| a.stem.cmp(&b.stem));
        Ok(entries)
    }

    /// Remove every cache file, or only those of one kind. Returns what was removed.
    pub fn clean(&self, kind: Option<CacheKind>) -> Result<Vec<CacheEntry>, DataError> {
        let doomed: Vec<CacheEntry> = self
            .list()?
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect();
        for entry in &doomed {
            fs::remove_file(&entry.path).map_err(|e| DataError::io(&entry.path, e))?;
        }
        Ok(doomed)
    }

    fn write_atomic(
        &self,
        stem: &str,
        body: impl FnOnce(&mut csv::Writer<fs::File>) -> Result<(), csv::Error>,
    ) -> Result<PathBuf, DataError> {
        let path = self.path_for(stem);
        let tmp_path = path.with_extension(format!("{CACHE_EXTENSION}.tmp"));

        let written = (|| -> Result<(), csv::Error> {
            let mut wtr = csv::WriterBuilder::new().flexible(false).from_path(&tmp_path)?;
            body(&mut wtr)?;
            wtr.flush()?;
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(DataError::io(&tmp_path, e.into()));
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::io(&path, e)
        })?;

        tracing::debug!(path = %path.display(), "wrote cache file");
        Ok(path)
    }
}

/// Write a price table in the cache layout: `Field,…` and `Date,…` headers, then one row per date.
pub fn write_price_records<W: io::Write>(
    wtr: &mut csv::Writer<W>,
    table: &PriceTable,
) -> Result<(), csv::Error> {
    let mut fields = vec![FIELD_HEADER.to_string()];
    fields.extend(table.columns().iter().map(|c| c.field.clone()));
    wtr.write_record(&fields)?;

    let mut ids = vec![DATE_HEADER.to_string()];
    ids.extend(table.columns().iter().map(|c| c.identifier.clone()));
    wtr.write_record(&ids)?;

    for (date, row) in table.dates().iter().zip(table.rows()) {
        let mut record = vec![date.format(CSV_DATE_FORMAT).to_string()];
        record.extend(row.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
        wtr.write_record(&record)?;
    }
    Ok(())
}

/// Write a reference table in the cache layout: a `Ticker,…` header, then one row per identifier.
pub fn write_reference_records<W: io::Write>(
    wtr: &mut csv::Writer<W>,
    table: &ReferenceTable,
) -> Result<(), csv::Error> {
    let mut header = vec![TICKER_HEADER.to_string()];
    header.extend(table.fields().iter().cloned());
    wtr.write_record(&header)?;

    for (id, row) in table.identifiers().iter().zip(table.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|v| v.clone().unwrap_or_default()));
        wtr.write_record(&record)?;
    }
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<csv::StringRecord>, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DataError::io(path, e.into()))?;

    rdr.records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DataError::corrupt(path, e.to_string()))
}

/// Coerce a row label to a date. Accepts ISO dates, `YYYYMMDD`, and ISO datetimes.
fn parse_row_date(label: &str) -> Option<NaiveDate> {
    let label = label.trim();
    NaiveDate::parse_from_str(label, CSV_DATE_FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(label, "%Y%m%d"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(label, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn parse_cell(cell: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some)
}
