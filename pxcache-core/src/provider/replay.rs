//! Replay provider: serves long-format extracts saved on disk.
//!
//! Expects a directory holding any of:
//! - `historical.csv` with header `date,identifier,field,value` (ISO dates)
//! - `reference.csv` with header `identifier,field,value`
//!
//! Queries are answered by filtering the extract. Non-daily frequencies keep
//! the last observation of each period, the way a terminal reports
//! period-sampled history.

use super::{HistoricalRow, MarketDataProvider, ProviderSession, ReferenceRow};
use crate::error::DataError;
use crate::query::{Frequency, PriceQuery, ReferenceQuery};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const HISTORICAL_EXTRACT: &str = "historical.csv";
pub const REFERENCE_EXTRACT: &str = "reference.csv";

pub struct ReplayProvider {
    dir: PathBuf,
}

impl ReplayProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl MarketDataProvider for ReplayProvider {
    fn name(&self) -> &str {
        "replay"
    }

    fn open_session(&self) -> Result<Box<dyn ProviderSession + '_>, DataError> {
        if !self.dir.is_dir() {
            return Err(DataError::Session(format!(
                "replay directory {} does not exist",
                self.dir.display()
            )));
        }
        Ok(Box::new(ReplaySession { dir: &self.dir }))
    }
}

struct ReplaySession<'a> {
    dir: &'a Path,
}

impl ProviderSession for ReplaySession<'_> {
    fn historical(&mut self, query: &PriceQuery) -> Result<Vec<HistoricalRow>, DataError> {
        let rows: Vec<HistoricalRow> = read_extract(&self.dir.join(HISTORICAL_EXTRACT))?;
        let selected = rows
            .into_iter()
            .filter(|r| {
                r.date >= query.start()
                    && r.date <= query.end()
                    && query.identifiers().contains(&r.identifier)
                    && query.fields().contains(&r.field)
            })
            .collect();
        Ok(downsample(selected, query.frequency()))
    }

    fn reference(&mut self, query: &ReferenceQuery) -> Result<Vec<ReferenceRow>, DataError> {
        let rows: Vec<ReferenceRow> = read_extract(&self.dir.join(REFERENCE_EXTRACT))?;
        Ok(rows
            .into_iter()
            .filter(|r| {
                query.identifiers().contains(&r.identifier) && query.fields().contains(&r.field)
            })
            .collect())
    }
}

fn read_extract<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::Session(format!("open {}: {e}", path.display())))?;
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| DataError::ResponseFormatChanged(format!("{}: {e}", path.display())))
}

/// Period bucket for sampling: rows in the same bucket collapse to the last one.
pub(crate) fn period_key(date: NaiveDate, frequency: Frequency) -> (i32, u32) {
    match frequency {
        Frequency::Daily => (date.year(), date.ordinal()),
        Frequency::Weekly => {
            let week = date.iso_week();
            (week.year(), week.week())
        }
        Frequency::Monthly => (date.year(), date.month()),
        Frequency::Quarterly => (date.year(), (date.month() - 1) / 3),
        Frequency::SemiAnnually => (date.year(), (date.month() - 1) / 6),
        Frequency::Yearly => (date.year(), 0),
    }
}

/// Keep the latest observation per (identifier, field, period), sorted by date.
pub(crate) fn downsample(mut rows: Vec<HistoricalRow>, frequency: Frequency) -> Vec<HistoricalRow> {
    rows.sort_by_key(|r| r.date);
    if frequency == Frequency::Daily {
        return rows;
    }

    let mut latest: HashMap<(String, String, (i32, u32)), HistoricalRow> = HashMap::new();
    for row in rows {
        let key = (
            row.identifier.clone(),
            row.field.clone(),
            period_key(row.date, frequency),
        );
        latest.insert(key, row);
    }

    let mut out: Vec<HistoricalRow> = latest.into_values().collect();
    out.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.identifier.cmp(&b.identifier))
            .then_with(|| a.field.cmp(&b.field))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SessionGuard;
    use std::fs;

    fn write_extracts(dir: &Path) {
        fs::write(
            dir.join(HISTORICAL_EXTRACT),
            "date,identifier,field,value\n\
             2024-01-30,SPY US Equity,PX_LAST,482.9\n\
             2024-01-31,SPY US Equity,PX_LAST,482.88\n\
             2024-02-01,SPY US Equity,PX_LAST,489.2\n\
             2024-02-29,SPY US Equity,PX_LAST,508.08\n\
             2024-02-29,QQQ US Equity,PX_LAST,439.0\n\
             2024-02-29,SPY US Equity,PX_VOLUME,\n",
        )
        .unwrap();
        fs::write(
            dir.join(REFERENCE_EXTRACT),
            "identifier,field,value\n\
             SPY US Equity,SECURITY_DES,SPY US\n\
             SPY US Equity,CNTRY_OF_RISK,US\n\
             QQQ US Equity,SECURITY_DES,QQQ US\n",
        )
        .unwrap();
    }

    fn spy_query(freq: Frequency) -> PriceQuery {
        PriceQuery::last_price(vec!["SPY US Equity".into()], "20240101", "20240229", freq)
            .unwrap()
    }

    #[test]
    fn daily_query_filters_extract() {
        let dir = tempfile::tempdir().unwrap();
        write_extracts(dir.path());
        let provider = ReplayProvider::new(dir.path());

        let mut session = SessionGuard::open(&provider).unwrap();
        let rows = session.historical(&spy_query(Frequency::Daily)).unwrap();

        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.identifier == "SPY US Equity" && r.field == "PX_LAST"));
    }

    #[test]
    fn monthly_query_keeps_month_end_observation() {
        let dir = tempfile::tempdir().unwrap();
        write_extracts(dir.path());
        let provider = ReplayProvider::new(dir.path());

        let mut session = SessionGuard::open(&provider).unwrap();
        let rows = session.historical(&spy_query(Frequency::Monthly)).unwrap();

        let values: Vec<(NaiveDate, Option<f64>)> = rows.iter().map(|r| (r.date, r.value)).collect();
        assert_eq!(
            values,
            vec![
                (NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(), Some(482.88)),
                (NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), Some(508.08)),
            ]
        );
    }

    #[test]
    fn reference_query_filters_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_extracts(dir.path());
        let provider = ReplayProvider::new(dir.path());
        let query = ReferenceQuery::new(
            vec!["SPY US Equity".into(), "QQQ US Equity".into()],
            vec!["SECURITY_DES".into()],
        )
        .unwrap();

        let mut session = SessionGuard::open(&provider).unwrap();
        let rows = session.reference(&query).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn missing_directory_fails_to_open() {
        let provider = ReplayProvider::new("/nonexistent/replay/dir");
        assert!(matches!(
            SessionGuard::open(&provider).err(),
            Some(DataError::Session(_))
        ));
    }

    #[test]
    fn weekly_buckets_follow_iso_weeks() {
        // 2024-12-30 belongs to ISO week 1 of 2025
        let monday = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        let friday = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        assert_eq!(
            period_key(monday, Frequency::Weekly),
            period_key(friday, Frequency::Weekly)
        );
    }
}
