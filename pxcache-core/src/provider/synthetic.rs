//! Synthetic provider for offline runs and tests.
//!
//! Produces a seeded random walk on weekdays, starting from 100.0 at the
//! query start. Output is deterministic per (seed, identifier). Reference
//! fields are fabricated from the identifier text. None of this is market data.

use super::replay::downsample;
use super::{HistoricalRow, MarketDataProvider, ProviderSession, ReferenceRow};
use crate::error::DataError;
use crate::query::{PriceQuery, ReferenceQuery};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PRICE_FIELDS: [&str; 5] = ["PX_LAST", "PX_OPEN", "PX_HIGH", "PX_LOW", "PX_VOLUME"];

const SECTORS: [&str; 6] = [
    "Semiconductors",
    "Application Software",
    "Diversified Banks",
    "Pharmaceuticals",
    "Integrated Oil & Gas",
    "Automobile Manufacturers",
];

const RATINGS: [&str; 6] = ["AAA", "AA+", "AA", "A", "BBB+", "BBB"];

pub struct SyntheticProvider {
    seed: u64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    fn rng_for(&self, identifier: &str) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(identifier.as_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new(42)
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open_session(&self) -> Result<Box<dyn ProviderSession + '_>, DataError> {
        Ok(Box::new(SyntheticSession { provider: self }))
    }
}

struct SyntheticSession<'a> {
    provider: &'a SyntheticProvider,
}

impl ProviderSession for SyntheticSession<'_> {
    fn historical(&mut self, query: &PriceQuery) -> Result<Vec<HistoricalRow>, DataError> {
        if let Some(field) = query
            .fields()
            .iter()
            .find(|f| !PRICE_FIELDS.contains(&f.as_str()))
        {
            return Err(DataError::UnsupportedField {
                provider: "synthetic".into(),
                field: field.clone(),
            });
        }

        let mut rows = Vec::new();
        for identifier in query.identifiers() {
            let mut rng = self.provider.rng_for(identifier);
            let mut price = 100.0_f64;
            let mut current = query.start();

            while current <= query.end() {
                if is_weekend(current) {
                    current += Duration::days(1);
                    continue;
                }

                let daily_return: f64 = rng.gen_range(-0.03..0.03);
                let open = price;
                let close = price * (1.0 + daily_return);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
                let volume = rng.gen_range(500_000..5_000_000u64) as f64;

                for field in query.fields() {
                    let value = match field.as_str() {
                        "PX_LAST" => close,
                        "PX_OPEN" => open,
                        "PX_HIGH" => high,
                        "PX_LOW" => low,
                        _ => volume,
                    };
                    rows.push(HistoricalRow {
                        date: current,
                        identifier: identifier.clone(),
                        field: field.clone(),
                        value: Some(round_cents(value)),
                    });
                }

                price = close;
                current += Duration::days(1);
            }
        }

        Ok(downsample(rows, query.frequency()))
    }

    fn reference(&mut self, query: &ReferenceQuery) -> Result<Vec<ReferenceRow>, DataError> {
        let mut rows = Vec::new();
        for identifier in query.identifiers() {
            let mut rng = self.provider.rng_for(identifier);
            let mut parts = identifier.split_whitespace();
            let ticker = parts.next().unwrap_or(identifier.as_str());
            let market = parts.next().unwrap_or("US");

            for field in query.fields() {
                let value = match field.as_str() {
                    "SECURITY_DES" => format!("{ticker} {market}"),
                    "NAME" => format!("{ticker} Synthetic Holdings"),
                    "CNTRY_OF_RISK" => market.to_string(),
                    "CRNCY" => "USD".to_string(),
                    "CLASSIFICATION_LEVEL_4_NAME" => {
                        SECTORS[rng.gen_range(0..SECTORS.len())].to_string()
                    }
                    "BB_COMPOSITE" => RATINGS[rng.gen_range(0..RATINGS.len())].to_string(),
                    _ => continue,
                };
                rows.push(ReferenceRow {
                    identifier: identifier.clone(),
                    field: field.clone(),
                    value,
                });
            }
        }
        Ok(rows)
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SessionGuard;
    use crate::query::Frequency;

    fn query(fields: &[&str], freq: Frequency) -> PriceQuery {
        PriceQuery::new(
            vec!["AAPL US Equity".into()],
            "20200101",
            "20200110",
            freq,
            fields.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn daily_walk_skips_weekends() {
        let provider = SyntheticProvider::default();
        let mut session = SessionGuard::open(&provider).unwrap();
        let rows = session.historical(&query(&["PX_LAST"], Frequency::Daily)).unwrap();

        // 2020-01-01..10 holds 8 weekdays
        assert_eq!(rows.len(), 8);
        assert!(rows.iter().all(|r| !is_weekend(r.date)));
    }

    #[test]
    fn same_seed_same_series() {
        let a = SyntheticProvider::new(7);
        let b = SyntheticProvider::new(7);
        let q = query(&["PX_LAST", "PX_OPEN"], Frequency::Daily);
        let rows_a = SessionGuard::open(&a).unwrap().historical(&q).unwrap();
        let rows_b = SessionGuard::open(&b).unwrap().historical(&q).unwrap();
        assert_eq!(rows_a, rows_b);
    }

    #[test]
    fn weekly_sampling_reduces_rows() {
        let provider = SyntheticProvider::default();
        let mut session = SessionGuard::open(&provider).unwrap();
        let rows = session.historical(&query(&["PX_LAST"], Frequency::Weekly)).unwrap();
        // ISO weeks 1 and 2 of 2020
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unknown_price_field_is_rejected() {
        let provider = SyntheticProvider::default();
        let mut session = SessionGuard::open(&provider).unwrap();
        let err = session
            .historical(&query(&["EQY_DVD_YLD_IND"], Frequency::Daily))
            .unwrap_err();
        assert!(matches!(err, DataError::UnsupportedField { .. }));
    }

    #[test]
    fn reference_fields_derive_from_identifier() {
        let provider = SyntheticProvider::default();
        let mut session = SessionGuard::open(&provider).unwrap();
        let q = ReferenceQuery::new(
            vec!["7203 JP Equity".into()],
            vec!["SECURITY_DES".into(), "CNTRY_OF_RISK".into(), "UNKNOWN".into()],
        )
        .unwrap();
        let rows = session.reference(&q).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "7203 JP");
        assert_eq!(rows[1].value, "JP");
    }
}
