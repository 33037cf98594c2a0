//! Query keys and the deterministic cache filenames derived from them.
//!
//! Historical queries map to `PxData_<FREQ>_<start>_<end>`. Identifiers and
//! fields are not part of that name, so two historical queries over the same
//! window and frequency share one cache file.
//!
//! Reference queries map either to the fixed `RefData` name or to a name that
//! carries a BLAKE3 digest of the requested identifiers and fields, depending
//! on [`RefCachePolicy`].

use crate::error::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Date format used in query parameters and cache filenames.
pub const QUERY_DATE_FORMAT: &str = "%Y%m%d";

/// Default field for historical queries.
pub const DEFAULT_PRICE_FIELD: &str = "PX_LAST";

/// Last/low/high/open field set.
pub const OHLC_FIELDS: [&str; 4] = ["PX_LAST", "PX_LOW", "PX_HIGH", "PX_OPEN"];

/// Default descriptive fields for reference queries.
pub const DEFAULT_REFERENCE_FIELDS: [&str; 4] = [
    "SECURITY_DES",
    "CLASSIFICATION_LEVEL_4_NAME",
    "CNTRY_OF_RISK",
    "BB_COMPOSITE",
];

pub const DEFAULT_START: &str = "20021231";
pub const DEFAULT_END: &str = "20221231";

const PRICE_PREFIX: &str = "PxData";
const REFERENCE_PREFIX: &str = "RefData";
const DIGEST_HEX_LEN: usize = 16;

/// Sampling frequency of a historical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    SemiAnnually,
    Yearly,
}

impl Frequency {
    pub const ALL: [Frequency; 6] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::SemiAnnually,
        Frequency::Yearly,
    ];

    /// The provider token, e.g. `DAILY`.
    pub fn token(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Quarterly => "QUARTERLY",
            Frequency::SemiAnnually => "SEMI_ANNUALLY",
            Frequency::Yearly => "YEARLY",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Frequency {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Frequency::ALL
            .into_iter()
            .find(|f| f.token() == upper)
            .ok_or_else(|| DataError::InvalidFrequency(s.to_string()))
    }
}

/// Parse a `YYYYMMDD` query date.
pub fn parse_query_date(input: &str) -> Result<NaiveDate, DataError> {
    let trimmed = input.trim();
    if trimmed.len() != 8 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DataError::InvalidDate {
            input: input.to_string(),
        });
    }
    NaiveDate::parse_from_str(trimmed, QUERY_DATE_FORMAT).map_err(|_| DataError::InvalidDate {
        input: input.to_string(),
    })
}

/// Format a date the way it appears in query parameters and filenames.
pub fn format_query_date(date: NaiveDate) -> String {
    date.format(QUERY_DATE_FORMAT).to_string()
}

/// How the reference-data cache filename is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefCachePolicy {
    /// One `RefData` file per output directory, whatever was requested.
    Legacy,
    /// `RefData_<digest>` keyed by the requested identifiers and fields.
    #[default]
    PerRequest,
}

/// A validated historical price query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuery {
    identifiers: Vec<String>,
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
    fields: Vec<String>,
}

impl PriceQuery {
    /// Build a query from `YYYYMMDD` date strings.
    pub fn new(
        identifiers: Vec<String>,
        start: &str,
        end: &str,
        frequency: Frequency,
        fields: Vec<String>,
    ) -> Result<Self, DataError> {
        let start = parse_query_date(start)?;
        let end = parse_query_date(end)?;
        Self::from_dates(identifiers, start, end, frequency, fields)
    }

    pub fn from_dates(
        identifiers: Vec<String>,
        start: NaiveDate,
        end: NaiveDate,
        frequency: Frequency,
        fields: Vec<String>,
    ) -> Result<Self, DataError> {
        let identifiers = dedup_preserving_order(identifiers);
        let fields = dedup_preserving_order(fields);
        if identifiers.is_empty() {
            return Err(DataError::EmptyIdentifiers);
        }
        if fields.is_empty() {
            return Err(DataError::EmptyFields);
        }
        if start > end {
            return Err(DataError::InvalidRange {
                start: format_query_date(start),
                end: format_query_date(end),
            });
        }
        Ok(Self {
            identifiers,
            start,
            end,
            frequency,
            fields,
        })
    }

    /// Query for the default `PX_LAST` field.
    pub fn last_price(
        identifiers: Vec<String>,
        start: &str,
        end: &str,
        frequency: Frequency,
    ) -> Result<Self, DataError> {
        Self::new(
            identifiers,
            start,
            end,
            frequency,
            vec![DEFAULT_PRICE_FIELD.to_string()],
        )
    }

    /// Same window and identifiers, different field set.
    pub fn with_fields(&self, fields: Vec<String>) -> Result<Self, DataError> {
        Self::from_dates(
            self.identifiers.clone(),
            self.start,
            self.end,
            self.frequency,
            fields,
        )
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// `PxData_<FREQ>_<start>_<end>`
    pub fn cache_stem(&self) -> String {
        price_cache_stem(self.frequency, self.start, self.end)
    }
}

/// Cache stem for a historical window. Depends only on frequency and dates.
pub fn price_cache_stem(frequency: Frequency, start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "{PRICE_PREFIX}_{}_{}_{}",
        frequency.token(),
        format_query_date(start),
        format_query_date(end)
    )
}

/// A validated reference-data query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceQuery {
    identifiers: Vec<String>,
    fields: Vec<String>,
}

impl ReferenceQuery {
    pub fn new(identifiers: Vec<String>, fields: Vec<String>) -> Result<Self, DataError> {
        let identifiers = dedup_preserving_order(identifiers);
        let fields = dedup_preserving_order(fields);
        if identifiers.is_empty() {
            return Err(DataError::EmptyIdentifiers);
        }
        if fields.is_empty() {
            return Err(DataError::EmptyFields);
        }
        Ok(Self {
            identifiers,
            fields,
        })
    }

    /// Query for the default descriptive field set.
    pub fn with_default_fields(identifiers: Vec<String>) -> Result<Self, DataError> {
        Self::new(
            identifiers,
            DEFAULT_REFERENCE_FIELDS.iter().map(|f| f.to_string()).collect(),
        )
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn cache_stem(&self, policy: RefCachePolicy) -> String {
        match policy {
            RefCachePolicy::Legacy => REFERENCE_PREFIX.to_string(),
            RefCachePolicy::PerRequest => format!("{REFERENCE_PREFIX}_{}", self.digest()),
        }
    }

    /// Order-insensitive digest of the identifier and field sets.
    pub fn digest(&self) -> String {
        let identifiers: BTreeSet<&str> = self.identifiers.iter().map(String::as_str).collect();
        let fields: BTreeSet<&str> = self.fields.iter().map(String::as_str).collect();

        let mut hasher = blake3::Hasher::new();
        for id in identifiers {
            hasher.update(id.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&[0xff]);
        for field in fields {
            hasher.update(field.as_bytes());
            hasher.update(&[0]);
        }
        let hex = hasher.finalize().to_hex();
        hex[..DIGEST_HEX_LEN].to_string()
    }
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}
