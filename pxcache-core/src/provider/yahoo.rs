//! Yahoo Finance provider over the public v8 chart API.
//!
//! Historical fields map onto chart quote series (`PX_LAST` → close, ...).
//! Reference fields are served from the chart metadata block. Terminal-style
//! identifiers such as `AAPL US Equity` are translated to Yahoo symbols; rows
//! are reported back under the identifier the caller used.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. Requests are not retried: failures surface to the caller as-is.

use super::{HistoricalRow, MarketDataProvider, ProviderSession, ReferenceRow};
use crate::error::DataError;
use crate::query::{Frequency, PriceQuery, ReferenceQuery};
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;

const BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";
const PROVIDER: &str = "yahoo_finance";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    exchange_name: Option<String>,
    instrument_type: Option<String>,
    short_name: Option<String>,
    long_name: Option<String>,
    /// Exchange offset from UTC in seconds; bar timestamps are session opens.
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Quote series a historical field maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Series {
    Open,
    High,
    Low,
    Close,
    Volume,
    AdjClose,
}

fn series_for(field: &str) -> Option<Series> {
    match field {
        "PX_LAST" => Some(Series::Close),
        "PX_OPEN" => Some(Series::Open),
        "PX_HIGH" => Some(Series::High),
        "PX_LOW" => Some(Series::Low),
        "PX_VOLUME" => Some(Series::Volume),
        "PX_ADJ_CLOSE" => Some(Series::AdjClose),
        _ => None,
    }
}

fn interval_for(frequency: Frequency) -> Option<&'static str> {
    match frequency {
        Frequency::Daily => Some("1d"),
        Frequency::Weekly => Some("1wk"),
        Frequency::Monthly => Some("1mo"),
        Frequency::Quarterly => Some("3mo"),
        Frequency::SemiAnnually | Frequency::Yearly => None,
    }
}

/// Translate a terminal-style identifier (`VOD LN Equity`) to a Yahoo symbol (`VOD.L`).
///
/// Identifiers without a market sector suffix are passed through untouched.
pub fn yahoo_symbol(identifier: &str) -> String {
    let parts: Vec<&str> = identifier.split_whitespace().collect();
    match parts.as_slice() {
        [ticker, "Index"] => format!("^{ticker}"),
        [ticker, market, "Equity"] => {
            let suffix = match *market {
                "US" | "UN" | "UW" | "UQ" => "",
                "LN" => ".L",
                "JP" | "JT" => ".T",
                "GR" | "GY" => ".DE",
                "FP" => ".PA",
                "CN" | "CT" => ".TO",
                "HK" => ".HK",
                "AU" | "AT" => ".AX",
                "SW" | "SE" => ".SW",
                other => return format!("{ticker}.{other}"),
            };
            format!("{ticker}{suffix}")
        }
        [ticker, "Equity"] => ticker.to_string(),
        _ => identifier.to_string(),
    }
}

pub struct YahooProvider {
    client: reqwest::blocking::Client,
}

impl YahooProvider {
    pub fn new(timeout: Duration) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Session(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate, interval: &str) -> String {
        let start_ts = start.and_hms_opt(0, 0, 0).map_or(0, |dt| dt.and_utc().timestamp());
        let end_ts = end
            .and_hms_opt(23, 59, 59)
            .map_or(0, |dt| dt.and_utc().timestamp());
        format!(
            "{BASE_URL}/{symbol}?period1={start_ts}&period2={end_ts}&interval={interval}\
             &includeAdjustedClose=true"
        )
    }

    fn meta_url(symbol: &str) -> String {
        format!("{BASE_URL}/{symbol}?range=1d&interval=1d")
    }

    fn get_chart(&self, identifier: &str, url: &str) -> Result<ChartData, DataError> {
        tracing::debug!(identifier, url, "yahoo chart request");
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                DataError::NetworkUnreachable(format!("timed out: {e}"))
            } else {
                DataError::NetworkUnreachable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::IdentifierNotFound {
                identifier: identifier.to_string(),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(DataError::AuthenticationRequired(format!(
                "Yahoo Finance refused the request (HTTP {status})"
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if !status.is_success() {
            return Err(DataError::Session(format!("HTTP {status} for {identifier}")));
        }

        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {identifier}: {e}"))
        })?;
        first_result(identifier, chart)
    }
}

impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn open_session(&self) -> Result<Box<dyn ProviderSession + '_>, DataError> {
        Ok(Box::new(YahooSession { provider: self }))
    }
}

struct YahooSession<'a> {
    provider: &'a YahooProvider,
}

impl ProviderSession for YahooSession<'_> {
    fn historical(&mut self, query: &PriceQuery) -> Result<Vec<HistoricalRow>, DataError> {
        let interval =
            interval_for(query.frequency()).ok_or_else(|| DataError::UnsupportedFrequency {
                provider: PROVIDER.into(),
                frequency: query.frequency().to_string(),
            })?;
        let fields = query
            .fields()
            .iter()
            .map(|f| {
                series_for(f)
                    .map(|s| (f.as_str(), s))
                    .ok_or_else(|| DataError::UnsupportedField {
                        provider: PROVIDER.into(),
                        field: f.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for identifier in query.identifiers() {
            let url = YahooProvider::chart_url(
                &yahoo_symbol(identifier),
                query.start(),
                query.end(),
                interval,
            );
            let data = self.provider.get_chart(identifier, &url)?;
            rows.extend(historical_rows(identifier, data, &fields)?);
        }
        Ok(rows)
    }

    fn reference(&mut self, query: &ReferenceQuery) -> Result<Vec<ReferenceRow>, DataError> {
        let mut rows = Vec::new();
        for identifier in query.identifiers() {
            let url = YahooProvider::meta_url(&yahoo_symbol(identifier));
            let data = self.provider.get_chart(identifier, &url)?;
            rows.extend(reference_rows(identifier, data.meta.unwrap_or_default(), query.fields()));
        }
        Ok(rows)
    }
}

fn first_result(identifier: &str, resp: ChartResponse) -> Result<ChartData, DataError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) if err.code == "Not Found" => DataError::IdentifierNotFound {
            identifier: identifier.to_string(),
        },
        Some(err) => DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description)),
        None => DataError::ResponseFormatChanged("empty result with no error".into()),
    })?;

    result
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))
}

fn historical_rows(
    identifier: &str,
    data: ChartData,
    fields: &[(&str, Series)],
) -> Result<Vec<HistoricalRow>, DataError> {
    let offset = data.meta.as_ref().and_then(|m| m.gmtoffset).unwrap_or(0);
    let timestamps = data
        .timestamp
        .ok_or_else(|| DataError::ResponseFormatChanged("no timestamps".into()))?;
    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose)
        .unwrap_or_default();

    let pick = |series: &Vec<Option<f64>>, i: usize| series.get(i).copied().flatten();

    let mut rows = Vec::with_capacity(timestamps.len() * fields.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts + offset, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        // holidays come back as all-null quotes
        if pick(&quote.close, i).is_none() && pick(&quote.open, i).is_none() {
            continue;
        }

        for (field, series) in fields {
            let value = match series {
                Series::Open => pick(&quote.open, i),
                Series::High => pick(&quote.high, i),
                Series::Low => pick(&quote.low, i),
                Series::Close => pick(&quote.close, i),
                Series::Volume => pick(&quote.volume, i),
                Series::AdjClose => pick(&adj_closes, i),
            };
            rows.push(HistoricalRow {
                date,
                identifier: identifier.to_string(),
                field: field.to_string(),
                value,
            });
        }
    }
    Ok(rows)
}

fn reference_rows(identifier: &str, meta: ChartMeta, fields: &[String]) -> Vec<ReferenceRow> {
    fields
        .iter()
        .filter_map(|field| {
            let value = match field.as_str() {
                "SECURITY_DES" => meta.short_name.clone(),
                "NAME" => meta.long_name.clone(),
                "CRNCY" => meta.currency.clone(),
                "EXCH_CODE" => meta.exchange_name.clone(),
                "SECURITY_TYP" => meta.instrument_type.clone(),
                _ => None,
            }?;
            Some(ReferenceRow {
                identifier: identifier.to_string(),
                field: field.clone(),
                value,
            })
        })
        .collect()
}
