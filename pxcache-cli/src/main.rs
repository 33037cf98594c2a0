//! pxcache CLI — fetch market data through the flat-file cache.
//!
//! Commands:
//! - `hist` — historical price table for identifiers over a date window
//! - `ref` — reference fields for identifiers
//! - `read` — one field (or one identifier) of a historical table, date-indexed
//! - `cache list` — show cached files
//! - `cache clean` — remove cached files, optionally of one kind
//!
//! Tables are written to stdout as CSV. Logs go to stderr (`RUST_LOG`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pxcache_core::query::OHLC_FIELDS;
use pxcache_core::{
    CacheEntry, CacheKind, CachedQueryAccessor, ColumnLevel, CsvCache, FieldFrame, Frequency,
    PriceQuery, PriceTable, PxConfig, ReferenceQuery, ReferenceTable, RefCachePolicy,
    write_price_records, write_reference_records,
};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pxcache",
    about = "Cache-or-fetch access to historical and reference market data"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding cache files. Overrides the config.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Data provider: yahoo, replay, synthetic. Overrides the config.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// Directory of extracts for the replay provider.
    #[arg(long, global = true)]
    replay_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Historical price table, from cache or provider.
    Hist {
        /// Identifiers (e.g., "AAPL US Equity").
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Start date (YYYYMMDD).
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYYMMDD).
        #[arg(long)]
        end: Option<String>,

        /// Sampling frequency: DAILY, WEEKLY, MONTHLY, QUARTERLY, SEMI_ANNUALLY, YEARLY.
        #[arg(long)]
        freq: Option<String>,

        /// Field to fetch. Repeat for several.
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Fetch PX_LAST, PX_LOW, PX_HIGH, PX_OPEN.
        #[arg(long, default_value_t = false, conflicts_with = "fields")]
        ohlc: bool,

        /// Delete the cached file first so the provider is queried.
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// Reference data table, from cache or provider.
    Ref {
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Reference field to fetch. Repeat for several.
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Use the single shared `RefData.csv` file.
        #[arg(long, default_value_t = false)]
        legacy_key: bool,

        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    /// One field across identifiers (or one identifier across fields).
    Read {
        #[arg(required = true)]
        identifiers: Vec<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        freq: Option<String>,

        /// Field to select. Defaults to PX_LAST. With --by-identifier, the
        /// field to fetch alongside the configured price fields.
        #[arg(long)]
        field: Option<String>,

        /// Select the first identifier and show its fields as columns.
        #[arg(long, default_value_t = false)]
        by_identifier: bool,

        /// Leave gaps empty instead of carrying the last value forward.
        #[arg(long, default_value_t = false)]
        no_fill: bool,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached files.
    List,
    /// Remove cached files.
    Clean {
        /// Only remove files of this kind: price, reference.
        #[arg(long)]
        kind: Option<String>,

        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Hist {
            identifiers,
            start,
            end,
            freq,
            fields,
            ohlc,
            refresh,
        } => {
            let fields = if ohlc {
                OHLC_FIELDS.iter().map(|f| f.to_string()).collect()
            } else {
                fields
            };
            let query = price_query(&config, identifiers, start, end, freq, fields)?;
            run_hist(&config, &query, refresh)
        }
        Commands::Ref {
            identifiers,
            fields,
            legacy_key,
            refresh,
        } => {
            let fields = if fields.is_empty() {
                config.defaults.reference_fields.clone()
            } else {
                fields
            };
            let query = ReferenceQuery::new(identifiers, fields)?;
            let policy = if legacy_key {
                RefCachePolicy::Legacy
            } else {
                config.reference_key
            };
            run_ref(&config, &query, policy, refresh)
        }
        Commands::Read {
            identifiers,
            start,
            end,
            freq,
            field,
            by_identifier,
            no_fill,
        } => {
            let (fields, key, level) = if by_identifier {
                let mut fields = config.defaults.price_fields.clone();
                fields.extend(field);
                (fields, identifiers.first().cloned(), ColumnLevel::Identifier)
            } else {
                (config.defaults.price_fields.clone(), field, ColumnLevel::Field)
            };
            let query = price_query(&config, identifiers, start, end, freq, fields)?;
            run_read(&config, &query, key.as_deref(), level, !no_fill)
        }
        Commands::Cache { action } => match action {
            CacheAction::List => run_cache_list(&config),
            CacheAction::Clean { kind, confirm } => {
                let kind = kind.as_deref().map(parse_cache_kind).transpose()?;
                run_cache_clean(&config, kind, confirm)
            }
        },
    }
}

/// Config file (or defaults) with global flags applied on top.
fn resolve_config(cli: &Cli) -> Result<PxConfig> {
    let mut config = match &cli.config {
        Some(path) => PxConfig::from_file(path)?,
        None => PxConfig::default(),
    };
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(kind) = &cli.provider {
        config.provider.kind = kind.parse()?;
    }
    if let Some(dir) = &cli.replay_dir {
        config.provider.replay_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn price_query(
    config: &PxConfig,
    identifiers: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    freq: Option<String>,
    fields: Vec<String>,
) -> Result<PriceQuery> {
    let frequency = match freq {
        Some(f) => f.parse::<Frequency>()?,
        None => config.defaults.frequency,
    };
    let fields = if fields.is_empty() {
        config.defaults.price_fields.clone()
    } else {
        fields
    };
    Ok(PriceQuery::new(
        identifiers,
        start.as_deref().unwrap_or(&config.defaults.start),
        end.as_deref().unwrap_or(&config.defaults.end),
        frequency,
        fields,
    )?)
}

fn parse_cache_kind(s: &str) -> Result<CacheKind> {
    match s.to_ascii_lowercase().as_str() {
        "price" | "px" => Ok(CacheKind::Price),
        "reference" | "ref" => Ok(CacheKind::Reference),
        other => bail!("unknown cache kind '{other}'. Valid: price, reference"),
    }
}

fn run_hist(config: &PxConfig, query: &PriceQuery, refresh: bool) -> Result<()> {
    let provider = config.build_provider()?;
    let accessor = CachedQueryAccessor::new(provider.as_ref(), &config.output_dir);
    if refresh && accessor.invalidate_price(query)? {
        tracing::info!(path = %accessor.price_path(query).display(), "removed cached file");
    }

    let fetched = accessor.price_data(query)?;
    tracing::info!(source = ?fetched.source, path = %fetched.path.display(), "historical data ready");
    write_price_csv(io::stdout().lock(), &fetched.table)
}

fn run_ref(
    config: &PxConfig,
    query: &ReferenceQuery,
    policy: RefCachePolicy,
    refresh: bool,
) -> Result<()> {
    let provider = config.build_provider()?;
    let accessor =
        CachedQueryAccessor::new(provider.as_ref(), &config.output_dir).with_ref_policy(policy);
    if refresh && accessor.invalidate_reference(query)? {
        tracing::info!(path = %accessor.reference_path(query).display(), "removed cached file");
    }

    let fetched = accessor.reference_data(query)?;
    tracing::info!(source = ?fetched.source, path = %fetched.path.display(), "reference data ready");
    write_reference_csv(io::stdout().lock(), &fetched.table)
}

fn run_read(
    config: &PxConfig,
    query: &PriceQuery,
    key: Option<&str>,
    level: ColumnLevel,
    fill_forward: bool,
) -> Result<()> {
    let provider = config.build_provider()?;
    let accessor = CachedQueryAccessor::new(provider.as_ref(), &config.output_dir);
    let frame = accessor.read_price_data(query, key, level, fill_forward)?;
    write_frame_csv(io::stdout().lock(), &frame)
}

fn run_cache_list(config: &PxConfig) -> Result<()> {
    let entries = CsvCache::new(&config.output_dir).list()?;
    if entries.is_empty() {
        println!("Cache is empty: {}", config.output_dir.display());
        return Ok(());
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!("Cache: {}", config.output_dir.display());
    println!("Files: {}", entries.len());
    println!("Total size: {}", format_size(total));
    println!();
    print_entries(&entries);
    Ok(())
}

fn run_cache_clean(config: &PxConfig, kind: Option<CacheKind>, confirm: bool) -> Result<()> {
    let cache = CsvCache::new(&config.output_dir);

    if !confirm {
        let doomed: Vec<CacheEntry> = cache
            .list()?
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect();
        if doomed.is_empty() {
            println!("Nothing to remove.");
            return Ok(());
        }
        println!("Would remove {} file(s):", doomed.len());
        print_entries(&doomed);
        println!();
        println!("Run with --confirm to delete.");
        return Ok(());
    }

    let removed = cache.clean(kind)?;
    let freed: u64 = removed.iter().map(|e| e.size_bytes).sum();
    println!("Removed {} file(s), freed {}.", removed.len(), format_size(freed));
    Ok(())
}

fn print_entries(entries: &[CacheEntry]) {
    println!("{:<44} {:<10} {:<20} {:>10}", "File", "Kind", "Modified", "Size");
    println!("{}", "-".repeat(87));
    for e in entries {
        let kind = match e.kind {
            CacheKind::Price => "price",
            CacheKind::Reference => "reference",
        };
        let modified = e
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<44} {:<10} {:<20} {:>10}",
            format!("{}.csv", e.stem),
            kind,
            modified,
            format_size(e.size_bytes)
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

// ── CSV output ───────────────────────────────────────────────────────

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Same layout as the cache file.
fn write_price_csv(out: impl Write, table: &PriceTable) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    write_price_records(&mut wtr, table)?;
    wtr.flush()?;
    Ok(())
}

fn write_reference_csv(out: impl Write, table: &ReferenceTable) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    write_reference_records(&mut wtr, table)?;
    wtr.flush()?;
    Ok(())
}

fn write_frame_csv(out: impl Write, frame: &FieldFrame) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);

    let mut header = vec!["Date".to_string()];
    header.extend(frame.columns.iter().cloned());
    wtr.write_record(&header)?;

    for (i, date) in frame.dates.iter().enumerate() {
        let mut record = vec![date.to_string()];
        record.extend(frame.values.iter().map(|column| cell(column[i])));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pxcache_core::{ProviderKind, SyntheticProvider};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "pxcache",
            "hist",
            "AAPL US Equity",
            "--provider",
            "synthetic",
            "--output-dir",
            "out",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Synthetic);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn replay_without_dir_is_rejected() {
        let cli = Cli::try_parse_from(["pxcache", "cache", "list", "--provider", "replay"]).unwrap();
        assert!(resolve_config(&cli).is_err());
    }

    #[test]
    fn ohlc_conflicts_with_explicit_fields() {
        let parsed = Cli::try_parse_from([
            "pxcache", "hist", "SPY US Equity", "--ohlc", "--field", "PX_LAST",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn price_query_falls_back_to_config_defaults() {
        let config = PxConfig::default();
        let query =
            price_query(&config, vec!["AAPL US Equity".into()], None, None, None, vec![]).unwrap();
        assert_eq!(query.cache_stem(), "PxData_DAILY_20021231_20221231");
        assert_eq!(query.fields(), &["PX_LAST".to_string()]);
    }

    #[test]
    fn bad_frequency_is_reported() {
        let config = PxConfig::default();
        let err = price_query(
            &config,
            vec!["AAPL US Equity".into()],
            None,
            None,
            Some("HOURLY".into()),
            vec![],
        );
        assert!(err.is_err());
    }

    #[test]
    fn cache_kind_names() {
        assert_eq!(parse_cache_kind("price").unwrap(), CacheKind::Price);
        assert_eq!(parse_cache_kind("REF").unwrap(), CacheKind::Reference);
        assert!(parse_cache_kind("parquet").is_err());
    }

    #[test]
    fn frame_csv_leaves_gaps_empty() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SyntheticProvider::new(7);
        let accessor = CachedQueryAccessor::new(&provider, dir.path());
        let query = PriceQuery::last_price(
            vec!["AAPL US Equity".into()],
            "20200101",
            "20200107",
            Frequency::Daily,
        )
        .unwrap();
        let frame = accessor
            .read_price_data(&query, None, ColumnLevel::Field, false)
            .unwrap();

        let mut out = Vec::new();
        write_frame_csv(&mut out, &frame).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Date,AAPL US Equity"));
        assert!(lines.next().unwrap().starts_with("2020-01-01,"));
        assert_eq!(text.lines().count(), frame.dates.len() + 1);
    }

    #[test]
    fn price_csv_has_two_header_rows() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SyntheticProvider::default();
        let accessor = CachedQueryAccessor::new(&provider, dir.path());
        let query = PriceQuery::new(
            vec!["AAPL US Equity".into(), "MSFT US Equity".into()],
            "20200106",
            "20200107",
            Frequency::Daily,
            vec!["PX_LAST".into()],
        )
        .unwrap();
        let fetched = accessor.price_data(&query).unwrap();

        let mut out = Vec::new();
        write_price_csv(&mut out, &fetched.table).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Field,PX_LAST,PX_LAST"));
        assert_eq!(lines.next(), Some("Date,AAPL US Equity,MSFT US Equity"));
        assert_eq!(lines.count(), 2);

        let mut out = Vec::new();
        write_price_csv(&mut out, &fetched.table).unwrap();
        assert_eq!(out, std::fs::read(&fetched.path).unwrap());
    }

    #[test]
    fn reference_csv_matches_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SyntheticProvider::default();
        let accessor = CachedQueryAccessor::new(&provider, dir.path());
        let query = ReferenceQuery::new(
            vec!["AAPL US Equity".into()],
            vec!["SECURITY_DES".into(), "CRNCY".into()],
        )
        .unwrap();
        let fetched = accessor.reference_data(&query).unwrap();

        let mut out = Vec::new();
        write_reference_csv(&mut out, &fetched.table).unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().starts_with("Ticker,"));
        assert_eq!(out, std::fs::read(&fetched.path).unwrap());
    }
}
