//! Cached Query Accessor: cache check → fetch → persist → reload.
//!
//! Every call is one linear sequence:
//! 1. Derive the cache stem from the query key.
//! 2. If `{dir}/{stem}.csv` exists, load it and return (no provider session).
//! 3. Otherwise open a provider session, query, pivot long → wide,
//!    create the output directory if missing, write the file, close the
//!    session, and return the table *as reloaded from disk*.
//!
//! Provider failures propagate unchanged. There is no retry and no partial
//! result: a failed fetch writes nothing.

use crate::cache::CsvCache;
use crate::error::DataError;
use crate::provider::{MarketDataProvider, SessionGuard};
use crate::query::{PriceQuery, RefCachePolicy, ReferenceQuery, DEFAULT_PRICE_FIELD};
use crate::reshape::{select_field, ColumnLevel, FieldFrame};
use crate::table::{PriceTable, ReferenceTable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a returned table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableSource {
    Cache,
    Provider,
}

/// Non-fatal conditions surfaced alongside a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheWarning {
    /// The output directory did not exist and was created.
    CreatedDirectory(PathBuf),
    /// A cache hit does not cover everything the query asked for. The file
    /// was written for a different request, so a refetch may fill the gaps.
    CoverageMismatch {
        path: PathBuf,
        missing_identifiers: Vec<String>,
        missing_fields: Vec<String>,
    },
    /// The provider returned nothing for some requested identifiers or fields.
    /// Raised on the fetch itself and on later hits of a request-keyed file;
    /// refetching will not fill these.
    ProviderOmitted {
        path: PathBuf,
        missing_identifiers: Vec<String>,
        missing_fields: Vec<String>,
    },
}

impl fmt::Display for CacheWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheWarning::CreatedDirectory(dir) => {
                write!(f, "output directory {} did not exist; created it", dir.display())
            }
            CacheWarning::CoverageMismatch {
                path,
                missing_identifiers,
                missing_fields,
            } => {
                write!(f, "cached file {} does not cover the request", path.display())?;
                write_gaps(f, missing_identifiers, missing_fields)?;
                write!(
                    f,
                    " (the file may have been written for another request; \
                     delete it or refresh to refetch)"
                )
            }
            CacheWarning::ProviderOmitted {
                path,
                missing_identifiers,
                missing_fields,
            } => {
                write!(f, "provider did not supply everything stored in {}", path.display())?;
                write_gaps(f, missing_identifiers, missing_fields)?;
                write!(f, " (refetching will not fill these)")
            }
        }
    }
}

fn write_gaps(
    f: &mut fmt::Formatter<'_>,
    missing_identifiers: &[String],
    missing_fields: &[String],
) -> fmt::Result {
    if !missing_identifiers.is_empty() {
        write!(f, "; missing identifiers: {}", missing_identifiers.join(", "))?;
    }
    if !missing_fields.is_empty() {
        write!(f, "; missing fields: {}", missing_fields.join(", "))?;
    }
    Ok(())
}

/// A result table plus provenance.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub table: T,
    pub source: TableSource,
    pub path: PathBuf,
    pub warnings: Vec<CacheWarning>,
}

impl<T> Fetched<T> {
    pub fn from_cache(&self) -> bool {
        self.source == TableSource::Cache
    }
}

/// Cache-or-fetch accessor over one output directory and one provider.
pub struct CachedQueryAccessor<'a> {
    provider: &'a dyn MarketDataProvider,
    cache: CsvCache,
    ref_policy: RefCachePolicy,
}

impl<'a> CachedQueryAccessor<'a> {
    pub fn new(provider: &'a dyn MarketDataProvider, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            cache: CsvCache::new(output_dir),
            ref_policy: RefCachePolicy::default(),
        }
    }

    pub fn with_ref_policy(mut self, policy: RefCachePolicy) -> Self {
        self.ref_policy = policy;
        self
    }

    pub fn cache(&self) -> &CsvCache {
        &self.cache
    }

    pub fn ref_policy(&self) -> RefCachePolicy {
        self.ref_policy
    }

    /// Path a historical query resolves to.
    pub fn price_path(&self, query: &PriceQuery) -> PathBuf {
        self.cache.path_for(&query.cache_stem())
    }

    /// Path a reference query resolves to under the current policy.
    pub fn reference_path(&self, query: &ReferenceQuery) -> PathBuf {
        self.cache.path_for(&query.cache_stem(self.ref_policy))
    }

    /// Historical price table for `query`, from cache when present.
    pub fn price_data(&self, query: &PriceQuery) -> Result<Fetched<PriceTable>, DataError> {
        let stem = query.cache_stem();
        let path = self.cache.path_for(&stem);

        if self.cache.contains(&stem) {
            tracing::info!(path = %path.display(), "price cache hit");
            let table = self.cache.read_price_table(&stem)?;
            let warnings = coverage_warning(
                &path,
                table.missing_identifiers(query.identifiers()),
                table.missing_fields(query.fields()),
                Gap::Stale,
            )
            .into_iter()
            .collect();
            return Ok(Fetched {
                table,
                source: TableSource::Cache,
                path,
                warnings,
            });
        }

        tracing::info!(
            path = %path.display(),
            provider = self.provider.name(),
            identifiers = query.identifiers().len(),
            "price cache miss; querying provider"
        );
        let rows = {
            let mut session = SessionGuard::open(self.provider)?;
            session.historical(query)?
        };
        let fetched = PriceTable::from_long(rows, query)?;

        let mut warnings = self.prepare_dir()?;
        warnings.extend(coverage_warning(
            &path,
            fetched.missing_identifiers(query.identifiers()),
            fetched.missing_fields(query.fields()),
            Gap::Omitted,
        ));
        self.cache.write_price_table(&stem, &fetched)?;
        let table = self.cache.read_price_table(&stem)?;

        Ok(Fetched {
            table,
            source: TableSource::Provider,
            path,
            warnings,
        })
    }

    /// Reference table for `query`, from cache when present.
    ///
    /// Under [`RefCachePolicy::Legacy`] every reference query shares one file,
    /// so a later query for other identifiers gets the earlier result back,
    /// flagged with a [`CacheWarning::CoverageMismatch`].
    pub fn reference_data(
        &self,
        query: &ReferenceQuery,
    ) -> Result<Fetched<ReferenceTable>, DataError> {
        let stem = query.cache_stem(self.ref_policy);
        let path = self.cache.path_for(&stem);

        if self.cache.contains(&stem) {
            tracing::info!(path = %path.display(), "reference cache hit");
            let table = self.cache.read_reference_table(&stem)?;
            // a request-keyed file was written for exactly this request
            let gap = match self.ref_policy {
                RefCachePolicy::PerRequest => Gap::Omitted,
                RefCachePolicy::Legacy => Gap::Stale,
            };
            let warnings = coverage_warning(
                &path,
                table.missing_identifiers(query.identifiers()),
                table.missing_fields(query.fields()),
                gap,
            )
            .into_iter()
            .collect();
            return Ok(Fetched {
                table,
                source: TableSource::Cache,
                path,
                warnings,
            });
        }

        tracing::info!(
            path = %path.display(),
            provider = self.provider.name(),
            "reference cache miss; querying provider"
        );
        let rows = {
            let mut session = SessionGuard::open(self.provider)?;
            session.reference(query)?
        };
        let fetched = ReferenceTable::from_long(rows, query)?;

        let mut warnings = self.prepare_dir()?;
        warnings.extend(coverage_warning(
            &path,
            fetched.missing_identifiers(query.identifiers()),
            fetched.missing_fields(query.fields()),
            Gap::Omitted,
        ));
        self.cache.write_reference_table(&stem, &fetched)?;
        let table = self.cache.read_reference_table(&stem)?;

        Ok(Fetched {
            table,
            source: TableSource::Provider,
            path,
            warnings,
        })
    }

    /// Fetch (or load) and collapse one column level.
    ///
    /// With `key = Some(field)` at field level the query is narrowed to that
    /// one field, so its cache file holds only that field. With `key = None`
    /// the query's own fields are fetched and `PX_LAST` is selected by field.
    pub fn read_price_data(
        &self,
        query: &PriceQuery,
        key: Option<&str>,
        level: ColumnLevel,
        fill_forward: bool,
    ) -> Result<FieldFrame, DataError> {
        let (query, key, level) = match (key, level) {
            (Some(field), ColumnLevel::Field) => (
                query.with_fields(vec![field.to_string()])?,
                field,
                ColumnLevel::Field,
            ),
            (Some(identifier), ColumnLevel::Identifier) => {
                (query.clone(), identifier, ColumnLevel::Identifier)
            }
            (None, _) => (query.clone(), DEFAULT_PRICE_FIELD, ColumnLevel::Field),
        };

        let fetched = self.price_data(&query)?;
        select_field(&fetched.table, key, level, fill_forward)
    }

    /// Drop the cached file for a historical query. Returns `true` if one existed.
    pub fn invalidate_price(&self, query: &PriceQuery) -> Result<bool, DataError> {
        self.cache.remove(&query.cache_stem())
    }

    /// Drop the cached file for a reference query. Returns `true` if one existed.
    pub fn invalidate_reference(&self, query: &ReferenceQuery) -> Result<bool, DataError> {
        self.cache.remove(&query.cache_stem(self.ref_policy))
    }

    fn prepare_dir(&self) -> Result<Vec<CacheWarning>, DataError> {
        if self.cache.ensure_dir()? {
            let warning = CacheWarning::CreatedDirectory(self.cache.dir().to_path_buf());
            tracing::warn!("{warning}");
            Ok(vec![warning])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Why a table may not cover its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gap {
    /// The file may have been written for a different request.
    Stale,
    /// The provider was asked for exactly this and left it out.
    Omitted,
}

fn coverage_warning(
    path: &Path,
    missing_identifiers: Vec<String>,
    missing_fields: Vec<String>,
    gap: Gap,
) -> Option<CacheWarning> {
    if missing_identifiers.is_empty() && missing_fields.is_empty() {
        return None;
    }
    let path = path.to_path_buf();
    let warning = match gap {
        Gap::Stale => CacheWarning::CoverageMismatch {
            path,
            missing_identifiers,
            missing_fields,
        },
        Gap::Omitted => CacheWarning::ProviderOmitted {
            path,
            missing_identifiers,
            missing_fields,
        },
    };
    tracing::warn!("{warning}");
    Some(warning)
}
