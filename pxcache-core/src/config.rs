//! TOML configuration: output directory, provider selection, query defaults.
//!
//! ```toml
//! output_dir = "data/px"
//! reference_key = "per_request"   # or "legacy"
//!
//! [provider]
//! kind = "replay"                 # "yahoo" | "replay" | "synthetic"
//! replay_dir = "extracts"
//! timeout_secs = 30
//!
//! [defaults]
//! start = "20021231"
//! end = "20221231"
//! frequency = "DAILY"
//! price_fields = ["PX_LAST"]
//! ```
//!
//! Every key is optional. CLI flags override what the file says.

use crate::error::DataError;
use crate::provider::{MarketDataProvider, ReplayProvider, SyntheticProvider, YahooProvider};
use crate::query::{
    parse_query_date, Frequency, RefCachePolicy, DEFAULT_END, DEFAULT_PRICE_FIELD,
    DEFAULT_REFERENCE_FIELDS, DEFAULT_START,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Yahoo,
    Replay,
    Synthetic,
}

impl std::str::FromStr for ProviderKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yahoo" => Ok(ProviderKind::Yahoo),
            "replay" => Ok(ProviderKind::Replay),
            "synthetic" => Ok(ProviderKind::Synthetic),
            other => Err(DataError::Config(format!("unknown provider '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Directory of long-format extracts, required for `replay`.
    pub replay_dir: Option<PathBuf>,
    /// HTTP timeout for `yahoo`.
    pub timeout_secs: u64,
    /// Seed for `synthetic`.
    pub seed: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            replay_dir: None,
            timeout_secs: 30,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    pub start: String,
    pub end: String,
    pub frequency: Frequency,
    pub price_fields: Vec<String>,
    pub reference_fields: Vec<String>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            start: DEFAULT_START.to_string(),
            end: DEFAULT_END.to_string(),
            frequency: Frequency::Daily,
            price_fields: vec![DEFAULT_PRICE_FIELD.to_string()],
            reference_fields: DEFAULT_REFERENCE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PxConfig {
    pub output_dir: PathBuf,
    pub reference_key: RefCachePolicy,
    pub provider: ProviderConfig,
    pub defaults: QueryDefaults,
}

impl Default for PxConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            reference_key: RefCachePolicy::default(),
            provider: ProviderConfig::default(),
            defaults: QueryDefaults::default(),
        }
    }
}

impl PxConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let config: PxConfig =
            toml::from_str(content).map_err(|e| DataError::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        parse_query_date(&self.defaults.start)?;
        parse_query_date(&self.defaults.end)?;
        if self.defaults.price_fields.is_empty() {
            return Err(DataError::Config("defaults.price_fields is empty".into()));
        }
        if self.defaults.reference_fields.is_empty() {
            return Err(DataError::Config("defaults.reference_fields is empty".into()));
        }
        if self.provider.kind == ProviderKind::Replay && self.provider.replay_dir.is_none() {
            return Err(DataError::Config(
                "provider.replay_dir is required for the replay provider".into(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(DataError::Config("provider.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Instantiate the configured provider.
    pub fn build_provider(&self) -> Result<Box<dyn MarketDataProvider>, DataError> {
        let provider: Box<dyn MarketDataProvider> = match self.provider.kind {
            ProviderKind::Yahoo => Box::new(YahooProvider::new(Duration::from_secs(
                self.provider.timeout_secs,
            ))?),
            ProviderKind::Replay => {
                let dir = self.provider.replay_dir.clone().ok_or_else(|| {
                    DataError::Config("provider.replay_dir is required for the replay provider".into())
                })?;
                Box::new(ReplayProvider::new(dir))
            }
            ProviderKind::Synthetic => Box::new(SyntheticProvider::new(self.provider.seed)),
        };
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = PxConfig::from_toml("").unwrap();
        assert_eq!(config, PxConfig::default());
        assert_eq!(config.defaults.start, "20021231");
        assert_eq!(config.defaults.reference_fields.len(), 4);
        assert_eq!(config.reference_key, RefCachePolicy::PerRequest);
    }

    #[test]
    fn parses_full_config() {
        let config = PxConfig::from_toml(
            r#"
            output_dir = "out/px"
            reference_key = "legacy"

            [provider]
            kind = "replay"
            replay_dir = "extracts"

            [defaults]
            start = "20200101"
            frequency = "WEEKLY"
            price_fields = ["PX_LAST", "PX_OPEN"]
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out/px"));
        assert_eq!(config.reference_key, RefCachePolicy::Legacy);
        assert_eq!(config.provider.kind, ProviderKind::Replay);
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.defaults.frequency, Frequency::Weekly);
        assert_eq!(config.defaults.end, "20221231");
        assert_eq!(config.build_provider().unwrap().name(), "replay");
    }

    #[test]
    fn replay_without_dir_is_rejected() {
        let err = PxConfig::from_toml("[provider]\nkind = \"replay\"\n").unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn bad_default_date_is_rejected() {
        let err = PxConfig::from_toml("[defaults]\nstart = \"2020-01-01\"\n").unwrap_err();
        assert!(matches!(err, DataError::InvalidDate { .. }));
    }

    #[test]
    fn unknown_frequency_is_a_parse_error() {
        let err = PxConfig::from_toml("[defaults]\nfrequency = \"HOURLY\"\n").unwrap_err();
        assert!(matches!(err, DataError::Config(_)));
    }

    #[test]
    fn provider_kind_from_cli_string() {
        assert_eq!("Synthetic".parse::<ProviderKind>().unwrap(), ProviderKind::Synthetic);
        assert!("bloomberg".parse::<ProviderKind>().is_err());
    }
}
