//! Market-data provider trait and the long-format rows it returns.
//!
//! The provider is the external collaborator: it runs historical-range and
//! reference-field queries and hands back long-format rows. The accessor
//! sits above this trait and owns caching; providers don't know about the
//! cache.
//!
//! A session is acquired once per accessor call through [`SessionGuard`],
//! which closes it on drop whether the query succeeded or not.

pub mod replay;
pub mod synthetic;
pub mod yahoo;

use crate::error::DataError;
use crate::query::{PriceQuery, ReferenceQuery};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

pub use replay::ReplayProvider;
pub use synthetic::SyntheticProvider;
pub use yahoo::YahooProvider;

/// One historical observation: (date, identifier, field, value).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    pub date: NaiveDate,
    pub identifier: String,
    pub field: String,
    pub value: Option<f64>,
}

/// One reference observation: (identifier, field, value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub identifier: String,
    pub field: String,
    pub value: String,
}

/// A data provider (terminal API, HTTP source, file replay, ...).
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Acquire a session for the duration of one call.
    fn open_session(&self) -> Result<Box<dyn ProviderSession + '_>, DataError>;
}

/// An open provider session.
pub trait ProviderSession {
    /// Historical range query over the query's identifiers, fields, window and frequency.
    fn historical(&mut self, query: &PriceQuery) -> Result<Vec<HistoricalRow>, DataError>;

    /// Reference-field query over the query's identifiers and fields.
    fn reference(&mut self, query: &ReferenceQuery) -> Result<Vec<ReferenceRow>, DataError>;

    /// Release the session. Called exactly once, by [`SessionGuard`].
    fn close(&mut self) {}
}

/// Scoped provider session: opened on construction, closed on drop.
pub struct SessionGuard<'a> {
    session: Box<dyn ProviderSession + 'a>,
}

impl<'a> SessionGuard<'a> {
    pub fn open(provider: &'a dyn MarketDataProvider) -> Result<Self, DataError> {
        tracing::debug!(provider = provider.name(), "opening provider session");
        Ok(Self {
            session: provider.open_session()?,
        })
    }
}

impl<'a> Deref for SessionGuard<'a> {
    type Target = dyn ProviderSession + 'a;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl<'a> DerefMut for SessionGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Frequency;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct CountingSession<'a>(&'a Counting);

    impl MarketDataProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn open_session(&self) -> Result<Box<dyn ProviderSession + '_>, DataError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession(self)))
        }
    }

    impl ProviderSession for CountingSession<'_> {
        fn historical(&mut self, _query: &PriceQuery) -> Result<Vec<HistoricalRow>, DataError> {
            Err(DataError::NetworkUnreachable("offline".into()))
        }

        fn reference(&mut self, _query: &ReferenceQuery) -> Result<Vec<ReferenceRow>, DataError> {
            Ok(Vec::new())
        }

        fn close(&mut self) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_closes_session_after_failed_query() {
        let provider = Counting::default();
        let query = PriceQuery::last_price(
            vec!["SPY US Equity".into()],
            "20240101",
            "20240131",
            Frequency::Daily,
        )
        .unwrap();

        let result = {
            let mut session = SessionGuard::open(&provider).unwrap();
            session.historical(&query)
        };

        assert!(matches!(result, Err(DataError::NetworkUnreachable(_))));
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }
}
