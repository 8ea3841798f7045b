use crate::model::{
    ExchangeCurrencyPair, HistoricRateTuple, OhlcvmTuple, OrderBookTuple, PairId, PairSelection,
    PairTuple, ReadableTicker, TickerTuple, TradeTuple,
};
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ops::AddAssign;
use thiserror::Error;

mod identity;
mod sql;

/// Scratch backend: the same semantics as PostgreSQL, kept in process memory.
pub mod memory;

/// The `crypto` schema on PostgreSQL.
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to check out a connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("failed to create the connection pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Row counts of one persist call.
///
/// `skipped` counts tuples that were malformed, outside the selected pairs, or already stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub inserted: usize,
    pub skipped: usize,
}

impl AddAssign for Persisted {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.skipped += rhs.skipped;
    }
}

/// Transactional persistence of identities and facts.
///
/// Every mutating call runs in its own transaction scope: committed when the call succeeds,
/// rolled back on any error, never left open across calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve a currency name to its id, creating the row on first sight.
    async fn resolve_currency(&self, name: &str) -> Result<Option<i32>, StoreError>;

    /// Resolve an exchange name to its id, creating the row on first sight.
    async fn resolve_exchange(&self, name: &str, is_exchange: bool)
        -> Result<Option<i32>, StoreError>;

    /// Resolve (creating the exchange, currencies and pair as needed) an exchange currency pair.
    async fn resolve_pair(
        &self,
        exchange: &str,
        first: &str,
        second: &str,
    ) -> Result<Option<ExchangeCurrencyPair>, StoreError>;

    /// Resolve-or-create every pair in a single transaction; all or nothing.
    async fn persist_pairs(
        &self,
        pairs: &[PairTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError>;

    /// Insert tickers whose pair is one of `selected`, creating unseen pairs on the way.
    ///
    /// `is_exchange` flags exchanges first seen through these rows.
    async fn persist_tickers(
        &self,
        selected: &[ExchangeCurrencyPair],
        tickers: &[TickerTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError>;

    /// Insert candles not yet stored for their `(exchange_pair_id, timestamp)`, one commit each.
    async fn persist_historic_rates(
        &self,
        rates: &[HistoricRateTuple],
    ) -> Result<Persisted, StoreError>;

    async fn persist_order_books(
        &self,
        selected: &[ExchangeCurrencyPair],
        books: &[OrderBookTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError>;

    async fn persist_trades(
        &self,
        selected: &[ExchangeCurrencyPair],
        trades: &[TradeTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError>;

    async fn persist_ohlcvm(
        &self,
        selected: &[ExchangeCurrencyPair],
        candles: &[OhlcvmTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError>;

    /// All pairs stored for an exchange.
    async fn get_all_currency_pairs(
        &self,
        exchange: &str,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError>;

    /// Pairs of `exchange` matching `selection` (see [`PairSelection`]), without duplicates.
    async fn get_currency_pairs_for_exchange(
        &self,
        exchange: &str,
        selection: &PairSelection,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError>;

    /// Stored tickers with their names, ordered by pair and `start_time`.
    ///
    /// Restricted to `exchanges` (all when empty) and `selection`; `from` and `to` bound
    /// `start_time` inclusively.
    async fn get_readable_tickers(
        &self,
        exchanges: &[String],
        selection: &PairSelection,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReadableTicker>, StoreError>;
}

pub(crate) fn selected_ids(selected: &[ExchangeCurrencyPair]) -> HashSet<PairId> {
    selected.iter().map(|pair| pair.id).collect()
}
