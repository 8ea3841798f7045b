use super::{identity, selected_ids, sql, Persisted, Store, StoreError};
use crate::model::{
    normalise, ExchangeCurrencyPair, HistoricRateTuple, OhlcvmTuple, OrderBookTuple, PairId,
    PairSelection, PairTuple, ReadableTicker, TickerTuple, TradeDirection, TradeTuple,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Client, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info, trace};

/// [`Store`] over a `deadpool-postgres` connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool for the connection string `url`; no connection is made until first use.
    pub fn connect(url: &str) -> Result<Self, StoreError> {
        trace!("creating postgres connection pool config");
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.url = Some(url.to_string());
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pg_config.create_pool(Some(Runtime::Tokio1), NoTls)?;
        debug!("postgres connection pool established");
        Ok(Self { pool })
    }

    /// Create the `crypto` schema, its tables and views, if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.batch_execute(sql::CREATE_SCHEMA).await.map_err(|err| {
            error!("failed to create the crypto schema, error({err})");
            err
        })?;
        info!("crypto schema is up to date");
        Ok(())
    }

    async fn select_pairs(
        &self,
        exchange: &str,
        selection: &PairSelection,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        let exchange = exchange.trim().to_uppercase();
        let (pair_firsts, pair_seconds) = selection.pair_columns();
        let client = self.pool.get().await?;
        let rows = client
            .query(
                sql::SELECT_PAIRS_FOR_EXCHANGE,
                &[
                    &exchange,
                    &selection.is_empty(),
                    &selection.firsts(),
                    &selection.seconds(),
                    &pair_firsts,
                    &pair_seconds,
                ],
            )
            .await
            .map_err(|err| {
                error!("failed to fetch currency pairs for {exchange}, error({err})");
                err
            })?;
        Ok(rows.iter().map(pair_from_row).collect())
    }

    // single commit per call; any error rolls the whole batch back on drop
    async fn persist_named<T: NamedFact>(
        &self,
        selected: &[ExchangeCurrencyPair],
        rows: &[T],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let time = std::time::Instant::now();
        let selected = selected_ids(selected);

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let stmt = tx.prepare(T::INSERT).await?;

        let mut persisted = Persisted::default();
        for row in rows {
            let Some((pair, _)) = identity::resolve_pair(&tx, &row.pair(), is_exchange).await? else {
                persisted.skipped += 1;
                continue;
            };
            if !selected.contains(&pair.id) {
                trace!("{pair} was not requested, skipping {}", T::LABEL);
                persisted.skipped += 1;
                continue;
            }

            let inserted = tx
                .execute(&stmt, &row.params(&pair.id))
                .await
                .map_err(|err| {
                    error!("failed to insert {} for {pair}, error({err})", T::LABEL);
                    err
                })?;
            if inserted == 0 {
                persisted.skipped += 1;
            } else {
                persisted.inserted += 1;
            }
        }

        tx.commit().await.map_err(|err| {
            error!("failed to commit transaction for {}, error({err})", T::LABEL);
            err
        })?;

        debug!(
            "{} {} added, \x1b[38;5;208melapsed time: {} ms\x1b[0m",
            persisted.inserted,
            T::LABEL,
            time.elapsed().as_millis()
        );
        Ok(persisted)
    }

    /// `Ok(false)` when the candle is already stored.
    async fn insert_historic_rate(
        client: &mut Client,
        rate: &HistoricRateTuple,
    ) -> Result<bool, StoreError> {
        let tx = client.transaction().await?;
        let exists = tx
            .query_opt(sql::EXISTS_HISTORIC_RATE, &[&rate.exchange_pair_id, &rate.timestamp])
            .await?;
        if exists.is_some() {
            return Ok(false);
        }

        tx.execute(
            sql::INSERT_HISTORIC_RATE,
            &[
                &rate.exchange_pair_id,
                &rate.timestamp,
                &rate.open,
                &rate.high,
                &rate.low,
                &rate.close,
                &rate.volume,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }
}

fn pair_from_row(row: &Row) -> ExchangeCurrencyPair {
    ExchangeCurrencyPair {
        id: row.get(0),
        exchange_id: row.get(1),
        exchange: row.get(2),
        first_id: row.get(3),
        first: row.get(4),
        second_id: row.get(5),
        second: row.get(6),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn resolve_currency(&self, name: &str) -> Result<Option<i32>, StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let id = identity::resolve_currency(&tx, name).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn resolve_exchange(
        &self,
        name: &str,
        is_exchange: bool,
    ) -> Result<Option<i32>, StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let id = identity::resolve_exchange(&tx, name, is_exchange).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn resolve_pair(
        &self,
        exchange: &str,
        first: &str,
        second: &str,
    ) -> Result<Option<ExchangeCurrencyPair>, StoreError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let pair = identity::resolve_pair(&tx, &PairTuple::new(exchange, first, second), true)
            .await?
            .map(|(pair, _)| pair);
        tx.commit().await?;
        Ok(pair)
    }

    async fn persist_pairs(
        &self,
        pairs: &[PairTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let time = std::time::Instant::now();
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let mut persisted = Persisted::default();
        for pair in pairs {
            let resolved = identity::resolve_pair(&tx, pair, is_exchange)
                .await
                .map_err(|err| {
                    error!("failed to persist currency pair {pair:?}, rolling back, error({err})");
                    err
                })?;
            match resolved {
                Some((_, true)) => persisted.inserted += 1,
                Some((_, false)) | None => persisted.skipped += 1,
            }
        }

        tx.commit().await.map_err(|err| {
            error!("failed to commit transaction for currency pairs, error({err})");
            err
        })?;

        debug!(
            "{} currency pairs added, \x1b[38;5;208melapsed time: {} ms\x1b[0m",
            persisted.inserted,
            time.elapsed().as_millis()
        );
        Ok(persisted)
    }

    async fn persist_tickers(
        &self,
        selected: &[ExchangeCurrencyPair],
        tickers: &[TickerTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.persist_named(selected, tickers, is_exchange).await
    }

    async fn persist_historic_rates(
        &self,
        rates: &[HistoricRateTuple],
    ) -> Result<Persisted, StoreError> {
        let time = std::time::Instant::now();
        let mut client = self.pool.get().await?;

        let mut persisted = Persisted::default();
        for rate in rates {
            match Self::insert_historic_rate(&mut client, rate).await {
                Ok(true) => persisted.inserted += 1,
                Ok(false) => persisted.skipped += 1,
                Err(err) => {
                    error!(
                        "failed to insert historic rate for pair {} at {}, error({err})",
                        rate.exchange_pair_id, rate.timestamp
                    );
                    persisted.skipped += 1;
                }
            }
        }

        debug!(
            "{} historic rates added, \x1b[38;5;208melapsed time: {} ms\x1b[0m",
            persisted.inserted,
            time.elapsed().as_millis()
        );
        Ok(persisted)
    }

    async fn persist_order_books(
        &self,
        selected: &[ExchangeCurrencyPair],
        books: &[OrderBookTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.persist_named(selected, books, is_exchange).await
    }

    async fn persist_trades(
        &self,
        selected: &[ExchangeCurrencyPair],
        trades: &[TradeTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.persist_named(selected, trades, is_exchange).await
    }

    async fn persist_ohlcvm(
        &self,
        selected: &[ExchangeCurrencyPair],
        candles: &[OhlcvmTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.persist_named(selected, candles, is_exchange).await
    }

    async fn get_all_currency_pairs(
        &self,
        exchange: &str,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        self.select_pairs(exchange, &PairSelection::default()).await
    }

    async fn get_currency_pairs_for_exchange(
        &self,
        exchange: &str,
        selection: &PairSelection,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        self.select_pairs(exchange, selection).await
    }

    async fn get_readable_tickers(
        &self,
        exchanges: &[String],
        selection: &PairSelection,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReadableTicker>, StoreError> {
        let exchanges: Vec<String> = exchanges.iter().filter_map(|name| normalise(name)).collect();
        let (pair_firsts, pair_seconds) = selection.pair_columns();
        let client = self.pool.get().await?;
        let rows = client
            .query(
                sql::SELECT_READABLE_TICKERS,
                &[
                    &exchanges.is_empty(),
                    &exchanges,
                    &selection.is_empty(),
                    &selection.firsts(),
                    &selection.seconds(),
                    &pair_firsts,
                    &pair_seconds,
                    &from,
                    &to,
                ],
            )
            .await
            .map_err(|err| {
                error!("failed to fetch readable tickers, error({err})");
                err
            })?;
        Ok(rows.iter().map(readable_ticker_from_row).collect())
    }
}

fn readable_ticker_from_row(row: &Row) -> ReadableTicker {
    ReadableTicker {
        exchange: row.get(0),
        first: row.get(1),
        second: row.get(2),
        start_time: row.get(3),
        response_time: row.get(4),
        last_price: row.get(5),
        last_trade: row.get(6),
        best_ask: row.get(7),
        best_bid: row.get(8),
        daily_volume: row.get(9),
    }
}

/////////////////////////////////////////////////////////////////////////////////
// fact rows referencing their pair by name
/////////////////////////////////////////////////////////////////////////////////

trait NamedFact: Sync {
    const LABEL: &'static str;
    const INSERT: &'static str;

    fn pair(&self) -> PairTuple;

    /// Statement parameters, in column order, with the resolved pair id first.
    fn params<'a>(&'a self, pair_id: &'a PairId) -> Vec<&'a (dyn ToSql + Sync)>;
}

impl NamedFact for TickerTuple {
    const LABEL: &'static str = "tickers";
    const INSERT: &'static str = sql::INSERT_TICKER;

    fn pair(&self) -> PairTuple {
        TickerTuple::pair(self)
    }

    fn params<'a>(&'a self, pair_id: &'a PairId) -> Vec<&'a (dyn ToSql + Sync)> {
        vec![
            pair_id,
            &self.start_time,
            &self.response_time,
            &self.last_price,
            &self.last_trade,
            &self.best_ask,
            &self.best_bid,
            &self.daily_volume,
        ]
    }
}

impl NamedFact for OrderBookTuple {
    const LABEL: &'static str = "order book levels";
    const INSERT: &'static str = sql::INSERT_ORDER_BOOK;

    fn pair(&self) -> PairTuple {
        OrderBookTuple::pair(self)
    }

    fn params<'a>(&'a self, pair_id: &'a PairId) -> Vec<&'a (dyn ToSql + Sync)> {
        vec![
            pair_id,
            &self.timestamp,
            &self.position,
            &self.bids_price,
            &self.bids_amount,
            &self.asks_price,
            &self.asks_amount,
        ]
    }
}

impl NamedFact for TradeTuple {
    const LABEL: &'static str = "trades";
    const INSERT: &'static str = sql::INSERT_TRADE;

    fn pair(&self) -> PairTuple {
        TradeTuple::pair(self)
    }

    fn params<'a>(&'a self, pair_id: &'a PairId) -> Vec<&'a (dyn ToSql + Sync)> {
        vec![
            pair_id,
            &self.trade_id,
            &self.timestamp,
            direction_param(self.direction),
            &self.price,
            &self.amount,
        ]
    }
}

fn direction_param(direction: TradeDirection) -> &'static &'static str {
    match direction {
        TradeDirection::Buy => &"buy",
        TradeDirection::Sell => &"sell",
    }
}

impl NamedFact for OhlcvmTuple {
    const LABEL: &'static str = "ohlcvm candles";
    const INSERT: &'static str = sql::INSERT_OHLCVM;

    fn pair(&self) -> PairTuple {
        OhlcvmTuple::pair(self)
    }

    fn params<'a>(&'a self, pair_id: &'a PairId) -> Vec<&'a (dyn ToSql + Sync)> {
        vec![
            pair_id,
            &self.timestamp,
            &self.open,
            &self.high,
            &self.low,
            &self.close,
            &self.volume,
            &self.market_cap,
        ]
    }
}
