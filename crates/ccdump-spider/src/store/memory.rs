use super::{selected_ids, Persisted, Store, StoreError};
use crate::key_tracker::KeyTracker;
use crate::model::{
    normalise, CurrencyId, ExchangeCurrencyPair, ExchangeId, HistoricRateTuple, OhlcvmTuple,
    OrderBookTuple, PairId, PairSelection, PairTuple, ReadableTicker, TickerTuple, TradeTuple,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// [`Store`] kept in process memory, for dry runs and tests.
///
/// Surrogate keys are handed out by [`KeyTracker`]s, so ids start at one and grow like `SERIAL`
/// columns. A batch works on a copy of the identity tables and collects its facts apart from the
/// committed ones; both are applied only when the whole batch succeeds, which gives it the same
/// all-or-nothing behaviour as a PostgreSQL transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    identities: Identities,
    facts: Facts,
}

/////////////////////////////////////////////////////////////////////////////////
// identities
/////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Clone)]
struct Identities {
    exchanges: KeyTracker<ExchangeId, String>,
    platforms: HashSet<ExchangeId>,
    currencies: KeyTracker<CurrencyId, String>,
    pairs: KeyTracker<PairId, (ExchangeId, CurrencyId, CurrencyId)>,
}

impl Identities {
    fn resolve_exchange(&mut self, name: &str, is_exchange: bool) -> Option<ExchangeId> {
        let name = normalise(name)?;
        let seen = self.exchanges.key_of(&name).is_some();
        let id = self.exchanges.transact(name);
        if !seen && !is_exchange {
            self.platforms.insert(id);
        }
        Some(id)
    }

    fn resolve_currency(&mut self, name: &str) -> Option<CurrencyId> {
        Some(self.currencies.transact(normalise(name)?))
    }

    fn resolve_pair(
        &mut self,
        pair: &PairTuple,
        is_exchange: bool,
    ) -> Option<(ExchangeCurrencyPair, bool)> {
        let Some((exchange, first, second)) = pair.normalised() else {
            trace!("skipping malformed pair {pair:?}");
            return None;
        };
        let exchange_id = self.resolve_exchange(&exchange, is_exchange)?;
        let first_id = self.resolve_currency(&first)?;
        let second_id = self.resolve_currency(&second)?;

        let triple = (exchange_id, first_id, second_id);
        let created = self.pairs.key_of(&triple).is_none();
        let id = self.pairs.transact(triple);
        let pair = ExchangeCurrencyPair {
            id,
            exchange_id,
            exchange,
            first_id,
            first,
            second_id,
            second,
        };
        Some((pair, created))
    }

    fn pair(&self, id: PairId) -> Option<ExchangeCurrencyPair> {
        let (exchange_id, first_id, second_id) = *self.pairs.value_of(&id)?;
        Some(ExchangeCurrencyPair {
            id,
            exchange_id,
            exchange: self.exchanges.value_of(&exchange_id)?.clone(),
            first_id,
            first: self.currencies.value_of(&first_id)?.clone(),
            second_id,
            second: self.currencies.value_of(&second_id)?.clone(),
        })
    }

    fn pairs_of(&self, exchange: &str) -> Vec<ExchangeCurrencyPair> {
        let Some(exchange_id) = normalise(exchange).and_then(|name| self.exchanges.key_of(&name))
        else {
            return Vec::new();
        };
        let mut ids: Vec<PairId> = self
            .pairs
            .bimap
            .iter()
            .filter(|(_, (ex, _, _))| *ex == exchange_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.pair(id)).collect()
    }
}

/////////////////////////////////////////////////////////////////////////////////
// facts
/////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct Facts {
    tickers: BTreeMap<(PairId, DateTime<Utc>), TickerTuple>,
    historic_rates: BTreeMap<(PairId, DateTime<Utc>), HistoricRateTuple>,
    order_books: BTreeMap<(PairId, DateTime<Utc>, i32), OrderBookTuple>,
    trades: BTreeMap<(PairId, String), TradeTuple>,
    ohlcvm: BTreeMap<(PairId, DateTime<Utc>), OhlcvmTuple>,
}

impl Facts {
    fn append(&mut self, mut staged: Facts) {
        self.tickers.append(&mut staged.tickers);
        self.historic_rates.append(&mut staged.historic_rates);
        self.order_books.append(&mut staged.order_books);
        self.trades.append(&mut staged.trades);
        self.ohlcvm.append(&mut staged.ohlcvm);
    }
}

/// Stage `row` unless its natural key is already committed or staged.
fn insert_absent<K: Ord, V: Clone>(
    committed: &BTreeMap<K, V>,
    staged: &mut BTreeMap<K, V>,
    key: K,
    row: &V,
) -> bool {
    if committed.contains_key(&key) || staged.contains_key(&key) {
        return false;
    }
    staged.insert(key, row.clone());
    true
}

/////////////////////////////////////////////////////////////////////////////////
// batches
/////////////////////////////////////////////////////////////////////////////////

/// One all-or-nothing unit of work.
struct Batch<'a> {
    identities: Identities,
    committed: &'a Facts,
    staged: Facts,
}

impl Batch<'_> {
    /// Resolve each row's pair and hand the selected ones to `insert`, which reports whether a
    /// row was stored (`false` for an already present natural key).
    fn persist_named<T>(
        &mut self,
        selected: &HashSet<PairId>,
        rows: &[T],
        is_exchange: bool,
        pair_of: impl Fn(&T) -> PairTuple,
        mut insert: impl FnMut(&Facts, &mut Facts, PairId, &T) -> Result<bool, StoreError>,
    ) -> Result<Persisted, StoreError> {
        let mut persisted = Persisted::default();
        for row in rows {
            let Some((pair, _)) = self.identities.resolve_pair(&pair_of(row), is_exchange) else {
                persisted.skipped += 1;
                continue;
            };
            if !selected.contains(&pair.id) {
                trace!("{pair} was not requested, skipping");
                persisted.skipped += 1;
                continue;
            }
            if insert(self.committed, &mut self.staged, pair.id, row)? {
                persisted.inserted += 1;
            } else {
                persisted.skipped += 1;
            }
        }
        Ok(persisted)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Batch<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let mut batch = Batch {
            identities: tables.identities.clone(),
            committed: &tables.facts,
            staged: Facts::default(),
        };
        let out = f(&mut batch)?;
        let Batch {
            identities, staged, ..
        } = batch;
        tables.identities = identities;
        tables.facts.append(staged);
        Ok(out)
    }

    pub async fn exchange_count(&self) -> usize {
        self.tables.lock().await.identities.exchanges.len()
    }

    pub async fn currency_count(&self) -> usize {
        self.tables.lock().await.identities.currencies.len()
    }

    pub async fn pair_count(&self) -> usize {
        self.tables.lock().await.identities.pairs.len()
    }

    /// `None` for unknown exchanges.
    pub async fn is_exchange(&self, name: &str) -> Option<bool> {
        let tables = self.tables.lock().await;
        let id = tables.identities.exchanges.key_of(&normalise(name)?)?;
        Some(!tables.identities.platforms.contains(&id))
    }

    /// Stored tickers with their pair id, ordered by `(exchange_pair_id, start_time)`.
    pub async fn tickers(&self) -> Vec<(PairId, TickerTuple)> {
        let tables = self.tables.lock().await;
        tables
            .facts
            .tickers
            .iter()
            .map(|((id, _), ticker)| (*id, ticker.clone()))
            .collect()
    }

    pub async fn historic_rates(&self) -> Vec<HistoricRateTuple> {
        let tables = self.tables.lock().await;
        tables.facts.historic_rates.values().cloned().collect()
    }

    pub async fn order_books(&self) -> Vec<(PairId, OrderBookTuple)> {
        let tables = self.tables.lock().await;
        tables
            .facts
            .order_books
            .iter()
            .map(|((id, _, _), book)| (*id, book.clone()))
            .collect()
    }

    pub async fn trades(&self) -> Vec<(PairId, TradeTuple)> {
        let tables = self.tables.lock().await;
        tables
            .facts
            .trades
            .iter()
            .map(|((id, _), trade)| (*id, trade.clone()))
            .collect()
    }

    pub async fn ohlcvm(&self) -> Vec<(PairId, OhlcvmTuple)> {
        let tables = self.tables.lock().await;
        tables
            .facts
            .ohlcvm
            .iter()
            .map(|((id, _), candle)| (*id, candle.clone()))
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn resolve_currency(&self, name: &str) -> Result<Option<i32>, StoreError> {
        self.transaction(|batch| Ok(batch.identities.resolve_currency(name)))
            .await
    }

    async fn resolve_exchange(
        &self,
        name: &str,
        is_exchange: bool,
    ) -> Result<Option<i32>, StoreError> {
        self.transaction(|batch| Ok(batch.identities.resolve_exchange(name, is_exchange)))
            .await
    }

    async fn resolve_pair(
        &self,
        exchange: &str,
        first: &str,
        second: &str,
    ) -> Result<Option<ExchangeCurrencyPair>, StoreError> {
        let pair = PairTuple::new(exchange, first, second);
        self.transaction(|batch| {
            Ok(batch
                .identities
                .resolve_pair(&pair, true)
                .map(|(pair, _)| pair))
        })
        .await
    }

    async fn persist_pairs(
        &self,
        pairs: &[PairTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let persisted = self
            .transaction(|batch| {
                let mut persisted = Persisted::default();
                for pair in pairs {
                    match batch.identities.resolve_pair(pair, is_exchange) {
                        Some((_, true)) => persisted.inserted += 1,
                        Some((_, false)) | None => persisted.skipped += 1,
                    }
                }
                Ok(persisted)
            })
            .await?;
        debug!("{} currency pairs added", persisted.inserted);
        Ok(persisted)
    }

    async fn persist_tickers(
        &self,
        selected: &[ExchangeCurrencyPair],
        tickers: &[TickerTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let selected = selected_ids(selected);
        self.transaction(|batch| {
            batch.persist_named(
                &selected,
                tickers,
                is_exchange,
                TickerTuple::pair,
                |committed, staged, id, ticker| {
                    let key = (id, ticker.start_time);
                    if !insert_absent(&committed.tickers, &mut staged.tickers, key, ticker) {
                        return Err(StoreError::Conflict(format!(
                            "ticker for pair {id} at {} already stored",
                            ticker.start_time
                        )));
                    }
                    Ok(true)
                },
            )
        })
        .await
    }

    async fn persist_historic_rates(
        &self,
        rates: &[HistoricRateTuple],
    ) -> Result<Persisted, StoreError> {
        let mut persisted = Persisted::default();
        for rate in rates {
            // one commit per candle
            let mut tables = self.tables.lock().await;
            let key = (rate.exchange_pair_id, rate.timestamp);
            if tables.facts.historic_rates.contains_key(&key) {
                persisted.skipped += 1;
            } else if tables
                .identities
                .pairs
                .value_of(&rate.exchange_pair_id)
                .is_none()
            {
                trace!("no pair {} for historic rate", rate.exchange_pair_id);
                persisted.skipped += 1;
            } else {
                tables.facts.historic_rates.insert(key, rate.clone());
                persisted.inserted += 1;
            }
        }
        debug!("{} historic rates added", persisted.inserted);
        Ok(persisted)
    }

    async fn persist_order_books(
        &self,
        selected: &[ExchangeCurrencyPair],
        books: &[OrderBookTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let selected = selected_ids(selected);
        self.transaction(|batch| {
            batch.persist_named(
                &selected,
                books,
                is_exchange,
                OrderBookTuple::pair,
                |committed, staged, id, book| {
                    let key = (id, book.timestamp, book.position);
                    Ok(insert_absent(&committed.order_books, &mut staged.order_books, key, book))
                },
            )
        })
        .await
    }

    async fn persist_trades(
        &self,
        selected: &[ExchangeCurrencyPair],
        trades: &[TradeTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let selected = selected_ids(selected);
        self.transaction(|batch| {
            batch.persist_named(
                &selected,
                trades,
                is_exchange,
                TradeTuple::pair,
                |committed, staged, id, trade| {
                    let key = (id, trade.trade_id.clone());
                    Ok(insert_absent(&committed.trades, &mut staged.trades, key, trade))
                },
            )
        })
        .await
    }

    async fn persist_ohlcvm(
        &self,
        selected: &[ExchangeCurrencyPair],
        candles: &[OhlcvmTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        let selected = selected_ids(selected);
        self.transaction(|batch| {
            batch.persist_named(
                &selected,
                candles,
                is_exchange,
                OhlcvmTuple::pair,
                |committed, staged, id, candle| {
                    let key = (id, candle.timestamp);
                    Ok(insert_absent(&committed.ohlcvm, &mut staged.ohlcvm, key, candle))
                },
            )
        })
        .await
    }

    async fn get_all_currency_pairs(
        &self,
        exchange: &str,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        Ok(self.tables.lock().await.identities.pairs_of(exchange))
    }

    async fn get_currency_pairs_for_exchange(
        &self,
        exchange: &str,
        selection: &PairSelection,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        let pairs = self.tables.lock().await.identities.pairs_of(exchange);
        Ok(pairs
            .into_iter()
            .filter(|pair| selection.matches(pair))
            .collect())
    }

    async fn get_readable_tickers(
        &self,
        exchanges: &[String],
        selection: &PairSelection,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReadableTicker>, StoreError> {
        let exchanges: HashSet<String> =
            exchanges.iter().filter_map(|name| normalise(name)).collect();
        let in_window = |time: &DateTime<Utc>| {
            from.map_or(true, |from| *time >= from) && to.map_or(true, |to| *time <= to)
        };

        let tables = self.tables.lock().await;
        let mut cache: BTreeMap<PairId, Option<ExchangeCurrencyPair>> = BTreeMap::new();
        let mut readable = Vec::new();
        for ((id, start_time), ticker) in &tables.facts.tickers {
            if !in_window(start_time) {
                continue;
            }
            let pair = cache.entry(*id).or_insert_with(|| {
                tables
                    .identities
                    .pair(*id)
                    .filter(|pair| exchanges.is_empty() || exchanges.contains(&pair.exchange))
                    .filter(|pair| selection.matches(pair))
            });
            let Some(pair) = pair else {
                continue;
            };
            readable.push(ReadableTicker {
                exchange: pair.exchange.clone(),
                first: pair.first.clone(),
                second: pair.second.clone(),
                start_time: ticker.start_time,
                response_time: ticker.response_time,
                last_price: ticker.last_price,
                last_trade: ticker.last_trade,
                best_ask: ticker.best_ask,
                best_bid: ticker.best_bid,
                daily_volume: ticker.daily_volume,
            });
        }
        Ok(readable)
    }
}
