#![allow(dead_code)]

use async_trait::async_trait;
use ccdump_spider::exchange::{Exchange, ExchangeError, Formatted, Response};
use ccdump_spider::job::{Job, JobExchange};
use ccdump_spider::model::{
    ExchangeCurrencyPair, HistoricRateTuple, OhlcvmTuple, OrderBookTuple, PairSelection,
    PairTuple, ReadableTicker, Records, RequestKind, TickerTuple, TradeTuple,
};
use ccdump_spider::store::{MemoryStore, Persisted, Store, StoreError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a [`MockExchange`] answers data requests.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// One ticker per requested pair, priced at `100.0 * pair id`.
    Answer,
    Fail,
    Nothing,
    /// Answers, but under another exchange's name.
    Impostor(String),
}

pub struct MockExchange {
    name: String,
    pairs: Vec<(String, String)>,
    behaviour: Behaviour,
    /// Reported as a newly seen pair with every answer.
    mapping: Option<(String, String)>,
    /// Time every request takes.
    delay: Option<Duration>,
    pair_requests: AtomicUsize,
}

impl MockExchange {
    pub fn new(name: &str, pairs: &[(&str, &str)], behaviour: Behaviour) -> Self {
        Self {
            name: name.to_string(),
            pairs: pairs
                .iter()
                .map(|(first, second)| (first.to_string(), second.to_string()))
                .collect(),
            behaviour,
            mapping: None,
            delay: None,
            pair_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_mapping(mut self, first: &str, second: &str) -> Self {
        self.mapping = Some((first.to_string(), second.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn pair_requests(&self) -> usize {
        self.pair_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for MockExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_currency_pairs(&self) -> Result<Vec<PairTuple>, ExchangeError> {
        self.pair_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .pairs
            .iter()
            .map(|(first, second)| PairTuple::new(&self.name, first, second))
            .collect())
    }

    async fn request(
        &self,
        _kind: RequestKind,
        pairs: &[ExchangeCurrencyPair],
    ) -> Result<Option<Response>, ExchangeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer_as = match &self.behaviour {
            Behaviour::Answer => self.name.clone(),
            Behaviour::Impostor(name) => name.clone(),
            Behaviour::Nothing => return Ok(None),
            Behaviour::Fail => {
                return Err(ExchangeError::Malformed {
                    exchange: self.name.clone(),
                    reason: "service unavailable".to_string(),
                })
            }
        };

        let response = pairs.iter().fold(Response::new(answer_as, pairs), |response, pair| {
            let body = serde_json::json!({ "price": 100.0 * pair.id as f64, "volume": 5000.0 });
            response.with_part(Some(pair.clone()), body)
        });
        Ok(Some(response))
    }

    fn format_data(
        &self,
        kind: RequestKind,
        response: &Response,
        start_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Result<Formatted, ExchangeError> {
        if kind != RequestKind::Ticker {
            return Err(ExchangeError::Unsupported {
                exchange: self.name.clone(),
                kind,
            });
        }

        let mut tickers: Vec<TickerTuple> = response
            .parts
            .iter()
            .filter_map(|part| {
                let pair = part.pair.as_ref()?;
                Some(ticker(
                    &self.name,
                    &pair.first,
                    &pair.second,
                    start_time,
                    response_time,
                    part.body["price"].as_f64()?,
                ))
            })
            .collect();

        let mut mappings = Vec::new();
        if let Some((first, second)) = &self.mapping {
            mappings.push(PairTuple::new(&self.name, first, second));
            tickers.push(ticker(&self.name, first, second, start_time, response_time, 1.0));
        }

        Ok((Records::Tickers(tickers), mappings))
    }
}

pub fn ticker(
    exchange: &str,
    first: &str,
    second: &str,
    start_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
    last_price: f64,
) -> TickerTuple {
    TickerTuple {
        exchange: exchange.to_string(),
        start_time,
        response_time,
        first: first.to_string(),
        second: second.to_string(),
        last_price,
        last_trade: last_price,
        best_ask: last_price + 0.5,
        best_bid: last_price - 0.5,
        daily_volume: 5000.0,
    }
}

pub fn job(
    name: &str,
    request: RequestKind,
    exchanges: &[Arc<MockExchange>],
    selection: PairSelection,
) -> Job {
    Job {
        name: name.to_string(),
        request,
        exchanges: exchanges
            .iter()
            .map(|exchange| JobExchange {
                exchange: exchange.clone(),
                selection: selection.clone(),
                update_cp: false,
            })
            .collect(),
    }
}

/// [`MemoryStore`] whose pair listing fails a given number of times before it recovers.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn failing(times: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(times),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn resolve_currency(&self, name: &str) -> Result<Option<i32>, StoreError> {
        self.inner.resolve_currency(name).await
    }

    async fn resolve_exchange(
        &self,
        name: &str,
        is_exchange: bool,
    ) -> Result<Option<i32>, StoreError> {
        self.inner.resolve_exchange(name, is_exchange).await
    }

    async fn resolve_pair(
        &self,
        exchange: &str,
        first: &str,
        second: &str,
    ) -> Result<Option<ExchangeCurrencyPair>, StoreError> {
        self.inner.resolve_pair(exchange, first, second).await
    }

    async fn persist_pairs(
        &self,
        pairs: &[PairTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_pairs(pairs, is_exchange).await
    }

    async fn persist_tickers(
        &self,
        selected: &[ExchangeCurrencyPair],
        tickers: &[TickerTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_tickers(selected, tickers, is_exchange).await
    }

    async fn persist_historic_rates(
        &self,
        rates: &[HistoricRateTuple],
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_historic_rates(rates).await
    }

    async fn persist_order_books(
        &self,
        selected: &[ExchangeCurrencyPair],
        books: &[OrderBookTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_order_books(selected, books, is_exchange).await
    }

    async fn persist_trades(
        &self,
        selected: &[ExchangeCurrencyPair],
        trades: &[TradeTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_trades(selected, trades, is_exchange).await
    }

    async fn persist_ohlcvm(
        &self,
        selected: &[ExchangeCurrencyPair],
        candles: &[OhlcvmTuple],
        is_exchange: bool,
    ) -> Result<Persisted, StoreError> {
        self.inner.persist_ohlcvm(selected, candles, is_exchange).await
    }

    async fn get_all_currency_pairs(
        &self,
        exchange: &str,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Conflict("connection reset".to_string()));
        }
        self.inner.get_all_currency_pairs(exchange).await
    }

    async fn get_currency_pairs_for_exchange(
        &self,
        exchange: &str,
        selection: &PairSelection,
    ) -> Result<Vec<ExchangeCurrencyPair>, StoreError> {
        self.inner
            .get_currency_pairs_for_exchange(exchange, selection)
            .await
    }

    async fn get_readable_tickers(
        &self,
        exchanges: &[String],
        selection: &PairSelection,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ReadableTicker>, StoreError> {
        self.inner
            .get_readable_tickers(exchanges, selection, from, to)
            .await
    }
}
