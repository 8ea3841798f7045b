use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate keys, as issued by the `SERIAL` columns in `crypto.*`.
pub type ExchangeId = i32;
pub type CurrencyId = i32;
pub type PairId = i32;

/////////////////////////////////////////////////////////////////////////////////
// request kinds
/////////////////////////////////////////////////////////////////////////////////

/// Every kind of request a job can ask an exchange for.
///
/// The set is closed: a job naming anything else is rejected while the configuration is
/// loaded, never at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    CurrencyPairs,
    Ticker,
    HistoricRates,
    OrderBooks,
    Trades,
    Ohlcvm,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::CurrencyPairs => "currency_pairs",
            RequestKind::Ticker => "ticker",
            RequestKind::HistoricRates => "historic_rates",
            RequestKind::OrderBooks => "order_books",
            RequestKind::Trades => "trades",
            RequestKind::Ohlcvm => "ohlcvm",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "currency_pairs" => Ok(RequestKind::CurrencyPairs),
            "ticker" => Ok(RequestKind::Ticker),
            "historic_rates" => Ok(RequestKind::HistoricRates),
            "order_books" => Ok(RequestKind::OrderBooks),
            "trades" => Ok(RequestKind::Trades),
            "ohlcvm" => Ok(RequestKind::Ohlcvm),
            other => Err(other.to_string()),
        }
    }
}

/////////////////////////////////////////////////////////////////////////////////
// identities
/////////////////////////////////////////////////////////////////////////////////

/// Normalise an exchange or currency name: trimmed and upper-cased.
///
/// Empty names carry no identity and yield `None`.
pub fn normalise(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_uppercase())
    }
}

/// A tradeable pair on one exchange, as stored in `crypto.exchange_currency_pairs`,
/// together with the names it resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExchangeCurrencyPair {
    pub id: PairId,
    pub exchange_id: ExchangeId,
    pub exchange: String,
    pub first_id: CurrencyId,
    pub first: String,
    pub second_id: CurrencyId,
    pub second: String,
}

impl fmt::Display for ExchangeCurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.exchange, self.first, self.second)
    }
}

/// A pair by name: `(exchange, first, second)`.
///
/// Produced by exchanges when listing their pairs, or as "mappings" of newly seen pairs when
/// formatting a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairTuple {
    pub exchange: String,
    pub first: String,
    pub second: String,
}

impl PairTuple {
    pub fn new(exchange: impl Into<String>, first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            first: first.into(),
            second: second.into(),
        }
    }

    /// The normalised `(exchange, first, second)` names, or `None` when any part is missing or
    /// the pair trades a currency against itself.
    pub fn normalised(&self) -> Option<(String, String, String)> {
        let exchange = normalise(&self.exchange)?;
        let first = normalise(&self.first)?;
        let second = normalise(&self.second)?;
        if first == second {
            return None;
        }
        Some((exchange, first, second))
    }
}

/// An exact `first/second` pair requested by a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPairName {
    pub first: String,
    pub second: String,
}

impl CurrencyPairName {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Which pairs of an exchange a job is interested in.
///
/// The three selectors are OR-ed together. A selection without any criteria selects every pair
/// of the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairSelection {
    #[serde(default)]
    pub currency_pairs: Vec<CurrencyPairName>,
    #[serde(default)]
    pub first_currencies: Vec<String>,
    #[serde(default)]
    pub second_currencies: Vec<String>,
}

impl PairSelection {
    pub fn is_empty(&self) -> bool {
        self.currency_pairs.is_empty()
            && self.first_currencies.is_empty()
            && self.second_currencies.is_empty()
    }

    /// Whether `pair` is selected; names are compared case-insensitively.
    pub fn matches(&self, pair: &ExchangeCurrencyPair) -> bool {
        if self.is_empty() {
            return true;
        }
        let upper = |name: &String| normalise(name);
        self.currency_pairs.iter().any(|cp| {
            upper(&cp.first).as_deref() == Some(pair.first.as_str())
                && upper(&cp.second).as_deref() == Some(pair.second.as_str())
        }) || self
            .first_currencies
            .iter()
            .any(|c| upper(c).as_deref() == Some(pair.first.as_str()))
            || self
                .second_currencies
                .iter()
                .any(|c| upper(c).as_deref() == Some(pair.second.as_str()))
    }

    /// Upper-cased `(firsts, seconds)` of the exact pairs, column-wise, for `unnest`.
    pub(crate) fn pair_columns(&self) -> (Vec<String>, Vec<String>) {
        self.currency_pairs
            .iter()
            .filter_map(|cp| Some((normalise(&cp.first)?, normalise(&cp.second)?)))
            .unzip()
    }

    pub(crate) fn firsts(&self) -> Vec<String> {
        self.first_currencies.iter().filter_map(|c| normalise(c)).collect()
    }

    pub(crate) fn seconds(&self) -> Vec<String> {
        self.second_currencies.iter().filter_map(|c| normalise(c)).collect()
    }
}

/////////////////////////////////////////////////////////////////////////////////
// facts
/////////////////////////////////////////////////////////////////////////////////

/// A price/volume snapshot of one pair, as formatted by an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerTuple {
    pub exchange: String,
    pub start_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub first: String,
    pub second: String,
    pub last_price: f64,
    pub last_trade: f64,
    pub best_ask: f64,
    pub best_bid: f64,
    pub daily_volume: f64,
}

impl TickerTuple {
    pub fn pair(&self) -> PairTuple {
        PairTuple::new(&self.exchange, &self.first, &self.second)
    }
}

/// A stored ticker read back with its exchange and currency names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadableTicker {
    pub exchange: String,
    pub first: String,
    pub second: String,
    pub start_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
    pub last_price: f64,
    pub last_trade: f64,
    pub best_ask: f64,
    pub best_bid: f64,
    pub daily_volume: f64,
}

/// One OHLCV candle of an already identified pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricRateTuple {
    pub exchange_pair_id: PairId,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One level of an order book.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookTuple {
    pub exchange: String,
    pub first: String,
    pub second: String,
    pub timestamp: DateTime<Utc>,
    pub position: i32,
    pub bids_price: f64,
    pub bids_amount: f64,
    pub asks_price: f64,
    pub asks_amount: f64,
}

impl OrderBookTuple {
    pub fn pair(&self) -> PairTuple {
        PairTuple::new(&self.exchange, &self.first, &self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Buy => "buy",
            TradeDirection::Sell => "sell",
        }
    }
}

/// One public trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTuple {
    pub exchange: String,
    pub first: String,
    pub second: String,
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: TradeDirection,
    pub price: f64,
    pub amount: f64,
}

impl TradeTuple {
    pub fn pair(&self) -> PairTuple {
        PairTuple::new(&self.exchange, &self.first, &self.second)
    }
}

/// A candle with market capitalisation, as served by aggregator platforms.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvmTuple {
    pub exchange: String,
    pub first: String,
    pub second: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub market_cap: f64,
}

impl OhlcvmTuple {
    pub fn pair(&self) -> PairTuple {
        PairTuple::new(&self.exchange, &self.first, &self.second)
    }
}

/// Normalised fact rows produced by formatting one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Records {
    Tickers(Vec<TickerTuple>),
    HistoricRates(Vec<HistoricRateTuple>),
    OrderBooks(Vec<OrderBookTuple>),
    Trades(Vec<TradeTuple>),
    Ohlcvm(Vec<OhlcvmTuple>),
}

impl Records {
    pub fn len(&self) -> usize {
        match self {
            Records::Tickers(rows) => rows.len(),
            Records::HistoricRates(rows) => rows.len(),
            Records::OrderBooks(rows) => rows.len(),
            Records::Trades(rows) => rows.len(),
            Records::Ohlcvm(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
