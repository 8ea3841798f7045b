use crate::http::HttpClient;
use crate::model::{ExchangeCurrencyPair, PairTuple, Records, RequestKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// [Binance API](https://developers.binance.com/docs/binance-spot-api-docs/rest-api/public-api-endpoints)
pub mod binance;

/// [Kraken API](https://docs.kraken.com/api/docs/rest-api/get-ohlc-data)
pub mod kraken;

/// Everything that can go wrong while talking to an exchange.
///
/// None of these abort a round: the exchange is skipped and asked again next round.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{exchange} does not support `{kind}` requests")]
    Unsupported { exchange: String, kind: RequestKind },

    #[error("malformed response from {exchange}: {reason}")]
    Malformed { exchange: String, reason: String },
}

/// One raw JSON body; `pair` is set for per-pair endpoints.
#[derive(Debug, Clone)]
pub struct ResponsePart {
    pub pair: Option<ExchangeCurrencyPair>,
    pub body: serde_json::Value,
}

/// The raw result of one [`Exchange::request`] call.
#[derive(Debug, Clone)]
pub struct Response {
    /// Name of the exchange that answered; matched case-insensitively by the scheduler.
    pub exchange: String,
    pub response_time: DateTime<Utc>,
    /// The pairs the request was issued for.
    pub pairs: Vec<ExchangeCurrencyPair>,
    pub parts: Vec<ResponsePart>,
}

impl Response {
    pub fn new(exchange: impl Into<String>, pairs: &[ExchangeCurrencyPair]) -> Self {
        Self {
            exchange: exchange.into(),
            response_time: Utc::now(),
            pairs: pairs.to_vec(),
            parts: Vec::new(),
        }
    }

    pub fn with_part(mut self, pair: Option<ExchangeCurrencyPair>, body: serde_json::Value) -> Self {
        self.parts.push(ResponsePart { pair, body });
        self
    }
}

/// Result of formatting a response: normalised fact rows, plus any pairs the response revealed.
pub type Formatted = (Records, Vec<PairTuple>);

/// The contract the scheduler needs from an exchange (or data platform).
///
/// Requests only gather data; nothing here touches the database.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// The exchange name, as stored (upper-cased) in `crypto.exchanges`.
    fn name(&self) -> &str;

    /// `false` for data platforms aggregating several exchanges.
    fn is_exchange(&self) -> bool {
        true
    }

    /// The exchange's current pair list.
    async fn request_currency_pairs(&self) -> Result<Vec<PairTuple>, ExchangeError>;

    /// Request `kind` data for `pairs`; `Ok(None)` means there is nothing to report this round.
    async fn request(
        &self,
        kind: RequestKind,
        pairs: &[ExchangeCurrencyPair],
    ) -> Result<Option<Response>, ExchangeError>;

    /// Turn a raw response into fact rows, stamped with the round's `start_time`.
    fn format_data(
        &self,
        kind: RequestKind,
        response: &Response,
        start_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Result<Formatted, ExchangeError>;
}

/// The exchanges this build knows how to talk to, by (case-insensitive) name.
pub fn registry(name: &str) -> Option<Arc<dyn Exchange>> {
    match name.trim().to_uppercase().as_str() {
        binance::NAME => Some(Arc::new(binance::Binance::new())),
        kraken::NAME => Some(Arc::new(kraken::Kraken::new())),
        _ => None,
    }
}

/// Shared by the reference adapters: exchanges serialise most numbers as strings.
pub(crate) fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// no API keys: only public market data endpoints are used
pub(crate) fn build_client() -> HttpClient {
    reqwest::ClientBuilder::new()
        .user_agent(concat!("ccdump/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            warn!("failed to build a custom http client, falling back to defaults, error({err})");
            HttpClient::new()
        })
}
