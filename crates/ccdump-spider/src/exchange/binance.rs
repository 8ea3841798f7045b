use super::{build_client, parse_f64, Exchange, ExchangeError, Formatted, Response};
use crate::http::*;
use crate::model::{
    ExchangeCurrencyPair, HistoricRateTuple, PairTuple, Records, RequestKind, TickerTuple,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, trace};

pub(crate) const NAME: &str = "BINANCE";

// RATE_LIMIT = 1200 /60s
//
// pairs = `https://api.binance.com/api/v3/exchangeInfo`
//
// tickers = `https://api.binance.com/api/v3/ticker/24hr`, all symbols at once
//
// klines = `https://api.binance.com/api/v3/klines`, per symbol

const EXCHANGE_INFO: &str = "https://api.binance.com/api/v3/exchangeInfo";
const TICKERS: &str = "https://api.binance.com/api/v3/ticker/24hr";
const KLINES: &str = "https://api.binance.com/api/v3/klines";

// concurrent kline requests per round
const CONCURRENCY: usize = 12;

/////////////////////////////////////////////////////////////////////////////////
// core
/////////////////////////////////////////////////////////////////////////////////

pub struct Binance {
    http_client: HttpClient,
}

impl Binance {
    pub fn new() -> Self {
        Self {
            http_client: build_client(),
        }
    }

    async fn get(&self, url: &str) -> Result<Value, ExchangeError> {
        let body = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|err| {
                error!("failed to fetch {url} from {NAME}, error({err})");
                err
            })?
            .error_for_status()?
            .json()
            .await?;
        Ok(body)
    }

    async fn request_klines(&self, pairs: &[ExchangeCurrencyPair]) -> Response {
        let response = Response::new(NAME, pairs);
        let parts: Vec<(ExchangeCurrencyPair, Value)> = stream::iter(pairs.iter().cloned())
            .map(|pair| async move {
                let symbol = symbol(&pair.first, &pair.second);
                trace!("fetching klines for {symbol}");
                let url = format!("{KLINES}?symbol={symbol}&interval=1d&limit=1000");
                match self.get(&url).await {
                    Ok(body) => Some((pair.clone(), body)),
                    Err(err) => {
                        error!("failed to fetch {NAME} klines for {symbol}, error({err})");
                        None
                    }
                }
            })
            .buffer_unordered(CONCURRENCY)
            .filter_map(|part| async move { part })
            .collect()
            .await;

        parts
            .into_iter()
            .fold(response, |response, (pair, body)| response.with_part(Some(pair), body))
    }
}

impl Default for Binance {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for Binance {
    fn name(&self) -> &str {
        NAME
    }

    async fn request_currency_pairs(&self) -> Result<Vec<PairTuple>, ExchangeError> {
        let info: ExchangeInfo = serde_json::from_value(self.get(EXCHANGE_INFO).await?)?;
        let pairs: Vec<PairTuple> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| PairTuple::new(NAME, s.base_asset, s.quote_asset))
            .collect();
        debug!("{} currency pairs listed by {NAME}", pairs.len());
        Ok(pairs)
    }

    async fn request(
        &self,
        kind: RequestKind,
        pairs: &[ExchangeCurrencyPair],
    ) -> Result<Option<Response>, ExchangeError> {
        if pairs.is_empty() {
            return Ok(None);
        }
        match kind {
            RequestKind::Ticker => {
                let body = self.get(TICKERS).await?;
                Ok(Some(Response::new(NAME, pairs).with_part(None, body)))
            }
            RequestKind::HistoricRates => {
                let response = self.request_klines(pairs).await;
                if response.parts.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(response))
                }
            }
            kind => Err(ExchangeError::Unsupported {
                exchange: NAME.to_string(),
                kind,
            }),
        }
    }

    fn format_data(
        &self,
        kind: RequestKind,
        response: &Response,
        start_time: DateTime<Utc>,
        response_time: DateTime<Utc>,
    ) -> Result<Formatted, ExchangeError> {
        match kind {
            RequestKind::Ticker => {
                let tickers = format_tickers(response, start_time, response_time)?;
                Ok((Records::Tickers(tickers), Vec::new()))
            }
            RequestKind::HistoricRates => {
                let rates = format_klines(response)?;
                Ok((Records::HistoricRates(rates), Vec::new()))
            }
            kind => Err(ExchangeError::Unsupported {
                exchange: NAME.to_string(),
                kind,
            }),
        }
    }
}

fn symbol(first: &str, second: &str) -> String {
    format!("{first}{second}")
}

/////////////////////////////////////////////////////////////////////////////////
// endpoints
/////////////////////////////////////////////////////////////////////////////////
//
// pairs
// ----------------------------------------------------------------
// {
//      "timezone": "UTC",
//      "symbols": [
//          {
//              "symbol": "ETHBTC",
//              "status": "TRADING",
//              "baseAsset": "ETH",
//              "quoteAsset": "BTC",
//              ...
//          },
//          ...
//      ]
// }
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    status: String,
    base_asset: String,
    quote_asset: String,
}

// tickers
// ----------------------------------------------------------------
// [
//  {
//      "symbol": "BNBBTC",
//      "lastPrice": "4.00000200",
//      "lastQty": "200.00000000",
//      "bidPrice": "4.00000000",
//      "askPrice": "4.00000200",
//      "volume": "8913.30000000",
//      ...
//  },
//  ...
// ]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker {
    symbol: String,
    last_price: Value,
    last_qty: Value,
    bid_price: Value,
    ask_price: Value,
    volume: Value,
}

fn format_tickers(
    response: &Response,
    start_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
) -> Result<Vec<TickerTuple>, ExchangeError> {
    // only the requested pairs can be split back into base & quote
    let requested: HashMap<String, &ExchangeCurrencyPair> = response
        .pairs
        .iter()
        .map(|pair| (symbol(&pair.first, &pair.second), pair))
        .collect();

    let mut tuples = Vec::new();
    for part in &response.parts {
        let tickers: Vec<Ticker> = serde_json::from_value(part.body.clone())?;
        for ticker in tickers {
            let Some(pair) = requested.get(&ticker.symbol) else {
                continue;
            };
            let (Some(last_price), Some(last_trade), Some(best_ask), Some(best_bid), Some(volume)) = (
                parse_f64(&ticker.last_price),
                parse_f64(&ticker.last_qty),
                parse_f64(&ticker.ask_price),
                parse_f64(&ticker.bid_price),
                parse_f64(&ticker.volume),
            ) else {
                trace!("skipping malformed {NAME} ticker for {}", ticker.symbol);
                continue;
            };
            tuples.push(TickerTuple {
                exchange: NAME.to_string(),
                start_time,
                response_time,
                first: pair.first.clone(),
                second: pair.second.clone(),
                last_price,
                last_trade,
                best_ask,
                best_bid,
                daily_volume: volume,
            });
        }
    }
    Ok(tuples)
}

// prices
// ----------------------------------------------------------------
//
// [
//   [
//     1499040000000,      // Kline open time
//     "0.01634790",       // Open price
//     "0.80000000",       // High price
//     "0.01575800",       // Low price
//     "0.01577100",       // Close price
//     "148976.11427815",  // Volume
//     1499644799999,      // Kline Close time
//     ...
//   ],
//   ...
// ]
#[derive(Debug, PartialEq)]
struct Kline {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Kline {
    fn from_row(row: &[Value]) -> Option<Self> {
        Some(Kline {
            timestamp: DateTime::from_timestamp_millis(row.first()?.as_i64()?)?,
            open: parse_f64(row.get(1)?)?,
            high: parse_f64(row.get(2)?)?,
            low: parse_f64(row.get(3)?)?,
            close: parse_f64(row.get(4)?)?,
            volume: parse_f64(row.get(5)?)?,
        })
    }
}

fn format_klines(response: &Response) -> Result<Vec<HistoricRateTuple>, ExchangeError> {
    let mut tuples = Vec::new();
    for part in &response.parts {
        let Some(pair) = &part.pair else {
            return Err(ExchangeError::Malformed {
                exchange: NAME.to_string(),
                reason: "klines without a pair".to_string(),
            });
        };
        let rows: Vec<Vec<Value>> = serde_json::from_value(part.body.clone())?;
        tuples.extend(rows.iter().filter_map(|row| Kline::from_row(row)).map(|k| {
            HistoricRateTuple {
                exchange_pair_id: pair.id,
                timestamp: k.timestamp,
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
            }
        }));
    }
    Ok(tuples)
}
