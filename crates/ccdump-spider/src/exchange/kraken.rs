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

pub(crate) const NAME: &str = "KRAKEN";

// RATE_LIMIT = 1 /1s (public endpoints, decaying counter)
//
// pairs = `https://api.kraken.com/0/public/AssetPairs`
//
// tickers = `https://api.kraken.com/0/public/Ticker?pair=XBTUSD,ETHXBT`
//
// NOTE: Kraken answers with its own pair keys, e.g. XXBTZUSD, so the ticker request also pulls
// AssetPairs to translate them back
//
// klines = `https://api.kraken.com/0/public/OHLC?interval=1440&pair=XBTUSD`, per pair

const ASSET_PAIRS: &str = "https://api.kraken.com/0/public/AssetPairs";
const TICKER: &str = "https://api.kraken.com/0/public/Ticker";
const OHLC: &str = "https://api.kraken.com/0/public/OHLC";

const CONCURRENCY: usize = 4;

/////////////////////////////////////////////////////////////////////////////////
// core
/////////////////////////////////////////////////////////////////////////////////

pub struct Kraken {
    http_client: HttpClient,
}

impl Kraken {
    pub fn new() -> Self {
        Self {
            http_client: build_client(),
        }
    }

    // every Kraken payload is wrapped as `{"error": [..], "result": ..}`
    async fn get(&self, url: &str) -> Result<Value, ExchangeError> {
        let envelope: Envelope = self
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
        envelope.into_result()
    }

    async fn request_ohlc(&self, pairs: &[ExchangeCurrencyPair]) -> Response {
        let response = Response::new(NAME, pairs);
        let parts: Vec<(ExchangeCurrencyPair, Value)> = stream::iter(pairs.iter().cloned())
            .map(|pair| async move {
                let altname = altname(&pair);
                trace!("fetching OHLC for {altname}");
                // NOTE: intervals are in minutes; 1, 5, 15, 30, 60, 240, 1440, 10080, 21600
                let url = format!("{OHLC}?interval=1440&pair={altname}");
                match self.get(&url).await {
                    Ok(body) => Some((pair.clone(), body)),
                    Err(err) => {
                        error!("failed to fetch {NAME} OHLC for {altname}, error({err})");
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

impl Default for Kraken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exchange for Kraken {
    fn name(&self) -> &str {
        NAME
    }

    async fn request_currency_pairs(&self) -> Result<Vec<PairTuple>, ExchangeError> {
        let pairs: Vec<PairTuple> = asset_pairs(&self.get(ASSET_PAIRS).await?)?
            .into_values()
            .map(|(first, second)| PairTuple::new(NAME, first, second))
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
                let names: Vec<String> = pairs.iter().map(altname).collect();
                let url = format!("{TICKER}?pair={}", names.join(","));
                let lookup = self.get(ASSET_PAIRS).await?;
                let tickers = self.get(&url).await?;
                Ok(Some(
                    Response::new(NAME, pairs)
                        .with_part(None, lookup)
                        .with_part(None, tickers),
                ))
            }
            RequestKind::HistoricRates => {
                let response = self.request_ohlc(pairs).await;
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
            RequestKind::Ticker => format_tickers(response, start_time, response_time),
            RequestKind::HistoricRates => {
                let rates = format_ohlc(response)?;
                Ok((Records::HistoricRates(rates), Vec::new()))
            }
            kind => Err(ExchangeError::Unsupported {
                exchange: NAME.to_string(),
                kind,
            }),
        }
    }
}

fn altname(pair: &ExchangeCurrencyPair) -> String {
    format!("{}{}", pair.first, pair.second)
}

fn malformed(reason: impl Into<String>) -> ExchangeError {
    ExchangeError::Malformed {
        exchange: NAME.to_string(),
        reason: reason.into(),
    }
}

/////////////////////////////////////////////////////////////////////////////////
// endpoints
/////////////////////////////////////////////////////////////////////////////////
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Vec<String>,
    result: Option<Value>,
}

impl Envelope {
    fn into_result(self) -> Result<Value, ExchangeError> {
        if !self.error.is_empty() {
            return Err(malformed(self.error.join(", ")));
        }
        self.result.ok_or_else(|| malformed("missing result"))
    }
}

// pairs
// ----------------------------------------------------------------
//
//  {
//      "XETHXXBT": {
//          "altname": "ETHXBT",
//          "wsname": "ETH/XBT",
//          "aclass_base": "currency",
//          ...
//      },
//      ...
//  }
#[derive(Debug, Deserialize)]
struct Pair {
    wsname: Option<String>,
}

/// Kraken pair key -> (base, quote), split from the `wsname`.
fn asset_pairs(result: &Value) -> Result<HashMap<String, (String, String)>, ExchangeError> {
    let pairs: HashMap<String, Pair> = serde_json::from_value(result.clone())?;
    Ok(pairs
        .into_iter()
        .filter_map(|(key, pair)| {
            let wsname = pair.wsname?;
            let (first, second) = wsname.split_once('/')?;
            Some((key, (first.to_string(), second.to_string())))
        })
        .collect())
}

// tickers
// ----------------------------------------------------------------
//
//  {
//      "XXBTZUSD": {
//          "a": ["30300.10000", "1", "1.000"],     // ask [price, whole lot volume, lot volume]
//          "b": ["30300.00000", "1", "1.000"],     // bid
//          "c": ["30303.20000", "0.00067643"],     // last trade closed [price, lot volume]
//          "v": ["4083.67001100", "4412.73601799"],// volume [today, last 24 hours]
//          ...
//      }
//  }
#[derive(Debug, Deserialize)]
struct Ticker {
    a: Vec<Value>,
    b: Vec<Value>,
    c: Vec<Value>,
    v: Vec<Value>,
}

fn format_tickers(
    response: &Response,
    start_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
) -> Result<Formatted, ExchangeError> {
    let [lookup, tickers] = response.parts.as_slice() else {
        return Err(malformed("expected asset pairs and tickers"));
    };
    let lookup = asset_pairs(&lookup.body)?;
    let tickers: HashMap<String, Ticker> = serde_json::from_value(tickers.body.clone())?;

    let mut tuples = Vec::new();
    for (key, ticker) in tickers {
        let Some((first, second)) = lookup.get(&key) else {
            trace!("no asset pair found for {NAME} ticker {key}");
            continue;
        };
        let field = |values: &Vec<Value>, idx: usize| values.get(idx).and_then(parse_f64);
        let (Some(last_price), Some(last_trade), Some(best_ask), Some(best_bid), Some(volume)) = (
            field(&ticker.c, 0),
            field(&ticker.c, 1),
            field(&ticker.a, 0),
            field(&ticker.b, 0),
            field(&ticker.v, 1),
        ) else {
            trace!("skipping malformed {NAME} ticker for {key}");
            continue;
        };
        tuples.push(TickerTuple {
            exchange: NAME.to_string(),
            start_time,
            response_time,
            first: first.clone(),
            second: second.clone(),
            last_price,
            last_trade,
            best_ask,
            best_bid,
            daily_volume: volume,
        });
    }

    Ok((Records::Tickers(tuples), Vec::new()))
}

// prices
// ----------------------------------------------------------------
//
//  {
//      "XXBTZUSD": [
//          [
//              1688671200,     // time
//              "30306.1",      // open
//              "30306.2",      // high
//              "30305.7",      // low
//              "30305.7",      // close
//              "30306.1",      // vwap
//              "3.39243896",   // volume
//              23              // count
//          ],
//          ...
//      ],
//      "last": 1678234233,
//  }
fn format_ohlc(response: &Response) -> Result<Vec<HistoricRateTuple>, ExchangeError> {
    let mut tuples = Vec::new();
    for part in &response.parts {
        let Some(pair) = &part.pair else {
            return Err(malformed("OHLC without a pair"));
        };
        let Value::Object(result) = &part.body else {
            return Err(malformed("OHLC result is not an object"));
        };

        // every key but `last` holds candles
        for rows in result.values().filter_map(Value::as_array) {
            for row in rows.iter().filter_map(Value::as_array) {
                let candle = (|| {
                    Some(HistoricRateTuple {
                        exchange_pair_id: pair.id,
                        timestamp: DateTime::from_timestamp(row.first()?.as_i64()?, 0)?,
                        open: parse_f64(row.get(1)?)?,
                        high: parse_f64(row.get(2)?)?,
                        low: parse_f64(row.get(3)?)?,
                        close: parse_f64(row.get(4)?)?,
                        volume: parse_f64(row.get(6)?)?,
                    })
                })();
                match candle {
                    Some(candle) => tuples.push(candle),
                    None => trace!("skipping malformed {NAME} candle for {pair}"),
                }
            }
        }
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn xbt_usd() -> ExchangeCurrencyPair {
        ExchangeCurrencyPair {
            id: 3,
            exchange_id: 2,
            exchange: NAME.to_string(),
            first_id: 5,
            first: "XBT".to_string(),
            second_id: 6,
            second: "USD".to_string(),
        }
    }

    #[test]
    fn errors_in_the_envelope_are_malformed() {
        let envelope: Envelope =
            serde_json::from_value(json!({"error": ["EQuery:Unknown asset pair"]})).unwrap();
        assert!(matches!(
            envelope.into_result(),
            Err(ExchangeError::Malformed { .. })
        ));
    }

    #[test]
    fn splits_asset_pairs_on_wsname() {
        let pairs = asset_pairs(&json!({
            "XXBTZUSD": {"altname": "XBTUSD", "wsname": "XBT/USD"},
            "XETHXXBT.d": {"altname": "ETHXBT.d"}
        }))
        .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs["XXBTZUSD"], ("XBT".to_string(), "USD".to_string()));
    }

    #[test]
    fn translates_ticker_keys() {
        let response = Response::new(NAME, &[xbt_usd()])
            .with_part(None, json!({"XXBTZUSD": {"altname": "XBTUSD", "wsname": "XBT/USD"}}))
            .with_part(
                None,
                json!({"XXBTZUSD": {
                    "a": ["30300.1", "1", "1.000"],
                    "b": ["30300.0", "1", "1.000"],
                    "c": ["30303.2", "0.0006"],
                    "v": ["4083.6", "4412.7"]
                }}),
            );
        let now = Utc::now();

        let (records, _) = Kraken::new()
            .format_data(RequestKind::Ticker, &response, now, now)
            .unwrap();
        let Records::Tickers(tickers) = records else {
            panic!("expected tickers");
        };
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].first, "XBT");
        assert_eq!(tickers[0].second, "USD");
        assert_eq!(tickers[0].last_price, 30303.2);
        assert_eq!(tickers[0].best_bid, 30300.0);
        assert_eq!(tickers[0].daily_volume, 4412.7);
    }

    #[test]
    fn skips_the_last_marker_in_ohlc() {
        let response = Response::new(NAME, &[xbt_usd()]).with_part(
            Some(xbt_usd()),
            json!({
                "XXBTZUSD": [[1688671200, "30306.1", "30306.2", "30305.7", "30305.8", "30306.1",
                              "3.39243896", 23]],
                "last": 1688672160
            }),
        );
        let now = Utc::now();

        let (records, _) = Kraken::new()
            .format_data(RequestKind::HistoricRates, &response, now, now)
            .unwrap();
        assert_eq!(
            records,
            Records::HistoricRates(vec![HistoricRateTuple {
                exchange_pair_id: 3,
                timestamp: DateTime::from_timestamp(1688671200, 0).unwrap(),
                open: 30306.1,
                high: 30306.2,
                low: 30305.7,
                close: 30305.8,
                volume: 3.39243896,
            }])
        );
    }
}
