use anyhow::{anyhow, Context};
use ccdump_spider::config::Config;
use ccdump_spider::model::{CurrencyPairName, PairSelection};
use ccdump_spider::scheduler::Scheduler;
use ccdump_spider::store::{MemoryStore, PgStore, Store};
use chrono::{DateTime, Utc};
use dotenv::var;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

fn connect() -> anyhow::Result<PgStore> {
    trace!("connecting to the crypto database ...");
    let url = var("CRYPTO_DB_URL").context("environment variable CRYPTO_DB_URL")?;
    let store = PgStore::connect(&url).map_err(|err| {
        error!("crypto database connection error: {}", err);
        err
    })?;
    Ok(store)
}

/// Poll the exchanges of the job file until interrupted, or until `max_rounds` is reached.
pub(crate) async fn run(config: &Path, memory: bool) -> anyhow::Result<()> {
    let config = Config::load(config)
        .await
        .with_context(|| format!("invalid job file {}", config.display()))?;
    debug!(
        "{} jobs loaded, one round every {:?}",
        config.jobs.len(),
        config.frequency
    );

    let time = std::time::Instant::now();
    let rounds = if memory {
        let store = Arc::new(MemoryStore::new());
        let rounds = poll(store.clone(), config).await?;
        info!(
            "dry run: {} exchanges, {} currency pairs, {} tickers, {} historic rates, {} order book levels, {} trades, {} ohlcvm candles",
            store.exchange_count().await,
            store.pair_count().await,
            store.tickers().await.len(),
            store.historic_rates().await.len(),
            store.order_books().await.len(),
            store.trades().await.len(),
            store.ohlcvm().await.len(),
        );
        rounds
    } else {
        let store = Arc::new(connect()?);
        store.migrate().await?;
        poll(store, config).await?
    };

    info!(
        "spider finished after {rounds} rounds, time elapsed: {:?}",
        time.elapsed()
    );
    Ok(())
}

async fn poll<S: Store>(store: Arc<S>, config: Config) -> anyhow::Result<usize> {
    let (shutdown, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted, stopping after the current round");
                shutdown.send(true).ok();
            }
            Err(err) => error!("failed to listen for ctrl-c, error({err})"),
        }
    });

    let mut scheduler =
        Scheduler::new(store, config.jobs, config.frequency).with_max_rounds(config.max_rounds);
    let rounds = scheduler.run(rx).await.map_err(|err| {
        error!("scheduler stopped, error({err})");
        err
    })?;
    Ok(rounds)
}

/// Create the crypto schema.
pub(crate) async fn migrate() -> anyhow::Result<()> {
    connect()?.migrate().await?;
    Ok(())
}

/// Print the pairs stored for `exchange`, one per line.
pub(crate) async fn pairs(exchange: &str) -> anyhow::Result<()> {
    let pairs = connect()?.get_all_currency_pairs(exchange).await?;
    if pairs.is_empty() {
        info!("no currency pairs stored for {exchange}");
    }
    for pair in pairs {
        println!("{}\t{pair}", pair.id);
    }
    Ok(())
}

/// Selection from the `FIRST/SECOND` pairs and currency lists given on the command line.
fn selection_of(
    pairs: &[String],
    first_currencies: Vec<String>,
    second_currencies: Vec<String>,
) -> anyhow::Result<PairSelection> {
    let currency_pairs = pairs
        .iter()
        .map(|pair| {
            let (first, second) = pair
                .split_once('/')
                .ok_or_else(|| anyhow!("invalid pair `{pair}`, expected FIRST/SECOND"))?;
            Ok(CurrencyPairName::new(first, second))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(PairSelection {
        currency_pairs,
        first_currencies,
        second_currencies,
    })
}

/// Print stored tickers, tab separated, one per line.
pub(crate) async fn tickers(
    exchanges: &[String],
    pairs: &[String],
    first_currencies: Vec<String>,
    second_currencies: Vec<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let selection = selection_of(pairs, first_currencies, second_currencies)?;

    let time = std::time::Instant::now();
    let tickers = connect()?
        .get_readable_tickers(exchanges, &selection, from, to)
        .await?;
    debug!("{} tickers fetched, time elapsed: {:?}", tickers.len(), time.elapsed());
    if tickers.is_empty() {
        info!("no tickers stored for this selection");
    }
    for t in tickers {
        println!(
            "{}\t{}/{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            t.exchange,
            t.first,
            t.second,
            t.start_time.to_rfc3339(),
            t.response_time.to_rfc3339(),
            t.last_price,
            t.last_trade,
            t.best_ask,
            t.best_bid,
            t.daily_volume
        );
    }
    Ok(())
}
