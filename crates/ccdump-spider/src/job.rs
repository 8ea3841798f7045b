use crate::exchange::{Exchange, ExchangeError};
use crate::model::{ExchangeCurrencyPair, PairSelection, PairTuple, RequestKind};
use crate::scheduler::SchedulerError;
use crate::store::{Persisted, Store};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// One exchange of a job, with the pairs it should be asked about.
#[derive(Clone)]
pub struct JobExchange {
    pub exchange: Arc<dyn Exchange>,
    pub selection: PairSelection,
    /// Re-request the exchange's pair list before resolving the selection.
    pub update_cp: bool,
}

impl fmt::Debug for JobExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExchange")
            .field("exchange", &self.exchange.name())
            .field("selection", &self.selection)
            .field("update_cp", &self.update_cp)
            .finish()
    }
}

/// A configured job: one request kind for a set of exchanges.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub request: RequestKind,
    pub exchanges: Vec<JobExchange>,
}

/// An exchange whose selection has been resolved into concrete, stored pairs.
#[derive(Clone)]
pub struct ExchangeWithPairs {
    pub exchange: Arc<dyn Exchange>,
    pub selection: PairSelection,
    pub pairs: Vec<ExchangeCurrencyPair>,
}

impl fmt::Debug for ExchangeWithPairs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeWithPairs")
            .field("exchange", &self.exchange.name())
            .field("pairs", &self.pairs.len())
            .finish()
    }
}

/// A job that survived validation: every exchange has at least one pair.
#[derive(Debug, Clone)]
pub struct ValidatedJob {
    pub name: String,
    pub request: RequestKind,
    pub exchanges: Vec<ExchangeWithPairs>,
}

/// Persist a freshly requested pair list; failures are logged and yield `None`.
pub(crate) async fn store_pair_list<S: Store + ?Sized>(
    store: &S,
    exchange: &dyn Exchange,
    pairs: Result<Vec<PairTuple>, ExchangeError>,
) -> Option<Persisted> {
    let pairs = match pairs {
        Ok(pairs) => pairs,
        Err(err) => {
            error!("failed to request currency pairs from {}, error({err})", exchange.name());
            return None;
        }
    };
    if pairs.is_empty() {
        warn!("{} returned no currency pairs", exchange.name());
        return Some(Persisted::default());
    }

    match store.persist_pairs(&pairs, exchange.is_exchange()).await {
        Ok(persisted) => {
            debug!(
                "{}: {} new currency pairs, {} already known",
                exchange.name(),
                persisted.inserted,
                persisted.skipped
            );
            Some(persisted)
        }
        Err(err) => {
            error!("failed to persist currency pairs of {}, error({err})", exchange.name());
            None
        }
    }
}

/// Request and persist an exchange's pair list.
pub(crate) async fn update_currency_pairs<S: Store + ?Sized>(
    store: &S,
    exchange: &dyn Exchange,
) -> Option<Persisted> {
    trace!("requesting currency pairs from {}", exchange.name());
    let pairs = exchange.request_currency_pairs().await;
    store_pair_list(store, exchange, pairs).await
}

/// Resolve every job's selectors into stored pairs.
///
/// Exchanges without any matching pair are dropped, then jobs without exchanges. The input is
/// consumed and a new list is returned; it is never empty.
pub async fn validate_jobs<S: Store + ?Sized>(
    store: &S,
    jobs: Vec<Job>,
) -> Result<Vec<ValidatedJob>, SchedulerError> {
    let mut validated = Vec::with_capacity(jobs.len());

    for job in jobs {
        let mut exchanges = Vec::with_capacity(job.exchanges.len());

        for JobExchange {
            exchange,
            selection,
            update_cp,
        } in job.exchanges
        {
            let name = exchange.name().to_string();
            if update_cp || store.get_all_currency_pairs(&name).await?.is_empty() {
                update_currency_pairs(store, exchange.as_ref()).await;
            }

            let pairs = store
                .get_currency_pairs_for_exchange(&name, &selection)
                .await?;
            if pairs.is_empty() {
                warn!("job `{}`: {name} offers none of the selected pairs, dropping it", job.name);
                continue;
            }

            debug!("job `{}`: {name} selected {} pairs", job.name, pairs.len());
            exchanges.push(ExchangeWithPairs {
                exchange,
                selection,
                pairs,
            });
        }

        if exchanges.is_empty() {
            warn!("job `{}` has no exchange with matching pairs, dropping it", job.name);
            continue;
        }

        validated.push(ValidatedJob {
            name: job.name,
            request: job.request,
            exchanges,
        });
    }

    if validated.is_empty() {
        return Err(SchedulerError::NoValidJobs);
    }

    info!("{} jobs validated", validated.len());
    Ok(validated)
}
