use crate::exchange::{Exchange, ExchangeError, Response};
use crate::job::{store_pair_list, validate_jobs, ExchangeWithPairs, Job, ValidatedJob};
use crate::model::{ExchangeCurrencyPair, PairTuple, Records, RequestKind};
use crate::store::{Persisted, Store, StoreError};
use chrono::{DateTime, SubsecRound, Utc};
use futures::{stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every job was pruned during validation.
    #[error(
        "no valid jobs: none of the configured exchanges offers any of the selected currency \
         pairs, check the job configuration"
    )]
    NoValidJobs,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counts of one job within a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub name: String,
    pub request: RequestKind,
    pub persisted: Persisted,
    /// Exchanges that errored, or whose response could not be formatted or persisted.
    pub failed: usize,
    /// Exchanges with nothing to report this round.
    pub empty: usize,
    /// Responses naming an exchange the job does not contain.
    pub dropped: usize,
}

impl JobReport {
    fn new(job: &ValidatedJob) -> Self {
        Self {
            name: job.name.clone(),
            request: job.request,
            persisted: Persisted::default(),
            failed: 0,
            empty: 0,
            dropped: 0,
        }
    }
}

enum Jobs {
    Pending(Vec<Job>),
    Validated(Vec<ValidatedJob>),
}

/// Runs the configured jobs every `frequency`.
///
/// Jobs are validated once, before the first round. Within a round all exchanges of all jobs are
/// asked concurrently; persisting starts after the last answer and runs job by job.
pub struct Scheduler<S> {
    store: Arc<S>,
    jobs: Jobs,
    frequency: Duration,
    max_rounds: Option<usize>,
}

/// Start of the round after one started at `start`: one `frequency` later, or right away when
/// the round overran.
pub fn next_round_at(start: Instant, frequency: Duration, now: Instant) -> Instant {
    (start + frequency).max(now)
}

impl<S: Store> Scheduler<S> {
    pub fn new(store: Arc<S>, jobs: Vec<Job>, frequency: Duration) -> Self {
        Self {
            store,
            jobs: Jobs::Pending(jobs),
            frequency,
            max_rounds: None,
        }
    }

    /// Stop after `max_rounds` rounds; `None` runs until shut down.
    pub fn with_max_rounds(mut self, max_rounds: Option<usize>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate the pending jobs, once. Later calls return the already validated jobs.
    pub async fn validate(&mut self) -> Result<&[ValidatedJob], SchedulerError> {
        // on a store error the pending jobs stay, so the next call retries
        if let Jobs::Pending(jobs) = &self.jobs {
            let validated = validate_jobs(self.store.as_ref(), jobs.clone()).await?;
            self.jobs = Jobs::Validated(validated);
        }
        match &self.jobs {
            Jobs::Validated(jobs) => Ok(jobs),
            Jobs::Pending(_) => Err(SchedulerError::NoValidJobs),
        }
    }

    /// Run every job once.
    ///
    /// Every exchange of every job is asked concurrently. Once all answers are in, jobs are
    /// persisted one after another, each in the order its answers arrived.
    pub async fn run_round(&mut self) -> Result<Vec<JobReport>, SchedulerError> {
        self.validate().await?;
        let Jobs::Validated(jobs) = &mut self.jobs else {
            return Err(SchedulerError::NoValidJobs);
        };

        let store = self.store.as_ref();
        let start_time: DateTime<Utc> = Utc::now().round_subsecs(0);
        let time = std::time::Instant::now();
        debug!("starting round at {start_time} with {} jobs", jobs.len());

        // every request is joined before anything touches the store
        let answers = request_all(jobs).await;
        debug!(
            "all exchanges answered, \x1b[38;5;208melapsed time: {} ms\x1b[0m",
            time.elapsed().as_millis()
        );

        let mut reports = Vec::with_capacity(jobs.len());
        for (job, answers) in jobs.iter_mut().zip(answers) {
            let time = std::time::Instant::now();
            let report = settle_job(store, job, answers, start_time).await;
            info!(
                "job `{}` ({}): {} inserted, {} skipped, {} failed, \x1b[38;5;208melapsed time: {} ms\x1b[0m",
                report.name,
                report.request,
                report.persisted.inserted,
                report.persisted.skipped,
                report.failed,
                time.elapsed().as_millis()
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Run rounds until `max_rounds` is reached or `shutdown` turns `true`; returns the number
    /// of completed rounds.
    ///
    /// A round is never interrupted: shutdown is checked before each round and while waiting
    /// for the next one.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<usize, SchedulerError> {
        let mut rounds = 0;
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, stopping after {rounds} rounds");
                break;
            }

            let start = Instant::now();
            self.run_round().await?;
            rounds += 1;
            debug!("round {rounds} finished, time elapsed: {:?}", start.elapsed());

            if self.max_rounds.is_some_and(|max| rounds >= max) {
                info!("{rounds} rounds completed, stopping");
                break;
            }

            let next = next_round_at(start, self.frequency, Instant::now());
            trace!("next round in {:?}", next.saturating_duration_since(Instant::now()));
            tokio::select! {
                _ = sleep_until(next) => {}
                changed = shutdown.changed() => {
                    // sender gone: nobody can ask for a shutdown anymore
                    if changed.is_err() {
                        sleep_until(next).await;
                    }
                }
            }
        }
        Ok(rounds)
    }
}

/// What one exchange answered during the request phase of a round.
enum Answer {
    Data(String, Result<Option<Response>, ExchangeError>),
    Pairs(Arc<dyn Exchange>, Result<Vec<PairTuple>, ExchangeError>),
}

/// Ask every exchange of every job at once; answers are grouped by job index, each group in
/// completion order.
async fn request_all(jobs: &[ValidatedJob]) -> Vec<Vec<Answer>> {
    let requests: Vec<(usize, RequestKind, ExchangeWithPairs)> = jobs
        .iter()
        .enumerate()
        .flat_map(|(index, job)| job.exchanges.iter().map(move |ex| (index, job.request, ex.clone())))
        .collect();
    let width = requests.len().max(1);
    trace!("{} requests in flight", requests.len());

    let answered: Vec<(usize, Answer)> = stream::iter(requests)
        .map(|(index, kind, ex)| async move {
            let answer = match kind {
                RequestKind::CurrencyPairs => Answer::Pairs(
                    ex.exchange.clone(),
                    ex.exchange.request_currency_pairs().await,
                ),
                _ => Answer::Data(
                    ex.exchange.name().to_string(),
                    ex.exchange.request(kind, &ex.pairs).await,
                ),
            };
            (index, answer)
        })
        .buffer_unordered(width)
        .collect()
        .await;

    let mut grouped: Vec<Vec<Answer>> = jobs.iter().map(|_| Vec::new()).collect();
    for (index, answer) in answered {
        if let Some(group) = grouped.get_mut(index) {
            group.push(answer);
        }
    }
    grouped
}

/// Persist one job's answers in order. A pair refresh re-resolves the job's selections last.
async fn settle_job<S: Store + ?Sized>(
    store: &S,
    job: &mut ValidatedJob,
    answers: Vec<Answer>,
    start_time: DateTime<Utc>,
) -> JobReport {
    let mut report = JobReport::new(job);
    for answer in answers {
        match answer {
            Answer::Pairs(exchange, pairs) => {
                match store_pair_list(store, exchange.as_ref(), pairs).await {
                    Some(persisted) => report.persisted += persisted,
                    None => report.failed += 1,
                }
            }
            Answer::Data(name, result) => {
                persist_answer(store, job, &name, result, start_time, &mut report).await
            }
        }
    }

    if job.request == RequestKind::CurrencyPairs {
        reselect_pairs(store, job).await;
    }
    report
}

/// Re-resolve the job's selections against the refreshed pair lists.
async fn reselect_pairs<S: Store + ?Sized>(store: &S, job: &mut ValidatedJob) {
    for ExchangeWithPairs {
        exchange,
        selection,
        pairs,
    } in job.exchanges.iter_mut()
    {
        match store
            .get_currency_pairs_for_exchange(exchange.name(), selection)
            .await
        {
            Ok(selected) => *pairs = selected,
            Err(err) => error!("failed to reload currency pairs of {}, error({err})", exchange.name()),
        }
    }
}

/// Format one exchange's data answer and persist its mappings, then its records.
async fn persist_answer<S: Store + ?Sized>(
    store: &S,
    job: &ValidatedJob,
    name: &str,
    result: Result<Option<Response>, ExchangeError>,
    start_time: DateTime<Utc>,
    report: &mut JobReport,
) {
    let kind = job.request;
    let response = match result {
        Ok(Some(response)) => response,
        Ok(None) => {
            debug!("{name} has no {kind} to report");
            report.empty += 1;
            return;
        }
        Err(err) => {
            error!("failed to request {kind} from {name}, error({err})");
            report.failed += 1;
            return;
        }
    };

    let Some(target) = job
        .exchanges
        .iter()
        .find(|ex| ex.exchange.name().eq_ignore_ascii_case(&response.exchange))
    else {
        warn!(
            "response from unknown exchange `{}` in job `{}`, dropping it",
            response.exchange, job.name
        );
        report.dropped += 1;
        return;
    };
    let exchange: &dyn Exchange = target.exchange.as_ref();

    let (records, mappings) =
        match exchange.format_data(kind, &response, start_time, response.response_time) {
            Ok(formatted) => formatted,
            Err(err) => {
                error!("failed to format {kind} from {name}, error({err})");
                report.failed += 1;
                return;
            }
        };

    if !mappings.is_empty() {
        if let Err(err) = store.persist_pairs(&mappings, exchange.is_exchange()).await {
            error!("failed to persist new currency pairs of {name}, error({err})");
        }
    }

    if records.is_empty() {
        trace!("{name} answered without any {kind}");
        return;
    }

    match persist_records(store, &target.pairs, &records, exchange.is_exchange()).await {
        Ok(persisted) => report.persisted += persisted,
        Err(err) => {
            error!("failed to persist {kind} from {name}, error({err})");
            report.failed += 1;
        }
    }
}

/// Hand formatted rows to the store method of their kind.
async fn persist_records<S: Store + ?Sized>(
    store: &S,
    selected: &[ExchangeCurrencyPair],
    records: &Records,
    is_exchange: bool,
) -> Result<Persisted, StoreError> {
    match records {
        Records::Tickers(rows) => store.persist_tickers(selected, rows, is_exchange).await,
        Records::HistoricRates(rows) => store.persist_historic_rates(rows).await,
        Records::OrderBooks(rows) => store.persist_order_books(selected, rows, is_exchange).await,
        Records::Trades(rows) => store.persist_trades(selected, rows, is_exchange).await,
        Records::Ohlcvm(rows) => store.persist_ohlcvm(selected, rows, is_exchange).await,
    }
}
