mod common;

use ccdump_spider::model::{CurrencyPairName, PairSelection, RequestKind};
use ccdump_spider::scheduler::{Scheduler, SchedulerError};
use ccdump_spider::store::{MemoryStore, Store};
use common::{job, Behaviour, FlakyStore, MockExchange};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const USDT_PAIRS: &[(&str, &str)] = &[("BTC", "USDT"), ("ETH", "USDT")];

#[tokio::test]
async fn one_failing_exchange_does_not_abort_the_round() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![
        Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer)),
        Arc::new(MockExchange::new("BETA", USDT_PAIRS, Behaviour::Fail)),
        Arc::new(MockExchange::new("GAMMA", USDT_PAIRS, Behaviour::Nothing)),
        Arc::new(MockExchange::new("DELTA", USDT_PAIRS, Behaviour::Answer)),
    ];
    let jobs = vec![job("tickers", RequestKind::Ticker, &exchanges, PairSelection::default())];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let reports = scheduler.run_round().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].persisted.inserted, 4);
    assert_eq!(reports[0].failed, 1);
    assert_eq!(reports[0].empty, 1);

    let tickers = store.tickers().await;
    assert_eq!(tickers.len(), 4);
    assert!(tickers
        .iter()
        .all(|(_, ticker)| ticker.exchange == "ALPHA" || ticker.exchange == "DELTA"));
}

#[tokio::test]
async fn validation_drops_exchanges_without_selected_pairs() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![
        Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer)),
        Arc::new(MockExchange::new("BETA", &[("DOGE", "USDT")], Behaviour::Answer)),
    ];
    let selection = PairSelection {
        first_currencies: vec!["doge".to_string()],
        ..Default::default()
    };
    let jobs = vec![job("doge", RequestKind::Ticker, &exchanges, selection)];
    let mut scheduler = Scheduler::new(store, jobs, Duration::from_secs(60));

    let validated = scheduler.validate().await.unwrap();

    assert_eq!(validated.len(), 1);
    assert_eq!(validated[0].exchanges.len(), 1);
    assert_eq!(validated[0].exchanges[0].exchange.name(), "BETA");
    assert_eq!(validated[0].exchanges[0].pairs[0].first, "DOGE");
}

#[tokio::test]
async fn jobs_without_any_pairs_are_fatal() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer))];
    let selection = PairSelection {
        currency_pairs: vec![CurrencyPairName::new("xrp", "eur")],
        ..Default::default()
    };
    let jobs = vec![job("xrp", RequestKind::Ticker, &exchanges, selection)];
    let mut scheduler = Scheduler::new(store, jobs, Duration::from_secs(60));

    let result = scheduler.run_round().await;

    assert!(matches!(result, Err(SchedulerError::NoValidJobs)));
}

#[tokio::test]
async fn responses_from_unknown_exchanges_are_dropped() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![Arc::new(MockExchange::new(
        "ALPHA",
        USDT_PAIRS,
        Behaviour::Impostor("OMEGA".to_string()),
    ))];
    let jobs = vec![job("tickers", RequestKind::Ticker, &exchanges, PairSelection::default())];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let reports = scheduler.run_round().await.unwrap();

    assert_eq!(reports[0].dropped, 1);
    assert!(store.tickers().await.is_empty());
}

#[tokio::test]
async fn responses_are_matched_case_insensitively() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![Arc::new(MockExchange::new(
        "ALPHA",
        USDT_PAIRS,
        Behaviour::Impostor("alpha".to_string()),
    ))];
    let jobs = vec![job("tickers", RequestKind::Ticker, &exchanges, PairSelection::default())];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let reports = scheduler.run_round().await.unwrap();

    assert_eq!(reports[0].dropped, 0);
    assert_eq!(store.tickers().await.len(), 2);
}

#[tokio::test]
async fn new_pairs_from_responses_are_stored_but_not_selected() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![Arc::new(
        MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer).with_mapping("SOL", "USDT"),
    )];
    let jobs = vec![job("tickers", RequestKind::Ticker, &exchanges, PairSelection::default())];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let reports = scheduler.run_round().await.unwrap();

    assert_eq!(store.pair_count().await, 3);
    assert!(store
        .resolve_pair("alpha", "sol", "usdt")
        .await
        .unwrap()
        .is_some());
    // the SOL ticker was not requested this round
    assert_eq!(reports[0].persisted.inserted, 2);
    assert_eq!(reports[0].persisted.skipped, 1);
}

#[tokio::test]
async fn jobs_are_validated_once() {
    let store = Arc::new(MemoryStore::new());
    let alpha = Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer));
    let jobs = vec![job(
        "pairs",
        RequestKind::CurrencyPairs,
        &[alpha.clone()],
        PairSelection::default(),
    )];
    let (_tx, rx) = watch::channel(false);
    let mut scheduler =
        Scheduler::new(store, jobs, Duration::ZERO).with_max_rounds(Some(2));

    let rounds = scheduler.run(rx).await.unwrap();

    assert_eq!(rounds, 2);
    // once while validating, once per round
    assert_eq!(alpha.pair_requests(), 3);
}

#[tokio::test]
async fn shutdown_before_the_first_round_runs_nothing() {
    let store = Arc::new(MemoryStore::new());
    let alpha = Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer));
    let jobs = vec![job("tickers", RequestKind::Ticker, &[alpha.clone()], PairSelection::default())];
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let rounds = scheduler.run(rx).await.unwrap();

    assert_eq!(rounds, 0);
    assert_eq!(alpha.pair_requests(), 0);
    assert!(store.tickers().await.is_empty());
}

#[tokio::test]
async fn shutdown_interrupts_the_wait_between_rounds() {
    let store = Arc::new(MemoryStore::new());
    let alpha = Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer));
    let jobs = vec![job("tickers", RequestKind::Ticker, &[alpha], PairSelection::default())];
    let (tx, rx) = watch::channel(false);
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(3600));

    let handle = tokio::spawn(async move { scheduler.run(rx).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();

    let rounds = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(rounds, 1);
    assert_eq!(store.tickers().await.len(), 2);
}

#[tokio::test]
async fn exchanges_of_all_jobs_are_asked_at_once() {
    let store = Arc::new(MemoryStore::new());
    let delay = Duration::from_millis(400);
    let slow = |name: &str| {
        Arc::new(MockExchange::new(name, USDT_PAIRS, Behaviour::Answer).with_delay(delay))
    };
    let jobs = vec![
        job("alpha", RequestKind::Ticker, &[slow("ALPHA")], PairSelection::default()),
        job("beta", RequestKind::Ticker, &[slow("BETA")], PairSelection::default()),
        job("gamma", RequestKind::Ticker, &[slow("GAMMA")], PairSelection::default()),
        job("pairs", RequestKind::CurrencyPairs, &[slow("DELTA")], PairSelection::default()),
    ];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));
    scheduler.validate().await.unwrap();

    let time = std::time::Instant::now();
    let reports = scheduler.run_round().await.unwrap();
    let elapsed = time.elapsed();
    println!("round with four slow exchanges, time elapsed: {elapsed:?}");

    // one after another would take four delays
    assert!(elapsed < delay * 2, "round took {elapsed:?}");
    assert_eq!(reports.len(), 4);
    assert_eq!(store.tickers().await.len(), 6);
    let names: Vec<&str> = reports.iter().map(|report| report.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma", "pairs"]);
}

#[tokio::test]
async fn tickers_of_one_round_share_its_start_time() {
    let store = Arc::new(MemoryStore::new());
    let alpha = Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer));
    let beta = Arc::new(
        MockExchange::new("BETA", USDT_PAIRS, Behaviour::Answer)
            .with_delay(Duration::from_millis(1200)),
    );
    let jobs = vec![
        job("fast", RequestKind::Ticker, &[alpha], PairSelection::default()),
        job("slow", RequestKind::Ticker, &[beta], PairSelection::default()),
    ];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));
    scheduler.validate().await.unwrap();

    scheduler.run_round().await.unwrap();

    let tickers = store.tickers().await;
    assert_eq!(tickers.len(), 4);
    assert!(tickers
        .iter()
        .all(|(_, ticker)| ticker.start_time == tickers[0].1.start_time));
}

#[tokio::test]
async fn store_errors_during_validation_keep_the_jobs() {
    let store = Arc::new(FlakyStore::failing(1));
    let exchanges = vec![Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer))];
    let jobs = vec![job("tickers", RequestKind::Ticker, &exchanges, PairSelection::default())];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let first = scheduler.run_round().await;
    assert!(matches!(first, Err(SchedulerError::Store(_))));

    let reports = scheduler.run_round().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].persisted.inserted, 2);
    assert_eq!(store.inner.tickers().await.len(), 2);
}

#[tokio::test]
async fn update_cp_refreshes_pairs_already_stored() {
    let store = Arc::new(MemoryStore::new());
    let alpha = Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer));
    let beta = Arc::new(MockExchange::new("BETA", USDT_PAIRS, Behaviour::Answer));
    for name in ["ALPHA", "BETA"] {
        store.resolve_pair(name, "BTC", "USDT").await.unwrap();
    }

    let mut refreshing = job("alpha", RequestKind::Ticker, &[alpha.clone()], PairSelection::default());
    refreshing.exchanges[0].update_cp = true;
    let trusting = job("beta", RequestKind::Ticker, &[beta.clone()], PairSelection::default());
    let mut scheduler = Scheduler::new(store.clone(), vec![refreshing, trusting], Duration::from_secs(60));

    let validated = scheduler.validate().await.unwrap();

    assert_eq!(alpha.pair_requests(), 1);
    assert_eq!(beta.pair_requests(), 0);
    assert_eq!(validated[0].exchanges[0].pairs.len(), 2);
    assert_eq!(validated[1].exchanges[0].pairs.len(), 1);
}

#[tokio::test]
async fn jobs_left_without_exchanges_are_removed() {
    let store = Arc::new(MemoryStore::new());
    let exchanges = vec![Arc::new(MockExchange::new("ALPHA", USDT_PAIRS, Behaviour::Answer))];
    let doge = PairSelection {
        first_currencies: vec!["DOGE".to_string()],
        ..Default::default()
    };
    let jobs = vec![
        job("doge", RequestKind::Ticker, &exchanges, doge),
        job("usdt", RequestKind::Ticker, &exchanges, PairSelection::default()),
    ];
    let mut scheduler = Scheduler::new(store.clone(), jobs, Duration::from_secs(60));

    let validated = scheduler.validate().await.unwrap();

    assert_eq!(validated.len(), 1);
    assert_eq!(validated[0].name, "usdt");
    let reports = scheduler.run_round().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(store.tickers().await.len(), 2);
}
