use ccdump_spider::config::{Config, ConfigError};
use ccdump_spider::model::RequestKind;

fn job_file(frequency: &str, jobs: &str) -> String {
    format!(r#"{{ "frequency": {frequency}, "jobs": [{jobs}] }}"#)
}

#[test]
fn sample_job_file_loads() {
    let config = Config::from_json(include_str!("../../../jobs.json")).unwrap();

    assert_eq!(config.frequency.as_secs(), 300);
    assert_eq!(config.jobs.len(), 2);
    assert_eq!(config.jobs[0].request, RequestKind::Ticker);
    assert_eq!(config.jobs[0].exchanges.len(), 2);
    assert_eq!(config.jobs[1].request, RequestKind::HistoricRates);
}

#[test]
fn unknown_requests_are_rejected() {
    let json = job_file(
        "1",
        r#"{ "name": "odd", "request": "candles", "exchanges": ["binance"] }"#,
    );

    let err = Config::from_json(&json).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownRequest { ref request, .. } if request == "candles"));
}

#[test]
fn unknown_exchanges_are_rejected() {
    let json = job_file(
        "1",
        r#"{ "name": "t", "request": "ticker", "exchanges": ["binance", "mtgox"] }"#,
    );

    let err = Config::from_json(&json).unwrap_err();

    assert!(matches!(err, ConfigError::UnknownExchange { ref exchange, .. } if exchange == "mtgox"));
}

#[test]
fn frequency_must_be_positive() {
    let job = r#"{ "name": "t", "request": "ticker", "exchanges": ["binance"] }"#;

    for frequency in ["0", "-5"] {
        let err = Config::from_json(&job_file(frequency, job)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFrequency(_)));
    }
}

#[test]
fn empty_job_lists_are_rejected() {
    let err = Config::from_json(&job_file("1", "")).unwrap_err();
    assert!(matches!(err, ConfigError::NoJobs));

    let err = Config::from_json(&job_file(
        "1",
        r#"{ "name": "t", "request": "ticker", "exchanges": [] }"#,
    ))
    .unwrap_err();
    assert!(matches!(err, ConfigError::NoExchanges { .. }));
}

#[test]
fn malformed_json_is_rejected() {
    let err = Config::from_json(r#"{ "frequency": "often" }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
}
