mod cli;
mod spider;

// remote imports
use clap::Parser;
use cli::{Cli, TraceLevel};
use tracing::{subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

////////////////////////////////////////////////////////////////////////////

// preprocess the trace level
fn preprocess(trace_level: Level) -> anyhow::Result<()> {
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber)?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // set the trace level, info unless asked otherwise
    preprocess(match cli.trace.unwrap_or(TraceLevel::INFO) {
        TraceLevel::DEBUG => Level::DEBUG,
        TraceLevel::ERROR => Level::ERROR,
        TraceLevel::INFO => Level::INFO,
        TraceLevel::TRACE => Level::TRACE,
        TraceLevel::WARN => Level::WARN,
    })?;
    trace!("command line input recorded: {cli:?}");

    // read cli inputs
    use cli::Commands::*;
    match cli.command {
        // `ccdump run --config <file> [--memory]`: poll exchanges until interrupted
        Run { config, memory } => spider::run(&config, memory).await?,

        // `ccdump migrate`: create the schema
        Migrate => spider::migrate().await?,

        // `ccdump pairs --exchange <name>`: list stored pairs
        Pairs { exchange } => spider::pairs(&exchange).await?,

        // `ccdump tickers [--exchange <name>].. [--pair <FIRST/SECOND>].. [--from <time>] [--to <time>]`
        Tickers {
            exchange,
            pair,
            first,
            second,
            from,
            to,
        } => spider::tickers(&exchange, &pair, first, second, from, to).await?,
    }

    Ok(())
}
