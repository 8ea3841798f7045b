use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing.
    #[arg(short, long, global = true)]
    pub trace: Option<TraceLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the configured exchanges and collect their data to PostgreSQL (crypto schema).
    Run {
        /// The JSON job file.
        #[arg(short, long)]
        config: PathBuf,

        /// Keep everything in memory instead of PostgreSQL; nothing outlives the process.
        #[arg(short, long)]
        memory: bool,
    },

    /// Create the crypto schema, its tables and views.
    Migrate,

    /// Print the currency pairs stored for an exchange.
    Pairs {
        #[arg(short, long)]
        exchange: String,
    },

    /// Print stored tickers with exchange and currency names, oldest first per pair.
    ///
    /// Pair selectors are OR-ed; without any, every pair is printed.
    Tickers {
        /// Restrict to these exchanges; all when omitted.
        #[arg(short, long)]
        exchange: Vec<String>,

        /// Exact pairs, written `FIRST/SECOND`.
        #[arg(short, long)]
        pair: Vec<String>,

        /// Pairs with one of these first currencies.
        #[arg(long)]
        first: Vec<String>,

        /// Pairs with one of these second currencies.
        #[arg(long)]
        second: Vec<String>,

        /// Earliest start time (RFC 3339), inclusive.
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Latest start time (RFC 3339), inclusive.
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
#[clap(rename_all = "UPPERCASE")]
pub enum TraceLevel {
    DEBUG,
    ERROR,
    INFO,
    TRACE,
    WARN,
}
