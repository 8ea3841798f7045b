pub mod config;
pub mod exchange;
pub mod job;
pub mod key_tracker;
pub mod model;
pub mod scheduler;
pub mod store;

/// Shortcut for required API elements.
pub(crate) mod http {
    pub(crate) use reqwest::Client as HttpClient;
}
