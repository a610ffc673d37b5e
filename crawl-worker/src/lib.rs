pub mod config;
pub mod fetch;
pub mod http;
pub mod manager;
pub mod sink;
pub mod worker;

pub use config::Config;
pub use fetch::{FetchError, FetchedContent, Fetcher, HttpFetcher};
pub use manager::{ManagerStats, WorkerManager};
pub use sink::{MemorySink, PgStorageSink, SinkError, StorageSink};
pub use worker::WorkerSettings;
