mod config;
mod crawler;
mod dedup;
mod extract;
mod frontier;
mod robots;

pub use config::CrawlerConfig;
pub use crawler::{CrawlError, CrawlResult, CrawlStream, Crawler};
pub use frontier::CrawlTask;

pub use anyhow;
pub use tokio_util::sync::CancellationToken;
