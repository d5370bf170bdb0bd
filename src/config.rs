use std::cmp;
use std::time::Duration;

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration, immutable for the lifetime of a crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Number of concurrent workers pulling tasks from the frontier.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Maximum crawl depth; the seed is at depth 0.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Engine-wide fixed delay applied before every request, independent
    /// of the per-host robots.txt crawl delay.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Frontier capacity; enqueues beyond it are dropped and reported as
    /// overflow results.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            num_workers: default_num_workers(),
            max_depth: default_max_depth(),
            request_delay_ms: default_request_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl CrawlerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_workers >= 1, "numWorkers must be at least 1");
        ensure!(self.queue_capacity >= 1, "queueCapacity must be at least 1");
        ensure!(
            self.request_timeout_secs >= 1,
            "requestTimeoutSecs must be at least 1"
        );
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_user_agent() -> String {
    String::from("WebcrawlBot/1.0")
}

fn default_num_workers() -> usize {
    cmp::max(1, num_cpus::get().saturating_sub(2))
}

fn default_max_depth() -> usize {
    2
}

fn default_request_delay_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    1_000
}
