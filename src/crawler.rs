use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{ensure, Context as _, Result};
use futures::Stream;
use pin_project_lite::pin_project;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::CrawlerConfig;
use crate::dedup::VisitedSet;
use crate::extract;
use crate::frontier::{CrawlTask, EnqueueError, Frontier};
use crate::robots::RobotsCache;

/// Per-URL failure carried on the result stream. No variant is fatal to
/// the run; only cancellation or frontier exhaustion ends a crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("disallowed by robots.txt: {0}")]
    RobotsDisallowed(String),

    #[error("unexpected status code {status} for {url}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("error fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("frontier queue full, dropped {0}")]
    QueueOverflow(String),
}

/// One result per attempted fetch. Ownership moves to the stream consumer.
#[derive(Debug)]
pub struct CrawlResult {
    pub url: String,
    /// Resolved absolute links in document order, duplicates preserved.
    pub links: Vec<String>,
    pub error: Option<CrawlError>,
}

pin_project! {
    /// Stream of [`CrawlResult`]s for one run. Terminates exactly when the
    /// crawl has no queued or in-flight work left, or once every worker
    /// has observed cancellation.
    pub struct CrawlStream {
        #[pin]
        inner: UnboundedReceiverStream<CrawlResult>,
    }
}

impl Stream for CrawlStream {
    type Item = CrawlResult;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Depth-bounded crawl engine: a fixed pool of workers over one bounded
/// frontier, a claim-once visited registry and a per-host robots.txt
/// cache.
pub struct Crawler {
    config: CrawlerConfig,
    client: reqwest::Client,
    visited: Arc<VisitedSet>,
    robots: Arc<RobotsCache>,
    cancel: CancellationToken,
}

struct Shared {
    config: CrawlerConfig,
    client: reqwest::Client,
    visited: Arc<VisitedSet>,
    robots: Arc<RobotsCache>,
    frontier: Frontier,
    cancel: CancellationToken,
}

impl Crawler {
    /// Fails fast on invalid configuration.
    pub fn new(config: CrawlerConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            visited: Arc::new(VisitedSet::new()),
            robots: Arc::new(RobotsCache::new(config.user_agent.clone())),
            cancel: CancellationToken::new(),
            config,
        })
    }

    /// Start a crawl from `seed_url` and return the result stream. Must
    /// be called within a tokio runtime. A malformed or non-http(s) seed
    /// is a setup error, not a stream entry.
    pub fn start(&self, seed_url: &str) -> Result<CrawlStream> {
        let mut seed = Url::parse(seed_url)
            .with_context(|| format!("invalid seed URL: {seed_url}"))?;
        ensure!(
            matches!(seed.scheme(), "http" | "https"),
            "seed URL must be http or https: {seed_url}"
        );
        seed.set_fragment(None);

        let frontier = Frontier::new(self.config.queue_capacity);
        ensure!(
            frontier.enqueue(CrawlTask { url: seed, depth: 0 }).is_ok(),
            "couldn't seed the frontier"
        );

        let (tx_res, rx_res) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config: self.config.clone(),
            client: self.client.clone(),
            visited: Arc::clone(&self.visited),
            robots: Arc::clone(&self.robots),
            frontier,
            cancel: self.cancel.clone(),
        });

        for _ in 0..self.config.num_workers {
            tokio::spawn(worker_loop(Arc::clone(&shared), tx_res.clone()));
        }
        // The workers hold the only senders; the stream closes when the
        // last of them exits.
        drop(tx_res);

        Ok(CrawlStream {
            inner: UnboundedReceiverStream::new(rx_res),
        })
    }

    /// Handle for cancelling the run. Cancellation is observed at every
    /// suspension point, aborting in-flight fetches rather than awaiting
    /// them.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn user_agent(&self) -> &str {
        &self.config.user_agent
    }

    /// Count of uniquely claimed URLs so far.
    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

async fn worker_loop(shared: Arc<Shared>, tx_res: mpsc::UnboundedSender<CrawlResult>) {
    loop {
        let task = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            task = shared.frontier.next() => match task {
                Some(task) => task,
                None => break,
            },
        };

        // Dropping the processing future here aborts any fetch in flight.
        let cancelled = tokio::select! {
            _ = shared.cancel.cancelled() => true,
            _ = process_task(&shared, &tx_res, &task) => false,
        };
        // The task counts as in flight until its children are enqueued.
        shared.frontier.task_done();
        if cancelled {
            break;
        }
    }
}

async fn process_task(shared: &Shared, tx_res: &mpsc::UnboundedSender<CrawlResult>, task: &CrawlTask) {
    // Engine-wide fixed pacing, uniform across workers and hosts.
    let delay = shared.config.request_delay();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    // First claim owns the canonical fetch; later discoveries of the same
    // URL at any depth are suppressed with no result.
    if !shared.visited.try_claim(&task.url) {
        return;
    }

    let url = task.url.to_string();

    let rules = shared.robots.rules_for(&shared.client, &task.url).await;
    if !rules.is_allowed(&task.url) {
        send_result(
            tx_res,
            CrawlResult {
                url: url.clone(),
                links: Vec::new(),
                error: Some(CrawlError::RobotsDisallowed(url)),
            },
        );
        return;
    }
    rules.await_turn().await;

    let resp = match shared.client.get(task.url.clone()).send().await {
        Ok(resp) => resp,
        Err(source) => {
            send_result(
                tx_res,
                CrawlResult {
                    url: url.clone(),
                    links: Vec::new(),
                    error: Some(CrawlError::Fetch { url, source }),
                },
            );
            return;
        }
    };

    let status = resp.status();
    if !status.is_success() {
        send_result(
            tx_res,
            CrawlResult {
                url: url.clone(),
                links: Vec::new(),
                error: Some(CrawlError::HttpStatus { url, status }),
            },
        );
        return;
    }

    let is_html = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);
    if !is_html {
        // Leaf node, not an error.
        send_result(
            tx_res,
            CrawlResult {
                url,
                links: Vec::new(),
                error: None,
            },
        );
        return;
    }

    let body = match resp.text().await {
        Ok(body) => body,
        Err(source) => {
            send_result(
                tx_res,
                CrawlResult {
                    url: url.clone(),
                    links: Vec::new(),
                    error: Some(CrawlError::Fetch { url, source }),
                },
            );
            return;
        }
    };

    let links = extract::extract_links(&body, &task.url);
    send_result(
        tx_res,
        CrawlResult {
            url,
            links: links.iter().map(|l| l.to_string()).collect(),
            error: None,
        },
    );

    if task.depth < shared.config.max_depth {
        for link in links {
            let child = CrawlTask {
                url: link,
                depth: task.depth + 1,
            };
            match shared.frontier.enqueue(child) {
                Ok(()) => {}
                Err(EnqueueError::Full(dropped)) => {
                    log::warn!("Frontier full, dropping {}", dropped.url);
                    let dropped_url = dropped.url.to_string();
                    send_result(
                        tx_res,
                        CrawlResult {
                            url: dropped_url.clone(),
                            links: Vec::new(),
                            error: Some(CrawlError::QueueOverflow(dropped_url)),
                        },
                    );
                }
                // The queue only closes at quiescence, which can't happen
                // while this task is in flight.
                Err(EnqueueError::Closed(dropped)) => {
                    log::debug!("Frontier closed, dropping {}", dropped.url);
                }
            }
        }
    }
}

fn send_result(tx_res: &mpsc::UnboundedSender<CrawlResult>, result: CrawlResult) {
    if tx_res.send(result).is_err() {
        log::debug!("Result receiver dropped");
    }
}
