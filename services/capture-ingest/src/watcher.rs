//! Polling loop over one drop directory.
//!
//! Every tick lists the directory and offers each plain file to the handler,
//! in listing order, before the next tick can start. A file keeps being
//! offered until it disappears from the listing.

use crate::remote::RemoteDirectory;
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of offering one file to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do for this file.
    Completed,
    /// Leave the file where it is; the next tick offers it again.
    Retry(String),
    /// The file can never be processed; it has been set aside.
    Failed(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Retry(_) => "retry",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Retry(reason) => write!(f, "retry: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Invoked for every plain file seen in the watched directory.
#[async_trait]
pub trait FileHandler: Send + Sync {
    async fn handle(&self, dir: &mut dyn RemoteDirectory, name: &str) -> Outcome;
}

pub struct Watcher<D, H> {
    domain: &'static str,
    dir: D,
    handler: H,
    interval: Duration,
}

impl<D, H> Watcher<D, H>
where
    D: RemoteDirectory,
    H: FileHandler,
{
    pub fn new(domain: &'static str, dir: D, handler: H, interval: Duration) -> Self {
        Self {
            domain,
            dir,
            handler,
            interval,
        }
    }

    /// Poll until `shutdown` is cancelled. Cancellation is only observed
    /// between cycles.
    pub async fn run(mut self, shutdown: CancellationToken) -> D {
        info!(domain = self.domain, interval = ?self.interval, "Watcher started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.poll_once().await;
        }

        info!(domain = self.domain, "Watcher stopped");
        self.dir
    }

    /// One full list-and-handle cycle. Returns the number of files offered.
    pub async fn poll_once(&mut self) -> usize {
        let entries = match self.dir.list().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(domain = self.domain, error = %e, "Directory listing failed");
                metrics::counter!("capture.poll.list_failures", "domain" => self.domain)
                    .increment(1);
                return 0;
            }
        };

        let mut offered = 0;
        for entry in entries.into_iter().filter(|e| e.is_file) {
            debug!(domain = self.domain, file = %entry.name, "File seen");
            offered += 1;

            let started = Instant::now();
            let outcome = self.handler.handle(&mut self.dir, &entry.name).await;
            metrics::histogram!("capture.files.handle_seconds", "domain" => self.domain)
                .record(started.elapsed().as_secs_f64());
            match &outcome {
                Outcome::Completed => {
                    debug!(domain = self.domain, file = %entry.name, "File completed")
                }
                Outcome::Retry(reason) => {
                    info!(domain = self.domain, file = %entry.name, reason = %reason, "File deferred")
                }
                Outcome::Failed(reason) => {
                    warn!(domain = self.domain, file = %entry.name, reason = %reason, "File rejected")
                }
            }
            metrics::counter!(
                "capture.files.handled",
                "domain" => self.domain,
                "outcome" => outcome.label()
            )
            .increment(1);
        }

        offered
    }
}
