// Bulk scraping: a fixed worker pool draining a shared roll-number queue
// behind one rate gate, with a single cancellation token observed at every
// await.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::ScrapeError;
use crate::models::{ScrapeOutcome, StudentRecord};
use crate::utils::tally::BatchTally;

/// Anything that can turn a roll number into a parsed result.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn scrape(&self, roll_number: &str) -> Result<StudentRecord, ScrapeError>;
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub workers: usize,
    /// Minimum spacing between two upstream requests across all workers.
    pub min_interval: Duration,
    pub deadline: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

// One shared gate; a zero interval disables it.
fn rate_gate(min_interval: Duration) -> Option<Arc<DefaultDirectRateLimiter>> {
    let quota = Quota::with_period(min_interval)?.allow_burst(NonZeroU32::MIN);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Linear in the attempt number plus up to one base of jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
    base * attempt + Duration::from_millis(jitter_ms)
}

struct Worker<S> {
    id: usize,
    source: Arc<S>,
    gate: Option<Arc<DefaultDirectRateLimiter>>,
    options: BulkOptions,
    tally: Arc<BatchTally>,
    cancel: CancellationToken,
}

impl<S: ResultSource + 'static> Worker<S> {
    // Takes roll numbers off the queue until it is drained or the run is cancelled.
    async fn run(self, queue: Arc<Mutex<mpsc::Receiver<String>>>, outcomes: mpsc::Sender<ScrapeOutcome>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                roll = async { queue.lock().await.recv().await } => roll,
            };
            let Some(roll) = next else { break };

            let Some(outcome) = self.scrape_one(&roll).await else { break };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = outcomes.send(outcome) => if sent.is_err() { break },
            }
        }
        debug!("Worker {} stopped", self.id);
    }

    /// `None` means the run was cancelled before this roll number finished.
    async fn scrape_one(&self, roll: &str) -> Option<ScrapeOutcome> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;

            if let Some(gate) = &self.gate {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return None,
                    _ = gate.until_ready() => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.source.scrape(roll) => result,
            };

            let error = match result {
                Ok(record) => {
                    debug!("Success for roll number {roll} (attempt {attempt})");
                    return Some(ScrapeOutcome::scraped(roll.to_string(), record));
                }
                Err(ScrapeError::RollNumberDoesNotExist) => {
                    debug!("Skipping roll number {roll}, upstream has no such student");
                    return Some(ScrapeOutcome::not_found(roll.to_string()));
                }
                Err(e) => e,
            };

            self.tally.record_error(&error);
            if !error.is_retryable() || attempt >= max_attempts {
                warn!("Giving up on roll number {roll} after {attempt} attempt(s): {error}");
                return Some(ScrapeOutcome::failed(roll.to_string(), error.to_string()));
            }

            self.tally.record_retry();
            let wait = backoff(self.options.backoff_base, attempt);
            info!("Error for roll number {roll}: {error}; retrying in {wait:?}");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Scrapes every roll number and returns one outcome per input, in completion
/// order. When `cancel` fires or the deadline passes the outcomes gathered so
/// far are returned and anything finishing later is dropped.
pub async fn scrape_in_bulk<S: ResultSource + 'static>(
    source: Arc<S>,
    roll_numbers: Vec<String>,
    options: &BulkOptions,
    cancel: CancellationToken,
) -> Vec<ScrapeOutcome> {
    let total = roll_numbers.len();
    info!("Scraping in bulk: {} roll numbers, {} workers", total, options.workers);
    if total == 0 {
        return Vec::new();
    }

    let cancel = cancel.child_token();
    let _stop = cancel.clone().drop_guard();
    let tally = Arc::new(BatchTally::new(total));
    let gate = rate_gate(options.min_interval);
    let workers = options.workers.clamp(1, total);

    let (roll_tx, roll_rx) = mpsc::channel::<String>(workers);
    let roll_rx = Arc::new(Mutex::new(roll_rx));
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<ScrapeOutcome>(workers);

    let feeder_cancel = cancel.clone();
    tokio::spawn(async move {
        for roll in roll_numbers {
            tokio::select! {
                biased;
                _ = feeder_cancel.cancelled() => break,
                sent = roll_tx.send(roll) => if sent.is_err() { break },
            }
        }
    });

    for id in 0..workers {
        let worker = Worker {
            id,
            source: source.clone(),
            gate: gate.clone(),
            options: options.clone(),
            tally: tally.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run(roll_rx.clone(), outcome_tx.clone()));
    }
    drop(outcome_tx);

    let deadline = tokio::time::sleep_until(Instant::now() + options.deadline);
    tokio::pin!(deadline);

    let mut collected = Vec::with_capacity(total);
    let mut cancelled = false;
    while collected.len() < total {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            _ = &mut deadline => {
                warn!("Bulk scrape deadline of {:?} reached", options.deadline);
                cancelled = true;
                break;
            }
            outcome = outcome_rx.recv() => match outcome {
                Some(outcome) => {
                    tally.record(&outcome);
                    collected.push(outcome);
                }
                None => break,
            },
        }
    }
    cancel.cancel();

    tally.log_summary(cancelled);
    info!("Scraping completed, {} results collected", collected.len());
    collected
}
