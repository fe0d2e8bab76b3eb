//! Per-run counters for the bulk coordinator

use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};

use crate::errors::ScrapeError;
use crate::models::{OutcomeStatus, ScrapeOutcome};

/// Below this many invalid pages a run is not considered suspicious.
const MARKUP_ALERT_MIN: usize = 3;

#[derive(Default)]
pub struct BatchTally {
    total: AtomicUsize,
    scraped: AtomicUsize,
    not_found: AtomicUsize,
    failed: AtomicUsize,
    retries: AtomicUsize,
    invalid_html: AtomicUsize,
}

impl BatchTally {
    // Empty tally for a run of `total` roll numbers.
    pub fn new(total: usize) -> Self {
        let tally = Self::default();
        tally.total.store(total, Ordering::Relaxed);
        tally
    }

    // Counts one finished roll number by status.
    pub fn record(&self, outcome: &ScrapeOutcome) {
        let counter = match outcome.status {
            OutcomeStatus::Scraped => &self.scraped,
            OutcomeStatus::NotFound => &self.not_found,
            OutcomeStatus::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // Counts a failed attempt by kind.
    pub fn record_error(&self, error: &ScrapeError) {
        if matches!(error, ScrapeError::InvalidHtml(_)) {
            self.invalid_html.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Counts a scheduled retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    // Roll numbers finished so far.
    pub fn processed(&self) -> usize {
        self.scraped.load(Ordering::Relaxed) + self.not_found.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    // Attempts that hit an unreadable page.
    pub fn invalid_html(&self) -> usize {
        self.invalid_html.load(Ordering::Relaxed)
    }

    /// Many unreadable pages in one run usually mean the upstream layout moved,
    /// not that many students are broken.
    pub fn markup_changed(&self) -> bool {
        let invalid = self.invalid_html();
        invalid >= MARKUP_ALERT_MIN && invalid * 10 >= self.processed().max(1)
    }

    // Logs the counters at the end of a run.
    pub fn log_summary(&self, cancelled: bool) {
        let total = self.total.load(Ordering::Relaxed);
        info!("Bulk scrape summary{}:", if cancelled { " (cancelled)" } else { "" });
        info!("  Total roll numbers: {}", total);
        info!("  Scraped: {}", self.scraped.load(Ordering::Relaxed));
        info!("  Not found: {}", self.not_found.load(Ordering::Relaxed));
        info!("  Failed: {}", self.failed.load(Ordering::Relaxed));
        info!("  Retries: {}", self.retries.load(Ordering::Relaxed));
        if self.markup_changed() {
            warn!(
                "{} of {} pages had an unrecognised layout; the result portal markup has probably changed",
                self.invalid_html(),
                self.processed()
            );
        }
    }
}
