use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::Log;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::FetchError;
use crate::ethereum::ChainSource;
use crate::filter::{AlertDeduper, AlertFilter};
use crate::pipeline::{attach_timestamps, evaluate_logs};
use crate::price::{PriceOracle, PriceSource};
use crate::reporter::Reporter;
use crate::tracker::{BlockRange, BlockRangeTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Init,
    Polling,
    Processing,
    Backoff,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The chain head has not moved past the cursor.
    Idle,
    /// No price this tick; the cursor is held so the range is scanned again.
    PriceUnavailable(BlockRange),
    Processed {
        range: BlockRange,
        logs: usize,
        skipped: usize,
        alerts: usize,
        duplicates: usize,
    },
}

pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub backoff: Duration,
    pub confirmations: u64,
    pub dedup_alerts: bool,
}

/// Live poller: every tick scans the blocks added since the last one.
pub struct Monitor<C, P> {
    chain: Arc<C>,
    oracle: PriceOracle<P>,
    filter: AlertFilter,
    reporter: Reporter,
    deduper: Option<AlertDeduper>,
    tracker: Option<BlockRangeTracker>,
    settings: MonitorSettings,
    state: MonitorState,
}

impl<C: ChainSource, P: PriceSource> Monitor<C, P> {
    pub fn new(
        chain: Arc<C>,
        oracle: PriceOracle<P>,
        filter: AlertFilter,
        reporter: Reporter,
        settings: MonitorSettings,
    ) -> Self {
        let deduper = settings
            .dedup_alerts
            .then(|| AlertDeduper::new(AlertDeduper::DEFAULT_CAPACITY));

        Self {
            chain,
            oracle,
            filter,
            reporter,
            deduper,
            tracker: None,
            settings,
            state: MonitorState::Init,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn cursor(&self) -> Option<u64> {
        self.tracker.as_ref().map(|t| t.cursor())
    }

    fn set_state(&mut self, state: MonitorState) {
        if self.state != state {
            debug!("Monitor state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    async fn effective_head(&self) -> Result<u64, FetchError> {
        let head = self.chain.latest_block_number().await?;
        Ok(head.saturating_sub(self.settings.confirmations))
    }

    /// Checks the contract and places the cursor. Without `start_block` only
    /// blocks after the current head are scanned.
    pub async fn init(&mut self, start_block: Option<u64>) -> Result<(), FetchError> {
        self.chain.verify_contract().await?;

        let cursor = match start_block {
            Some(block) => block.saturating_sub(1),
            None => self.effective_head().await?,
        };
        self.tracker = Some(BlockRangeTracker::new(cursor));

        info!(
            "Monitoring from block {} (threshold {})",
            cursor + 1,
            self.filter.threshold()
        );
        Ok(())
    }

    async fn fetch_range(&self, range: BlockRange) -> Result<Vec<Log>, FetchError> {
        let mut logs = Vec::new();
        for block in range.blocks() {
            logs.extend(self.chain.fetch_logs(block, block).await?);
        }
        Ok(logs)
    }

    /// One poll. The cursor only moves after the whole range was evaluated.
    pub async fn tick(&mut self) -> Result<TickOutcome, FetchError> {
        let head = self.effective_head().await?;
        let Some(range) = self.tracker.as_ref().and_then(|t| t.next_range(head)) else {
            return Ok(TickOutcome::Idle);
        };

        debug!("Processing blocks {} to {}", range.from, range.to);
        let (price, logs) = tokio::join!(self.oracle.get_price(), self.fetch_range(range));
        let quote = price?;
        let logs = logs?;
        let Some(quote) = quote else {
            return Ok(TickOutcome::PriceUnavailable(range));
        };

        let evaluation = evaluate_logs(&self.filter, &logs, quote.price);
        let mut alerts = evaluation.alerts;
        let mut duplicates = 0;
        if let Some(deduper) = self.deduper.as_mut() {
            alerts.retain(|a| {
                let fresh = deduper.first_seen(a.dedup_key());
                if !fresh {
                    duplicates += 1;
                }
                fresh
            });
        }

        if !alerts.is_empty() {
            attach_timestamps(self.chain.as_ref(), &mut alerts).await;
            self.reporter.report(&alerts).await;
        }

        if let Some(tracker) = self.tracker.as_mut() {
            tracker.advance(range.to);
        }

        Ok(TickOutcome::Processed {
            range,
            logs: logs.len(),
            skipped: evaluation.skipped,
            alerts: alerts.len(),
            duplicates,
        })
    }

    /// Polls until `shutdown` flips to true (or its sender is dropped).
    /// Only a fatal error ends the loop early.
    pub async fn run(
        &mut self,
        start_block: Option<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), FetchError> {
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, monitor stopping");
                return Ok(());
            }

            let delay = if self.tracker.is_none() {
                self.set_state(MonitorState::Init);
                match self.init(start_block).await {
                    Ok(()) => {
                        self.set_state(MonitorState::Polling);
                        Duration::ZERO
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Monitor start-up failed, retrying: {}", e);
                        self.settings.backoff
                    }
                }
            } else {
                self.set_state(MonitorState::Processing);
                match self.tick().await {
                    Ok(outcome) => {
                        self.set_state(MonitorState::Polling);
                        self.log_outcome(&outcome);
                        match outcome {
                            TickOutcome::PriceUnavailable(_) => self.settings.backoff,
                            _ => self.settings.poll_interval,
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Monitor aborting: {}", e);
                        return Err(e);
                    }
                    Err(e) => {
                        error!("Error processing blocks: {}", e);
                        self.set_state(MonitorState::Backoff);
                        self.settings.backoff
                    }
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown channel closed, monitor stopping");
                        return Ok(());
                    }
                }
            }
            if self.state == MonitorState::Backoff {
                self.set_state(MonitorState::Polling);
            }
        }
    }

    fn log_outcome(&self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Idle => {}
            TickOutcome::PriceUnavailable(range) => warn!(
                "Price unavailable, blocks {} to {} will be rescanned",
                range.from, range.to
            ),
            TickOutcome::Processed {
                range,
                logs,
                skipped,
                alerts,
                duplicates,
            } => info!(
                "Processed blocks {} to {}: {} logs, {} skipped, {} alerts, {} duplicates",
                range.from, range.to, logs, skipped, alerts, duplicates
            ),
        }
    }
}
