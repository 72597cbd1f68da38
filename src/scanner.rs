use std::sync::Arc;

use log::{info, warn};

use crate::decoder::decode_all;
use crate::error::FetchError;
use crate::ethereum::ChainSource;
use crate::filter::AlertFilter;
use crate::models::{Alert, PriceQuote};
use crate::pipeline::{attach_timestamps, evaluate_logs};
use crate::price::{PriceOracle, PriceSource};
use crate::tracker::BlockRange;

#[derive(Debug)]
pub struct ScanReport {
    pub range: BlockRange,
    pub logs: usize,
    pub skipped: usize,
    pub quote: Option<PriceQuote>,
    pub alerts: Vec<Alert>,
}

/// One-shot scan of a fixed window ending at the chain head.
pub struct Scanner<C, P> {
    chain: Arc<C>,
    oracle: PriceOracle<P>,
    filter: AlertFilter,
    lookback_blocks: u64,
}

impl<C: ChainSource, P: PriceSource> Scanner<C, P> {
    pub fn new(
        chain: Arc<C>,
        oracle: PriceOracle<P>,
        filter: AlertFilter,
        lookback_blocks: u64,
    ) -> Self {
        Self {
            chain,
            oracle,
            filter,
            lookback_blocks,
        }
    }

    pub async fn scan(&self) -> Result<ScanReport, FetchError> {
        let head = self.chain.latest_block_number().await?;
        self.scan_range(BlockRange::lookback(head, self.lookback_blocks))
            .await
    }

    /// Fetches the whole range in one call and evaluates it against one price.
    pub async fn scan_range(&self, range: BlockRange) -> Result<ScanReport, FetchError> {
        info!(
            "Scanning blocks {} to {} ({} blocks)",
            range.from,
            range.to,
            range.len()
        );

        let (logs, price) = tokio::join!(
            self.chain.fetch_logs(range.from, range.to),
            self.oracle.get_price()
        );
        let quote = price?;
        let logs = logs?;

        let Some(quote) = quote else {
            warn!("No price available, no alerts for this scan");
            let (_, skipped) = decode_all(&logs);
            return Ok(ScanReport {
                range,
                logs: logs.len(),
                skipped,
                quote: None,
                alerts: Vec::new(),
            });
        };

        let evaluation = evaluate_logs(&self.filter, &logs, quote.price);
        let mut alerts = evaluation.alerts;
        attach_timestamps(self.chain.as_ref(), &mut alerts).await;

        info!(
            "Found {} alerts in {} transfer logs ({} skipped) at price {}",
            alerts.len(),
            logs.len(),
            evaluation.skipped,
            quote.price
        );

        Ok(ScanReport {
            range,
            logs: logs.len(),
            skipped: evaluation.skipped,
            quote: Some(quote),
            alerts,
        })
    }
}
