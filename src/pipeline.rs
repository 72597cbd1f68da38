use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ethers_core::types::Log;
use log::{info, warn};
use rust_decimal::Decimal;

use crate::decoder::decode_all;
use crate::ethereum::ChainSource;
use crate::filter::AlertFilter;
use crate::models::Alert;

/// Result of running one batch of logs through the decoder and filter.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub decoded: usize,
    pub skipped: usize,
    pub alerts: Vec<Alert>,
}

/// Decodes `logs` and evaluates every record against a single price snapshot.
pub fn evaluate_logs(filter: &AlertFilter, logs: &[Log], price: Decimal) -> Evaluation {
    let (records, skipped) = decode_all(logs);
    let alerts: Vec<Alert> = records
        .iter()
        .filter_map(|record| filter.evaluate(record, price))
        .collect();

    for alert in &alerts {
        info!(
            "Alert: {:.2} tokens (~{:.2}) from {} to {} in block {}",
            alert.token_amount,
            alert.fiat_value,
            alert.sender_checksum(),
            alert.recipient_checksum(),
            alert.block_number
        );
    }

    Evaluation {
        decoded: records.len(),
        skipped,
        alerts,
    }
}

/// Fills in block timestamps, one lookup per distinct block. A failed lookup
/// leaves the timestamp empty.
pub async fn attach_timestamps<C: ChainSource + ?Sized>(chain: &C, alerts: &mut [Alert]) {
    let mut cache: HashMap<u64, Option<DateTime<Utc>>> = HashMap::new();

    for alert in alerts.iter_mut() {
        if let Some(cached) = cache.get(&alert.block_number) {
            alert.timestamp = *cached;
            continue;
        }
        let timestamp = match chain.block_timestamp(alert.block_number).await {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("No timestamp for block {}: {}", alert.block_number, e);
                None
            }
        };
        cache.insert(alert.block_number, timestamp);
        alert.timestamp = timestamp;
    }
}
