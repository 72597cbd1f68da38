use std::collections::{HashSet, VecDeque};

use ethers_core::types::{H256, U256};
use log::warn;
use rust_decimal::Decimal;

use crate::allowlist::Allowlist;
use crate::models::{Alert, TransferRecord};

/// Largest mantissa a `Decimal` can carry.
const DECIMAL_MANTISSA_BITS: usize = 96;

/// Converts base units to whole tokens. `None` when the amount cannot be
/// represented as a `Decimal`.
pub fn scale_amount(raw: U256, decimals: u32) -> Option<Decimal> {
    let unit = U256::exp10(decimals as usize);
    let whole = raw / unit;
    let fraction = raw % unit;
    if whole.bits() > DECIMAL_MANTISSA_BITS {
        return None;
    }

    let whole = Decimal::try_from_i128_with_scale(whole.as_u128() as i128, 0).ok()?;
    let fraction = Decimal::try_from_i128_with_scale(fraction.as_u128() as i128, decimals).ok()?;
    whole.checked_add(fraction)
}

/// Allowlist and fiat threshold gate.
pub struct AlertFilter {
    allowlist: Allowlist,
    threshold: Decimal,
    decimals: u32,
}

impl AlertFilter {
    pub fn new(allowlist: Allowlist, threshold: Decimal, decimals: u32) -> Self {
        Self {
            allowlist,
            threshold,
            decimals,
        }
    }

    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    /// An alert iff the recipient is allowlisted and the fiat value is at
    /// least the threshold.
    pub fn evaluate(&self, record: &TransferRecord, price: Decimal) -> Option<Alert> {
        if !self.allowlist.contains(&record.recipient) {
            return None;
        }

        let Some(token_amount) = scale_amount(record.raw_amount, self.decimals) else {
            warn!(
                "Transfer 0x{:x}#{} amount {} is out of decimal range, not evaluated",
                record.transaction_hash, record.log_index, record.raw_amount
            );
            return None;
        };
        let Some(fiat_value) = token_amount.checked_mul(price) else {
            warn!(
                "Transfer 0x{:x}#{} fiat value overflows at price {}, not evaluated",
                record.transaction_hash, record.log_index, price
            );
            return None;
        };

        if fiat_value < self.threshold {
            return None;
        }

        Some(Alert {
            sender: record.sender,
            recipient: record.recipient,
            token_amount,
            fiat_value,
            block_number: record.block_number,
            timestamp: None,
            transaction_hash: record.transaction_hash,
            log_index: record.log_index,
        })
    }
}

/// Remembers the most recent `(transaction hash, log index)` keys so a log
/// re-scanned after a retried tick raises at most one alert.
pub struct AlertDeduper {
    seen: HashSet<(H256, u64)>,
    order: VecDeque<(H256, u64)>,
    capacity: usize,
}

impl AlertDeduper {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// True the first time a key is offered.
    pub fn first_seen(&mut self, key: (H256, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}
