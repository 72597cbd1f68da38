use chrono::{DateTime, Utc};
use ethers_core::types::{Address, H256, U256};
use ethers_core::utils::to_checksum;
use rust_decimal::Decimal;
use serde::Serialize;

/// One decoded ERC-20 `Transfer` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub sender: Address,
    pub recipient: Address,
    pub raw_amount: U256,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceQuote {
    pub price: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// A transfer into an allowlisted address whose fiat value reached the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub sender: Address,
    pub recipient: Address,
    pub token_amount: Decimal,
    pub fiat_value: Decimal,
    pub block_number: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl Alert {
    /// Identifies the log the alert was raised for.
    pub fn dedup_key(&self) -> (H256, u64) {
        (self.transaction_hash, self.log_index)
    }

    pub fn sender_checksum(&self) -> String {
        to_checksum(&self.sender, None)
    }

    pub fn recipient_checksum(&self) -> String {
        to_checksum(&self.recipient, None)
    }

    pub fn transaction_hash_hex(&self) -> String {
        format!("0x{:x}", self.transaction_hash)
    }
}

/// Alert as stored in and read back from the alert history.
#[derive(Debug, Clone, Serialize)]
pub struct StoredAlert {
    pub transaction_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub from_address: String,
    pub to_address: String,
    pub token_amount: String,
    pub fiat_value: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AlertStats {
    pub total_alerts: i64,
    pub unique_senders: i64,
    pub unique_recipients: i64,
    pub latest_block: Option<i64>,
    pub earliest_block: Option<i64>,
}

/// One candle of the kline series; only the fields the chart overlay uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub close: Decimal,
}
