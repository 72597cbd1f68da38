//! In-memory chain and price fakes shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers_core::types::Log;
use rust_decimal::Decimal;

use crate::error::FetchError;
use crate::ethereum::ChainSource;
use crate::models::{Kline, PriceQuote};
use crate::price::PriceSource;

pub struct MockChain {
    head: Mutex<u64>,
    logs: Mutex<Vec<Log>>,
    failing_fetches: Mutex<u32>,
    fetch_calls: Mutex<Vec<(u64, u64)>>,
    failing_timestamps: Mutex<HashSet<u64>>,
    timestamp_calls: Mutex<u32>,
    contract_check: Mutex<Result<(), FetchError>>,
    failing_contract_checks: Mutex<u32>,
    contract_checks: Mutex<u32>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head: Mutex::new(head),
            logs: Mutex::new(Vec::new()),
            failing_fetches: Mutex::new(0),
            fetch_calls: Mutex::new(Vec::new()),
            failing_timestamps: Mutex::new(HashSet::new()),
            timestamp_calls: Mutex::new(0),
            contract_check: Mutex::new(Ok(())),
            failing_contract_checks: Mutex::new(0),
            contract_checks: Mutex::new(0),
        }
    }

    pub fn timestamp_of(block: u64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + block as i64 * 12, 0).unwrap()
    }

    pub fn set_head(&self, head: u64) {
        *self.head.lock().unwrap() = head;
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    /// The next `n` log fetches fail transiently.
    pub fn fail_next_fetches(&self, n: u32) {
        *self.failing_fetches.lock().unwrap() = n;
    }

    pub fn fail_timestamp(&self, block: u64) {
        self.failing_timestamps.lock().unwrap().insert(block);
    }

    pub fn set_contract_check(&self, result: Result<(), FetchError>) {
        *self.contract_check.lock().unwrap() = result;
    }

    /// The next `n` contract checks fail transiently.
    pub fn fail_next_contract_checks(&self, n: u32) {
        *self.failing_contract_checks.lock().unwrap() = n;
    }

    pub fn contract_checks(&self) -> u32 {
        *self.contract_checks.lock().unwrap()
    }

    pub fn fetch_calls(&self) -> Vec<(u64, u64)> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn timestamp_calls(&self) -> u32 {
        *self.timestamp_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn latest_block_number(&self) -> Result<u64, FetchError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, FetchError> {
        self.fetch_calls.lock().unwrap().push((from_block, to_block));
        {
            let mut failing = self.failing_fetches.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(FetchError::Transient("node unavailable".to_string()));
            }
        }
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.block_number
                    .map(|b| (from_block..=to_block).contains(&b.as_u64()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>, FetchError> {
        *self.timestamp_calls.lock().unwrap() += 1;
        if self.failing_timestamps.lock().unwrap().contains(&block_number) {
            return Err(FetchError::Transient(format!("block {block_number} not found")));
        }
        Ok(Self::timestamp_of(block_number))
    }

    async fn verify_contract(&self) -> Result<(), FetchError> {
        *self.contract_checks.lock().unwrap() += 1;
        {
            let mut failing = self.failing_contract_checks.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(FetchError::Transient("node unavailable".to_string()));
            }
        }
        self.contract_check.lock().unwrap().clone()
    }
}

/// Serves queued responses first, then repeats the fallback.
pub struct MockPrice {
    queued: Mutex<VecDeque<Result<Decimal, FetchError>>>,
    fallback: Mutex<Result<Decimal, FetchError>>,
}

impl MockPrice {
    pub fn new(price: Decimal) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(price)),
        }
    }

    pub fn push(&self, response: Result<Decimal, FetchError>) {
        self.queued.lock().unwrap().push_back(response);
    }

    pub fn set(&self, response: Result<Decimal, FetchError>) {
        *self.fallback.lock().unwrap() = response;
    }
}

#[async_trait]
impl PriceSource for MockPrice {
    async fn fetch_price(&self) -> Result<PriceQuote, FetchError> {
        let next = self.queued.lock().unwrap().pop_front();
        let price = match next {
            Some(response) => response,
            None => self.fallback.lock().unwrap().clone(),
        }?;
        Ok(PriceQuote {
            price,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_klines(&self, _: &str, _: u32) -> Result<Vec<Kline>, FetchError> {
        Ok(Vec::new())
    }
}
