use ethers_core::types::{Address, Log, H256, U256};
use log::warn;

use crate::error::DecodeError;
use crate::ethereum::transfer_topic;
use crate::models::TransferRecord;

/// Parses one `Transfer(address indexed, address indexed, uint256)` log.
pub fn decode(log: &Log) -> Result<TransferRecord, DecodeError> {
    if log.topics.len() != 3 {
        return Err(DecodeError::TopicCount(log.topics.len()));
    }
    if log.topics[0] != transfer_topic() {
        return Err(DecodeError::UnexpectedSignature);
    }

    let sender = topic_address(&log.topics[1], 1)?;
    let recipient = topic_address(&log.topics[2], 2)?;
    let raw_amount = decode_amount(&log.data)?;

    let block_number = log
        .block_number
        .ok_or(DecodeError::MissingField("block number"))?
        .as_u64();
    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField("transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or(DecodeError::MissingField("log index"))?
        .as_u64();

    Ok(TransferRecord {
        sender,
        recipient,
        raw_amount,
        block_number,
        transaction_hash,
        log_index,
    })
}

/// Decodes every log, logging and skipping the ones that fail.
/// Returns the records and the number of skipped entries.
pub fn decode_all(logs: &[Log]) -> (Vec<TransferRecord>, usize) {
    let mut records = Vec::with_capacity(logs.len());
    let mut skipped = 0;

    for log in logs {
        match decode(log) {
            Ok(record) => records.push(record),
            Err(e) => {
                skipped += 1;
                warn!(
                    "Skipping log {:?} in block {:?}: {}",
                    log.transaction_hash,
                    log.block_number,
                    e
                );
            }
        }
    }

    (records, skipped)
}

// Indexed addresses are left-padded to 32 bytes.
fn topic_address(topic: &H256, index: usize) -> Result<Address, DecodeError> {
    let bytes = topic.as_bytes();
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::InvalidAddressTopic(index));
    }
    Ok(Address::from_slice(&bytes[12..]))
}

fn decode_amount(data: &[u8]) -> Result<U256, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::EmptyData);
    }
    if data.len() > 32 {
        return Err(DecodeError::OversizedData(data.len()));
    }
    Ok(U256::from_big_endian(data))
}
