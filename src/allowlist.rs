use std::collections::HashSet;

use ethers_core::types::Address;
use ethers_core::utils::to_checksum;

use crate::error::ConfigError;

/// Parses a hex address. Mixed-case input must carry a valid EIP-55 checksum;
/// all-lowercase or all-uppercase input is accepted as is.
pub fn parse_address(value: &str) -> Result<Address, ConfigError> {
    let trimmed = value.trim();
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if digits.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }

    let address = digits
        .parse::<Address>()
        .map_err(|e| invalid(&e.to_string()))?;

    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper && &to_checksum(&address, None)[2..] != digits {
        return Err(invalid("checksum mismatch"));
    }

    Ok(address)
}

/// Exchange deposit addresses a transfer must land in to be alertable.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    addresses: HashSet<Address>,
}

impl Allowlist {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, ConfigError> {
        let addresses = values
            .iter()
            .map(|v| parse_address(v.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if addresses.is_empty() {
            return Err(ConfigError::Invalid("allowlist is empty".to_string()));
        }
        Ok(Self::new(addresses))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }
}
