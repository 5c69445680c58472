//! Input checks shared by the deposit and withdrawal flows
//!
//! Amount bounds, destination address formats and the withdrawal fee
//! breakdown. All functions are pure.

use crate::types::ValidationError;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Network a destination address belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Bitcoin,
    Ethereum,
    Tron,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "Bitcoin",
            Network::Ethereum => "Ethereum",
            Network::Tron => "Tron",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn all_in(s: &str, alphabet: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| alphabet.contains(c))
}

/// Detect the network of a syntactically valid address
///
/// Accepted formats:
/// - Bitcoin legacy / P2SH: `1` or `3` prefix, 26-35 base58 characters
/// - Bitcoin bech32: `bc1` prefix, 42-62 characters from the bech32 charset
/// - Ethereum: `0x` followed by 40 hex digits
/// - Tron: `T` prefix, 34 base58 characters
///
/// This is a format check only; no checksum is verified.
pub fn detect_network(address: &str) -> Option<Network> {
    let address = address.trim();
    let len = address.len();

    if let Some(rest) = address.strip_prefix("bc1") {
        return ((42..=62).contains(&len) && all_in(rest, BECH32_CHARSET)).then_some(Network::Bitcoin);
    }
    if let Some(hex) = address.strip_prefix("0x") {
        return (hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .then_some(Network::Ethereum);
    }
    if address.starts_with('T') {
        return (len == 34 && all_in(address, BASE58_ALPHABET)).then_some(Network::Tron);
    }
    if address.starts_with('1') || address.starts_with('3') {
        return ((26..=35).contains(&len) && all_in(address, BASE58_ALPHABET))
            .then_some(Network::Bitcoin);
    }
    None
}

/// Check `amount` against an inclusive `[minimum, maximum]` range
pub fn check_amount_bounds(
    amount: Decimal,
    minimum: Decimal,
    maximum: Decimal,
) -> Option<ValidationError> {
    if amount < minimum {
        Some(ValidationError::AmountBelowMinimum { amount, minimum })
    } else if amount > maximum {
        Some(ValidationError::AmountAboveMaximum { amount, maximum })
    } else {
        None
    }
}

/// Fees charged on a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub network_fee: Decimal,
    pub processing_fee: Decimal,
    pub total_fees: Decimal,
    /// What reaches the destination: amount minus fees
    pub net_amount: Decimal,
}

impl FeeBreakdown {
    /// Flat `network_fee` plus `processing_fee_pct` percent of `amount`,
    /// rounded half-up to cents
    pub fn compute(amount: Decimal, network_fee: Decimal, processing_fee_pct: Decimal) -> Self {
        let processing_fee = (amount * processing_fee_pct / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let total_fees = network_fee + processing_fee;
        Self {
            network_fee,
            processing_fee,
            total_fees,
            net_amount: amount - total_fees,
        }
    }
}

/// Secondary-unit amount for a deposit quote: `amount * rate` at 8 places
pub fn convert_to_secondary(amount: Decimal, rate: Decimal) -> Decimal {
    (amount * rate).round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero)
}
