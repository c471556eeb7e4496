//! Fixed-point helpers shared by the scoring services.
//!
//! Every persisted score is rounded half away from zero to two decimal places.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};

pub const SCORE_MIN: Decimal = Decimal::ZERO;
pub const SCORE_MAX: Decimal = Decimal::TEN;

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round3(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero)
}

pub fn clamp(value: Decimal, min: Decimal, max: Decimal) -> Decimal {
    value.max(min).min(max)
}

/// Clamps into the common `[0, 10]` sub-score range and rounds to 2 dp.
pub fn clamp_score(value: Decimal) -> Decimal {
    round2(clamp(value, SCORE_MIN, SCORE_MAX))
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let total: Decimal = values.iter().copied().sum();
    Some(total / Decimal::from(values.len() as u64))
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

pub fn parse_decimal(raw: &str) -> AppResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|err| AppError::database(format!("无法解析小数 {raw:?}: {err}")))
}
