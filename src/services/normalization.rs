//! Pure mappings from raw monthly metrics onto the `[0, 10]` sub-score scale.
//!
//! None of these functions fail: out-of-range input is clamped and negative or
//! zero input scores 0.

use rust_decimal::Decimal;

use crate::models::settings::RevenueCurve;
use crate::utils::decimal::round2;

pub use crate::utils::decimal::clamp_score;

/// `min(hours / baseline × 10, 10)`.
pub fn hours_to_score(hours: Decimal, baseline: Decimal) -> Decimal {
    if hours <= Decimal::ZERO || baseline <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    clamp_score(hours / baseline * Decimal::TEN)
}

/// `completed / assigned`, 0 when nothing was assigned.
pub fn completion_rate(completed: u32, assigned: u32) -> Decimal {
    if assigned == 0 {
        return Decimal::ZERO;
    }
    Decimal::from(completed.min(assigned)) / Decimal::from(assigned)
}

/// Maps a rate in `[0, 1]` linearly onto `[0, 10]`.
pub fn completion_rate_to_score(rate: Decimal) -> Decimal {
    clamp_score(rate * Decimal::TEN)
}

pub fn revenue_to_score(revenue: Decimal, curve: &RevenueCurve) -> Decimal {
    if revenue <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let raw = match curve {
        RevenueCurve::Linear { full_score_at } => {
            if *full_score_at <= Decimal::ZERO {
                return Decimal::ZERO;
            }
            revenue / *full_score_at * Decimal::TEN
        }
        RevenueCurve::Saturating { half_score_at } => {
            if *half_score_at <= Decimal::ZERO {
                return Decimal::ZERO;
            }
            Decimal::TEN * revenue / (revenue + *half_score_at)
        }
        RevenueCurve::Piecewise { breakpoints } => {
            let (Some(first), Some(last)) = (breakpoints.first(), breakpoints.last()) else {
                return Decimal::ZERO;
            };
            if revenue <= first.revenue {
                first.score
            } else if revenue >= last.revenue {
                last.score
            } else {
                breakpoints
                    .windows(2)
                    .find(|pair| revenue >= pair[0].revenue && revenue <= pair[1].revenue)
                    .map(|pair| {
                        let (low, high) = (&pair[0], &pair[1]);
                        let span = high.revenue - low.revenue;
                        if span.is_zero() {
                            high.score
                        } else {
                            low.score + (revenue - low.revenue) / span * (high.score - low.score)
                        }
                    })
                    .unwrap_or(last.score)
            }
        }
    };

    clamp_score(raw)
}

/// Mean of 1–10 ratings on the sub-score scale; 0 when there are none.
pub fn mean_rating(ratings: &[i32]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let total: Decimal = ratings
        .iter()
        .map(|rating| clamp_score(Decimal::from(*rating)))
        .sum();
    round2(total / Decimal::from(ratings.len() as u64))
}
