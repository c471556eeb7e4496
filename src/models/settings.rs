use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::performance::DimensionScores;

/// Weight of each dimension in the final score, as fractions of 1.
///
/// The documented defaults add up to 0.95, not 1. See [`WeightSumPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DimensionWeights {
    pub work_hours: Decimal,
    pub completion_rate: Decimal,
    pub avg_difficulty: Decimal,
    pub revenue: Decimal,
    pub department_avg: Decimal,
    pub task_rating: Decimal,
    pub culture_understanding: Decimal,
    pub team_fit: Decimal,
    pub monthly_growth: Decimal,
    pub biggest_contribution: Decimal,
    pub peer_evaluation: Decimal,
    pub admin_final: Decimal,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            work_hours: dec!(0.10),
            completion_rate: dec!(0.15),
            avg_difficulty: dec!(0.10),
            revenue: dec!(0.10),
            department_avg: dec!(0.05),
            task_rating: dec!(0.10),
            culture_understanding: dec!(0.05),
            team_fit: dec!(0.03),
            monthly_growth: dec!(0.03),
            biggest_contribution: dec!(0.04),
            peer_evaluation: dec!(0.05),
            admin_final: dec!(0.15),
        }
    }
}

impl DimensionWeights {
    fn entries(&self) -> [(&'static str, Decimal); 12] {
        [
            ("work_hours", self.work_hours),
            ("completion_rate", self.completion_rate),
            ("avg_difficulty", self.avg_difficulty),
            ("revenue", self.revenue),
            ("department_avg", self.department_avg),
            ("task_rating", self.task_rating),
            ("culture_understanding", self.culture_understanding),
            ("team_fit", self.team_fit),
            ("monthly_growth", self.monthly_growth),
            ("biggest_contribution", self.biggest_contribution),
            ("peer_evaluation", self.peer_evaluation),
            ("admin_final", self.admin_final),
        ]
    }

    pub fn sum(&self) -> Decimal {
        self.entries().iter().map(|(_, weight)| *weight).sum()
    }

    /// Σ score × weight, unscaled and unrounded.
    pub fn weighted_sum(&self, scores: &DimensionScores) -> Decimal {
        scores.work_hours * self.work_hours
            + scores.completion_rate * self.completion_rate
            + scores.avg_difficulty * self.avg_difficulty
            + scores.revenue * self.revenue
            + scores.department_avg * self.department_avg
            + scores.task_rating * self.task_rating
            + scores.culture_understanding * self.culture_understanding
            + scores.team_fit * self.team_fit
            + scores.monthly_growth * self.monthly_growth
            + scores.biggest_contribution * self.biggest_contribution
            + scores.peer_evaluation * self.peer_evaluation
            + scores.admin_final * self.admin_final
    }

    fn validate(&self) -> AppResult<()> {
        if let Some((name, _)) = self
            .entries()
            .into_iter()
            .find(|(_, weight)| *weight < Decimal::ZERO)
        {
            return Err(AppError::config(format!("权重 {name} 不能为负数")));
        }
        if self.sum() <= Decimal::ZERO {
            return Err(AppError::config("权重之和必须大于 0"));
        }
        Ok(())
    }
}

/// What to do when the weights do not add up to exactly 1.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WeightSumPolicy {
    /// Use the weights verbatim; the maximum reachable score is `sum × 100`.
    #[default]
    AsIs,
    /// Divide by the actual weight sum so all-maximum inputs reach 100.
    Rescale,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevenueBreakpoint {
    pub revenue: Decimal,
    pub score: Decimal,
}

/// Monotonic curve mapping monthly revenue onto `[0, 10]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RevenueCurve {
    /// `min(revenue / full_score_at × 10, 10)`.
    Linear { full_score_at: Decimal },
    /// `10 × revenue / (revenue + half_score_at)`; approaches 10 without reaching it.
    Saturating { half_score_at: Decimal },
    /// Linear interpolation between ascending breakpoints, clamped at both ends.
    Piecewise { breakpoints: Vec<RevenueBreakpoint> },
}

impl Default for RevenueCurve {
    fn default() -> Self {
        RevenueCurve::Linear {
            full_score_at: dec!(100000),
        }
    }
}

impl RevenueCurve {
    fn validate(&self) -> AppResult<()> {
        match self {
            RevenueCurve::Linear { full_score_at } if *full_score_at <= Decimal::ZERO => {
                Err(AppError::config("full_score_at 必须大于 0"))
            }
            RevenueCurve::Saturating { half_score_at } if *half_score_at <= Decimal::ZERO => {
                Err(AppError::config("half_score_at 必须大于 0"))
            }
            RevenueCurve::Piecewise { breakpoints } => {
                if breakpoints.is_empty() {
                    return Err(AppError::config("分段曲线至少需要一个断点"));
                }
                if breakpoints
                    .iter()
                    .any(|point| point.score < Decimal::ZERO || point.score > Decimal::TEN)
                {
                    return Err(AppError::config("断点分值必须在 0-10 之间"));
                }
                let ascending = breakpoints.windows(2).all(|pair| {
                    pair[0].revenue < pair[1].revenue && pair[0].score <= pair[1].score
                });
                if !ascending {
                    return Err(AppError::config("断点必须按金额严格递增且分值单调不减"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// `factor = average_rating / 10 × span + base`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewAdjustment {
    pub base: Decimal,
    pub span: Decimal,
}

impl Default for ReviewAdjustment {
    fn default() -> Self {
        Self {
            base: dec!(0.7),
            span: dec!(0.3),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: DimensionWeights,
    pub weight_sum_policy: WeightSumPolicy,
    /// Monthly hours that earn the full work-hours score.
    pub work_hours_baseline: Decimal,
    pub revenue_curve: RevenueCurve,
    /// Multiplier applied to every share of a postponed task.
    pub postponement_penalty: Decimal,
    pub review_adjustment: ReviewAdjustment,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            weight_sum_policy: WeightSumPolicy::default(),
            work_hours_baseline: dec!(300),
            revenue_curve: RevenueCurve::default(),
            postponement_penalty: dec!(0.8),
            review_adjustment: ReviewAdjustment::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> AppResult<()> {
        self.weights.validate()?;
        self.revenue_curve.validate()?;

        if self.work_hours_baseline <= Decimal::ZERO {
            return Err(AppError::config("work_hours_baseline 必须大于 0"));
        }
        if self.postponement_penalty <= Decimal::ZERO || self.postponement_penalty >= Decimal::ONE
        {
            return Err(AppError::config("postponement_penalty 必须在 (0, 1) 之间"));
        }
        if self.review_adjustment.base <= Decimal::ZERO
            || self.review_adjustment.span < Decimal::ZERO
        {
            return Err(AppError::config("review_adjustment 参数无效"));
        }
        Ok(())
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let config: ScoringConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn to_yaml_string(&self) -> AppResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
