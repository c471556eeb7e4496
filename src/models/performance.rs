use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::month::Month;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreStatus {
    /// The admin final score is still missing.
    Pending,
    Complete,
}

impl ScoreStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreStatus::Pending => "pending",
            ScoreStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for ScoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(ScoreStatus::Pending),
            "complete" => Ok(ScoreStatus::Complete),
            other => Err(AppError::database(format!("未知的绩效状态: {other}"))),
        }
    }
}

/// Normalized `[0, 10]` score of every dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionScores {
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

/// Unnormalized figures behind the dimension scores, kept for auditing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMetrics {
    pub work_hours: Decimal,
    pub assigned_tasks: u32,
    pub completed_tasks: u32,
    pub completion_rate: Decimal,
    pub total_revenue: Decimal,
    pub okr_total: Decimal,
    pub department_okr_average: Decimal,
    pub department_members: u32,
    pub review_count: u32,
    pub peer_evaluation_count: u32,
    pub team_fit_rankings: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceScore {
    pub user_id: String,
    pub month: Month,
    pub dimensions: DimensionScores,
    pub raw: RawMetrics,
    /// Weighted result on the 0-100 scale, 2 dp.
    pub final_score: Decimal,
    /// 1-based position within the month; `None` until ranking has run.
    pub rank: Option<u32>,
    pub status: ScoreStatus,
    pub computed_at: DateTime<Utc>,
}

impl PerformanceScore {
    pub fn is_pending(&self) -> bool {
        self.status == ScoreStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentReport {
    pub department: String,
    pub month: Month,
    pub total_okr_score: Decimal,
    pub member_count: u32,
    pub avg_score: Decimal,
    pub completed_tasks: u32,
    pub avg_difficulty: Decimal,
    pub generated_at: DateTime<Utc>,
}
