use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationRole {
    Owner,
    Collaborator,
}

impl AllocationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocationRole::Owner => "owner",
            AllocationRole::Collaborator => "collaborator",
        }
    }
}

impl fmt::Display for AllocationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllocationRole {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "owner" => Ok(AllocationRole::Owner),
            "collaborator" => Ok(AllocationRole::Collaborator),
            other => Err(AppError::database(format!("未知的分配角色: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreAllocation {
    pub task_id: String,
    pub user_id: String,
    pub role: AllocationRole,
    pub base_share: Decimal,
    pub adjusted_share: Decimal,
    pub percentage: Decimal,
}

/// How one finished task's difficulty value was split among its contributors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDistribution {
    pub task_id: String,
    /// Equal to the task difficulty.
    pub total_value: Decimal,
    pub adjustment_factor: Decimal,
    pub penalty_factor: Decimal,
    pub review_count: u32,
    pub average_rating: Option<Decimal>,
    pub allocations: Vec<ScoreAllocation>,
    pub computed_at: DateTime<Utc>,
}

impl ScoreDistribution {
    pub fn base_total(&self) -> Decimal {
        self.allocations.iter().map(|a| a.base_share).sum()
    }

    pub fn adjusted_total(&self) -> Decimal {
        self.allocations.iter().map(|a| a.adjusted_share).sum()
    }

    pub fn allocation_for(&self, user_id: &str) -> Option<&ScoreAllocation> {
        self.allocations.iter().find(|a| a.user_id == user_id)
    }

    pub fn owner_allocation(&self) -> Option<&ScoreAllocation> {
        self.allocations
            .iter()
            .find(|a| a.role == AllocationRole::Owner)
    }
}
