use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::month::Month;
use crate::models::task::{MAX_RATING, MIN_RATING};

pub fn ensure_score_range(field: &str, score: i32) -> AppResult<()> {
    if (MIN_RATING..=MAX_RATING).contains(&score) {
        Ok(())
    } else {
        Err(AppError::validation_with_details(
            format!("{field} 必须在 {MIN_RATING}-{MAX_RATING} 之间"),
            serde_json::json!({ "field": field, "value": score }),
        ))
    }
}

/// One self-authored dimension of the monthly evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfAssessment {
    pub score: i32,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub option: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverride {
    pub score: i32,
    #[serde(default)]
    pub comment: Option<String>,
    pub evaluator_id: String,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyEvaluationRecord {
    pub id: String,
    pub user_id: String,
    pub month: Month,
    pub culture_understanding: SelfAssessment,
    pub team_fit: SelfAssessment,
    /// Teammate ids as ranked by the author, best fit first.
    #[serde(default)]
    pub team_fit_ranking: Vec<String>,
    pub monthly_growth: SelfAssessment,
    pub biggest_contribution: SelfAssessment,
    #[serde(default)]
    pub admin_override: Option<AdminOverride>,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonthlyEvaluationRecord {
    pub fn validate(&self) -> AppResult<()> {
        ensure_score_range("culture_understanding", self.culture_understanding.score)?;
        ensure_score_range("team_fit", self.team_fit.score)?;
        ensure_score_range("monthly_growth", self.monthly_growth.score)?;
        ensure_score_range("biggest_contribution", self.biggest_contribution.score)?;
        if let Some(admin) = &self.admin_override {
            ensure_score_range("admin_final_score", admin.score)?;
        }
        if self.team_fit_ranking.iter().any(|id| *id == self.user_id) {
            return Err(AppError::validation("团队契合度排名不能包含自己"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfEvaluationInput {
    pub user_id: String,
    pub month: Month,
    pub culture_understanding: SelfAssessment,
    pub team_fit: SelfAssessment,
    #[serde(default)]
    pub team_fit_ranking: Vec<String>,
    pub monthly_growth: SelfAssessment,
    pub biggest_contribution: SelfAssessment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminScoreInput {
    pub user_id: String,
    pub month: Month,
    pub admin_id: String,
    pub score: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerEvaluationRecord {
    pub id: String,
    pub subject_id: String,
    pub evaluator_id: String,
    pub month: Month,
    pub score: i32,
    /// Position the evaluator placed the subject at, 1 = best.
    pub rank: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerEvaluationInput {
    pub subject_id: String,
    pub evaluator_id: String,
    pub score: i32,
    pub rank: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkHoursRecord {
    pub id: String,
    pub user_id: String,
    pub month: Month,
    pub hours: Decimal,
    pub recorded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminAction {
    Create,
    Update,
    Delete,
}

impl AdminAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AdminAction::Create => "create",
            AdminAction::Update => "update",
            AdminAction::Delete => "delete",
        }
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminAction {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "create" => Ok(AdminAction::Create),
            "update" => Ok(AdminAction::Update),
            "delete" => Ok(AdminAction::Delete),
            other => Err(AppError::database(format!("未知的管理员操作类型: {other}"))),
        }
    }
}

/// Audit row written every time an admin final score changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminEvaluationHistoryRecord {
    pub id: String,
    pub user_id: String,
    pub month: Month,
    pub admin_id: String,
    pub action: AdminAction,
    pub previous_score: Option<i32>,
    pub new_score: Option<i32>,
    pub previous_comment: Option<String>,
    pub new_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
