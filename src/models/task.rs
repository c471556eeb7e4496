use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const MIN_DIFFICULTY: u8 = 1;
pub const MAX_DIFFICULTY: u8 = 10;
pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Postponed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Postponed => "postponed",
        }
    }

    /// Completed and postponed tasks carry a score distribution.
    pub fn is_scorable(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Postponed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "not_started" => Ok(TaskStatus::NotStarted),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "postponed" => Ok(TaskStatus::Postponed),
            other => Err(AppError::validation(format!("未知的任务状态: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub difficulty: u8,
    pub revenue: Decimal,
    pub status: TaskStatus,
    pub owner_id: String,
    #[serde(default)]
    pub collaborator_ids: Vec<String>,
    #[serde(default)]
    pub postponement_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn involves(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.collaborator_ids.iter().any(|id| id == user_id)
    }

    /// Collaborators sorted by id, without duplicates and without the owner.
    pub fn normalized_collaborators(&self) -> Vec<String> {
        let mut collaborators: Vec<String> = self
            .collaborator_ids
            .iter()
            .filter(|id| **id != self.owner_id)
            .cloned()
            .collect();
        collaborators.sort();
        collaborators.dedup();
        collaborators
    }

    pub fn is_completed_in(&self, month: &crate::models::month::Month) -> bool {
        self.status == TaskStatus::Completed
            && self
                .completed_at
                .as_ref()
                .is_some_and(|completed_at| month.contains(completed_at))
    }

    /// Checks the record invariants collaborators are expected to uphold.
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(AppError::validation_with_details(
                format!("任务难度必须在 {MIN_DIFFICULTY}-{MAX_DIFFICULTY} 之间"),
                serde_json::json!({ "field": "difficulty", "value": self.difficulty }),
            ));
        }

        if self.revenue < Decimal::ZERO {
            return Err(AppError::validation_with_details(
                "变现金额不能为负数",
                serde_json::json!({ "field": "revenue", "value": self.revenue.to_string() }),
            ));
        }

        if self.owner_id.trim().is_empty() {
            return Err(AppError::validation("任务必须指定负责人"));
        }

        if self.collaborator_ids.iter().any(|id| *id == self.owner_id) {
            return Err(AppError::validation("负责人不能同时是协作者"));
        }

        let has_reason = self
            .postponement_reason
            .as_deref()
            .is_some_and(|reason| !reason.trim().is_empty());
        match (self.status, has_reason) {
            (TaskStatus::Postponed, false) => {
                Err(AppError::validation("推迟的任务必须填写推迟原因"))
            }
            (status, true) if status != TaskStatus::Postponed => {
                Err(AppError::validation("只有推迟的任务才能填写推迟原因"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: String,
    pub task_id: String,
    pub reviewer_id: String,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCreateInput {
    pub task_id: String,
    pub reviewer_id: String,
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreateInput {
    pub title: String,
    pub difficulty: u8,
    #[serde(default)]
    pub revenue: Decimal,
    pub owner_id: String,
    #[serde(default)]
    pub collaborator_ids: Vec<String>,
}

/// A status transition; `completed_at` defaults to now when completing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusChange {
    pub status: TaskStatus,
    #[serde(default)]
    pub postponement_reason: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn task(status: TaskStatus, reason: Option<&str>) -> TaskRecord {
        TaskRecord {
            id: "t1".into(),
            title: "Build auth module".into(),
            difficulty: 8,
            revenue: dec!(10000),
            status,
            owner_id: "owner".into(),
            collaborator_ids: vec!["b".into(), "a".into(), "b".into()],
            postponement_reason: reason.map(str::to_string),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn normalized_collaborators_are_sorted_and_unique() {
        let record = task(TaskStatus::Completed, None);
        assert_eq!(record.normalized_collaborators(), vec!["a", "b"]);
        assert!(record.involves("a"));
        assert!(record.involves("owner"));
        assert!(!record.involves("c"));
    }

    #[test]
    fn postponed_task_requires_reason() {
        assert!(task(TaskStatus::Postponed, None).validate().is_err());
        assert!(task(TaskStatus::Postponed, Some("  ")).validate().is_err());
        assert!(task(TaskStatus::Postponed, Some("vendor delay")).validate().is_ok());
        assert!(task(TaskStatus::Completed, Some("vendor delay")).validate().is_err());
    }

    #[test]
    fn difficulty_and_revenue_are_range_checked() {
        let mut record = task(TaskStatus::Completed, None);
        record.difficulty = 11;
        assert!(record.validate().is_err());

        let mut record = task(TaskStatus::Completed, None);
        record.revenue = dec!(-1);
        assert!(record.validate().is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TaskStatus::NotStarted,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Postponed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }
}
