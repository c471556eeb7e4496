use serde::{Deserialize, Serialize};

use crate::models::month::Month;

/// Events after which some stored result is stale and has to be recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecomputeTrigger {
    ReviewAdded { task_id: String },
    PostponementChanged { task_id: String },
    TaskCompleted { task_id: String },
    AdminEvaluationChanged { user_id: String, month: Month },
    PeerEvaluationAdded { subject_id: String, month: Month },
    WorkHoursRecorded { user_id: String, month: Month },
    MonthlyRecompute { month: Month },
}

impl RecomputeTrigger {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            RecomputeTrigger::ReviewAdded { task_id }
            | RecomputeTrigger::PostponementChanged { task_id }
            | RecomputeTrigger::TaskCompleted { task_id } => Some(task_id),
            _ => None,
        }
    }
}
