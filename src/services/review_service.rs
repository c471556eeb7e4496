use chrono::Utc;
use tracing::info;

use crate::db::repositories::review_repository::ReviewRepository;
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::evaluation::ensure_score_range;
use crate::models::task::{ReviewCreateInput, ReviewRecord};
use crate::models::trigger::RecomputeTrigger;

pub struct ReviewService {
    db: DbPool,
}

impl ReviewService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Stores a review of a finished task. Contributors cannot review their own
    /// task and every reviewer gets one review per task.
    pub fn submit_review(
        &self,
        input: ReviewCreateInput,
    ) -> AppResult<(ReviewRecord, RecomputeTrigger)> {
        ensure_score_range("rating", input.rating)?;
        let reviewer_id = input.reviewer_id.trim().to_string();
        if reviewer_id.is_empty() {
            return Err(AppError::validation("评价人不能为空"));
        }

        let review = self.db.with_transaction(|tx| {
            let task = TaskRepository::find_by_id(tx, &input.task_id)?
                .ok_or_else(AppError::not_found)?;

            if !task.status.is_scorable() {
                return Err(AppError::validation_with_details(
                    "只能评价已完成或已推迟的任务",
                    serde_json::json!({ "taskId": task.id, "status": task.status.as_str() }),
                ));
            }
            if task.involves(&reviewer_id) {
                return Err(AppError::validation("任务参与者不能评价自己的任务"));
            }
            if ReviewRepository::exists_for(tx, &task.id, &reviewer_id)? {
                return Err(AppError::conflict("该用户已经评价过此任务"));
            }

            let review = ReviewRecord {
                id: uuid::Uuid::new_v4().to_string(),
                task_id: task.id,
                reviewer_id: reviewer_id.clone(),
                rating: input.rating,
                comment: input
                    .comment
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty()),
                is_anonymous: input.is_anonymous,
                created_at: Utc::now(),
            };
            ReviewRepository::insert(tx, &review)?;
            Ok(review)
        })?;

        info!(
            target: "app::review",
            task_id = %review.task_id,
            rating = review.rating,
            "task review submitted"
        );
        let trigger = RecomputeTrigger::ReviewAdded {
            task_id: review.task_id.clone(),
        };
        Ok((review, trigger))
    }

    pub fn list_reviews(&self, task_id: &str) -> AppResult<Vec<ReviewRecord>> {
        self.db
            .with_connection(|conn| ReviewRepository::list_by_task(conn, task_id))
    }
}
