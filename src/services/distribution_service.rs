use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::db::repositories::distribution_repository::DistributionRepository;
use crate::db::repositories::review_repository::ReviewRepository;
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::distribution::{AllocationRole, ScoreAllocation, ScoreDistribution};
use crate::models::month::Month;
use crate::models::settings::{ReviewAdjustment, ScoringConfig};
use crate::models::task::{ReviewRecord, TaskRecord, TaskStatus, MAX_DIFFICULTY, MIN_DIFFICULTY};
use crate::utils::decimal::{clamp, from_cents, mean, round2, round3};
use crate::utils::locks::EngineLocks;

/// Review adjustment of one task: the factor and the average it came from.
///
/// Ratings are clamped into `[1, 10]` first; no reviews means a neutral 1.0.
pub fn adjustment_factor(
    ratings: &[i32],
    adjustment: &ReviewAdjustment,
) -> (Decimal, Option<Decimal>) {
    let clamped: Vec<Decimal> = ratings
        .iter()
        .map(|rating| clamp(Decimal::from(*rating), Decimal::ONE, Decimal::TEN))
        .collect();

    match mean(&clamped) {
        Some(average) => {
            let factor = round3(average / Decimal::TEN * adjustment.span + adjustment.base);
            (factor, Some(round2(average)))
        }
        None => (Decimal::ONE, None),
    }
}

/// Splits `total_cents` between the owner and the sorted collaborators.
fn split_cents(total_cents: i64, collaborators: usize) -> (i64, Vec<i64>) {
    if collaborators == 0 {
        return (total_cents, Vec::new());
    }

    let owner = total_cents / 2;
    let rest = total_cents - owner;
    let count = collaborators as i64;
    let each = rest / count;
    let leftover = rest % count;

    let shares = (0..count)
        .map(|index| if index < leftover { each + 1 } else { each })
        .collect();
    (owner, shares)
}

/// Computes the distribution of one finished task without touching storage.
pub fn distribute(
    task: &TaskRecord,
    reviews: &[ReviewRecord],
    config: &ScoringConfig,
    computed_at: DateTime<Utc>,
) -> AppResult<ScoreDistribution> {
    if !task.status.is_scorable() {
        return Err(AppError::validation_with_details(
            "只有已完成或已推迟的任务才能分配分值",
            serde_json::json!({ "taskId": task.id, "status": task.status.as_str() }),
        ));
    }
    if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&task.difficulty) {
        return Err(AppError::validation_with_details(
            format!("任务难度必须在 {MIN_DIFFICULTY}-{MAX_DIFFICULTY} 之间"),
            serde_json::json!({ "taskId": task.id, "difficulty": task.difficulty }),
        ));
    }

    let total_value = Decimal::from(task.difficulty);
    let collaborators = task.normalized_collaborators();
    let (owner_cents, collaborator_cents) =
        split_cents(i64::from(task.difficulty) * 100, collaborators.len());

    let ratings: Vec<i32> = reviews.iter().map(|review| review.rating).collect();
    let (factor, average_rating) = adjustment_factor(&ratings, &config.review_adjustment);
    let penalty = if task.status == TaskStatus::Postponed {
        config.postponement_penalty
    } else {
        Decimal::ONE
    };

    let allocate = |user_id: &str, role: AllocationRole, cents: i64| {
        let base_share = from_cents(cents);
        let adjusted_share = round2(base_share * factor * penalty);
        ScoreAllocation {
            task_id: task.id.clone(),
            user_id: user_id.to_string(),
            role,
            base_share,
            adjusted_share,
            percentage: round2(adjusted_share / total_value * Decimal::ONE_HUNDRED),
        }
    };

    let mut allocations = Vec::with_capacity(collaborators.len() + 1);
    allocations.push(allocate(&task.owner_id, AllocationRole::Owner, owner_cents));
    for (user_id, cents) in collaborators.iter().zip(collaborator_cents) {
        allocations.push(allocate(user_id, AllocationRole::Collaborator, cents));
    }

    let distribution = ScoreDistribution {
        task_id: task.id.clone(),
        total_value,
        adjustment_factor: factor,
        penalty_factor: penalty,
        review_count: reviews.len() as u32,
        average_rating,
        allocations,
        computed_at,
    };

    let base_total = distribution.base_total();
    if base_total != total_value {
        return Err(AppError::consistency(&task.id, total_value, base_total));
    }

    Ok(distribution)
}

pub struct DistributionService {
    db: DbPool,
    config: ScoringConfig,
    locks: Arc<EngineLocks>,
}

impl DistributionService {
    pub fn new(db: DbPool, config: ScoringConfig, locks: Arc<EngineLocks>) -> Self {
        Self { db, config, locks }
    }

    /// Recomputes the task's distribution from its current reviews and status
    /// and overwrites the stored one.
    pub fn recalculate_task(&self, task_id: &str) -> AppResult<ScoreDistribution> {
        self.locks.tasks.with_lock(&task_id.to_string(), || {
            let (task, reviews) = self.db.with_connection(|conn| {
                let task = TaskRepository::find_by_id(conn, task_id)?
                    .ok_or_else(AppError::not_found)?;
                let reviews = ReviewRepository::list_by_task(conn, task_id)?;
                Ok((task, reviews))
            })?;

            let distribution = distribute(&task, &reviews, &self.config, Utc::now())?;
            self.db
                .with_transaction(|tx| DistributionRepository::replace(tx, &distribution))?;

            info!(
                target: "app::distribution",
                task_id,
                factor = %distribution.adjustment_factor,
                penalty = %distribution.penalty_factor,
                reviews = distribution.review_count,
                "task distribution recomputed"
            );
            Ok(distribution)
        })
    }

    pub fn get_distribution(&self, task_id: &str) -> AppResult<Option<ScoreDistribution>> {
        self.db
            .with_connection(|conn| DistributionRepository::find_by_task(conn, task_id))
    }

    /// Σ adjusted shares of the user's allocations on tasks finished in `month`.
    pub fn user_okr_total(&self, user_id: &str, month: &Month) -> AppResult<Decimal> {
        let total = self.db.with_connection(|conn| {
            DistributionRepository::sum_adjusted_for_user_in_month(conn, user_id, month)
        })?;
        debug!(target: "app::distribution", user_id, %month, %total, "okr total loaded");
        Ok(total)
    }

    pub fn user_allocation_count(&self, user_id: &str, month: &Month) -> AppResult<u32> {
        self.db.with_connection(|conn| {
            DistributionRepository::count_for_user_in_month(conn, user_id, month)
        })
    }
}
