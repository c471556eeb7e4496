use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::db::repositories::distribution_repository::DistributionRepository;
use crate::db::repositories::evaluation_repository::{
    MonthlyEvaluationRepository, PeerEvaluationRepository,
};
use crate::db::repositories::performance_repository::PerformanceRepository;
use crate::db::repositories::review_repository::ReviewRepository;
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::repositories::user_repository::UserRepository;
use crate::db::repositories::work_hours_repository::WorkHoursRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::evaluation::MonthlyEvaluationRecord;
use crate::models::month::Month;
use crate::models::performance::{DimensionScores, PerformanceScore, RawMetrics, ScoreStatus};
use crate::models::settings::{ScoringConfig, WeightSumPolicy};
use crate::models::task::TaskRecord;
use crate::services::normalization::{
    clamp_score, completion_rate, completion_rate_to_score, hours_to_score, mean_rating,
    revenue_to_score,
};
use crate::utils::decimal::{clamp, mean, round2};
use crate::utils::locks::EngineLocks;

const FINAL_SCORE_MAX: Decimal = Decimal::ONE_HUNDRED;

/// Everything the aggregator reads for one (user, month).
#[derive(Debug, Clone)]
pub struct AggregationInputs {
    pub user_id: String,
    pub month: Month,
    pub work_hours: Option<Decimal>,
    /// Tasks the user took part in that were created or completed in the month.
    pub assigned_tasks: Vec<TaskRecord>,
    /// Ratings of every review on the user's completed tasks, pooled.
    pub review_ratings: Vec<i32>,
    pub okr_total: Decimal,
    /// OKR totals of every active member of the user's department, the user included.
    pub department_okr_totals: Vec<Decimal>,
    pub evaluation: Option<MonthlyEvaluationRecord>,
    pub peer_scores: Vec<i32>,
    /// Team-fit rankings authored by the other users this month.
    pub team_fit_rankings: Vec<Vec<String>>,
}

/// Inverse-rank percentile averaged over every ranking that mentions the user.
///
/// A user at 0-based position `p` of a ranking of length `n` gets
/// `10 × (n − p) / n`.
pub fn team_fit_score(user_id: &str, rankings: &[Vec<String>]) -> (Decimal, u32) {
    let percentiles: Vec<Decimal> = rankings
        .iter()
        .filter_map(|ranking| {
            let position = ranking.iter().position(|id| id == user_id)?;
            let length = Decimal::from(ranking.len() as u64);
            let position = Decimal::from(position as u64);
            Some(Decimal::TEN * (length - position) / length)
        })
        .collect();

    let count = percentiles.len() as u32;
    let score = mean(&percentiles).map(clamp_score).unwrap_or(Decimal::ZERO);
    (score, count)
}

/// Combines dimension scores into the 0–100 final score.
pub fn final_score(dimensions: &DimensionScores, config: &ScoringConfig) -> Decimal {
    let weighted = config.weights.weighted_sum(dimensions);
    let weighted = match config.weight_sum_policy {
        WeightSumPolicy::AsIs => weighted,
        WeightSumPolicy::Rescale => {
            let sum = config.weights.sum();
            if sum.is_zero() {
                Decimal::ZERO
            } else {
                weighted / sum
            }
        }
    };
    round2(clamp(
        weighted * Decimal::TEN,
        Decimal::ZERO,
        FINAL_SCORE_MAX,
    ))
}

/// Turns raw inputs into a complete score row. Rank is left unset.
pub fn compute_performance(
    inputs: &AggregationInputs,
    config: &ScoringConfig,
    computed_at: DateTime<Utc>,
) -> PerformanceScore {
    let completed: Vec<&TaskRecord> = inputs
        .assigned_tasks
        .iter()
        .filter(|task| task.is_completed_in(&inputs.month))
        .collect();
    let assigned_count = inputs.assigned_tasks.len() as u32;
    let completed_count = completed.len() as u32;
    let rate = completion_rate(completed_count, assigned_count);

    let difficulties: Vec<Decimal> = completed
        .iter()
        .map(|task| Decimal::from(task.difficulty))
        .collect();
    let total_revenue: Decimal = completed.iter().map(|task| task.revenue).sum();
    let department_average = mean(&inputs.department_okr_totals).unwrap_or(Decimal::ZERO);
    let hours = inputs.work_hours.unwrap_or(Decimal::ZERO);
    let (team_fit, team_fit_rankings) = team_fit_score(&inputs.user_id, &inputs.team_fit_rankings);

    let evaluation = inputs.evaluation.as_ref();
    let self_score = |pick: fn(&MonthlyEvaluationRecord) -> i32| {
        evaluation
            .map(|record| clamp_score(Decimal::from(pick(record))))
            .unwrap_or(Decimal::ZERO)
    };
    let admin = evaluation.and_then(|record| record.admin_override.as_ref());

    let dimensions = DimensionScores {
        work_hours: hours_to_score(hours, config.work_hours_baseline),
        completion_rate: completion_rate_to_score(rate),
        avg_difficulty: mean(&difficulties)
            .map(clamp_score)
            .unwrap_or(Decimal::ZERO),
        revenue: revenue_to_score(total_revenue, &config.revenue_curve),
        department_avg: clamp_score(department_average),
        task_rating: mean_rating(&inputs.review_ratings),
        culture_understanding: self_score(|record| record.culture_understanding.score),
        team_fit,
        monthly_growth: self_score(|record| record.monthly_growth.score),
        biggest_contribution: self_score(|record| record.biggest_contribution.score),
        peer_evaluation: mean_rating(&inputs.peer_scores),
        admin_final: admin
            .map(|value| clamp_score(Decimal::from(value.score)))
            .unwrap_or(Decimal::ZERO),
    };

    let raw = RawMetrics {
        work_hours: hours,
        assigned_tasks: assigned_count,
        completed_tasks: completed_count,
        completion_rate: round2(rate),
        total_revenue,
        okr_total: inputs.okr_total,
        department_okr_average: round2(department_average),
        department_members: inputs.department_okr_totals.len() as u32,
        review_count: inputs.review_ratings.len() as u32,
        peer_evaluation_count: inputs.peer_scores.len() as u32,
        team_fit_rankings,
    };

    PerformanceScore {
        user_id: inputs.user_id.clone(),
        month: inputs.month,
        final_score: final_score(&dimensions, config),
        dimensions,
        raw,
        rank: None,
        status: if admin.is_some() {
            ScoreStatus::Complete
        } else {
            ScoreStatus::Pending
        },
        computed_at,
    }
}

pub struct AggregationService {
    db: DbPool,
    config: ScoringConfig,
    locks: Arc<EngineLocks>,
}

impl AggregationService {
    pub fn new(db: DbPool, config: ScoringConfig, locks: Arc<EngineLocks>) -> Self {
        let weight_sum = config.weights.sum();
        if weight_sum != Decimal::ONE {
            warn!(
                target: "app::scoring",
                %weight_sum,
                policy = ?config.weight_sum_policy,
                "dimension weights do not sum to 1"
            );
        }
        Self { db, config, locks }
    }

    /// Recomputes and stores the score of one user for one month.
    ///
    /// The stored row is replaced as a whole; its rank is cleared until the
    /// month is ranked again.
    pub fn aggregate(&self, user_id: &str, month: &Month) -> AppResult<PerformanceScore> {
        self.locks.months.shared(month, || {
            self.locks
                .scores
                .with_lock(&(user_id.to_string(), *month), || {
                    let inputs = self
                        .db
                        .with_connection(|conn| load_inputs(conn, user_id, month))?;
                    let score = compute_performance(&inputs, &self.config, Utc::now());

                    self.db
                        .with_transaction(|tx| PerformanceRepository::upsert(tx, &score))?;

                    info!(
                        target: "app::scoring",
                        user_id,
                        %month,
                        final_score = %score.final_score,
                        status = %score.status,
                        "performance score aggregated"
                    );
                    Ok(score)
                })
        })
    }

    pub fn get_score(&self, user_id: &str, month: &Month) -> AppResult<Option<PerformanceScore>> {
        self.db
            .with_connection(|conn| PerformanceRepository::find(conn, user_id, month))
    }
}

fn load_inputs(conn: &Connection, user_id: &str, month: &Month) -> AppResult<AggregationInputs> {
    let user = UserRepository::find_by_id(conn, user_id)?.ok_or_else(AppError::not_found)?;

    let assigned_tasks = TaskRepository::list_for_participant_in_month(conn, user_id, month)?;
    let mut review_ratings = Vec::new();
    for task in assigned_tasks
        .iter()
        .filter(|task| task.is_completed_in(month))
    {
        review_ratings.extend(
            ReviewRepository::list_by_task(conn, &task.id)?
                .into_iter()
                .map(|review| review.rating),
        );
    }

    let okr_total = DistributionRepository::sum_adjusted_for_user_in_month(conn, user_id, month)?;

    let members: BTreeSet<String> = UserRepository::list_active_by_department(conn, &user.department)?
        .into_iter()
        .map(|member| member.id)
        .collect();
    let department_okr_totals = members
        .iter()
        .map(|member| DistributionRepository::sum_adjusted_for_user_in_month(conn, member, month))
        .collect::<AppResult<Vec<_>>>()?;

    let evaluations = MonthlyEvaluationRepository::list_by_month(conn, month)?;
    let mut evaluation = None;
    let mut team_fit_rankings = Vec::new();
    for record in evaluations {
        if record.user_id == user_id {
            evaluation = Some(record);
        } else if !record.team_fit_ranking.is_empty() {
            team_fit_rankings.push(record.team_fit_ranking);
        }
    }

    let peer_scores = PeerEvaluationRepository::list_for_subject(conn, user_id, month)?
        .into_iter()
        .map(|peer| peer.score)
        .collect();

    let work_hours = WorkHoursRepository::find(conn, user_id, month)?.map(|record| record.hours);

    debug!(
        target: "app::scoring",
        user_id,
        %month,
        assigned = assigned_tasks.len(),
        reviews = review_ratings.len(),
        department_members = department_okr_totals.len(),
        "aggregation inputs loaded"
    );

    Ok(AggregationInputs {
        user_id: user_id.to_string(),
        month: *month,
        work_hours,
        assigned_tasks,
        review_ratings,
        okr_total,
        department_okr_totals,
        evaluation,
        peer_scores,
        team_fit_rankings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::{AdminOverride, SelfAssessment};
    use crate::models::task::TaskStatus;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn month() -> Month {
        Month::new(2024, 3).expect("month")
    }

    fn completed_task(id: &str, difficulty: u8, revenue: Decimal) -> TaskRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        TaskRecord {
            id: id.into(),
            title: id.into(),
            difficulty,
            revenue,
            status: TaskStatus::Completed,
            owner_id: "u1".into(),
            collaborator_ids: Vec::new(),
            postponement_reason: None,
            created_at: at,
            completed_at: Some(at),
        }
    }

    fn assessment(score: i32) -> SelfAssessment {
        SelfAssessment {
            score,
            justification: String::new(),
            option: None,
        }
    }

    fn evaluation(score: i32, admin: Option<i32>) -> MonthlyEvaluationRecord {
        MonthlyEvaluationRecord {
            id: "eval-u1".into(),
            user_id: "u1".into(),
            month: month(),
            culture_understanding: assessment(score),
            team_fit: assessment(score),
            team_fit_ranking: Vec::new(),
            monthly_growth: assessment(score),
            biggest_contribution: assessment(score),
            admin_override: admin.map(|score| AdminOverride {
                score,
                comment: None,
                evaluator_id: "admin".into(),
                evaluated_at: Utc::now(),
            }),
            is_archived: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn empty_inputs() -> AggregationInputs {
        AggregationInputs {
            user_id: "u1".into(),
            month: month(),
            work_hours: None,
            assigned_tasks: Vec::new(),
            review_ratings: Vec::new(),
            okr_total: Decimal::ZERO,
            department_okr_totals: Vec::new(),
            evaluation: None,
            peer_scores: Vec::new(),
            team_fit_rankings: Vec::new(),
        }
    }

    fn maxed_inputs() -> AggregationInputs {
        AggregationInputs {
            work_hours: Some(dec!(320)),
            assigned_tasks: vec![completed_task("t1", 10, dec!(150000))],
            review_ratings: vec![10, 10],
            okr_total: dec!(10),
            department_okr_totals: vec![dec!(10), dec!(12)],
            evaluation: Some(evaluation(10, Some(10))),
            peer_scores: vec![10],
            team_fit_rankings: vec![vec!["u1".into(), "u2".into()]],
            ..empty_inputs()
        }
    }

    #[test]
    fn no_inputs_scores_zero_and_stays_pending() {
        let score = compute_performance(&empty_inputs(), &ScoringConfig::default(), Utc::now());
        assert_eq!(score.dimensions.completion_rate, Decimal::ZERO);
        assert_eq!(score.dimensions.department_avg, Decimal::ZERO);
        assert_eq!(score.final_score, Decimal::ZERO);
        assert_eq!(score.status, ScoreStatus::Pending);
        assert_eq!(score.rank, None);
    }

    #[test]
    fn all_maximum_inputs_hit_the_weight_sum_ceiling() {
        let score = compute_performance(&maxed_inputs(), &ScoringConfig::default(), Utc::now());
        assert_eq!(score.final_score, dec!(95.00));
        assert_eq!(score.status, ScoreStatus::Complete);
        assert_eq!(score.dimensions.department_avg, dec!(10));
    }

    #[test]
    fn rescale_policy_reaches_one_hundred() {
        let config = ScoringConfig {
            weight_sum_policy: WeightSumPolicy::Rescale,
            ..ScoringConfig::default()
        };
        let score = compute_performance(&maxed_inputs(), &config, Utc::now());
        assert_eq!(score.final_score, dec!(100.00));
    }

    #[test]
    fn missing_admin_score_contributes_nothing() {
        let mut inputs = maxed_inputs();
        inputs.evaluation = Some(evaluation(10, None));
        let score = compute_performance(&inputs, &ScoringConfig::default(), Utc::now());
        assert!(score.is_pending());
        assert_eq!(score.dimensions.admin_final, Decimal::ZERO);
        assert_eq!(score.final_score, dec!(80.00));
    }

    #[test]
    fn completion_rate_counts_only_tasks_completed_in_month() {
        let mut open = completed_task("t2", 4, dec!(0));
        open.status = TaskStatus::InProgress;
        open.completed_at = None;
        let inputs = AggregationInputs {
            assigned_tasks: vec![completed_task("t1", 6, dec!(0)), open],
            ..empty_inputs()
        };
        let score = compute_performance(&inputs, &ScoringConfig::default(), Utc::now());
        assert_eq!(score.raw.assigned_tasks, 2);
        assert_eq!(score.raw.completed_tasks, 1);
        assert_eq!(score.dimensions.completion_rate, dec!(5.00));
        assert_eq!(score.dimensions.avg_difficulty, dec!(6.00));
    }

    #[test]
    fn team_fit_uses_inverse_rank_percentile() {
        let rankings = vec![
            vec!["u1".to_string(), "u2".to_string(), "u3".to_string(), "u4".to_string()],
            vec!["u2".to_string(), "u1".to_string()],
            vec!["u3".to_string()],
        ];
        let (score, count) = team_fit_score("u1", &rankings);
        assert_eq!(count, 2);
        assert_eq!(score, dec!(7.50));
        assert_eq!(team_fit_score("u9", &rankings), (Decimal::ZERO, 0));
    }
}
