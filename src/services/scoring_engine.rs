//! Entry point tying the scoring services to one database and configuration.

use std::sync::Arc;

use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::db::repositories::task_repository::TaskRepository;
use crate::db::repositories::user_repository::UserRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::distribution::ScoreDistribution;
use crate::models::evaluation::{
    AdminScoreInput, MonthlyEvaluationRecord, PeerEvaluationInput, PeerEvaluationRecord,
    WorkHoursRecord,
};
use crate::models::month::Month;
use crate::models::performance::{DepartmentReport, PerformanceScore};
use crate::models::settings::ScoringConfig;
use crate::models::task::{ReviewCreateInput, ReviewRecord};
use crate::models::trigger::RecomputeTrigger;
use crate::services::aggregation_service::AggregationService;
use crate::services::department_report_service::DepartmentReportService;
use crate::services::distribution_service::DistributionService;
use crate::services::evaluation_service::EvaluationService;
use crate::services::ranking_service::RankingService;
use crate::services::review_service::ReviewService;
use crate::utils::locks::EngineLocks;

/// What a monthly batch did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyRecomputeSummary {
    pub month: Month,
    pub distributed_tasks: u32,
    pub failed_tasks: Vec<String>,
    pub aggregated_users: u32,
    pub failed_users: Vec<String>,
    pub ranking: Vec<PerformanceScore>,
    pub department_reports: Vec<DepartmentReport>,
}

/// Result of handling one [`RecomputeTrigger`].
#[derive(Debug, Clone)]
pub enum RecomputeOutcome {
    Distribution(ScoreDistribution),
    Score(PerformanceScore),
    Month(MonthlyRecomputeSummary),
}

pub struct ScoringEngine {
    db: DbPool,
    config: ScoringConfig,
    distribution: DistributionService,
    aggregation: AggregationService,
    ranking: RankingService,
    departments: DepartmentReportService,
    reviews: ReviewService,
    evaluations: EvaluationService,
}

impl ScoringEngine {
    pub fn new(db: DbPool, config: ScoringConfig) -> AppResult<Self> {
        config.validate()?;
        let locks = EngineLocks::new();

        Ok(Self {
            distribution: DistributionService::new(db.clone(), config.clone(), Arc::clone(&locks)),
            aggregation: AggregationService::new(db.clone(), config.clone(), Arc::clone(&locks)),
            ranking: RankingService::new(db.clone(), locks),
            departments: DepartmentReportService::new(db.clone()),
            reviews: ReviewService::new(db.clone()),
            evaluations: EvaluationService::new(db.clone()),
            config,
            db,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn distribute_task(&self, task_id: &str) -> AppResult<ScoreDistribution> {
        self.distribution.recalculate_task(task_id)
    }

    pub fn aggregate(&self, user_id: &str, month: &Month) -> AppResult<PerformanceScore> {
        self.aggregation.aggregate(user_id, month)
    }

    pub fn rank(&self, month: &Month) -> AppResult<Vec<PerformanceScore>> {
        self.ranking.rank(month)
    }

    pub fn distribution(&self) -> &DistributionService {
        &self.distribution
    }

    pub fn aggregation(&self) -> &AggregationService {
        &self.aggregation
    }

    pub fn ranking(&self) -> &RankingService {
        &self.ranking
    }

    pub fn departments(&self) -> &DepartmentReportService {
        &self.departments
    }

    pub fn evaluations(&self) -> &EvaluationService {
        &self.evaluations
    }

    pub fn user_okr_total(&self, user_id: &str, month: &Month) -> AppResult<Decimal> {
        self.distribution.user_okr_total(user_id, month)
    }

    /// Runs whatever recomputation the trigger calls for.
    pub fn handle(&self, trigger: RecomputeTrigger) -> AppResult<RecomputeOutcome> {
        info!(target: "app::scoring", trigger = ?trigger, "handling recompute trigger");
        match trigger {
            RecomputeTrigger::ReviewAdded { task_id }
            | RecomputeTrigger::PostponementChanged { task_id }
            | RecomputeTrigger::TaskCompleted { task_id } => self
                .distribution
                .recalculate_task(&task_id)
                .map(RecomputeOutcome::Distribution),
            RecomputeTrigger::AdminEvaluationChanged { user_id, month }
            | RecomputeTrigger::WorkHoursRecorded { user_id, month } => self
                .aggregation
                .aggregate(&user_id, &month)
                .map(RecomputeOutcome::Score),
            RecomputeTrigger::PeerEvaluationAdded { subject_id, month } => self
                .aggregation
                .aggregate(&subject_id, &month)
                .map(RecomputeOutcome::Score),
            RecomputeTrigger::MonthlyRecompute { month } => {
                self.recompute_month(&month).map(RecomputeOutcome::Month)
            }
        }
    }

    /// Redistributes every finished task of the month, aggregates every active
    /// user in parallel, ranks the month and rebuilds department reports.
    ///
    /// A task or user that fails is logged and left out; the batch goes on.
    pub fn recompute_month(&self, month: &Month) -> AppResult<MonthlyRecomputeSummary> {
        let (tasks, users) = self.db.with_connection(|conn| {
            Ok((
                TaskRepository::list_scorable_in_month(conn, month)?,
                UserRepository::list_active(conn)?,
            ))
        })?;

        let mut distributed_tasks = 0;
        let mut failed_tasks = Vec::new();
        for task in &tasks {
            match self.distribution.recalculate_task(&task.id) {
                Ok(_) => distributed_tasks += 1,
                Err(err) => {
                    error!(target: "app::distribution", task_id = %task.id, error = %err, "task redistribution failed");
                    failed_tasks.push(task.id.clone());
                }
            }
        }

        let results: Vec<(String, AppResult<PerformanceScore>)> = users
            .par_iter()
            .map(|user| (user.id.clone(), self.aggregation.aggregate(&user.id, month)))
            .collect();

        let mut aggregated_users = 0;
        let mut failed_users = Vec::new();
        for (user_id, result) in results {
            match result {
                Ok(_) => aggregated_users += 1,
                Err(err) => {
                    warn!(target: "app::scoring", %user_id, %month, error = %err, "aggregation failed, skipping user");
                    failed_users.push(user_id);
                }
            }
        }

        let ranking = self.ranking.rank(month)?;
        let department_reports = self.departments.recalculate(month)?;

        info!(
            target: "app::scoring",
            %month,
            distributed_tasks,
            aggregated_users,
            failed = failed_users.len() + failed_tasks.len(),
            "monthly recompute finished"
        );

        Ok(MonthlyRecomputeSummary {
            month: *month,
            distributed_tasks,
            failed_tasks,
            aggregated_users,
            failed_users,
            ranking,
            department_reports,
        })
    }

    pub fn submit_review(
        &self,
        input: ReviewCreateInput,
    ) -> AppResult<(ReviewRecord, ScoreDistribution)> {
        let (review, trigger) = self.reviews.submit_review(input)?;
        let distribution = self.expect_distribution(trigger)?;
        Ok((review, distribution))
    }

    pub fn submit_admin_score(
        &self,
        input: AdminScoreInput,
    ) -> AppResult<(MonthlyEvaluationRecord, PerformanceScore)> {
        let (record, trigger) = self.evaluations.submit_admin_score(input)?;
        let score = self.expect_score(trigger)?;
        Ok((record, score))
    }

    pub fn clear_admin_score(
        &self,
        user_id: &str,
        month: &Month,
        admin_id: &str,
    ) -> AppResult<PerformanceScore> {
        let trigger = self.evaluations.clear_admin_score(user_id, month, admin_id)?;
        self.expect_score(trigger)
    }

    pub fn record_peer_evaluation(
        &self,
        month: &Month,
        input: PeerEvaluationInput,
    ) -> AppResult<(PeerEvaluationRecord, PerformanceScore)> {
        let (record, trigger) = self.evaluations.record_peer_evaluation(month, input)?;
        let score = self.expect_score(trigger)?;
        Ok((record, score))
    }

    pub fn record_work_hours(
        &self,
        user_id: &str,
        month: &Month,
        hours: Decimal,
        recorded_by: &str,
    ) -> AppResult<(WorkHoursRecord, PerformanceScore)> {
        let (record, trigger) =
            self.evaluations
                .record_work_hours(user_id, month, hours, recorded_by)?;
        let score = self.expect_score(trigger)?;
        Ok((record, score))
    }

    fn expect_distribution(&self, trigger: RecomputeTrigger) -> AppResult<ScoreDistribution> {
        match self.handle(trigger)? {
            RecomputeOutcome::Distribution(distribution) => Ok(distribution),
            other => Err(AppError::other(format!(
                "意外的重算结果: {other:?}"
            ))),
        }
    }

    fn expect_score(&self, trigger: RecomputeTrigger) -> AppResult<PerformanceScore> {
        match self.handle(trigger)? {
            RecomputeOutcome::Score(score) => Ok(score),
            other => Err(AppError::other(format!(
                "意外的重算结果: {other:?}"
            ))),
        }
    }
}
