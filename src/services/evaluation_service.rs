use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::repositories::admin_history_repository::AdminHistoryRepository;
use crate::db::repositories::evaluation_repository::{
    MonthlyEvaluationRepository, PeerEvaluationRepository,
};
use crate::db::repositories::work_hours_repository::WorkHoursRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::evaluation::{
    ensure_score_range, AdminAction, AdminEvaluationHistoryRecord, AdminOverride,
    AdminScoreInput, MonthlyEvaluationRecord, PeerEvaluationInput, PeerEvaluationRecord,
    SelfEvaluationInput, WorkHoursRecord,
};
use crate::models::month::Month;
use crate::models::trigger::RecomputeTrigger;

/// Writes the human-provided monthly inputs: self evaluations, admin final
/// scores, peer evaluations and work hours.
pub struct EvaluationService {
    db: DbPool,
}

impl EvaluationService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Creates or replaces the user's self evaluation for the month. An existing
    /// admin final score is kept.
    pub fn submit_self_evaluation(
        &self,
        input: SelfEvaluationInput,
    ) -> AppResult<MonthlyEvaluationRecord> {
        let mut ranking: Vec<String> = Vec::with_capacity(input.team_fit_ranking.len());
        for id in input.team_fit_ranking {
            let id = id.trim().to_string();
            if !id.is_empty() && !ranking.contains(&id) {
                ranking.push(id);
            }
        }

        let record = self.db.with_transaction(|tx| {
            let existing = MonthlyEvaluationRepository::find(tx, &input.user_id, &input.month)?;
            let now = Utc::now();
            let record = MonthlyEvaluationRecord {
                id: existing
                    .as_ref()
                    .map(|record| record.id.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                user_id: input.user_id.clone(),
                month: input.month,
                culture_understanding: input.culture_understanding.clone(),
                team_fit: input.team_fit.clone(),
                team_fit_ranking: ranking.clone(),
                monthly_growth: input.monthly_growth.clone(),
                biggest_contribution: input.biggest_contribution.clone(),
                admin_override: existing
                    .as_ref()
                    .and_then(|record| record.admin_override.clone()),
                is_archived: false,
                created_at: existing.as_ref().map(|record| record.created_at).unwrap_or(now),
                updated_at: now,
            };
            MonthlyEvaluationRepository::upsert(tx, &record)?;
            Ok(record)
        })?;

        info!(
            target: "app::evaluation",
            user_id = %record.user_id,
            month = %record.month,
            "self evaluation submitted"
        );
        Ok(record)
    }

    pub fn get_evaluation(
        &self,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Option<MonthlyEvaluationRecord>> {
        self.db
            .with_connection(|conn| MonthlyEvaluationRepository::find(conn, user_id, month))
    }

    /// Sets the admin final score and appends a `create` or `update` history row.
    pub fn submit_admin_score(
        &self,
        input: AdminScoreInput,
    ) -> AppResult<(MonthlyEvaluationRecord, RecomputeTrigger)> {
        ensure_score_range("admin_final_score", input.score)?;
        let admin_id = input.admin_id.trim().to_string();
        if admin_id.is_empty() {
            return Err(AppError::validation("管理员不能为空"));
        }
        let comment = input
            .comment
            .as_ref()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let record = self.db.with_transaction(|tx| {
            let mut record = MonthlyEvaluationRepository::find(tx, &input.user_id, &input.month)?
                .ok_or_else(AppError::not_found)?;
            let previous = record.admin_override.take();
            let now = Utc::now();
            let admin = AdminOverride {
                score: input.score,
                comment: comment.clone(),
                evaluator_id: admin_id.clone(),
                evaluated_at: now,
            };

            MonthlyEvaluationRepository::set_admin_override(
                tx,
                &input.user_id,
                &input.month,
                Some(&admin),
            )?;
            AdminHistoryRepository::insert(
                tx,
                &AdminEvaluationHistoryRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: input.user_id.clone(),
                    month: input.month,
                    admin_id: admin_id.clone(),
                    action: if previous.is_some() {
                        AdminAction::Update
                    } else {
                        AdminAction::Create
                    },
                    previous_score: previous.as_ref().map(|value| value.score),
                    new_score: Some(admin.score),
                    previous_comment: previous.and_then(|value| value.comment),
                    new_comment: admin.comment.clone(),
                    created_at: now,
                },
            )?;

            record.admin_override = Some(admin);
            record.updated_at = now;
            Ok(record)
        })?;

        info!(
            target: "app::evaluation",
            user_id = %record.user_id,
            month = %record.month,
            score = input.score,
            "admin final score submitted"
        );
        let trigger = RecomputeTrigger::AdminEvaluationChanged {
            user_id: record.user_id.clone(),
            month: record.month,
        };
        Ok((record, trigger))
    }

    /// Removes the admin final score, leaving the month pending again.
    pub fn clear_admin_score(
        &self,
        user_id: &str,
        month: &Month,
        admin_id: &str,
    ) -> AppResult<RecomputeTrigger> {
        self.db.with_transaction(|tx| {
            let record = MonthlyEvaluationRepository::find(tx, user_id, month)?
                .ok_or_else(AppError::not_found)?;
            MonthlyEvaluationRepository::ensure_open(tx, user_id, month)?;
            let previous = record.admin_override.ok_or_else(AppError::not_found)?;

            MonthlyEvaluationRepository::set_admin_override(tx, user_id, month, None)?;
            AdminHistoryRepository::insert(
                tx,
                &AdminEvaluationHistoryRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    month: *month,
                    admin_id: admin_id.to_string(),
                    action: AdminAction::Delete,
                    previous_score: Some(previous.score),
                    new_score: None,
                    previous_comment: previous.comment,
                    new_comment: None,
                    created_at: Utc::now(),
                },
            )
        })?;

        info!(target: "app::evaluation", user_id, %month, "admin final score cleared");
        Ok(RecomputeTrigger::AdminEvaluationChanged {
            user_id: user_id.to_string(),
            month: *month,
        })
    }

    pub fn admin_history(
        &self,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Vec<AdminEvaluationHistoryRecord>> {
        self.db
            .with_connection(|conn| AdminHistoryRepository::list_for(conn, user_id, month))
    }

    pub fn record_peer_evaluation(
        &self,
        month: &Month,
        input: PeerEvaluationInput,
    ) -> AppResult<(PeerEvaluationRecord, RecomputeTrigger)> {
        ensure_score_range("peer_score", input.score)?;
        if input.rank < 1 {
            return Err(AppError::validation_with_details(
                "互评排名必须从 1 开始",
                serde_json::json!({ "field": "rank", "value": input.rank }),
            ));
        }
        if input.subject_id == input.evaluator_id {
            return Err(AppError::validation("不能评价自己"));
        }

        let record = PeerEvaluationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: input.subject_id,
            evaluator_id: input.evaluator_id,
            month: *month,
            score: input.score,
            rank: input.rank,
            comment: input
                .comment
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            is_anonymous: input.is_anonymous,
            created_at: Utc::now(),
        };

        self.db.with_transaction(|tx| {
            MonthlyEvaluationRepository::ensure_open(tx, &record.subject_id, month)?;
            if PeerEvaluationRepository::exists_for(
                tx,
                &record.subject_id,
                &record.evaluator_id,
                month,
            )? {
                return Err(AppError::conflict("本月已经评价过该成员"));
            }
            PeerEvaluationRepository::insert(tx, &record)
        })?;

        info!(
            target: "app::evaluation",
            subject_id = %record.subject_id,
            %month,
            "peer evaluation recorded"
        );
        let trigger = RecomputeTrigger::PeerEvaluationAdded {
            subject_id: record.subject_id.clone(),
            month: *month,
        };
        Ok((record, trigger))
    }

    pub fn record_work_hours(
        &self,
        user_id: &str,
        month: &Month,
        hours: Decimal,
        recorded_by: &str,
    ) -> AppResult<(WorkHoursRecord, RecomputeTrigger)> {
        if hours < Decimal::ZERO {
            return Err(AppError::validation_with_details(
                "工时不能为负数",
                serde_json::json!({ "field": "hours", "value": hours.to_string() }),
            ));
        }

        let record = WorkHoursRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            month: *month,
            hours,
            recorded_by: recorded_by.to_string(),
            created_at: Utc::now(),
        };
        self.db.with_transaction(|tx| {
            MonthlyEvaluationRepository::ensure_open(tx, user_id, month)?;
            WorkHoursRepository::upsert(tx, &record)
        })?;

        info!(target: "app::evaluation", user_id, %month, %hours, "work hours recorded");
        let trigger = RecomputeTrigger::WorkHoursRecorded {
            user_id: user_id.to_string(),
            month: *month,
        };
        Ok((record, trigger))
    }

    /// Freezes every evaluation of the month. Admin scores, peer evaluations and
    /// work hours of an archived user are rejected afterwards.
    pub fn archive_month(&self, month: &Month) -> AppResult<usize> {
        let archived = self
            .db
            .with_transaction(|tx| MonthlyEvaluationRepository::archive_month(tx, month))?;
        info!(target: "app::evaluation", %month, archived, "monthly evaluations archived");
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::SelfAssessment;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn setup_service() -> (EvaluationService, tempfile::TempDir) {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("evaluations.sqlite")).expect("db pool");
        (EvaluationService::new(pool), dir)
    }

    fn month() -> Month {
        "2024-05".parse().expect("month")
    }

    fn assessment(score: i32) -> SelfAssessment {
        SelfAssessment {
            score,
            justification: "shipped the release".into(),
            option: None,
        }
    }

    fn self_input(user_id: &str, ranking: &[&str]) -> SelfEvaluationInput {
        SelfEvaluationInput {
            user_id: user_id.into(),
            month: month(),
            culture_understanding: assessment(8),
            team_fit: assessment(7),
            team_fit_ranking: ranking.iter().map(|id| id.to_string()).collect(),
            monthly_growth: assessment(6),
            biggest_contribution: assessment(9),
        }
    }

    fn admin_input(score: i32, comment: &str) -> AdminScoreInput {
        AdminScoreInput {
            user_id: "u1".into(),
            month: month(),
            admin_id: "admin".into(),
            score,
            comment: Some(comment.into()),
        }
    }

    #[test]
    fn self_evaluation_dedups_ranking_and_rejects_self() {
        let (service, _dir) = setup_service();
        let record = service
            .submit_self_evaluation(self_input("u1", &["u3", "u2", "u3"]))
            .expect("submit");
        assert_eq!(record.team_fit_ranking, vec!["u3", "u2"]);

        let err = service
            .submit_self_evaluation(self_input("u1", &["u1", "u2"]))
            .expect_err("self in ranking");
        assert!(err.is_validation());
    }

    #[test]
    fn admin_score_history_tracks_create_update_delete() {
        let (service, _dir) = setup_service();
        service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect("submit");

        let (record, trigger) = service
            .submit_admin_score(admin_input(7, "solid"))
            .expect("create");
        assert_eq!(record.admin_override.as_ref().map(|a| a.score), Some(7));
        assert_eq!(
            trigger,
            RecomputeTrigger::AdminEvaluationChanged {
                user_id: "u1".into(),
                month: month()
            }
        );

        service
            .submit_admin_score(admin_input(9, "great finish"))
            .expect("update");
        service
            .clear_admin_score("u1", &month(), "admin")
            .expect("clear");

        let history = service.admin_history("u1", &month()).expect("history");
        let actions: Vec<_> = history.iter().map(|entry| entry.action).collect();
        assert_eq!(
            actions,
            vec![AdminAction::Create, AdminAction::Update, AdminAction::Delete]
        );
        assert_eq!(history[1].previous_score, Some(7));
        assert_eq!(history[1].new_score, Some(9));
        assert_eq!(history[1].previous_comment.as_deref(), Some("solid"));
        assert_eq!(history[2].new_score, None);

        let stored = service
            .get_evaluation("u1", &month())
            .expect("load")
            .expect("evaluation");
        assert_eq!(stored.admin_override, None);
    }

    #[test]
    fn admin_score_is_range_checked() {
        let (service, _dir) = setup_service();
        service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect("submit");
        let err = service
            .submit_admin_score(admin_input(11, "too high"))
            .expect_err("out of range");
        assert!(err.is_validation());
        assert!(service.admin_history("u1", &month()).expect("history").is_empty());
    }

    #[test]
    fn resubmitting_self_evaluation_keeps_admin_score() {
        let (service, _dir) = setup_service();
        service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect("submit");
        service
            .submit_admin_score(admin_input(8, "ok"))
            .expect("admin");
        let updated = service
            .submit_self_evaluation(self_input("u1", &["u2"]))
            .expect("resubmit");
        assert_eq!(updated.admin_override.map(|a| a.score), Some(8));
    }

    #[test]
    fn archived_evaluation_cannot_change() {
        let (service, _dir) = setup_service();
        service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect("submit");
        assert_eq!(service.archive_month(&month()).expect("archive"), 1);
        let err = service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect_err("archived");
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[test]
    fn archived_month_rejects_admin_peer_and_hours_writes() {
        let (service, _dir) = setup_service();
        service
            .submit_self_evaluation(self_input("u1", &[]))
            .expect("submit");
        service
            .submit_admin_score(admin_input(7, "before archive"))
            .expect("admin");
        service.archive_month(&month()).expect("archive");

        let submit = service
            .submit_admin_score(admin_input(9, "too late"))
            .expect_err("admin score after archive");
        assert!(matches!(submit, AppError::Conflict { .. }));
        let clear = service
            .clear_admin_score("u1", &month(), "admin")
            .expect_err("clear after archive");
        assert!(matches!(clear, AppError::Conflict { .. }));

        let peer = service
            .record_peer_evaluation(
                &month(),
                PeerEvaluationInput {
                    subject_id: "u1".into(),
                    evaluator_id: "u2".into(),
                    score: 8,
                    rank: 1,
                    comment: None,
                    is_anonymous: false,
                },
            )
            .expect_err("peer evaluation after archive");
        assert!(matches!(peer, AppError::Conflict { .. }));
        let hours = service
            .record_work_hours("u1", &month(), dec!(160), "admin")
            .expect_err("work hours after archive");
        assert!(matches!(hours, AppError::Conflict { .. }));

        let stored = service
            .get_evaluation("u1", &month())
            .expect("load")
            .expect("evaluation");
        assert!(stored.is_archived);
        assert_eq!(stored.admin_override.map(|admin| admin.score), Some(7));
        assert_eq!(service.admin_history("u1", &month()).expect("history").len(), 1);

        // Other users of the month have no archived row and stay open.
        service
            .record_work_hours("u2", &month(), dec!(160), "admin")
            .expect("u2 hours");
    }

    #[test]
    fn peer_evaluation_rules() {
        let (service, _dir) = setup_service();
        let input = PeerEvaluationInput {
            subject_id: "u1".into(),
            evaluator_id: "u2".into(),
            score: 8,
            rank: 1,
            comment: None,
            is_anonymous: true,
        };

        service
            .record_peer_evaluation(&month(), input.clone())
            .expect("first");
        let duplicate = service
            .record_peer_evaluation(&month(), input.clone())
            .expect_err("duplicate");
        assert!(matches!(duplicate, AppError::Conflict { .. }));

        let own = service
            .record_peer_evaluation(
                &month(),
                PeerEvaluationInput {
                    evaluator_id: "u1".into(),
                    ..input
                },
            )
            .expect_err("self evaluation");
        assert!(own.is_validation());
    }

    #[test]
    fn work_hours_replace_and_reject_negative() {
        let (service, _dir) = setup_service();
        service
            .record_work_hours("u1", &month(), dec!(120), "admin")
            .expect("first");
        service
            .record_work_hours("u1", &month(), dec!(168.5), "admin")
            .expect("second");
        assert!(service
            .record_work_hours("u1", &month(), dec!(-1), "admin")
            .is_err());

        let stored = service
            .db
            .with_connection(|conn| WorkHoursRepository::find(conn, "u1", &month()))
            .expect("load")
            .expect("hours");
        assert_eq!(stored.hours, dec!(168.5));
    }
}
