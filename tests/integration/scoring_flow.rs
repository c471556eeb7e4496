use chrono::{TimeZone, Utc};
use okr_scoring::db::repositories::task_repository::TaskRepository;
use okr_scoring::db::repositories::user_repository::UserRepository;
use okr_scoring::models::evaluation::{AdminScoreInput, SelfAssessment, SelfEvaluationInput};
use okr_scoring::models::performance::ScoreStatus;
use okr_scoring::models::settings::WeightSumPolicy;
use okr_scoring::models::task::{ReviewCreateInput, TaskRecord, TaskStatus};
use okr_scoring::models::user::{UserRecord, UserRole};
use okr_scoring::{DbPool, Month, ScoringConfig, ScoringEngine};
use rust_decimal_macros::dec;
use tempfile::tempdir;

fn march() -> Month {
    Month::new(2024, 3).expect("month")
}

fn user(id: &str, department: &str) -> UserRecord {
    UserRecord {
        id: id.into(),
        name: id.to_uppercase(),
        department: department.into(),
        role: UserRole::Member,
        is_active: true,
    }
}

fn assessment(score: i32) -> SelfAssessment {
    SelfAssessment {
        score,
        justification: "monthly notes".into(),
        option: None,
    }
}

fn self_evaluation(user_id: &str, ranking: &[&str]) -> SelfEvaluationInput {
    SelfEvaluationInput {
        user_id: user_id.into(),
        month: march(),
        culture_understanding: assessment(8),
        team_fit: assessment(8),
        team_fit_ranking: ranking.iter().map(|id| id.to_string()).collect(),
        monthly_growth: assessment(8),
        biggest_contribution: assessment(8),
    }
}

/// eng: u1, u2. ops: u3, u4, u5.
/// t1 (difficulty 8, revenue 50 000) is owned by u1 with u2 and u3 and was
/// completed in March; t2 is u2's open task created in March.
fn seed(config: ScoringConfig) -> (ScoringEngine, tempfile::TempDir) {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("scoring.sqlite")).expect("db pool");
    let completed_at = Utc.with_ymd_and_hms(2024, 3, 10, 9, 30, 0).unwrap();
    let created_at = Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap();

    pool.with_transaction(|tx| {
        for record in [
            user("u1", "eng"),
            user("u2", "eng"),
            user("u3", "ops"),
            user("u4", "ops"),
            user("u5", "ops"),
        ] {
            UserRepository::upsert(tx, &record)?;
        }

        TaskRepository::insert(
            tx,
            &TaskRecord {
                id: "t1".into(),
                title: "Payment gateway".into(),
                difficulty: 8,
                revenue: dec!(50000),
                status: TaskStatus::Completed,
                owner_id: "u1".into(),
                collaborator_ids: vec!["u3".into(), "u2".into()],
                postponement_reason: None,
                created_at,
                completed_at: Some(completed_at),
            },
        )?;
        TaskRepository::insert(
            tx,
            &TaskRecord {
                id: "t2".into(),
                title: "Audit log".into(),
                difficulty: 4,
                revenue: dec!(0),
                status: TaskStatus::InProgress,
                owner_id: "u2".into(),
                collaborator_ids: Vec::new(),
                postponement_reason: None,
                created_at,
                completed_at: None,
            },
        )?;
        Ok(())
    })
    .expect("seed data");

    (ScoringEngine::new(pool, config).expect("engine"), dir)
}

fn review(reviewer: &str, rating: i32) -> ReviewCreateInput {
    ReviewCreateInput {
        task_id: "t1".into(),
        reviewer_id: reviewer.into(),
        rating,
        comment: Some("nice work".into()),
        is_anonymous: false,
    }
}

#[test]
fn full_month_flow() {
    let (engine, _dir) = seed(ScoringConfig::default());
    let month = march();

    let (_, distribution) = engine.submit_review(review("u4", 10)).expect("first review");
    assert_eq!(distribution.adjustment_factor, dec!(1));

    let (_, distribution) = engine.submit_review(review("u5", 8)).expect("second review");
    assert_eq!(distribution.adjustment_factor, dec!(0.97));
    let owner = distribution.owner_allocation().expect("owner");
    assert_eq!((owner.base_share, owner.adjusted_share), (dec!(4.00), dec!(3.88)));
    for collaborator in ["u2", "u3"] {
        let allocation = distribution.allocation_for(collaborator).expect("collaborator");
        assert_eq!(
            (allocation.base_share, allocation.adjusted_share),
            (dec!(2.00), dec!(1.94))
        );
    }

    engine
        .evaluations()
        .submit_self_evaluation(self_evaluation("u1", &["u2", "u3"]))
        .expect("u1 self evaluation");
    engine
        .evaluations()
        .submit_self_evaluation(self_evaluation("u2", &["u1"]))
        .expect("u2 self evaluation");

    let (_, pending) = engine
        .record_work_hours("u1", &month, dec!(150), "admin")
        .expect("work hours");
    assert_eq!(pending.status, ScoreStatus::Pending);
    assert_eq!(pending.dimensions.admin_final, dec!(0));

    let (_, score) = engine
        .submit_admin_score(AdminScoreInput {
            user_id: "u1".into(),
            month,
            admin_id: "boss".into(),
            score: 9,
            comment: Some("great month".into()),
        })
        .expect("admin score");

    assert_eq!(score.status, ScoreStatus::Complete);
    assert_eq!(score.rank, None);
    assert_eq!(score.dimensions.work_hours, dec!(5.00));
    assert_eq!(score.dimensions.completion_rate, dec!(10.00));
    assert_eq!(score.dimensions.avg_difficulty, dec!(8.00));
    assert_eq!(score.dimensions.revenue, dec!(5.00));
    assert_eq!(score.dimensions.department_avg, dec!(2.91));
    assert_eq!(score.dimensions.task_rating, dec!(9.00));
    assert_eq!(score.dimensions.team_fit, dec!(10.00));
    assert_eq!(score.dimensions.peer_evaluation, dec!(0));
    assert_eq!(score.dimensions.admin_final, dec!(9.00));
    assert_eq!(score.raw.okr_total, dec!(3.88));
    assert_eq!(score.final_score, dec!(69.56));

    let summary = engine.recompute_month(&month).expect("recompute month");
    assert_eq!(summary.distributed_tasks, 1);
    assert_eq!(summary.aggregated_users, 5);
    assert!(summary.failed_users.is_empty());
    assert!(summary.failed_tasks.is_empty());

    let ranks: Vec<_> = summary.ranking.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
    assert_eq!(summary.ranking[0].user_id, "u1");
    assert_eq!(summary.ranking[0].final_score, dec!(69.56));

    let u2 = engine
        .aggregation()
        .get_score("u2", &month)
        .expect("load")
        .expect("u2 score");
    assert!(u2.is_pending());
    assert_eq!(u2.raw.assigned_tasks, 2);
    assert_eq!(u2.dimensions.completion_rate, dec!(5.00));
    assert_eq!(u2.final_score, dec!(43.56));

    let reports = &summary.department_reports;
    assert_eq!(reports.len(), 2);
    let eng = reports.iter().find(|r| r.department == "eng").expect("eng");
    assert_eq!(eng.total_okr_score, dec!(5.82));
    assert_eq!(eng.member_count, 2);
    assert_eq!(eng.avg_score, dec!(2.91));
    assert_eq!(eng.completed_tasks, 1);
    assert_eq!(eng.avg_difficulty, dec!(8.00));
    let ops = reports.iter().find(|r| r.department == "ops").expect("ops");
    assert_eq!(ops.member_count, 3);
    assert_eq!(ops.avg_score, dec!(0.65));
    assert_eq!(
        engine.departments().list(&month).expect("stored reports").len(),
        2
    );
}

#[test]
fn user_without_tasks_scores_zero_completion() {
    let (engine, _dir) = seed(ScoringConfig::default());
    let score = engine.aggregate("u5", &march()).expect("aggregate");

    assert_eq!(score.raw.assigned_tasks, 0);
    assert_eq!(score.dimensions.completion_rate, dec!(0));
    assert_eq!(score.final_score, dec!(0));
    assert!(score.is_pending());
}

#[test]
fn unknown_user_cannot_be_aggregated() {
    let (engine, _dir) = seed(ScoringConfig::default());
    assert!(engine.aggregate("ghost", &march()).is_err());
    assert!(engine
        .aggregation()
        .get_score("ghost", &march())
        .expect("load")
        .is_none());
}

#[test]
fn weight_sum_policy_sets_the_scale() {
    // u3 collaborates on t1 without reviews: completion 10, difficulty 8,
    // revenue 5 and a department average of 2.00 / 3.
    let as_is = {
        let (engine, _dir) = seed(ScoringConfig::default());
        engine.distribute_task("t1").expect("distribute");
        engine.aggregate("u3", &march()).expect("aggregate")
    };
    assert_eq!(as_is.dimensions.department_avg, dec!(0.67));
    assert_eq!(as_is.final_score, dec!(28.34));

    let rescaled = {
        let (engine, _dir) = seed(ScoringConfig {
            weight_sum_policy: WeightSumPolicy::Rescale,
            ..ScoringConfig::default()
        });
        engine.distribute_task("t1").expect("distribute");
        engine.aggregate("u3", &march()).expect("aggregate")
    };
    assert_eq!(rescaled.final_score, dec!(29.83));
}
