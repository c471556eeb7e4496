use std::sync::Arc;
use std::thread;

use chrono::Utc;
use okr_scoring::db::repositories::user_repository::UserRepository;
use okr_scoring::models::evaluation::{
    AdminAction, AdminScoreInput, PeerEvaluationInput, SelfAssessment, SelfEvaluationInput,
};
use okr_scoring::models::task::{
    ReviewCreateInput, TaskCreateInput, TaskStatus, TaskStatusChange,
};
use okr_scoring::models::user::{UserRecord, UserRole};
use okr_scoring::services::review_service::ReviewService;
use okr_scoring::services::task_service::TaskService;
use okr_scoring::{
    AppError, DbPool, Month, RecomputeOutcome, RecomputeTrigger, ScoringConfig, ScoringEngine,
};
use rust_decimal_macros::dec;
use tempfile::tempdir;

struct Fixture {
    engine: ScoringEngine,
    tasks: TaskService,
    reviews: ReviewService,
    month: Month,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempdir().expect("temp dir");
    let pool = DbPool::new(dir.path().join("triggers.sqlite")).expect("db pool");
    pool.with_transaction(|tx| {
        for id in ["u1", "u2", "u3", "u4"] {
            UserRepository::upsert(
                tx,
                &UserRecord {
                    id: id.into(),
                    name: id.into(),
                    department: "product".into(),
                    role: if id == "u4" {
                        UserRole::Admin
                    } else {
                        UserRole::Member
                    },
                    is_active: true,
                },
            )?;
        }
        Ok(())
    })
    .expect("seed users");

    Fixture {
        engine: ScoringEngine::new(pool.clone(), ScoringConfig::default()).expect("engine"),
        tasks: TaskService::new(pool.clone()),
        reviews: ReviewService::new(pool),
        month: Month::of_timestamp(&Utc::now()),
        _dir: dir,
    }
}

fn create_task(fixture: &Fixture, collaborators: &[&str]) -> String {
    fixture
        .tasks
        .create_task(TaskCreateInput {
            title: "Onboarding flow".into(),
            difficulty: 6,
            revenue: dec!(2000),
            owner_id: "u1".into(),
            collaborator_ids: collaborators.iter().map(|id| id.to_string()).collect(),
        })
        .expect("create task")
        .id
}

fn change(status: TaskStatus, reason: Option<&str>) -> TaskStatusChange {
    TaskStatusChange {
        status,
        postponement_reason: reason.map(str::to_string),
        completed_at: None,
    }
}

fn self_evaluation(user_id: &str, month: Month) -> SelfEvaluationInput {
    let assessment = SelfAssessment {
        score: 7,
        justification: String::new(),
        option: None,
    };
    SelfEvaluationInput {
        user_id: user_id.into(),
        month,
        culture_understanding: assessment.clone(),
        team_fit: assessment.clone(),
        team_fit_ranking: Vec::new(),
        monthly_growth: assessment.clone(),
        biggest_contribution: assessment,
    }
}

#[test]
fn task_status_triggers_drive_redistribution() {
    let fixture = fixture();
    let task_id = create_task(&fixture, &["u2"]);

    let (_, trigger) = fixture
        .tasks
        .change_status(&task_id, change(TaskStatus::Postponed, Some("blocked by legal")))
        .expect("postpone");
    let trigger = trigger.expect("postponement trigger");
    assert_eq!(trigger.task_id(), Some(task_id.as_str()));

    let RecomputeOutcome::Distribution(postponed) =
        fixture.engine.handle(trigger).expect("handle postponement")
    else {
        panic!("expected a distribution");
    };
    assert_eq!(postponed.penalty_factor, dec!(0.8));
    assert_eq!(postponed.adjusted_total(), dec!(4.80));

    let (_, trigger) = fixture
        .tasks
        .change_status(&task_id, change(TaskStatus::Completed, None))
        .expect("complete");
    let RecomputeOutcome::Distribution(completed) = fixture
        .engine
        .handle(trigger.expect("completion trigger"))
        .expect("handle completion")
    else {
        panic!("expected a distribution");
    };
    assert_eq!(completed.penalty_factor, dec!(1));
    assert_eq!(completed.adjusted_total(), dec!(6.00));

    let (_, trigger) = fixture
        .tasks
        .change_status(&task_id, change(TaskStatus::InProgress, None))
        .expect("reopen");
    assert_eq!(trigger, None);
    assert!(fixture
        .engine
        .distribution()
        .get_distribution(&task_id)
        .expect("load")
        .is_none());
}

#[test]
fn review_submission_rules() {
    let fixture = fixture();
    let task_id = create_task(&fixture, &["u2"]);
    let review = |reviewer: &str, rating: i32| ReviewCreateInput {
        task_id: task_id.clone(),
        reviewer_id: reviewer.into(),
        rating,
        comment: None,
        is_anonymous: true,
    };

    let unfinished = fixture
        .reviews
        .submit_review(review("u3", 8))
        .expect_err("task not finished");
    assert!(unfinished.is_validation());

    fixture
        .tasks
        .change_status(&task_id, change(TaskStatus::Completed, None))
        .expect("complete");

    let own = fixture
        .reviews
        .submit_review(review("u2", 9))
        .expect_err("contributor review");
    assert!(own.is_validation());

    let out_of_range = fixture
        .reviews
        .submit_review(review("u3", 0))
        .expect_err("rating 0");
    assert!(out_of_range.is_validation());

    let (_, trigger) = fixture
        .reviews
        .submit_review(review("u3", 6))
        .expect("valid review");
    assert_eq!(
        trigger,
        RecomputeTrigger::ReviewAdded {
            task_id: task_id.clone()
        }
    );

    let duplicate = fixture
        .reviews
        .submit_review(review("u3", 7))
        .expect_err("second review by same reviewer");
    assert!(matches!(duplicate, AppError::Conflict { .. }));

    let RecomputeOutcome::Distribution(distribution) =
        fixture.engine.handle(trigger).expect("handle review")
    else {
        panic!("expected a distribution");
    };
    // (6 / 10) × 0.3 + 0.7
    assert_eq!(distribution.adjustment_factor, dec!(0.88));
    assert_eq!(distribution.review_count, 1);
}

#[test]
fn evaluation_triggers_reaggregate_the_subject() {
    let fixture = fixture();
    let month = fixture.month;
    fixture
        .engine
        .evaluations()
        .submit_self_evaluation(self_evaluation("u1", month))
        .expect("self evaluation");

    let (_, score) = fixture
        .engine
        .record_peer_evaluation(
            &month,
            PeerEvaluationInput {
                subject_id: "u1".into(),
                evaluator_id: "u3".into(),
                score: 6,
                rank: 2,
                comment: Some("reliable".into()),
                is_anonymous: false,
            },
        )
        .expect("peer evaluation");
    assert_eq!(score.dimensions.peer_evaluation, dec!(6.00));
    assert_eq!(score.raw.peer_evaluation_count, 1);

    let (_, score) = fixture
        .engine
        .submit_admin_score(AdminScoreInput {
            user_id: "u1".into(),
            month,
            admin_id: "u4".into(),
            score: 8,
            comment: None,
        })
        .expect("admin score");
    assert!(!score.is_pending());

    let cleared = fixture
        .engine
        .clear_admin_score("u1", &month, "u4")
        .expect("clear admin score");
    assert!(cleared.is_pending());
    assert_eq!(cleared.dimensions.admin_final, dec!(0));

    let actions: Vec<_> = fixture
        .engine
        .evaluations()
        .admin_history("u1", &month)
        .expect("history")
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(actions, vec![AdminAction::Create, AdminAction::Delete]);

    let RecomputeOutcome::Score(score) = fixture
        .engine
        .handle(RecomputeTrigger::WorkHoursRecorded {
            user_id: "u1".into(),
            month,
        })
        .expect("handle work hours")
    else {
        panic!("expected a score");
    };
    assert_eq!(score.dimensions.work_hours, dec!(0));
}

#[test]
fn admin_score_needs_an_evaluation() {
    let fixture = fixture();
    let err = fixture
        .engine
        .submit_admin_score(AdminScoreInput {
            user_id: "u2".into(),
            month: fixture.month,
            admin_id: "u4".into(),
            score: 8,
            comment: None,
        })
        .expect_err("no evaluation yet");
    assert!(matches!(err, AppError::NotFound));
}

#[test]
fn monthly_trigger_ranks_every_active_user() {
    let fixture = fixture();
    let task_id = create_task(&fixture, &["u2", "u3"]);
    fixture
        .tasks
        .change_status(&task_id, change(TaskStatus::Completed, None))
        .expect("complete");

    let RecomputeOutcome::Month(summary) = fixture
        .engine
        .handle(RecomputeTrigger::MonthlyRecompute {
            month: fixture.month,
        })
        .expect("monthly recompute")
    else {
        panic!("expected a monthly summary");
    };

    assert_eq!(summary.distributed_tasks, 1);
    assert_eq!(summary.aggregated_users, 4);
    let order: Vec<_> = summary
        .ranking
        .iter()
        .map(|score| (score.user_id.as_str(), score.rank))
        .collect();
    // u1 to u3 score the same and fall back to id order; u4 has no tasks.
    assert_eq!(
        order,
        vec![
            ("u1", Some(1)),
            ("u2", Some(2)),
            ("u3", Some(3)),
            ("u4", Some(4)),
        ]
    );
    assert_eq!(summary.department_reports.len(), 1);
    assert_eq!(summary.department_reports[0].total_okr_score, dec!(6.00));
}

#[test]
fn concurrent_aggregations_of_one_user_settle_on_one_row() {
    let fixture = Arc::new(fixture());
    let month = Month::new(2024, 1).expect("month");

    fixture
        .engine
        .record_work_hours("u2", &month, dec!(240), "u4")
        .expect("work hours");

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let fixture = Arc::clone(&fixture);
            thread::spawn(move || fixture.engine.aggregate("u2", &month))
        })
        .collect();
    for handle in handles {
        let score = handle.join().expect("worker").expect("aggregate");
        assert_eq!(score.dimensions.work_hours, dec!(8.00));
    }

    let ranked = fixture.engine.rank(&month).expect("rank");
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].rank, Some(1));
}
