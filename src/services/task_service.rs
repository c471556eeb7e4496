use chrono::Utc;
use tracing::{debug, info};

use crate::db::repositories::distribution_repository::DistributionRepository;
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::models::task::{TaskCreateInput, TaskRecord, TaskStatus, TaskStatusChange};
use crate::models::trigger::RecomputeTrigger;

/// Thin write surface over tasks so status changes report what they invalidate.
#[derive(Clone)]
pub struct TaskService {
    db: DbPool,
}

impl TaskService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn create_task(&self, input: TaskCreateInput) -> AppResult<TaskRecord> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::validation("任务标题不能为空"));
        }

        let record = TaskRecord {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            difficulty: input.difficulty,
            revenue: input.revenue,
            status: TaskStatus::NotStarted,
            owner_id: input.owner_id.trim().to_string(),
            collaborator_ids: input.collaborator_ids,
            postponement_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.db
            .with_transaction(|tx| TaskRepository::insert(tx, &record))?;
        info!(target: "app::task", task_id = %record.id, "task created");
        Ok(record)
    }

    /// Applies a status change and returns the recompute it calls for, if any.
    ///
    /// Moving a task back to an unfinished status drops its stored distribution.
    pub fn change_status(
        &self,
        task_id: &str,
        change: TaskStatusChange,
    ) -> AppResult<(TaskRecord, Option<RecomputeTrigger>)> {
        let reason = change
            .postponement_reason
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let (before, after) = self.db.with_transaction(|tx| {
            let before = TaskRepository::find_by_id(tx, task_id)?.ok_or_else(AppError::not_found)?;
            let completed_at = match change.status {
                TaskStatus::Completed => Some(change.completed_at.unwrap_or_else(Utc::now)),
                _ => change.completed_at,
            };
            let after = TaskRepository::update_status(
                tx,
                task_id,
                change.status,
                reason,
                completed_at.as_ref(),
            )?;
            if !after.status.is_scorable() {
                DistributionRepository::delete_for_task(tx, task_id)?;
            }
            Ok((before, after))
        })?;

        let trigger = match after.status {
            TaskStatus::Completed if before.status != TaskStatus::Completed => {
                Some(RecomputeTrigger::TaskCompleted {
                    task_id: after.id.clone(),
                })
            }
            TaskStatus::Completed => None,
            TaskStatus::Postponed
                if before.status != TaskStatus::Postponed
                    || before.postponement_reason != after.postponement_reason =>
            {
                Some(RecomputeTrigger::PostponementChanged {
                    task_id: after.id.clone(),
                })
            }
            _ => None,
        };

        debug!(
            target: "app::task",
            task_id,
            from = %before.status,
            to = %after.status,
            trigger = ?trigger,
            "task status changed"
        );
        Ok((after, trigger))
    }

    pub fn get_task(&self, task_id: &str) -> AppResult<TaskRecord> {
        self.db
            .with_connection(|conn| TaskRepository::find_by_id(conn, task_id))?
            .ok_or_else(AppError::not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn setup_service() -> (TaskService, tempfile::TempDir) {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("tasks.sqlite")).expect("db pool");
        (TaskService::new(pool), dir)
    }

    fn input() -> TaskCreateInput {
        TaskCreateInput {
            title: "  Migrate invoices  ".into(),
            difficulty: 6,
            revenue: dec!(1200),
            owner_id: "u1".into(),
            collaborator_ids: vec!["u3".into(), "u2".into()],
        }
    }

    #[test]
    fn create_and_fetch_task() {
        let (service, _dir) = setup_service();
        let record = service.create_task(input()).expect("create task");

        assert!(!record.id.is_empty());
        assert_eq!(record.title, "Migrate invoices");
        assert_eq!(record.status, TaskStatus::NotStarted);

        let fetched = service.get_task(&record.id).expect("fetch task");
        assert_eq!(fetched.collaborator_ids, vec!["u2", "u3"]);
        assert_eq!(fetched.revenue, dec!(1200));
    }

    #[test]
    fn failed_collaborator_insert_leaves_no_task() {
        let (service, _dir) = setup_service();
        service
            .db
            .with_connection(|conn| {
                conn.execute_batch(
                    r#"
                    CREATE TRIGGER reject_blocked_collaborator
                    BEFORE INSERT ON task_collaborators
                    WHEN NEW.user_id = 'blocked'
                    BEGIN
                        SELECT RAISE(ABORT, 'blocked collaborator');
                    END;
                    "#,
                )?;
                Ok(())
            })
            .expect("install trigger");

        let result = service.create_task(TaskCreateInput {
            collaborator_ids: vec!["u2".into(), "blocked".into()],
            ..input()
        });
        assert!(result.is_err());

        let (tasks, collaborators): (i64, i64) = service
            .db
            .with_connection(|conn| {
                Ok((
                    conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?,
                    conn.query_row("SELECT COUNT(*) FROM task_collaborators", [], |row| {
                        row.get(0)
                    })?,
                ))
            })
            .expect("count rows");
        assert_eq!((tasks, collaborators), (0, 0));
    }

    #[test]
    fn rejects_out_of_range_difficulty() {
        let (service, _dir) = setup_service();
        let err = service
            .create_task(TaskCreateInput {
                difficulty: 11,
                ..input()
            })
            .expect_err("difficulty 11");
        assert!(err.is_validation());
    }

    #[test]
    fn completing_and_postponing_emit_triggers() {
        let (service, _dir) = setup_service();
        let task = service.create_task(input()).expect("create task");

        let (_, trigger) = service
            .change_status(
                &task.id,
                TaskStatusChange {
                    status: TaskStatus::InProgress,
                    postponement_reason: None,
                    completed_at: None,
                },
            )
            .expect("start");
        assert_eq!(trigger, None);

        let (postponed, trigger) = service
            .change_status(
                &task.id,
                TaskStatusChange {
                    status: TaskStatus::Postponed,
                    postponement_reason: Some("waiting on vendor".into()),
                    completed_at: None,
                },
            )
            .expect("postpone");
        assert_eq!(postponed.postponement_reason.as_deref(), Some("waiting on vendor"));
        assert_eq!(
            trigger,
            Some(RecomputeTrigger::PostponementChanged {
                task_id: task.id.clone()
            })
        );

        let (completed, trigger) = service
            .change_status(
                &task.id,
                TaskStatusChange {
                    status: TaskStatus::Completed,
                    postponement_reason: None,
                    completed_at: None,
                },
            )
            .expect("complete");
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.postponement_reason, None);
        assert_eq!(
            trigger,
            Some(RecomputeTrigger::TaskCompleted {
                task_id: task.id.clone()
            })
        );
    }

    #[test]
    fn postponing_without_reason_fails() {
        let (service, _dir) = setup_service();
        let task = service.create_task(input()).expect("create task");
        let err = service
            .change_status(
                &task.id,
                TaskStatusChange {
                    status: TaskStatus::Postponed,
                    postponement_reason: Some("   ".into()),
                    completed_at: None,
                },
            )
            .expect_err("missing reason");
        assert!(err.is_validation());
    }
}
