use std::convert::TryFrom;

use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::month::Month;
use crate::models::task::{TaskRecord, TaskStatus};
use crate::utils::decimal::parse_decimal;

const BASE_SELECT: &str = r#"
    SELECT
        id,
        title,
        difficulty,
        revenue,
        status,
        owner_id,
        postponement_reason,
        created_at,
        completed_at
    FROM tasks
"#;

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub difficulty: i64,
    pub revenue: String,
    pub status: String,
    pub owner_id: String,
    pub postponement_reason: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl TaskRow {
    pub fn into_record(self, collaborator_ids: Vec<String>) -> AppResult<TaskRecord> {
        let difficulty = u8::try_from(self.difficulty)
            .map_err(|_| AppError::database(format!("任务难度超出范围: {}", self.difficulty)))?;

        Ok(TaskRecord {
            id: self.id,
            title: self.title,
            difficulty,
            revenue: parse_decimal(&self.revenue)?,
            status: self.status.parse()?,
            owner_id: self.owner_id,
            collaborator_ids,
            postponement_reason: self.postponement_reason,
            created_at: parse_timestamp(&self.created_at)?,
            completed_at: parse_optional_timestamp(self.completed_at.as_deref())?,
        })
    }
}

impl TryFrom<&Row<'_>> for TaskRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            difficulty: row.get("difficulty")?,
            revenue: row.get("revenue")?,
            status: row.get("status")?,
            owner_id: row.get("owner_id")?,
            postponement_reason: row.get("postponement_reason")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

pub struct TaskRepository;

impl TaskRepository {
    /// Inserts a validated task together with its collaborator set.
    pub fn insert(conn: &Connection, task: &TaskRecord) -> AppResult<()> {
        task.validate()?;

        conn.execute(
            r#"
                INSERT INTO tasks (
                    id,
                    title,
                    difficulty,
                    revenue,
                    status,
                    owner_id,
                    postponement_reason,
                    created_at,
                    completed_at
                ) VALUES (
                    :id,
                    :title,
                    :difficulty,
                    :revenue,
                    :status,
                    :owner_id,
                    :postponement_reason,
                    :created_at,
                    :completed_at
                )
            "#,
            named_params! {
                ":id": &task.id,
                ":title": &task.title,
                ":difficulty": i64::from(task.difficulty),
                ":revenue": task.revenue.to_string(),
                ":status": task.status.as_str(),
                ":owner_id": &task.owner_id,
                ":postponement_reason": &task.postponement_reason,
                ":created_at": format_timestamp(&task.created_at),
                ":completed_at": task.completed_at.as_ref().map(format_timestamp),
            },
        )?;

        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO task_collaborators (task_id, user_id) VALUES (?1, ?2)",
        )?;
        for collaborator in task.normalized_collaborators() {
            stmt.execute((&task.id, &collaborator))?;
        }

        Ok(())
    }

    /// Moves a task to a new status; the postponement reason travels with it.
    pub fn update_status(
        conn: &Connection,
        id: &str,
        status: TaskStatus,
        postponement_reason: Option<&str>,
        completed_at: Option<&DateTime<Utc>>,
    ) -> AppResult<TaskRecord> {
        let mut task = Self::find_by_id(conn, id)?.ok_or_else(AppError::not_found)?;
        task.status = status;
        task.postponement_reason = postponement_reason.map(str::to_string);
        if completed_at.is_some() {
            task.completed_at = completed_at.cloned();
        }
        task.validate()?;

        conn.execute(
            r#"
                UPDATE tasks SET
                    status = :status,
                    postponement_reason = :postponement_reason,
                    completed_at = :completed_at
                WHERE id = :id
            "#,
            named_params! {
                ":id": id,
                ":status": task.status.as_str(),
                ":postponement_reason": &task.postponement_reason,
                ":completed_at": task.completed_at.as_ref().map(format_timestamp),
            },
        )?;

        Ok(task)
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<TaskRecord>> {
        let sql = format!("{BASE_SELECT} WHERE id = :id");
        let row = conn
            .query_row(&sql, named_params! {":id": id}, |row| TaskRow::try_from(row))
            .optional()?;

        match row {
            Some(row) => {
                let collaborators = Self::collaborators_of(conn, &row.id)?;
                row.into_record(collaborators).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Tasks the user owns or collaborates on that were created or completed in `month`.
    pub fn list_for_participant_in_month(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Vec<TaskRecord>> {
        let sql = format!(
            r#"{BASE_SELECT}
            WHERE (
                owner_id = :user_id
                OR id IN (SELECT task_id FROM task_collaborators WHERE user_id = :user_id)
            )
            AND (
                substr(created_at, 1, 7) = :month
                OR substr(completed_at, 1, 7) = :month
            )
            ORDER BY id ASC"#
        );
        Self::query_tasks(
            conn,
            &sql,
            named_params! {":user_id": user_id, ":month": month.key()},
        )
    }

    /// Completed or postponed tasks whose completion (or creation, when never
    /// completed) falls in `month`.
    pub fn list_scorable_in_month(conn: &Connection, month: &Month) -> AppResult<Vec<TaskRecord>> {
        let sql = format!(
            r#"{BASE_SELECT}
            WHERE status IN ('completed', 'postponed')
            AND substr(COALESCE(completed_at, created_at), 1, 7) = :month
            ORDER BY id ASC"#
        );
        Self::query_tasks(conn, &sql, named_params! {":month": month.key()})
    }

    fn query_tasks(
        conn: &Connection,
        sql: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> AppResult<Vec<TaskRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| TaskRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let collaborators = Self::collaborators_of(conn, &row.id)?;
                row.into_record(collaborators)
            })
            .collect()
    }

    fn collaborators_of(conn: &Connection, task_id: &str) -> AppResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT user_id FROM task_collaborators WHERE task_id = ?1 ORDER BY user_id ASC",
        )?;
        let ids = stmt
            .query_map([task_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
