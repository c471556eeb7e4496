use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use super::{format_timestamp, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::task::ReviewRecord;

#[derive(Debug, Clone)]
pub struct ReviewRow {
    pub id: String,
    pub task_id: String,
    pub reviewer_id: String,
    pub rating: i32,
    pub comment: Option<String>,
    pub is_anonymous: bool,
    pub created_at: String,
}

impl ReviewRow {
    pub fn into_record(self) -> AppResult<ReviewRecord> {
        Ok(ReviewRecord {
            id: self.id,
            task_id: self.task_id,
            reviewer_id: self.reviewer_id,
            rating: self.rating,
            comment: self.comment,
            is_anonymous: self.is_anonymous,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for ReviewRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            reviewer_id: row.get("reviewer_id")?,
            rating: row.get("rating")?,
            comment: row.get("comment")?,
            is_anonymous: row.get("is_anonymous")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct ReviewRepository;

impl ReviewRepository {
    pub fn insert(conn: &Connection, review: &ReviewRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO reviews (
                    id, task_id, reviewer_id, rating, comment, is_anonymous, created_at
                ) VALUES (
                    :id, :task_id, :reviewer_id, :rating, :comment, :is_anonymous, :created_at
                )
            "#,
            named_params! {
                ":id": &review.id,
                ":task_id": &review.task_id,
                ":reviewer_id": &review.reviewer_id,
                ":rating": review.rating,
                ":comment": review
                    .comment
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty()),
                ":is_anonymous": review.is_anonymous,
                ":created_at": format_timestamp(&review.created_at),
            },
        )?;
        Ok(())
    }

    pub fn list_by_task(conn: &Connection, task_id: &str) -> AppResult<Vec<ReviewRecord>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, task_id, reviewer_id, rating, comment, is_anonymous, created_at
                FROM reviews
                WHERE task_id = :task_id
                ORDER BY created_at ASC, id ASC
            "#,
        )?;

        let rows = stmt
            .query_map(named_params! {":task_id": task_id}, |row| {
                ReviewRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(ReviewRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(rows)
    }

    pub fn exists_for(conn: &Connection, task_id: &str, reviewer_id: &str) -> AppResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reviews WHERE task_id = ?1 AND reviewer_id = ?2",
            (task_id, reviewer_id),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
