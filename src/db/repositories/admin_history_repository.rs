use std::convert::TryFrom;

use rusqlite::{named_params, Connection, Row};

use super::{format_timestamp, parse_month, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::evaluation::AdminEvaluationHistoryRecord;
use crate::models::month::Month;

#[derive(Debug, Clone)]
pub struct AdminHistoryRow {
    pub id: String,
    pub user_id: String,
    pub month: String,
    pub admin_id: String,
    pub action: String,
    pub previous_score: Option<i32>,
    pub new_score: Option<i32>,
    pub previous_comment: Option<String>,
    pub new_comment: Option<String>,
    pub created_at: String,
}

impl AdminHistoryRow {
    pub fn into_record(self) -> AppResult<AdminEvaluationHistoryRecord> {
        Ok(AdminEvaluationHistoryRecord {
            id: self.id,
            user_id: self.user_id,
            month: parse_month(&self.month)?,
            admin_id: self.admin_id,
            action: self.action.parse()?,
            previous_score: self.previous_score,
            new_score: self.new_score,
            previous_comment: self.previous_comment,
            new_comment: self.new_comment,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for AdminHistoryRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            month: row.get("month")?,
            admin_id: row.get("admin_id")?,
            action: row.get("action")?,
            previous_score: row.get("previous_score")?,
            new_score: row.get("new_score")?,
            previous_comment: row.get("previous_comment")?,
            new_comment: row.get("new_comment")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct AdminHistoryRepository;

impl AdminHistoryRepository {
    pub fn insert(conn: &Connection, entry: &AdminEvaluationHistoryRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO admin_evaluation_history (
                    id, user_id, month, admin_id, action,
                    previous_score, new_score, previous_comment, new_comment, created_at
                ) VALUES (
                    :id, :user_id, :month, :admin_id, :action,
                    :previous_score, :new_score, :previous_comment, :new_comment, :created_at
                )
            "#,
            named_params! {
                ":id": &entry.id,
                ":user_id": &entry.user_id,
                ":month": entry.month.key(),
                ":admin_id": &entry.admin_id,
                ":action": entry.action.as_str(),
                ":previous_score": entry.previous_score,
                ":new_score": entry.new_score,
                ":previous_comment": &entry.previous_comment,
                ":new_comment": &entry.new_comment,
                ":created_at": format_timestamp(&entry.created_at),
            },
        )?;
        Ok(())
    }

    /// Oldest first.
    pub fn list_for(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Vec<AdminEvaluationHistoryRecord>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, user_id, month, admin_id, action,
                       previous_score, new_score, previous_comment, new_comment, created_at
                FROM admin_evaluation_history
                WHERE user_id = :user_id AND month = :month
                ORDER BY created_at ASC, rowid ASC
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| AdminHistoryRow::try_from(row),
            )?
            .map(|row| row.map_err(AppError::from).and_then(AdminHistoryRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }
}
