use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_month, parse_timestamp};
use crate::error::AppResult;
use crate::models::evaluation::WorkHoursRecord;
use crate::models::month::Month;
use crate::utils::decimal::parse_decimal;

#[derive(Debug, Clone)]
pub struct WorkHoursRow {
    pub id: String,
    pub user_id: String,
    pub month: String,
    pub hours: String,
    pub recorded_by: String,
    pub created_at: String,
}

impl WorkHoursRow {
    pub fn into_record(self) -> AppResult<WorkHoursRecord> {
        Ok(WorkHoursRecord {
            id: self.id,
            user_id: self.user_id,
            month: parse_month(&self.month)?,
            hours: parse_decimal(&self.hours)?,
            recorded_by: self.recorded_by,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for WorkHoursRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            month: row.get("month")?,
            hours: row.get("hours")?,
            recorded_by: row.get("recorded_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct WorkHoursRepository;

impl WorkHoursRepository {
    /// One figure per user and month; a later record replaces the earlier one.
    pub fn upsert(conn: &Connection, record: &WorkHoursRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO work_hours (id, user_id, month, hours, recorded_by, created_at)
                VALUES (:id, :user_id, :month, :hours, :recorded_by, :created_at)
                ON CONFLICT(user_id, month) DO UPDATE SET
                    hours = excluded.hours,
                    recorded_by = excluded.recorded_by,
                    created_at = excluded.created_at
            "#,
            named_params! {
                ":id": &record.id,
                ":user_id": &record.user_id,
                ":month": record.month.key(),
                ":hours": record.hours.to_string(),
                ":recorded_by": &record.recorded_by,
                ":created_at": format_timestamp(&record.created_at),
            },
        )?;
        Ok(())
    }

    pub fn find(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Option<WorkHoursRecord>> {
        let row = conn
            .query_row(
                r#"
                    SELECT id, user_id, month, hours, recorded_by, created_at
                    FROM work_hours
                    WHERE user_id = :user_id AND month = :month
                "#,
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| WorkHoursRow::try_from(row),
            )
            .optional()?;
        row.map(WorkHoursRow::into_record).transpose()
    }
}
