use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_count, parse_month, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::month::Month;
use crate::models::performance::DepartmentReport;
use crate::utils::decimal::parse_decimal;

#[derive(Debug, Clone)]
pub struct DepartmentReportRow {
    pub department: String,
    pub month: String,
    pub total_okr_score: String,
    pub member_count: i64,
    pub avg_score: String,
    pub completed_tasks: i64,
    pub avg_difficulty: String,
    pub generated_at: String,
}

impl DepartmentReportRow {
    pub fn into_record(self) -> AppResult<DepartmentReport> {
        Ok(DepartmentReport {
            department: self.department,
            month: parse_month(&self.month)?,
            total_okr_score: parse_decimal(&self.total_okr_score)?,
            member_count: parse_count(self.member_count, "member_count")?,
            avg_score: parse_decimal(&self.avg_score)?,
            completed_tasks: parse_count(self.completed_tasks, "completed_tasks")?,
            avg_difficulty: parse_decimal(&self.avg_difficulty)?,
            generated_at: parse_timestamp(&self.generated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for DepartmentReportRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            department: row.get("department")?,
            month: row.get("month")?,
            total_okr_score: row.get("total_okr_score")?,
            member_count: row.get("member_count")?,
            avg_score: row.get("avg_score")?,
            completed_tasks: row.get("completed_tasks")?,
            avg_difficulty: row.get("avg_difficulty")?,
            generated_at: row.get("generated_at")?,
        })
    }
}

const BASE_SELECT: &str = r#"
    SELECT department, month, total_okr_score, member_count, avg_score,
           completed_tasks, avg_difficulty, generated_at
    FROM department_reports
"#;

pub struct DepartmentReportRepository;

impl DepartmentReportRepository {
    /// Drops every report of the month and writes `reports` in its place.
    pub fn replace_month(
        conn: &Connection,
        month: &Month,
        reports: &[DepartmentReport],
    ) -> AppResult<()> {
        conn.execute(
            "DELETE FROM department_reports WHERE month = ?1",
            [month.key()],
        )?;

        let mut stmt = conn.prepare(
            r#"
                INSERT INTO department_reports (
                    department, month, total_okr_score, member_count, avg_score,
                    completed_tasks, avg_difficulty, generated_at
                ) VALUES (
                    :department, :month, :total_okr_score, :member_count, :avg_score,
                    :completed_tasks, :avg_difficulty, :generated_at
                )
            "#,
        )?;
        for report in reports {
            stmt.execute(named_params! {
                ":department": &report.department,
                ":month": report.month.key(),
                ":total_okr_score": report.total_okr_score.to_string(),
                ":member_count": i64::from(report.member_count),
                ":avg_score": report.avg_score.to_string(),
                ":completed_tasks": i64::from(report.completed_tasks),
                ":avg_difficulty": report.avg_difficulty.to_string(),
                ":generated_at": format_timestamp(&report.generated_at),
            })?;
        }
        Ok(())
    }

    pub fn find(
        conn: &Connection,
        department: &str,
        month: &Month,
    ) -> AppResult<Option<DepartmentReport>> {
        let sql = format!("{BASE_SELECT} WHERE department = :department AND month = :month");
        let row = conn
            .query_row(
                &sql,
                named_params! {":department": department, ":month": month.key()},
                |row| DepartmentReportRow::try_from(row),
            )
            .optional()?;
        row.map(DepartmentReportRow::into_record).transpose()
    }

    pub fn list_by_month(conn: &Connection, month: &Month) -> AppResult<Vec<DepartmentReport>> {
        let sql = format!("{BASE_SELECT} WHERE month = :month ORDER BY department ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(named_params! {":month": month.key()}, |row| {
                DepartmentReportRow::try_from(row)
            })?
            .map(|row| {
                row.map_err(AppError::from)
                    .and_then(DepartmentReportRow::into_record)
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }
}
