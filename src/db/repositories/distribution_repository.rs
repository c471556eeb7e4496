use std::convert::TryFrom;

use rust_decimal::Decimal;
use rusqlite::{named_params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_count, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::distribution::{ScoreAllocation, ScoreDistribution};
use crate::models::month::Month;
use crate::utils::decimal::parse_decimal;

#[derive(Debug, Clone)]
pub struct DistributionRow {
    pub task_id: String,
    pub total_value: String,
    pub adjustment_factor: String,
    pub penalty_factor: String,
    pub review_count: i64,
    pub average_rating: Option<String>,
    pub computed_at: String,
}

impl DistributionRow {
    pub fn into_record(self, allocations: Vec<ScoreAllocation>) -> AppResult<ScoreDistribution> {
        Ok(ScoreDistribution {
            task_id: self.task_id,
            total_value: parse_decimal(&self.total_value)?,
            adjustment_factor: parse_decimal(&self.adjustment_factor)?,
            penalty_factor: parse_decimal(&self.penalty_factor)?,
            review_count: parse_count(self.review_count, "review_count")?,
            average_rating: self
                .average_rating
                .as_deref()
                .map(parse_decimal)
                .transpose()?,
            allocations,
            computed_at: parse_timestamp(&self.computed_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for DistributionRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            task_id: row.get("task_id")?,
            total_value: row.get("total_value")?,
            adjustment_factor: row.get("adjustment_factor")?,
            penalty_factor: row.get("penalty_factor")?,
            review_count: row.get("review_count")?,
            average_rating: row.get("average_rating")?,
            computed_at: row.get("computed_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AllocationRow {
    pub task_id: String,
    pub user_id: String,
    pub role: String,
    pub base_share: String,
    pub adjusted_share: String,
    pub percentage: String,
}

impl AllocationRow {
    pub fn into_record(self) -> AppResult<ScoreAllocation> {
        Ok(ScoreAllocation {
            task_id: self.task_id,
            user_id: self.user_id,
            role: self.role.parse()?,
            base_share: parse_decimal(&self.base_share)?,
            adjusted_share: parse_decimal(&self.adjusted_share)?,
            percentage: parse_decimal(&self.percentage)?,
        })
    }
}

impl TryFrom<&Row<'_>> for AllocationRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            task_id: row.get("task_id")?,
            user_id: row.get("user_id")?,
            role: row.get("role")?,
            base_share: row.get("base_share")?,
            adjusted_share: row.get("adjusted_share")?,
            percentage: row.get("percentage")?,
        })
    }
}

/// Month filter shared by the per-user allocation queries: the task is
/// finished and its completion (creation for undated postponements) falls in
/// the month.
const FINISHED_IN_MONTH: &str = r#"
    t.status IN ('completed', 'postponed')
    AND substr(COALESCE(t.completed_at, t.created_at), 1, 7) = :month
"#;

pub struct DistributionRepository;

impl DistributionRepository {
    /// Overwrites the stored distribution of the task. Call inside a transaction
    /// so that the delete and the inserts land together.
    pub fn replace(conn: &Connection, distribution: &ScoreDistribution) -> AppResult<()> {
        conn.execute(
            "DELETE FROM score_distributions WHERE task_id = ?1",
            [&distribution.task_id],
        )?;

        conn.execute(
            r#"
                INSERT INTO score_distributions (
                    task_id,
                    total_value,
                    adjustment_factor,
                    penalty_factor,
                    review_count,
                    average_rating,
                    computed_at
                ) VALUES (
                    :task_id,
                    :total_value,
                    :adjustment_factor,
                    :penalty_factor,
                    :review_count,
                    :average_rating,
                    :computed_at
                )
            "#,
            named_params! {
                ":task_id": &distribution.task_id,
                ":total_value": distribution.total_value.to_string(),
                ":adjustment_factor": distribution.adjustment_factor.to_string(),
                ":penalty_factor": distribution.penalty_factor.to_string(),
                ":review_count": i64::from(distribution.review_count),
                ":average_rating": distribution.average_rating.map(|value| value.to_string()),
                ":computed_at": format_timestamp(&distribution.computed_at),
            },
        )?;

        let mut stmt = conn.prepare(
            r#"
                INSERT INTO score_allocations (
                    task_id, user_id, role, base_share, adjusted_share, percentage
                ) VALUES (
                    :task_id, :user_id, :role, :base_share, :adjusted_share, :percentage
                )
            "#,
        )?;
        for allocation in &distribution.allocations {
            stmt.execute(named_params! {
                ":task_id": &allocation.task_id,
                ":user_id": &allocation.user_id,
                ":role": allocation.role.as_str(),
                ":base_share": allocation.base_share.to_string(),
                ":adjusted_share": allocation.adjusted_share.to_string(),
                ":percentage": allocation.percentage.to_string(),
            })?;
        }

        Ok(())
    }

    pub fn delete_for_task(conn: &Connection, task_id: &str) -> AppResult<bool> {
        let removed = conn.execute(
            "DELETE FROM score_distributions WHERE task_id = ?1",
            [task_id],
        )?;
        Ok(removed > 0)
    }

    pub fn find_by_task(conn: &Connection, task_id: &str) -> AppResult<Option<ScoreDistribution>> {
        let row = conn
            .query_row(
                r#"
                    SELECT task_id, total_value, adjustment_factor, penalty_factor,
                           review_count, average_rating, computed_at
                    FROM score_distributions
                    WHERE task_id = :task_id
                "#,
                named_params! {":task_id": task_id},
                |row| DistributionRow::try_from(row),
            )
            .optional()?;

        match row {
            Some(row) => {
                let allocations = Self::allocations_of(conn, task_id)?;
                row.into_record(allocations).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Owner first, then collaborators by id.
    pub fn allocations_of(conn: &Connection, task_id: &str) -> AppResult<Vec<ScoreAllocation>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT task_id, user_id, role, base_share, adjusted_share, percentage
                FROM score_allocations
                WHERE task_id = :task_id
                ORDER BY CASE role WHEN 'owner' THEN 0 ELSE 1 END, user_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(named_params! {":task_id": task_id}, |row| {
                AllocationRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(AllocationRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_for_user_in_month(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Vec<ScoreAllocation>> {
        let sql = format!(
            r#"
                SELECT a.task_id, a.user_id, a.role, a.base_share, a.adjusted_share, a.percentage
                FROM score_allocations a
                JOIN tasks t ON t.id = a.task_id
                WHERE a.user_id = :user_id AND {FINISHED_IN_MONTH}
                ORDER BY a.task_id ASC
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| AllocationRow::try_from(row),
            )?
            .map(|row| row.map_err(AppError::from).and_then(AllocationRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    /// Summed in decimal after loading; SQLite would sum TEXT columns as floats.
    pub fn sum_adjusted_for_user_in_month(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Decimal> {
        Ok(Self::list_for_user_in_month(conn, user_id, month)?
            .iter()
            .map(|allocation| allocation.adjusted_share)
            .sum())
    }

    pub fn count_for_user_in_month(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<u32> {
        let sql = format!(
            r#"
                SELECT COUNT(*)
                FROM score_allocations a
                JOIN tasks t ON t.id = a.task_id
                WHERE a.user_id = :user_id AND {FINISHED_IN_MONTH}
            "#
        );
        let count: i64 = conn.query_row(
            &sql,
            named_params! {":user_id": user_id, ":month": month.key()},
            |row| row.get(0),
        )?;
        parse_count(count, "allocation_count")
    }
}
