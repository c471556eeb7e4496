use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{format_timestamp, parse_count, parse_month, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::month::Month;
use crate::models::performance::PerformanceScore;
use crate::utils::decimal::parse_decimal;

const BASE_SELECT: &str = r#"
    SELECT
        user_id,
        month,
        dimension_scores,
        raw_metrics,
        final_score,
        rank,
        status,
        computed_at
    FROM performance_scores
"#;

#[derive(Debug, Clone)]
pub struct PerformanceScoreRow {
    pub user_id: String,
    pub month: String,
    pub dimension_scores: String,
    pub raw_metrics: String,
    pub final_score: String,
    pub rank: Option<i64>,
    pub status: String,
    pub computed_at: String,
}

impl PerformanceScoreRow {
    pub fn from_record(score: &PerformanceScore) -> AppResult<Self> {
        Ok(Self {
            user_id: score.user_id.clone(),
            month: score.month.key(),
            dimension_scores: serialize_json(&score.dimensions)?,
            raw_metrics: serialize_json(&score.raw)?,
            final_score: score.final_score.to_string(),
            rank: score.rank.map(i64::from),
            status: score.status.as_str().to_string(),
            computed_at: format_timestamp(&score.computed_at),
        })
    }

    pub fn into_record(self) -> AppResult<PerformanceScore> {
        Ok(PerformanceScore {
            user_id: self.user_id,
            month: parse_month(&self.month)?,
            dimensions: deserialize_json(&self.dimension_scores)?,
            raw: deserialize_json(&self.raw_metrics)?,
            final_score: parse_decimal(&self.final_score)?,
            rank: self
                .rank
                .map(|value| parse_count(value, "rank"))
                .transpose()?,
            status: self.status.parse()?,
            computed_at: parse_timestamp(&self.computed_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for PerformanceScoreRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            month: row.get("month")?,
            dimension_scores: row.get("dimension_scores")?,
            raw_metrics: row.get("raw_metrics")?,
            final_score: row.get("final_score")?,
            rank: row.get("rank")?,
            status: row.get("status")?,
            computed_at: row.get("computed_at")?,
        })
    }
}

pub struct PerformanceRepository;

impl PerformanceRepository {
    /// Replaces the whole row, rank included.
    pub fn upsert(conn: &Connection, score: &PerformanceScore) -> AppResult<()> {
        let row = PerformanceScoreRow::from_record(score)?;

        conn.execute(
            r#"
                INSERT INTO performance_scores (
                    user_id,
                    month,
                    dimension_scores,
                    raw_metrics,
                    final_score,
                    rank,
                    status,
                    computed_at
                ) VALUES (
                    :user_id,
                    :month,
                    :dimension_scores,
                    :raw_metrics,
                    :final_score,
                    :rank,
                    :status,
                    :computed_at
                )
                ON CONFLICT(user_id, month) DO UPDATE SET
                    dimension_scores = excluded.dimension_scores,
                    raw_metrics = excluded.raw_metrics,
                    final_score = excluded.final_score,
                    rank = excluded.rank,
                    status = excluded.status,
                    computed_at = excluded.computed_at
            "#,
            named_params! {
                ":user_id": &row.user_id,
                ":month": &row.month,
                ":dimension_scores": &row.dimension_scores,
                ":raw_metrics": &row.raw_metrics,
                ":final_score": &row.final_score,
                ":rank": &row.rank,
                ":status": &row.status,
                ":computed_at": &row.computed_at,
            },
        )?;

        Ok(())
    }

    pub fn find(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Option<PerformanceScore>> {
        let sql = format!("{BASE_SELECT} WHERE user_id = :user_id AND month = :month");
        let row = conn
            .query_row(
                &sql,
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| PerformanceScoreRow::try_from(row),
            )
            .optional()?;
        row.map(PerformanceScoreRow::into_record).transpose()
    }

    /// Ordered by rank when ranked, unranked rows last by user id.
    pub fn list_by_month(conn: &Connection, month: &Month) -> AppResult<Vec<PerformanceScore>> {
        let sql = format!(
            "{BASE_SELECT} WHERE month = :month ORDER BY rank IS NULL, rank ASC, user_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(named_params! {":month": month.key()}, |row| {
                PerformanceScoreRow::try_from(row)
            })?
            .map(|row| {
                row.map_err(AppError::from)
                    .and_then(PerformanceScoreRow::into_record)
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_rank(
        conn: &Connection,
        user_id: &str,
        month: &Month,
        rank: Option<u32>,
    ) -> AppResult<()> {
        let updated = conn.execute(
            "UPDATE performance_scores SET rank = :rank WHERE user_id = :user_id AND month = :month",
            named_params! {
                ":rank": rank.map(i64::from),
                ":user_id": user_id,
                ":month": month.key(),
            },
        )?;
        if updated == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }
}

fn serialize_json<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(AppError::from)
}

fn deserialize_json<T: DeserializeOwned>(raw: &str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(AppError::from)
}
