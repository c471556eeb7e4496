use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{format_timestamp, parse_month, parse_optional_timestamp, parse_timestamp};
use crate::error::{AppError, AppResult};
use crate::models::evaluation::{AdminOverride, MonthlyEvaluationRecord, PeerEvaluationRecord};
use crate::models::month::Month;

const MONTHLY_SELECT: &str = r#"
    SELECT
        id,
        user_id,
        month,
        culture_understanding,
        team_fit,
        team_fit_ranking,
        monthly_growth,
        biggest_contribution,
        admin_final_score,
        admin_comment,
        admin_evaluated_by,
        admin_evaluated_at,
        is_archived,
        created_at,
        updated_at
    FROM monthly_evaluations
"#;

#[derive(Debug, Clone)]
pub struct MonthlyEvaluationRow {
    pub id: String,
    pub user_id: String,
    pub month: String,
    pub culture_understanding: String,
    pub team_fit: String,
    pub team_fit_ranking: String,
    pub monthly_growth: String,
    pub biggest_contribution: String,
    pub admin_final_score: Option<i32>,
    pub admin_comment: Option<String>,
    pub admin_evaluated_by: Option<String>,
    pub admin_evaluated_at: Option<String>,
    pub is_archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl MonthlyEvaluationRow {
    pub fn into_record(self) -> AppResult<MonthlyEvaluationRecord> {
        let admin_evaluated_at = parse_optional_timestamp(self.admin_evaluated_at.as_deref())?;
        let admin_override = match (self.admin_final_score, self.admin_evaluated_by) {
            (Some(score), Some(evaluator_id)) => Some(AdminOverride {
                score,
                comment: self.admin_comment,
                evaluator_id,
                evaluated_at: admin_evaluated_at
                    .ok_or_else(|| AppError::database("管理员评分缺少评分时间"))?,
            }),
            _ => None,
        };

        Ok(MonthlyEvaluationRecord {
            id: self.id,
            user_id: self.user_id,
            month: parse_month(&self.month)?,
            culture_understanding: deserialize_json(&self.culture_understanding)?,
            team_fit: deserialize_json(&self.team_fit)?,
            team_fit_ranking: deserialize_json(&self.team_fit_ranking)?,
            monthly_growth: deserialize_json(&self.monthly_growth)?,
            biggest_contribution: deserialize_json(&self.biggest_contribution)?,
            admin_override,
            is_archived: self.is_archived,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for MonthlyEvaluationRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            month: row.get("month")?,
            culture_understanding: row.get("culture_understanding")?,
            team_fit: row.get("team_fit")?,
            team_fit_ranking: row.get("team_fit_ranking")?,
            monthly_growth: row.get("monthly_growth")?,
            biggest_contribution: row.get("biggest_contribution")?,
            admin_final_score: row.get("admin_final_score")?,
            admin_comment: row.get("admin_comment")?,
            admin_evaluated_by: row.get("admin_evaluated_by")?,
            admin_evaluated_at: row.get("admin_evaluated_at")?,
            is_archived: row.get("is_archived")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub struct MonthlyEvaluationRepository;

impl MonthlyEvaluationRepository {
    /// Writes the self-authored part of an evaluation. The admin override columns
    /// are only touched by [`MonthlyEvaluationRepository::set_admin_override`].
    pub fn upsert(conn: &Connection, evaluation: &MonthlyEvaluationRecord) -> AppResult<()> {
        evaluation.validate()?;

        let existing = Self::find(conn, &evaluation.user_id, &evaluation.month)?;
        if existing.as_ref().is_some_and(|record| record.is_archived) {
            return Err(AppError::conflict("月度评价已归档，不能再修改"));
        }

        conn.execute(
            r#"
                INSERT INTO monthly_evaluations (
                    id,
                    user_id,
                    month,
                    culture_understanding,
                    team_fit,
                    team_fit_ranking,
                    monthly_growth,
                    biggest_contribution,
                    is_archived,
                    created_at,
                    updated_at
                ) VALUES (
                    :id,
                    :user_id,
                    :month,
                    :culture_understanding,
                    :team_fit,
                    :team_fit_ranking,
                    :monthly_growth,
                    :biggest_contribution,
                    :is_archived,
                    :created_at,
                    :updated_at
                )
                ON CONFLICT(user_id, month) DO UPDATE SET
                    culture_understanding = excluded.culture_understanding,
                    team_fit = excluded.team_fit,
                    team_fit_ranking = excluded.team_fit_ranking,
                    monthly_growth = excluded.monthly_growth,
                    biggest_contribution = excluded.biggest_contribution,
                    is_archived = excluded.is_archived,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":id": &evaluation.id,
                ":user_id": &evaluation.user_id,
                ":month": evaluation.month.key(),
                ":culture_understanding": serialize_json(&evaluation.culture_understanding)?,
                ":team_fit": serialize_json(&evaluation.team_fit)?,
                ":team_fit_ranking": serialize_json(&evaluation.team_fit_ranking)?,
                ":monthly_growth": serialize_json(&evaluation.monthly_growth)?,
                ":biggest_contribution": serialize_json(&evaluation.biggest_contribution)?,
                ":is_archived": evaluation.is_archived,
                ":created_at": format_timestamp(&evaluation.created_at),
                ":updated_at": format_timestamp(&evaluation.updated_at),
            },
        )?;

        if let Some(admin) = &evaluation.admin_override {
            Self::write_admin_override(conn, &evaluation.user_id, &evaluation.month, Some(admin))?;
        }

        Ok(())
    }

    /// Fails with `Conflict` when the user's evaluation for the month is archived.
    /// A month without an evaluation row is still open.
    pub fn ensure_open(conn: &Connection, user_id: &str, month: &Month) -> AppResult<()> {
        let archived: Option<bool> = conn
            .query_row(
                "SELECT is_archived FROM monthly_evaluations WHERE user_id = :user_id AND month = :month",
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| row.get(0),
            )
            .optional()?;
        if archived == Some(true) {
            return Err(AppError::conflict("月度评价已归档，不能再修改"));
        }
        Ok(())
    }

    /// Sets or clears the admin final score. Fails with `NotFound` when the
    /// user has not submitted an evaluation for the month and with `Conflict`
    /// once it is archived.
    pub fn set_admin_override(
        conn: &Connection,
        user_id: &str,
        month: &Month,
        admin: Option<&AdminOverride>,
    ) -> AppResult<()> {
        Self::ensure_open(conn, user_id, month)?;
        Self::write_admin_override(conn, user_id, month, admin)
    }

    fn write_admin_override(
        conn: &Connection,
        user_id: &str,
        month: &Month,
        admin: Option<&AdminOverride>,
    ) -> AppResult<()> {
        let updated = conn.execute(
            r#"
                UPDATE monthly_evaluations SET
                    admin_final_score = :score,
                    admin_comment = :comment,
                    admin_evaluated_by = :evaluator_id,
                    admin_evaluated_at = :evaluated_at,
                    updated_at = :updated_at
                WHERE user_id = :user_id AND month = :month
            "#,
            named_params! {
                ":user_id": user_id,
                ":month": month.key(),
                ":score": admin.map(|value| value.score),
                ":comment": admin.and_then(|value| value.comment.clone()),
                ":evaluator_id": admin.map(|value| value.evaluator_id.clone()),
                ":evaluated_at": admin.map(|value| format_timestamp(&value.evaluated_at)),
                ":updated_at": format_timestamp(&chrono::Utc::now()),
            },
        )?;

        if updated == 0 {
            return Err(AppError::not_found());
        }
        Ok(())
    }

    pub fn find(
        conn: &Connection,
        user_id: &str,
        month: &Month,
    ) -> AppResult<Option<MonthlyEvaluationRecord>> {
        let sql = format!("{MONTHLY_SELECT} WHERE user_id = :user_id AND month = :month");
        let row = conn
            .query_row(
                &sql,
                named_params! {":user_id": user_id, ":month": month.key()},
                |row| MonthlyEvaluationRow::try_from(row),
            )
            .optional()?;
        row.map(MonthlyEvaluationRow::into_record).transpose()
    }

    pub fn list_by_month(
        conn: &Connection,
        month: &Month,
    ) -> AppResult<Vec<MonthlyEvaluationRecord>> {
        let sql = format!("{MONTHLY_SELECT} WHERE month = :month ORDER BY user_id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(named_params! {":month": month.key()}, |row| {
                MonthlyEvaluationRow::try_from(row)
            })?
            .map(|row| {
                row.map_err(AppError::from)
                    .and_then(MonthlyEvaluationRow::into_record)
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn archive_month(conn: &Connection, month: &Month) -> AppResult<usize> {
        let archived = conn.execute(
            "UPDATE monthly_evaluations SET is_archived = 1 WHERE month = ?1 AND is_archived = 0",
            [month.key()],
        )?;
        Ok(archived)
    }
}

#[derive(Debug, Clone)]
pub struct PeerEvaluationRow {
    pub id: String,
    pub subject_id: String,
    pub evaluator_id: String,
    pub month: String,
    pub score: i32,
    pub rank: i32,
    pub comment: Option<String>,
    pub is_anonymous: bool,
    pub created_at: String,
}

impl PeerEvaluationRow {
    pub fn into_record(self) -> AppResult<PeerEvaluationRecord> {
        Ok(PeerEvaluationRecord {
            id: self.id,
            subject_id: self.subject_id,
            evaluator_id: self.evaluator_id,
            month: parse_month(&self.month)?,
            score: self.score,
            rank: self.rank,
            comment: self.comment,
            is_anonymous: self.is_anonymous,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl TryFrom<&Row<'_>> for PeerEvaluationRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            subject_id: row.get("subject_id")?,
            evaluator_id: row.get("evaluator_id")?,
            month: row.get("month")?,
            score: row.get("score")?,
            rank: row.get("rank")?,
            comment: row.get("comment")?,
            is_anonymous: row.get("is_anonymous")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub struct PeerEvaluationRepository;

impl PeerEvaluationRepository {
    pub fn insert(conn: &Connection, evaluation: &PeerEvaluationRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO peer_evaluations (
                    id, subject_id, evaluator_id, month, score, rank, comment, is_anonymous, created_at
                ) VALUES (
                    :id, :subject_id, :evaluator_id, :month, :score, :rank, :comment, :is_anonymous, :created_at
                )
            "#,
            named_params! {
                ":id": &evaluation.id,
                ":subject_id": &evaluation.subject_id,
                ":evaluator_id": &evaluation.evaluator_id,
                ":month": evaluation.month.key(),
                ":score": evaluation.score,
                ":rank": evaluation.rank,
                ":comment": &evaluation.comment,
                ":is_anonymous": evaluation.is_anonymous,
                ":created_at": format_timestamp(&evaluation.created_at),
            },
        )?;
        Ok(())
    }

    pub fn list_for_subject(
        conn: &Connection,
        subject_id: &str,
        month: &Month,
    ) -> AppResult<Vec<PeerEvaluationRecord>> {
        let mut stmt = conn.prepare(
            r#"
                SELECT id, subject_id, evaluator_id, month, score, rank, comment, is_anonymous, created_at
                FROM peer_evaluations
                WHERE subject_id = :subject_id AND month = :month
                ORDER BY evaluator_id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(
                named_params! {":subject_id": subject_id, ":month": month.key()},
                |row| PeerEvaluationRow::try_from(row),
            )?
            .map(|row| {
                row.map_err(AppError::from)
                    .and_then(PeerEvaluationRow::into_record)
            })
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn exists_for(
        conn: &Connection,
        subject_id: &str,
        evaluator_id: &str,
        month: &Month,
    ) -> AppResult<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM peer_evaluations WHERE subject_id = ?1 AND evaluator_id = ?2 AND month = ?3",
            (subject_id, evaluator_id, month.key()),
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn serialize_json<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(AppError::from)
}

fn deserialize_json<T: DeserializeOwned>(raw: &str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(AppError::from)
}
