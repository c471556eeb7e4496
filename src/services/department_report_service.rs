use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::repositories::department_report_repository::DepartmentReportRepository;
use crate::db::repositories::distribution_repository::DistributionRepository;
use crate::db::repositories::task_repository::TaskRepository;
use crate::db::repositories::user_repository::UserRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::month::Month;
use crate::models::performance::DepartmentReport;
use crate::utils::decimal::{mean, round2};

/// Per-department monthly rollup of OKR totals and finished work.
pub struct DepartmentReportService {
    db: DbPool,
}

impl DepartmentReportService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Rebuilds every department report of the month in one transaction.
    pub fn recalculate(&self, month: &Month) -> AppResult<Vec<DepartmentReport>> {
        let generated_at = Utc::now();
        let reports = self.db.with_connection(|conn| {
            UserRepository::list_departments(conn)?
                .into_iter()
                .map(|department| build_report(conn, department, month, generated_at))
                .collect::<AppResult<Vec<_>>>()
        })?;

        self.db
            .with_transaction(|tx| DepartmentReportRepository::replace_month(tx, month, &reports))?;

        info!(
            target: "app::scoring",
            %month,
            departments = reports.len(),
            "department reports rebuilt"
        );
        Ok(reports)
    }

    pub fn list(&self, month: &Month) -> AppResult<Vec<DepartmentReport>> {
        self.db
            .with_connection(|conn| DepartmentReportRepository::list_by_month(conn, month))
    }

    pub fn find(&self, department: &str, month: &Month) -> AppResult<Option<DepartmentReport>> {
        self.db
            .with_connection(|conn| DepartmentReportRepository::find(conn, department, month))
    }
}

fn build_report(
    conn: &Connection,
    department: String,
    month: &Month,
    generated_at: DateTime<Utc>,
) -> AppResult<DepartmentReport> {
    let members = UserRepository::list_active_by_department(conn, &department)?;

    let mut total_okr_score = Decimal::ZERO;
    // Shared tasks are counted once per department.
    let mut completed = BTreeMap::new();
    for member in &members {
        total_okr_score +=
            DistributionRepository::sum_adjusted_for_user_in_month(conn, &member.id, month)?;
        for task in TaskRepository::list_for_participant_in_month(conn, &member.id, month)? {
            if task.is_completed_in(month) {
                completed.insert(task.id.clone(), Decimal::from(task.difficulty));
            }
        }
    }

    let member_count = members.len() as u32;
    let avg_score = if member_count == 0 {
        Decimal::ZERO
    } else {
        round2(total_okr_score / Decimal::from(member_count))
    };
    let difficulties: Vec<Decimal> = completed.into_values().collect();

    Ok(DepartmentReport {
        department,
        month: *month,
        total_okr_score: round2(total_okr_score),
        member_count,
        avg_score,
        completed_tasks: difficulties.len() as u32,
        avg_difficulty: mean(&difficulties).map(round2).unwrap_or(Decimal::ZERO),
        generated_at,
    })
}
