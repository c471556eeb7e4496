pub mod admin_history_repository;
pub mod department_report_repository;
pub mod distribution_repository;
pub mod evaluation_repository;
pub mod performance_repository;
pub mod review_repository;
pub mod settings_repository;
pub mod task_repository;
pub mod user_repository;
pub mod work_hours_repository;

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};
use crate::models::month::Month;

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AppError::database(format!("无效的时间戳 {raw}: {err}")))
}

pub(crate) fn parse_optional_timestamp(raw: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    raw.map(parse_timestamp).transpose()
}

pub(crate) fn parse_month(raw: &str) -> AppResult<Month> {
    raw.parse()
        .map_err(|_| AppError::database(format!("无效的月份字段: {raw}")))
}

pub(crate) fn parse_count(raw: i64, field: &str) -> AppResult<u32> {
    u32::try_from(raw).map_err(|_| AppError::database(format!("{field} 超出范围: {raw}")))
}
