use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{format_timestamp, parse_timestamp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

impl TryFrom<&Row<'_>> for SettingRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Key/value store for engine settings; values are JSON documents.
pub struct SettingsRepository;

impl SettingsRepository {
    pub fn get(conn: &Connection, key: &str) -> AppResult<Option<SettingRow>> {
        let row = conn
            .query_row(
                "SELECT key, value, updated_at FROM app_settings WHERE key = ?1",
                [key],
                |row| SettingRow::try_from(row),
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> AppResult<Option<T>> {
        match Self::get(conn, key)? {
            Some(row) => {
                let value = serde_json::from_str(&row.value).map_err(|err| {
                    AppError::config(format!("设置项 {key} 无法解析: {err}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn put_json<T: Serialize>(conn: &Connection, key: &str, value: &T) -> AppResult<()> {
        let raw = serde_json::to_string(value)?;
        Self::upsert(conn, key, &raw)
    }

    pub fn upsert(conn: &Connection, key: &str, value: &str) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO app_settings (key, value, updated_at)
                VALUES (:key, :value, :updated_at)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
            "#,
            named_params! {
                ":key": key,
                ":value": value,
                ":updated_at": format_timestamp(&chrono::Utc::now()),
            },
        )?;
        Ok(())
    }

    pub fn delete(conn: &Connection, key: &str) -> AppResult<bool> {
        let removed = conn.execute("DELETE FROM app_settings WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    pub fn updated_at(conn: &Connection, key: &str) -> AppResult<Option<chrono::DateTime<chrono::Utc>>> {
        Self::get(conn, key)?
            .map(|row| parse_timestamp(&row.updated_at))
            .transpose()
    }
}
