use std::convert::TryFrom;

use rusqlite::{named_params, Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::models::user::UserRecord;

const BASE_SELECT: &str = "SELECT id, name, department, role, is_active FROM users";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub department: String,
    pub role: String,
    pub is_active: bool,
}

impl UserRow {
    pub fn into_record(self) -> AppResult<UserRecord> {
        Ok(UserRecord {
            id: self.id,
            name: self.name,
            department: self.department,
            role: self.role.parse()?,
            is_active: self.is_active,
        })
    }
}

impl TryFrom<&Row<'_>> for UserRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            department: row.get("department")?,
            role: row.get("role")?,
            is_active: row.get("is_active")?,
        })
    }
}

pub struct UserRepository;

impl UserRepository {
    pub fn upsert(conn: &Connection, user: &UserRecord) -> AppResult<()> {
        conn.execute(
            r#"
                INSERT INTO users (id, name, department, role, is_active)
                VALUES (:id, :name, :department, :role, :is_active)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    department = excluded.department,
                    role = excluded.role,
                    is_active = excluded.is_active
            "#,
            named_params! {
                ":id": &user.id,
                ":name": &user.name,
                ":department": &user.department,
                ":role": user.role.as_str(),
                ":is_active": user.is_active,
            },
        )?;
        Ok(())
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<UserRecord>> {
        let sql = format!("{BASE_SELECT} WHERE id = :id");
        let row = conn
            .query_row(&sql, named_params! {":id": id}, |row| UserRow::try_from(row))
            .optional()?;
        row.map(UserRow::into_record).transpose()
    }

    pub fn list_active(conn: &Connection) -> AppResult<Vec<UserRecord>> {
        let sql = format!("{BASE_SELECT} WHERE is_active = 1 ORDER BY id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| UserRow::try_from(row))?
            .map(|row| row.map_err(AppError::from).and_then(UserRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_active_by_department(
        conn: &Connection,
        department: &str,
    ) -> AppResult<Vec<UserRecord>> {
        let sql = format!(
            "{BASE_SELECT} WHERE is_active = 1 AND department = :department ORDER BY id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(named_params! {":department": department}, |row| {
                UserRow::try_from(row)
            })?
            .map(|row| row.map_err(AppError::from).and_then(UserRow::into_record))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_departments(conn: &Connection) -> AppResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT department FROM users WHERE is_active = 1 ORDER BY department ASC",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
