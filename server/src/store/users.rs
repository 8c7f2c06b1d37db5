use chrono::{DateTime, Utc};
use pitwall_auth::Role;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};

#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    is_admin: bool,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct AuthRow {
    id: String,
    username: String,
    password_hash: String,
    is_admin: bool,
    created_at: DateTime<Utc>,
}

fn parse_id(raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| StoreError::Integrity(format!("malformed user id '{raw}'")))
}

fn parse_roles(raw: Vec<String>) -> StoreResult<Vec<Role>> {
    raw.into_iter()
        .map(|value| {
            Role::parse(&value)
                .ok_or_else(|| StoreError::Integrity(format!("unknown stored role '{value}'")))
        })
        .collect()
}

impl Store {
    pub async fn count_users(&self) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await?;
        Ok(count.0)
    }

    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        is_admin: bool,
        roles: &[Role],
    ) -> StoreResult<UserRecord> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, is_admin, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(username)
        .bind(password_hash)
        .bind(is_admin)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for role in roles {
            sqlx::query("INSERT INTO user_roles (user_id, role) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(UserRecord {
            id,
            username: username.to_owned(),
            is_admin,
            roles: roles.to_vec(),
            created_at: now,
        })
    }

    async fn roles_for(&self, user_id: &str) -> StoreResult<Vec<Role>> {
        let raw: Vec<(String,)> =
            sqlx::query_as("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role")
                .bind(user_id)
                .fetch_all(self.pool())
                .await?;
        parse_roles(raw.into_iter().map(|(role,)| role).collect())
    }

    pub async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, is_admin, created_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let roles = self.roles_for(&row.id).await?;
                Ok(Some(UserRecord {
                    id: parse_id(&row.id)?,
                    username: row.username,
                    is_admin: row.is_admin,
                    roles,
                    created_at: row.created_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Lookup for login: record plus the stored password hash.
    pub async fn find_user_for_login(
        &self,
        username: &str,
    ) -> StoreResult<Option<(UserRecord, String)>> {
        let row: Option<AuthRow> = sqlx::query_as(
            "SELECT id, username, password_hash, is_admin, created_at
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let roles = self.roles_for(&row.id).await?;
                let record = UserRecord {
                    id: parse_id(&row.id)?,
                    username: row.username,
                    is_admin: row.is_admin,
                    roles,
                    created_at: row.created_at,
                };
                Ok(Some((record, row.password_hash)))
            }
            None => Ok(None),
        }
    }

    pub async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, username, is_admin, created_at FROM users ORDER BY username",
        )
        .fetch_all(self.pool())
        .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            let roles = self.roles_for(&row.id).await?;
            users.push(UserRecord {
                id: parse_id(&row.id)?,
                username: row.username,
                is_admin: row.is_admin,
                roles,
                created_at: row.created_at,
            });
        }
        Ok(users)
    }

    /// Delete a user. The last remaining admin is protected.
    pub async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        let target: Option<(bool,)> = sqlx::query_as("SELECT is_admin FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((is_admin,)) = target else {
            return Err(StoreError::NotFound);
        };

        if is_admin {
            let admins: (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_admin = 1")
                    .fetch_one(&mut *tx)
                    .await?;
            if admins.0 <= 1 {
                return Err(StoreError::Validation(
                    "the last administrator cannot be deleted".into(),
                ));
            }
        }

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
