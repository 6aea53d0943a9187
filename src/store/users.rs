use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::auth::password::{self, PasswordCheck, PasswordHash};
use crate::db::models::{Role, User};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::non_empty;

const USER_COLUMNS: &str = "id, username, role, first_name, last_name, email, created_at";

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        role: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) fn username_taken(conn: &Connection, username: &str) -> AppResult<bool> {
    let taken = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE username = ?1 COLLATE NOCASE",
        params![username],
        |row| row.get(0),
    )?;
    Ok(taken)
}

pub(crate) fn user_id_by_email(conn: &Connection, email: &str) -> AppResult<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM users WHERE email = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
            params![email.trim()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Id and role of the account holding `email`, compared case-insensitively.
pub(crate) fn user_by_email(conn: &Connection, email: &str) -> AppResult<Option<(i64, Role)>> {
    let user = conn
        .query_row(
            "SELECT id, role FROM users WHERE email = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
            params![email.trim()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(user)
}

/// Insert after checking username and email are free.
pub(crate) fn insert_user(
    conn: &Connection,
    new_user: &NewUser,
    password: &PasswordHash,
) -> AppResult<i64> {
    let username = new_user.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username must not be empty".into()));
    }
    if username_taken(conn, username)? {
        return Err(AppError::Conflict(format!("username '{username}'")));
    }
    let email = non_empty(new_user.email.as_deref());
    if let Some(ref email) = email {
        if user_id_by_email(conn, email)?.is_some() {
            return Err(AppError::Conflict(format!("email '{email}'")));
        }
    }

    conn.execute(
        "INSERT INTO users (username, password, role, first_name, last_name, email)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            username,
            password.as_str(),
            new_user.role,
            non_empty(new_user.first_name.as_deref()),
            non_empty(new_user.last_name.as_deref()),
            email,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_user(pool: &DbPool, new_user: &NewUser, password: &PasswordHash) -> AppResult<i64> {
    let conn = pool.get()?;
    let id = insert_user(&conn, new_user, password)?;
    tracing::info!(user_id = id, username = %new_user.username, role = %new_user.role, "Created user");
    Ok(id)
}

pub fn username_exists(pool: &DbPool, username: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    username_taken(&conn, username.trim())
}

pub fn email_exists(pool: &DbPool, email: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    Ok(user_id_by_email(&conn, email)?.is_some())
}

pub fn get_user(pool: &DbPool, id: i64) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_by_username(pool: &DbPool, username: &str) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1 COLLATE NOCASE"),
            params![username.trim()],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_by_email(pool: &DbPool, email: &str) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE email = ?1 COLLATE NOCASE ORDER BY id LIMIT 1"
            ),
            params![email.trim()],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn list_users(pool: &DbPool, role: Option<Role>) -> AppResult<Vec<User>> {
    let conn = pool.get()?;
    let users = match role {
        Some(role) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE role = ?1 ORDER BY username"
            ))?;
            let rows = stmt.query_map(params![role], user_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
            let rows = stmt.query_map([], user_from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(users)
}

pub fn update_profile(pool: &DbPool, id: i64, profile: &UserProfile) -> AppResult<()> {
    let conn = pool.get()?;
    let email = non_empty(profile.email.as_deref());
    if let Some(ref email) = email {
        if let Some(owner) = user_id_by_email(&conn, email)? {
            if owner != id {
                return Err(AppError::Conflict(format!("email '{email}'")));
            }
        }
    }

    let updated = conn.execute(
        "UPDATE users SET first_name = ?1, last_name = ?2, email = ?3 WHERE id = ?4",
        params![
            non_empty(profile.first_name.as_deref()),
            non_empty(profile.last_name.as_deref()),
            email,
            id
        ],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("user {id}")));
    }
    Ok(())
}

pub fn change_password(pool: &DbPool, id: i64, password: &PasswordHash) -> AppResult<()> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE users SET password = ?1 WHERE id = ?2",
        params![password.as_str(), id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("user {id}")));
    }
    Ok(())
}

/// Delete a user and clear the links students and teachers hold to it.
pub fn delete_user(pool: &DbPool, id: i64) -> AppResult<bool> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("UPDATE students SET user_id = NULL WHERE user_id = ?1", params![id])?;
    tx.execute("UPDATE teachers SET user_id = NULL WHERE user_id = ?1", params![id])?;
    let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

/// Check credentials. A plaintext password left by an older deployment is
/// accepted once and replaced with a hash at `upgrade_cost`.
pub fn authenticate(
    pool: &DbPool,
    username: &str,
    plaintext: &str,
    upgrade_cost: u32,
) -> AppResult<Option<User>> {
    let conn = pool.get()?;
    let found = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS}, password FROM users WHERE username = ?1 COLLATE NOCASE"),
            params![username.trim()],
            |row| Ok((user_from_row(row)?, row.get::<_, String>(7)?)),
        )
        .optional()?;

    let Some((user, stored)) = found else {
        tracing::debug!(username, "Login for unknown user");
        return Ok(None);
    };

    match password::verify(plaintext, &stored) {
        PasswordCheck::Valid => Ok(Some(user)),
        PasswordCheck::ValidLegacy => {
            let hash = PasswordHash::new(plaintext, upgrade_cost)?;
            conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                params![hash.as_str(), user.id],
            )?;
            tracing::info!(user_id = user.id, "Upgraded plaintext password to bcrypt");
            Ok(Some(user))
        }
        PasswordCheck::Invalid => {
            tracing::debug!(username, "Login with wrong password");
            Ok(None)
        }
    }
}
