use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{Class, Role};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::non_empty;

const CLASS_COLUMNS: &str = "id, class_name, subject, teacher_id, schedule, room";

#[derive(Debug, Clone, Default)]
pub struct NewClass {
    pub class_name: String,
    pub subject: Option<String>,
    pub teacher_id: Option<i64>,
    pub schedule: Option<String>,
    pub room: Option<String>,
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        class_name: row.get(1)?,
        subject: row.get(2)?,
        teacher_id: row.get(3)?,
        schedule: row.get(4)?,
        room: row.get(5)?,
    })
}

/// The schema does not enforce unique class names, so every write checks here.
fn name_owner(conn: &Connection, class_name: &str) -> AppResult<Option<i64>> {
    let owner = conn
        .query_row(
            "SELECT id FROM classes WHERE class_name = ?1 COLLATE NOCASE ORDER BY id LIMIT 1",
            params![class_name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

fn ensure_teacher(conn: &Connection, user_id: i64) -> AppResult<()> {
    let role: Option<Role> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    match role {
        Some(Role::Teacher) => Ok(()),
        Some(other) => Err(AppError::BadRequest(format!(
            "user {user_id} has role {other}, not TEACHER"
        ))),
        None => Err(AppError::NotFound(format!("user {user_id}"))),
    }
}

fn validate(conn: &Connection, class: &NewClass, editing: Option<i64>) -> AppResult<()> {
    let class_name = class.class_name.trim();
    if class_name.is_empty() {
        return Err(AppError::BadRequest("class name must not be empty".into()));
    }
    if name_owner(conn, class_name)?.is_some_and(|owner| Some(owner) != editing) {
        return Err(AppError::Conflict(format!("class '{class_name}'")));
    }
    if let Some(teacher_id) = class.teacher_id {
        ensure_teacher(conn, teacher_id)?;
    }
    Ok(())
}

pub(crate) fn insert_class(conn: &Connection, class: &NewClass) -> AppResult<i64> {
    validate(conn, class, None)?;
    conn.execute(
        "INSERT INTO classes (class_name, subject, teacher_id, schedule, room)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            class.class_name.trim(),
            non_empty(class.subject.as_deref()),
            class.teacher_id,
            non_empty(class.schedule.as_deref()),
            non_empty(class.room.as_deref()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_class(pool: &DbPool, class: &NewClass) -> AppResult<i64> {
    let conn = pool.get()?;
    let id = insert_class(&conn, class)?;
    tracing::info!(id, class_name = %class.class_name, "Created class");
    Ok(id)
}

pub fn class_name_exists(pool: &DbPool, class_name: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    Ok(name_owner(&conn, class_name.trim())?.is_some())
}

pub fn get_class(pool: &DbPool, id: i64) -> AppResult<Option<Class>> {
    let conn = pool.get()?;
    let class = conn
        .query_row(
            &format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?1"),
            params![id],
            class_from_row,
        )
        .optional()?;
    Ok(class)
}

pub fn list_classes(pool: &DbPool) -> AppResult<Vec<Class>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes ORDER BY class_name"
    ))?;
    let classes = stmt
        .query_map([], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classes)
}

pub fn classes_for_teacher(pool: &DbPool, teacher_user_id: i64) -> AppResult<Vec<Class>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLASS_COLUMNS} FROM classes WHERE teacher_id = ?1 ORDER BY class_name"
    ))?;
    let classes = stmt
        .query_map(params![teacher_user_id], class_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(classes)
}

/// Update a class. A rename is copied into the students' `class_name`.
pub fn update_class(pool: &DbPool, id: i64, class: &NewClass) -> AppResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    validate(&tx, class, Some(id))?;

    let updated = tx.execute(
        "UPDATE classes SET class_name = ?1, subject = ?2, teacher_id = ?3, schedule = ?4, room = ?5
         WHERE id = ?6",
        params![
            class.class_name.trim(),
            non_empty(class.subject.as_deref()),
            class.teacher_id,
            non_empty(class.schedule.as_deref()),
            non_empty(class.room.as_deref()),
            id,
        ],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("class {id}")));
    }
    tx.execute(
        "UPDATE students SET class_name = ?1 WHERE class_id = ?2",
        params![class.class_name.trim(), id],
    )?;
    tx.commit()?;
    Ok(())
}

/// Set or clear the teacher of a class.
pub fn assign_teacher(pool: &DbPool, class_id: i64, teacher_user_id: Option<i64>) -> AppResult<()> {
    let conn = pool.get()?;
    if let Some(user_id) = teacher_user_id {
        ensure_teacher(&conn, user_id)?;
    }
    let updated = conn.execute(
        "UPDATE classes SET teacher_id = ?1 WHERE id = ?2",
        params![teacher_user_id, class_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("class {class_id}")));
    }
    tracing::info!(class_id, teacher = ?teacher_user_id, "Assigned class teacher");
    Ok(())
}

/// Delete a class. Students stay, detached from it.
pub fn delete_class(pool: &DbPool, id: i64) -> AppResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let detached = tx.execute(
        "UPDATE students SET class_id = NULL, class_name = NULL WHERE class_id = ?1",
        params![id],
    )?;
    let deleted = tx.execute("DELETE FROM classes WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(AppError::NotFound(format!("class {id}")));
    }
    tx.commit()?;
    tracing::info!(id, detached_students = detached, "Deleted class");
    Ok(())
}
