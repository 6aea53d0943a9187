use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::{Role, Student};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::{non_empty, BatchOutcome};

const STUDENT_COLUMNS: &str = "id, student_id, first_name, middle_name, last_name, email, \
                               class_name, department, user_id, class_id";

#[derive(Debug, Clone, Default)]
pub struct NewStudent {
    pub student_id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub user_id: Option<i64>,
    pub class_id: Option<i64>,
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        student_id: row.get(1)?,
        first_name: row.get(2)?,
        middle_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
        class_name: row.get(6)?,
        department: row.get(7)?,
        user_id: row.get(8)?,
        class_id: row.get(9)?,
    })
}

fn class_name_of(conn: &Connection, class_id: i64) -> AppResult<String> {
    conn.query_row(
        "SELECT class_name FROM classes WHERE id = ?1",
        params![class_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::NotFound(format!("class {class_id}")))
}

fn email_owner(conn: &Connection, email: &str) -> AppResult<Option<i64>> {
    let owner = conn
        .query_row(
            "SELECT id FROM students WHERE email = ?1 COLLATE NOCASE",
            params![email],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

fn validate(student: &NewStudent) -> AppResult<()> {
    if student.student_id.trim().is_empty() {
        return Err(AppError::BadRequest("student id must not be empty".into()));
    }
    if student.first_name.trim().is_empty() || student.last_name.trim().is_empty() {
        return Err(AppError::BadRequest("student name must not be empty".into()));
    }
    Ok(())
}

pub(crate) fn insert_student(conn: &Connection, student: &NewStudent) -> AppResult<i64> {
    validate(student)?;
    let student_id = student.student_id.trim();
    if student_id_taken(conn, student_id)? {
        return Err(AppError::Conflict(format!("student id '{student_id}'")));
    }
    let email = non_empty(student.email.as_deref());
    if let Some(ref email) = email {
        if email_owner(conn, email)?.is_some() {
            return Err(AppError::Conflict(format!("student email '{email}'")));
        }
    }
    if let Some(user_id) = student.user_id {
        ensure_student_account(conn, user_id)?;
    }
    let class_name = match student.class_id {
        Some(class_id) => Some(class_name_of(conn, class_id)?),
        None => None,
    };

    conn.execute(
        "INSERT INTO students (student_id, first_name, middle_name, last_name, email,
                               class_name, department, user_id, class_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            student_id,
            student.first_name.trim(),
            non_empty(student.middle_name.as_deref()),
            student.last_name.trim(),
            email,
            class_name,
            non_empty(student.department.as_deref()),
            student.user_id,
            student.class_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn ensure_student_account(conn: &Connection, user_id: i64) -> AppResult<()> {
    let role: Option<Role> = conn
        .query_row(
            "SELECT role FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    match role {
        Some(Role::Student) => Ok(()),
        Some(other) => Err(AppError::BadRequest(format!(
            "user {user_id} has role {other}, not STUDENT"
        ))),
        None => Err(AppError::NotFound(format!("user {user_id}"))),
    }
}

fn student_id_taken(conn: &Connection, student_id: &str) -> AppResult<bool> {
    let taken = conn.query_row(
        "SELECT COUNT(*) > 0 FROM students WHERE student_id = ?1",
        params![student_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

pub fn create_student(pool: &DbPool, student: &NewStudent) -> AppResult<i64> {
    let conn = pool.get()?;
    let id = insert_student(&conn, student)?;
    tracing::info!(id, student_id = %student.student_id, "Created student");
    Ok(id)
}

pub fn student_id_exists(pool: &DbPool, student_id: &str) -> AppResult<bool> {
    let conn = pool.get()?;
    student_id_taken(&conn, student_id.trim())
}

pub fn get_student(pool: &DbPool, id: i64) -> AppResult<Option<Student>> {
    let conn = pool.get()?;
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
            params![id],
            student_from_row,
        )
        .optional()?;
    Ok(student)
}

pub fn find_by_student_id(pool: &DbPool, student_id: &str) -> AppResult<Option<Student>> {
    let conn = pool.get()?;
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1"),
            params![student_id.trim()],
            student_from_row,
        )
        .optional()?;
    Ok(student)
}

pub fn find_by_user(pool: &DbPool, user_id: i64) -> AppResult<Option<Student>> {
    let conn = pool.get()?;
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = ?1"),
            params![user_id],
            student_from_row,
        )
        .optional()?;
    Ok(student)
}

pub fn list_students(pool: &DbPool) -> AppResult<Vec<Student>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students ORDER BY student_id"
    ))?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn list_by_class(pool: &DbPool, class_id: i64) -> AppResult<Vec<Student>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE class_id = ?1 ORDER BY last_name, first_name"
    ))?;
    let students = stmt
        .query_map(params![class_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn unassigned_students(pool: &DbPool) -> AppResult<Vec<Student>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE class_id IS NULL ORDER BY student_id"
    ))?;
    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

/// Overwrite the editable fields of a student. `user_id` is left alone.
pub fn update_student(pool: &DbPool, id: i64, student: &NewStudent) -> AppResult<()> {
    validate(student)?;
    let conn = pool.get()?;

    let student_id = student.student_id.trim();
    let owner: Option<i64> = conn
        .query_row(
            "SELECT id FROM students WHERE student_id = ?1",
            params![student_id],
            |row| row.get(0),
        )
        .optional()?;
    if owner.is_some_and(|owner| owner != id) {
        return Err(AppError::Conflict(format!("student id '{student_id}'")));
    }
    let email = non_empty(student.email.as_deref());
    if let Some(ref email) = email {
        if email_owner(&conn, email)?.is_some_and(|owner| owner != id) {
            return Err(AppError::Conflict(format!("student email '{email}'")));
        }
    }
    let class_name = match student.class_id {
        Some(class_id) => Some(class_name_of(&conn, class_id)?),
        None => None,
    };

    let updated = conn.execute(
        "UPDATE students SET student_id = ?1, first_name = ?2, middle_name = ?3, last_name = ?4,
                email = ?5, class_name = ?6, department = ?7, class_id = ?8
         WHERE id = ?9",
        params![
            student_id,
            student.first_name.trim(),
            non_empty(student.middle_name.as_deref()),
            student.last_name.trim(),
            email,
            class_name,
            non_empty(student.department.as_deref()),
            student.class_id,
            id,
        ],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("student {id}")));
    }
    Ok(())
}

/// Delete a student together with its attendance rows and its login account.
pub fn delete_student(pool: &DbPool, id: i64) -> AppResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let user_id: Option<i64> = tx
        .query_row(
            "SELECT user_id FROM students WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("student {id}")))?;

    let attendance = tx.execute("DELETE FROM attendance WHERE student_id = ?1", params![id])?;
    tx.execute("DELETE FROM students WHERE id = ?1", params![id])?;
    if let Some(user_id) = user_id.filter(|&uid| uid > 0) {
        // Only drop a STUDENT account, and only if no other student or teacher
        // still points at it.
        tx.execute(
            "DELETE FROM users WHERE id = ?1 AND role = 'STUDENT'
               AND NOT EXISTS (SELECT 1 FROM students WHERE user_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM teachers WHERE user_id = ?1)",
            params![user_id],
        )?;
    }
    tx.commit()?;

    tracing::info!(id, attendance_rows = attendance, "Deleted student");
    Ok(())
}

/// Delete each student independently; one failure does not stop the rest.
pub fn delete_students(pool: &DbPool, ids: &[i64]) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    for &id in ids {
        match delete_student(pool, id) {
            Ok(()) => outcome.succeeded.push(id),
            Err(e) => {
                tracing::warn!(id, error = %e, "Failed to delete student");
                outcome.failed.push((id, e.to_string()));
            }
        }
    }
    tracing::info!("Bulk student delete: {}", outcome.summary());
    outcome
}

/// Move every listed student into `class_id`, all or nothing.
pub fn assign_students_to_class(pool: &DbPool, class_id: i64, ids: &[i64]) -> AppResult<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let class_name = class_name_of(&tx, class_id)?;

    let mut assigned = 0;
    for &id in ids {
        let updated = tx.execute(
            "UPDATE students SET class_id = ?1, class_name = ?2 WHERE id = ?3",
            params![class_id, class_name, id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("student {id}")));
        }
        assigned += updated;
    }
    tx.commit()?;

    tracing::info!(class_id, assigned, "Assigned students to class");
    Ok(assigned)
}
