use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::Teacher;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::non_empty;

const TEACHER_COLUMNS: &str =
    "id, teacher_id, first_name, last_name, email, department, phone, user_id";

#[derive(Debug, Clone, Default)]
pub struct NewTeacher {
    pub teacher_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub user_id: Option<i64>,
}

fn teacher_from_row(row: &Row<'_>) -> rusqlite::Result<Teacher> {
    Ok(Teacher {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        department: row.get(5)?,
        phone: row.get(6)?,
        user_id: row.get(7)?,
    })
}

fn owner_of(conn: &Connection, column: &str, value: &str) -> AppResult<Option<i64>> {
    let owner = conn
        .query_row(
            &format!("SELECT id FROM teachers WHERE {column} = ?1 COLLATE NOCASE"),
            params![value],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

fn check_unique(conn: &Connection, teacher: &NewTeacher, editing: Option<i64>) -> AppResult<()> {
    if teacher.teacher_id.trim().is_empty() {
        return Err(AppError::BadRequest("teacher id must not be empty".into()));
    }
    if teacher.first_name.trim().is_empty() || teacher.last_name.trim().is_empty() {
        return Err(AppError::BadRequest("teacher name must not be empty".into()));
    }
    let teacher_id = teacher.teacher_id.trim();
    if owner_of(conn, "teacher_id", teacher_id)?.is_some_and(|owner| Some(owner) != editing) {
        return Err(AppError::Conflict(format!("teacher id '{teacher_id}'")));
    }
    if let Some(email) = non_empty(teacher.email.as_deref()) {
        if owner_of(conn, "email", &email)?.is_some_and(|owner| Some(owner) != editing) {
            return Err(AppError::Conflict(format!("teacher email '{email}'")));
        }
    }
    Ok(())
}

pub(crate) fn insert_teacher(conn: &Connection, teacher: &NewTeacher) -> AppResult<i64> {
    check_unique(conn, teacher, None)?;
    conn.execute(
        "INSERT INTO teachers (teacher_id, first_name, last_name, email, department, phone, user_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            teacher.teacher_id.trim(),
            teacher.first_name.trim(),
            teacher.last_name.trim(),
            non_empty(teacher.email.as_deref()),
            non_empty(teacher.department.as_deref()),
            non_empty(teacher.phone.as_deref()),
            teacher.user_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_teacher(pool: &DbPool, teacher: &NewTeacher) -> AppResult<i64> {
    let conn = pool.get()?;
    let id = insert_teacher(&conn, teacher)?;
    tracing::info!(id, teacher_id = %teacher.teacher_id, "Created teacher");
    Ok(id)
}

pub fn get_teacher(pool: &DbPool, id: i64) -> AppResult<Option<Teacher>> {
    let conn = pool.get()?;
    let teacher = conn
        .query_row(
            &format!("SELECT {TEACHER_COLUMNS} FROM teachers WHERE id = ?1"),
            params![id],
            teacher_from_row,
        )
        .optional()?;
    Ok(teacher)
}

pub fn find_by_user(pool: &DbPool, user_id: i64) -> AppResult<Option<Teacher>> {
    let conn = pool.get()?;
    let teacher = conn
        .query_row(
            &format!("SELECT {TEACHER_COLUMNS} FROM teachers WHERE user_id = ?1"),
            params![user_id],
            teacher_from_row,
        )
        .optional()?;
    Ok(teacher)
}

pub fn list_teachers(pool: &DbPool) -> AppResult<Vec<Teacher>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {TEACHER_COLUMNS} FROM teachers ORDER BY last_name, first_name"
    ))?;
    let teachers = stmt
        .query_map([], teacher_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(teachers)
}

pub fn update_teacher(pool: &DbPool, id: i64, teacher: &NewTeacher) -> AppResult<()> {
    let conn = pool.get()?;
    check_unique(&conn, teacher, Some(id))?;
    let updated = conn.execute(
        "UPDATE teachers SET teacher_id = ?1, first_name = ?2, last_name = ?3, email = ?4,
                department = ?5, phone = ?6
         WHERE id = ?7",
        params![
            teacher.teacher_id.trim(),
            teacher.first_name.trim(),
            teacher.last_name.trim(),
            non_empty(teacher.email.as_deref()),
            non_empty(teacher.department.as_deref()),
            non_empty(teacher.phone.as_deref()),
            id,
        ],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("teacher {id}")));
    }
    Ok(())
}

/// Delete a teacher, unassign their classes and remove their login account.
pub fn delete_teacher(pool: &DbPool, id: i64) -> AppResult<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let user_id: Option<i64> = tx
        .query_row(
            "SELECT user_id FROM teachers WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("teacher {id}")))?;

    let mut unassigned = 0;
    if let Some(user_id) = user_id.filter(|&uid| uid > 0) {
        unassigned = tx.execute(
            "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?1",
            params![user_id],
        )?;
        tx.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM users WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM students WHERE user_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM teachers WHERE user_id = ?1)",
            params![user_id],
        )?;
    } else {
        tx.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
    }
    tx.commit()?;

    tracing::info!(id, unassigned_classes = unassigned, "Deleted teacher");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::empty_pool;

    fn new_teacher(teacher_id: &str, email: &str) -> NewTeacher {
        NewTeacher {
            teacher_id: teacher_id.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: Some(email.into()),
            department: Some("Mathematics".into()),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_list() {
        let (pool, _tmp) = empty_pool();
        let id = create_teacher(&pool, &new_teacher("TCH001", "ada@example.edu")).unwrap();
        let teachers = list_teachers(&pool).unwrap();
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].id, id);
        assert_eq!(teachers[0].department.as_deref(), Some("Mathematics"));
    }

    #[test]
    fn duplicate_email_is_a_conflict() {
        let (pool, _tmp) = empty_pool();
        create_teacher(&pool, &new_teacher("TCH001", "ada@example.edu")).unwrap();
        let err = create_teacher(&pool, &new_teacher("TCH002", "ADA@example.edu")).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn delete_unassigns_classes_and_removes_account() {
        let (pool, _tmp) = empty_pool();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (username, password, role) VALUES ('ada', 'x', 'TEACHER')",
            [],
        )
        .unwrap();
        let user_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO classes (class_name, teacher_id) VALUES ('Class 11A', ?1)",
            params![user_id],
        )
        .unwrap();
        drop(conn);

        let mut teacher = new_teacher("TCH001", "ada@example.edu");
        teacher.user_id = Some(user_id);
        let id = create_teacher(&pool, &teacher).unwrap();
        assert_eq!(find_by_user(&pool, user_id).unwrap().unwrap().id, id);

        delete_teacher(&pool, id).unwrap();

        let conn = pool.get().unwrap();
        let teacher_id: Option<i64> = conn
            .query_row("SELECT teacher_id FROM classes", [], |row| row.get(0))
            .unwrap();
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(teacher_id, None);
        assert_eq!(users, 0);
    }

    #[test]
    fn update_missing_teacher_is_not_found() {
        let (pool, _tmp) = empty_pool();
        let err = update_teacher(&pool, 5, &new_teacher("TCH009", "x@example.edu")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
