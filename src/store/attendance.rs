use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::models::{Attendance, AttendanceStatus};
use crate::error::{AppError, AppResult};
use crate::state::DbPool;
use crate::store::non_empty;

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, class_id, date, check_in, check_out, status, remarks";

#[derive(Debug, Clone)]
pub struct AttendanceMark {
    pub student_id: i64,
    pub class_id: Option<i64>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSummary {
    pub present: u32,
    pub absent: u32,
    pub late: u32,
}

impl AttendanceSummary {
    pub fn total(&self) -> u32 {
        self.present + self.absent + self.late
    }

    /// Share of sessions attended, late arrivals included, as a percentage.
    pub fn rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(f64::from(self.present + self.late) * 100.0 / f64::from(total)),
        }
    }

    fn add(&mut self, status: AttendanceStatus, count: u32) {
        match status {
            AttendanceStatus::Present => self.present += count,
            AttendanceStatus::Absent => self.absent += count,
            AttendanceStatus::Late => self.late += count,
        }
    }
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    Ok(Attendance {
        id: row.get(0)?,
        student_id: row.get(1)?,
        class_id: row.get(2)?,
        date: row.get(3)?,
        check_in: row.get(4)?,
        check_out: row.get(5)?,
        status: row.get(6)?,
        remarks: row.get(7)?,
    })
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Insert or replace the record for one student, class and day.
pub(crate) fn upsert_on(conn: &Connection, mark: &AttendanceMark) -> AppResult<i64> {
    let date = date_key(mark.date);
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM attendance
             WHERE student_id = ?1 AND class_id IS ?2 AND date = ?3",
            params![mark.student_id, mark.class_id, date],
            |row| row.get(0),
        )
        .optional()?;

    let check_in = non_empty(mark.check_in.as_deref());
    let check_out = non_empty(mark.check_out.as_deref());
    let remarks = non_empty(mark.remarks.as_deref());

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE attendance SET status = ?1, check_in = ?2, check_out = ?3, remarks = ?4
                 WHERE id = ?5",
                params![mark.status, check_in, check_out, remarks, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO attendance (student_id, class_id, date, check_in, check_out, status, remarks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    mark.student_id,
                    mark.class_id,
                    date,
                    check_in,
                    check_out,
                    mark.status,
                    remarks
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref f, _)
                    if f.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    AppError::NotFound(format!(
                        "student {} or class {:?}",
                        mark.student_id, mark.class_id
                    ))
                }
                other => AppError::Database(other),
            })?;
            Ok(conn.last_insert_rowid())
        }
    }
}

pub fn mark_attendance(pool: &DbPool, mark: &AttendanceMark) -> AppResult<i64> {
    let conn = pool.get()?;
    upsert_on(&conn, mark)
}

/// Save a whole roster in one transaction.
pub fn submit_attendance(pool: &DbPool, marks: &[AttendanceMark]) -> AppResult<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    for mark in marks {
        upsert_on(&tx, mark)?;
    }
    tx.commit()?;
    tracing::info!(records = marks.len(), "Submitted attendance");
    Ok(marks.len())
}

/// Records for one student, newest first, optionally limited to `[from, to]`.
pub fn records_for_student(
    pool: &DbPool,
    student_id: i64,
    range: Option<(NaiveDate, NaiveDate)>,
) -> AppResult<Vec<Attendance>> {
    let conn = pool.get()?;
    let (from, to) = match range {
        Some((from, to)) => (date_key(from), date_key(to)),
        None => ("0000-01-01".to_string(), "9999-12-31".to_string()),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
         WHERE student_id = ?1 AND date BETWEEN ?2 AND ?3
         ORDER BY date DESC, id DESC"
    ))?;
    let records = stmt
        .query_map(params![student_id, from, to], attendance_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn records_for_class_on(
    pool: &DbPool,
    class_id: i64,
    date: NaiveDate,
) -> AppResult<Vec<Attendance>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
         WHERE class_id = ?1 AND date = ?2
         ORDER BY student_id"
    ))?;
    let records = stmt
        .query_map(params![class_id, date_key(date)], attendance_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

fn summarize(conn: &Connection, filter: &str, id: i64) -> AppResult<AttendanceSummary> {
    let mut stmt = conn.prepare(&format!(
        "SELECT status, COUNT(*) FROM attendance WHERE {filter} = ?1 GROUP BY status"
    ))?;
    let mut summary = AttendanceSummary::default();
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, AttendanceStatus>(0)?, row.get::<_, u32>(1)?))
    })?;
    for row in rows {
        let (status, count) = row?;
        summary.add(status, count);
    }
    Ok(summary)
}

pub fn summary_for_student(pool: &DbPool, student_id: i64) -> AppResult<AttendanceSummary> {
    let conn = pool.get()?;
    summarize(&conn, "student_id", student_id)
}

pub fn summary_for_class(pool: &DbPool, class_id: i64) -> AppResult<AttendanceSummary> {
    let conn = pool.get()?;
    summarize(&conn, "class_id", class_id)
}
