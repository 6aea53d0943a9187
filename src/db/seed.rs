// Default accounts and sample rows written into a brand-new database.

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::auth::password::PasswordHash;
use crate::db::models::{AttendanceStatus, Role};
use crate::error::{AppError, AppResult};
use crate::store::attendance::{self, AttendanceMark};
use crate::store::classes::{self, NewClass};
use crate::store::notifications::{self, NewNotification};
use crate::store::students::{self, NewStudent};
use crate::store::teachers::{self, NewTeacher};
use crate::store::users::{self, NewUser};

pub struct DefaultAccount {
    pub username: &'static str,
    pub password: &'static str,
    pub role: Role,
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub email: &'static str,
}

impl DefaultAccount {
    fn new_user(&self, with_email: bool) -> NewUser {
        NewUser {
            username: self.username.to_string(),
            role: self.role,
            first_name: Some(self.first_name.to_string()),
            last_name: Some(self.last_name.to_string()),
            email: with_email.then(|| self.email.to_string()),
        }
    }
}

pub const ADMIN: DefaultAccount = DefaultAccount {
    username: "admin",
    password: "admin123",
    role: Role::Admin,
    first_name: "System",
    last_name: "Administrator",
    email: "admin@school.edu",
};

pub const TEACHER: DefaultAccount = DefaultAccount {
    username: "teacher",
    password: "teacher123",
    role: Role::Teacher,
    first_name: "John",
    last_name: "Smith",
    email: "teacher@school.edu",
};

pub const STUDENT: DefaultAccount = DefaultAccount {
    username: "student",
    password: "student123",
    role: Role::Student,
    first_name: "Jane",
    last_name: "Doe",
    email: "student@school.edu",
};

/// (class_name, subject, schedule, room). No teachers assigned by default.
const SAMPLE_CLASSES: &[(&str, &str, &str, &str)] = &[
    ("Class 10A", "Mathematics", "Mon/Wed/Fri 09:00-10:00", "Room 101"),
    ("Class 10B", "Science", "Tue/Thu 10:00-11:30", "Room 102"),
    ("Class 11A", "English", "Mon/Wed 13:00-14:00", "Room 201"),
];

fn create_account(conn: &Connection, account: &DefaultAccount, cost: u32) -> AppResult<i64> {
    let hash = PasswordHash::new(account.password, cost)?;
    users::insert_user(conn, &account.new_user(true), &hash)
}

/// Populate an empty database. Runs on the caller's transaction.
pub fn seed_defaults(conn: &Connection, cost: u32, sample_data: bool) -> AppResult<()> {
    let admin_id = create_account(conn, &ADMIN, cost)?;
    let teacher_user = create_account(conn, &TEACHER, cost)?;
    let student_user = create_account(conn, &STUDENT, cost)?;
    tracing::info!("Seeded default accounts: admin, teacher, student");

    if !sample_data {
        return Ok(());
    }

    let mut class_ids = Vec::with_capacity(SAMPLE_CLASSES.len());
    for &(class_name, subject, schedule, room) in SAMPLE_CLASSES {
        let id = classes::insert_class(
            conn,
            &NewClass {
                class_name: class_name.to_string(),
                subject: Some(subject.to_string()),
                teacher_id: None,
                schedule: Some(schedule.to_string()),
                room: Some(room.to_string()),
            },
        )?;
        class_ids.push(id);
    }

    teachers::insert_teacher(
        conn,
        &NewTeacher {
            teacher_id: "TCH001".into(),
            first_name: TEACHER.first_name.into(),
            last_name: TEACHER.last_name.into(),
            email: Some(TEACHER.email.into()),
            department: Some("Mathematics".into()),
            phone: None,
            user_id: Some(teacher_user),
        },
    )?;

    let student_id = students::insert_student(
        conn,
        &NewStudent {
            student_id: "STU001".into(),
            first_name: STUDENT.first_name.into(),
            middle_name: None,
            last_name: STUDENT.last_name.into(),
            email: Some(STUDENT.email.into()),
            department: Some("Science".into()),
            user_id: Some(student_user),
            class_id: class_ids.first().copied(),
        },
    )?;

    let sample_marks = [
        (2, AttendanceStatus::Present, Some("08:55"), None),
        (4, AttendanceStatus::Late, Some("09:12"), Some("Traffic")),
    ];
    for (day, status, check_in, remarks) in sample_marks {
        let date = NaiveDate::from_ymd_opt(2024, 9, day)
            .ok_or_else(|| AppError::BadRequest(format!("invalid sample date 2024-09-{day}")))?;
        attendance::upsert_on(
            conn,
            &AttendanceMark {
                student_id,
                class_id: class_ids.first().copied(),
                date,
                status,
                check_in: check_in.map(str::to_string),
                check_out: None,
                remarks: remarks.map(str::to_string),
            },
        )?;
    }

    for receiver in [teacher_user, student_user] {
        notifications::insert_notification(
            conn,
            receiver,
            &NewNotification::info(
                Some(admin_id),
                "Welcome",
                "Welcome to the attendance system. Please change your password after first login.",
            ),
        )?;
    }

    tracing::info!(
        classes = class_ids.len(),
        "Seeded sample classes, students, attendance and notifications"
    );
    Ok(())
}

/// Recreate the `admin` account if it has gone missing. Returns true if one
/// was created.
pub fn ensure_admin(conn: &Connection, cost: u32) -> AppResult<bool> {
    if users::username_taken(conn, ADMIN.username)? {
        return Ok(false);
    }

    tracing::warn!("No admin account found, recreating the default one");
    // The address may have been reused by another account since.
    let email_free = users::user_id_by_email(conn, ADMIN.email)?.is_none();
    let hash = PasswordHash::new(ADMIN.password, cost)?;
    users::insert_user(conn, &ADMIN.new_user(email_free), &hash)?;
    Ok(true)
}
