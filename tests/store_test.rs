use chrono::NaiveDate;
use rollcall::auth::password::{PasswordHash, MIN_COST};
use rollcall::config::Config;
use rollcall::db::models::{AttendanceStatus, Role};
use rollcall::error::AppError;
use rollcall::state::AppState;
use rollcall::store::attendance::{self, AttendanceMark};
use rollcall::store::{classes, notifications, students, users};
use tempfile::TempDir;

fn seeded_state(tmp: &TempDir) -> AppState {
    let mut config = Config::default();
    config.auth.bcrypt_cost = MIN_COST;
    config.database.path = Some(tmp.path().join("school/rollcall.db"));
    let state = AppState::open(config).expect("Failed to open store");
    state.bootstrapper().initialize().unwrap();
    state
}

#[test]
fn teacher_marks_and_student_reads_attendance() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp);
    let pool = &state.db;

    let teacher = users::authenticate(pool, "teacher", "teacher123", MIN_COST)
        .unwrap()
        .unwrap();
    assert_eq!(teacher.role, Role::Teacher);

    let class_10a = classes::list_classes(pool)
        .unwrap()
        .into_iter()
        .find(|c| c.class_name == "Class 10A")
        .unwrap();
    classes::assign_teacher(pool, class_10a.id, Some(teacher.id)).unwrap();
    assert_eq!(
        classes::classes_for_teacher(pool, teacher.id).unwrap().len(),
        1
    );

    let roster = students::list_by_class(pool, class_10a.id).unwrap();
    assert_eq!(roster.len(), 1);
    let jane = &roster[0];
    assert_eq!(jane.student_id, "STU001");

    let marks: Vec<AttendanceMark> = [
        (9, AttendanceStatus::Present),
        (10, AttendanceStatus::Present),
        (11, AttendanceStatus::Absent),
    ]
    .into_iter()
    .map(|(day, status)| AttendanceMark {
        student_id: jane.id,
        class_id: Some(class_10a.id),
        date: NaiveDate::from_ymd_opt(2024, 9, day).unwrap(),
        status,
        check_in: None,
        check_out: None,
        remarks: None,
    })
    .collect();
    attendance::submit_attendance(pool, &marks).unwrap();

    // Seed data already holds one PRESENT and one LATE.
    let student_user = users::authenticate(pool, "student", "student123", MIN_COST)
        .unwrap()
        .unwrap();
    let me = students::find_by_user(pool, student_user.id).unwrap().unwrap();
    let summary = attendance::summary_for_student(pool, me.id).unwrap();
    assert_eq!(summary.present, 3);
    assert_eq!(summary.late, 1);
    assert_eq!(summary.absent, 1);
    assert_eq!(summary.rate(), Some(80.0));

    let records = attendance::records_for_student(pool, me.id, None).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].date, "2024-09-11");
}

#[test]
fn seeded_users_have_welcome_notifications() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp);
    let pool = &state.db;

    let student = users::find_by_username(pool, "student").unwrap().unwrap();
    let inbox = notifications::list_for_user(pool, student.id, true).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].title, "Welcome");

    let admin = users::find_by_username(pool, "admin").unwrap().unwrap();
    assert_eq!(inbox[0].sender_id, Some(admin.id));
    assert_eq!(notifications::unread_count(pool, admin.id).unwrap(), 0);
}

#[test]
fn registration_prechecks_duplicates() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp);
    let pool = &state.db;

    assert!(users::username_exists(pool, "teacher").unwrap());
    assert!(users::email_exists(pool, "admin@school.edu").unwrap());
    assert!(students::student_id_exists(pool, "STU001").unwrap());

    let err = users::create_user(
        pool,
        &users::NewUser {
            username: "teacher".into(),
            role: Role::Teacher,
            first_name: None,
            last_name: None,
            email: None,
        },
        &PasswordHash::new("pw", MIN_COST).unwrap(),
    )
    .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert!(err.is_user_facing());
}

#[test]
fn deleting_seeded_student_removes_their_login() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp);
    let pool = &state.db;

    let jane = students::find_by_student_id(pool, "STU001").unwrap().unwrap();
    let outcome = students::delete_students(pool, &[jane.id]);
    assert!(outcome.is_complete());

    assert!(users::find_by_username(pool, "student").unwrap().is_none());
    assert!(attendance::records_for_student(pool, jane.id, None)
        .unwrap()
        .is_empty());
}
