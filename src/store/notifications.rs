use rusqlite::{params, Connection, Row};

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::state::DbPool;

const NOTIFICATION_COLUMNS: &str =
    "id, sender_id, receiver_id, title, message, type, is_read, created_at";

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub sender_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub kind: String,
}

impl NewNotification {
    pub fn info(sender_id: Option<i64>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender_id,
            title: title.into(),
            message: message.into(),
            kind: "INFO".to_string(),
        }
    }
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        kind: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn insert_notification(
    conn: &Connection,
    receiver_id: i64,
    notification: &NewNotification,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO notifications (sender_id, receiver_id, title, message, type)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            notification.sender_id,
            receiver_id,
            notification.title,
            notification.message,
            notification.kind
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn send(pool: &DbPool, receiver_id: i64, notification: &NewNotification) -> AppResult<i64> {
    let conn = pool.get()?;
    insert_notification(&conn, receiver_id, notification)
}

/// Send the same notification to every receiver in one transaction.
pub fn notify_many(
    pool: &DbPool,
    receiver_ids: &[i64],
    notification: &NewNotification,
) -> AppResult<usize> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    for &receiver in receiver_ids {
        insert_notification(&tx, receiver, notification)?;
    }
    tx.commit()?;
    Ok(receiver_ids.len())
}

pub fn list_for_user(pool: &DbPool, user_id: i64, unread_only: bool) -> AppResult<Vec<Notification>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE receiver_id = ?1 AND (?2 = 0 OR is_read = 0)
         ORDER BY created_at DESC, id DESC"
    ))?;
    let notifications = stmt
        .query_map(params![user_id, unread_only], notification_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(notifications)
}

pub fn unread_count(pool: &DbPool, user_id: i64) -> AppResult<i64> {
    let conn = pool.get()?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE receiver_id = ?1 AND is_read = 0",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn mark_as_read(pool: &DbPool, id: i64) -> AppResult<()> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1",
        params![id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("notification {id}")));
    }
    Ok(())
}

pub fn mark_all_read(pool: &DbPool, user_id: i64) -> AppResult<usize> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE receiver_id = ?1 AND is_read = 0",
        params![user_id],
    )?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::empty_pool;

    fn insert_user(pool: &DbPool, username: &str) -> i64 {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO users (username, password, role) VALUES (?1, 'x', 'STUDENT')",
            params![username],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn read_state_is_tracked() {
        let (pool, _tmp) = empty_pool();
        let alice = insert_user(&pool, "alice");

        let first = send(&pool, alice, &NewNotification::info(None, "Welcome", "Hello")).unwrap();
        send(&pool, alice, &NewNotification::info(None, "Reminder", "Class at 9")).unwrap();
        assert_eq!(unread_count(&pool, alice).unwrap(), 2);

        mark_as_read(&pool, first).unwrap();
        let unread = list_for_user(&pool, alice, true).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "Reminder");
        assert_eq!(list_for_user(&pool, alice, false).unwrap().len(), 2);

        assert_eq!(mark_all_read(&pool, alice).unwrap(), 1);
        assert_eq!(unread_count(&pool, alice).unwrap(), 0);
    }

    #[test]
    fn notify_many_reaches_every_receiver() {
        let (pool, _tmp) = empty_pool();
        let a = insert_user(&pool, "a");
        let b = insert_user(&pool, "b");
        let sent = notify_many(&pool, &[a, b], &NewNotification::info(Some(a), "Exam", "Friday")).unwrap();
        assert_eq!(sent, 2);
        assert_eq!(unread_count(&pool, b).unwrap(), 1);
    }

    #[test]
    fn unknown_receiver_is_rejected() {
        let (pool, _tmp) = empty_pool();
        assert!(send(&pool, 404, &NewNotification::info(None, "x", "y")).is_err());
        assert!(matches!(mark_as_read(&pool, 404), Err(AppError::NotFound(_))));
    }
}
