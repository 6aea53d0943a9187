#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    #[error("Could not add column {table}.{column}: {source}")]
    Schema {
        table: String,
        column: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Background task ended without a result")]
    TaskAborted,
}

impl AppError {
    /// True for failures the caller can show as-is (missing rows, duplicates,
    /// bad input), as opposed to storage faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_) | AppError::Conflict(_) | AppError::BadRequest(_)
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_the_value() {
        let err = AppError::Conflict("username 'jdoe'".into());
        assert_eq!(err.to_string(), "Already exists: username 'jdoe'");
    }

    #[test]
    fn schema_error_names_the_column() {
        let err = AppError::Schema {
            table: "students".into(),
            column: "class_id".into(),
            source: rusqlite::Error::InvalidQuery,
        };
        assert!(err.to_string().contains("students.class_id"));
    }

    #[test]
    fn user_facing_classification() {
        assert!(AppError::NotFound("student 7".into()).is_user_facing());
        assert!(AppError::BadRequest("empty name".into()).is_user_facing());
        assert!(!AppError::Database(rusqlite::Error::InvalidQuery).is_user_facing());
        assert!(!AppError::TaskAborted.is_user_facing());
    }
}
