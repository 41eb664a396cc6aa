use bigdecimal::BigDecimal;
use thiserror::Error;

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("database connection pool exhausted")]
    PoolExhausted,

    #[error("database connection timed out")]
    ConnectionTimeout,

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key constraint violated: {constraint}")]
    ForeignKeyViolation { constraint: String },

    #[error("check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: BigDecimal,
        required: BigDecimal,
    },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("transaction failed: {message}")]
    Transaction { message: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("migration failed: {message}")]
    Migration { message: String },

    #[error("unknown database error: {message}")]
    Unknown { message: String },
}

#[derive(Debug, Clone, Error)]
#[error("{kind}{}", .context.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub context: Option<String>,
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.into(),
        })
    }

    pub fn insufficient_balance(available: BigDecimal, required: BigDecimal) -> Self {
        Self::new(DatabaseErrorKind::InsufficientBalance {
            available,
            required,
        })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionTimeout
                | DatabaseErrorKind::PoolExhausted
                | DatabaseErrorKind::Connection { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::UniqueViolation { .. })
    }

    /// Map an SQLx error onto the domain taxonomy, keyed on Postgres error
    /// codes where they carry meaning.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("record", "unknown"),
            sqlx::Error::PoolTimedOut => Self::new(DatabaseErrorKind::PoolExhausted),
            sqlx::Error::PoolClosed => Self::new(DatabaseErrorKind::Connection {
                message: "connection pool is closed".to_string(),
            }),
            sqlx::Error::Io(io_err) => Self::new(DatabaseErrorKind::Connection {
                message: io_err.to_string(),
            }),
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                match db_err.code().as_deref() {
                    Some("23505") => Self::new(DatabaseErrorKind::UniqueViolation { constraint }),
                    Some("23503") => {
                        Self::new(DatabaseErrorKind::ForeignKeyViolation { constraint })
                    }
                    Some("23514") => Self::new(DatabaseErrorKind::CheckViolation { constraint }),
                    _ => Self::new(DatabaseErrorKind::Query {
                        message: db_err.message().to_string(),
                    }),
                }
            }
            other => Self::new(DatabaseErrorKind::Unknown {
                message: other.to_string(),
            }),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        Self::from_sqlx(error)
    }
}
