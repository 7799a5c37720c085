use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid {column} value in store: {value:?}")]
    InvalidValue { column: &'static str, value: String },
}

impl Error {
    #[must_use]
    pub fn invalid_value(column: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            column,
            value: value.into(),
        }
    }

    /// `true` when the underlying database rejected a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<Error> for parley_common::Error {
    fn from(err: Error) -> Self {
        Self::persistence(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
