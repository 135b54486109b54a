//! Application-wide error types.

use thiserror::Error;

use crate::monitor::SourceError;
use crate::notification::DeliveryError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream error: {0}")]
    Upstream(#[from] SourceError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Single-sentence rendering for command responses.
    ///
    /// Internal details (SQL, HTTP bodies) stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound { entity_type, id } => format!("No {} named `{}` was found.", entity_type, id),
            Self::Upstream(e) if e.is_auth() => {
                "Twitch rejected our credentials, please try again in a moment.".to_string()
            }
            Self::Upstream(_) => "Twitch is not responding right now, please try again later.".to_string(),
            Self::Delivery(_) => "The notification could not be delivered to that channel.".to_string(),
            Self::DatabaseSqlx(_) | Self::Migration(_) | Self::Io(_) => {
                "Something went wrong while accessing storage, please try again later.".to_string()
            }
            Self::Serialization(_) | Self::Configuration(_) | Self::Other(_) => {
                "Something went wrong, please try again later.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internals() {
        let err = Error::DatabaseSqlx(sqlx::Error::PoolTimedOut);
        let msg = err.user_message();
        assert!(!msg.contains("pool"));
        assert!(msg.ends_with('.'));
    }

    #[test]
    fn test_user_message_passes_validation_through() {
        let err = Error::validation("`bad name!` is not a valid Twitch username.");
        assert_eq!(err.user_message(), "`bad name!` is not a valid Twitch username.");
    }

    #[test]
    fn test_user_message_auth() {
        let err = Error::Upstream(SourceError::AuthExpired);
        assert!(err.user_message().contains("credentials"));
    }
}
