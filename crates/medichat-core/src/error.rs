use crate::auth::AuthRejection;

/// Failure taxonomy for chat operations. Everything here is caught at the
/// handler boundary and reported to the client; none of these close an
/// established connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChatError {
    #[error("authentication rejected: {0}")]
    AuthRejected(AuthRejection),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Self::NotAuthorized(msg.into())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure(err.to_string())
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthRejected(_) => "auth_rejected",
            Self::ValidationFailed(_) => "validation_failed",
            Self::NotAuthorized(_) => "not_authorized",
            Self::PersistenceFailure(_) => "persistence_failure",
        }
    }

    /// Text safe to show a client. Persistence detail stays server-side;
    /// clients get a generic message.
    pub fn client_message(&self) -> String {
        match self {
            Self::AuthRejected(rejection) => format!("Authentication error: {rejection}"),
            Self::ValidationFailed(msg) | Self::NotAuthorized(msg) => msg.clone(),
            Self::PersistenceFailure(_) => "Failed to process chat request.".to_string(),
        }
    }
}

impl From<AuthRejection> for ChatError {
    fn from(rejection: AuthRejection) -> Self {
        Self::AuthRejected(rejection)
    }
}
