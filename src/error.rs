use thiserror::Error;

use crate::protocol::Status;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("{source_name}:{line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("No free cores.")]
    NoFreeCores,

    #[error("No node with this requirement.")]
    NoNodeAvailable,

    #[error("Job {job_id} of user {user} not found.")]
    JobNotFound { user: String, job_id: u64 },

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("{0} is not an allowed user.")]
    NotAllowed(String),

    #[error("Invalid connection key")]
    InvalidKey,

    #[error("Requested minimum of {requested} cores exceeds the {available} cores available")]
    InsufficientCores { requested: u64, available: u64 },

    #[error("Job lists differ: {0}")]
    JobListDivergence(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl BrokerError {
    pub fn parse(source_name: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        BrokerError::Parse {
            source_name: source_name.into(),
            line,
            message: message.into(),
        }
    }

    /// Status code reported back to the caller for this error.
    pub fn status(&self) -> Status {
        match self {
            BrokerError::Parse { .. }
            | BrokerError::NoFreeCores
            | BrokerError::NoNodeAvailable
            | BrokerError::JobNotFound { .. }
            | BrokerError::InsufficientCores { .. }
            | BrokerError::JobListDivergence(_) => Status::SoftFailure,
            BrokerError::NotAllowed(_) => Status::Rejected,
            BrokerError::UnknownUser(_) | BrokerError::InvalidKey => Status::UnknownUser,
            BrokerError::Protocol(_)
            | BrokerError::Io(_)
            | BrokerError::Json(_)
            | BrokerError::Internal(_) => Status::InternalError,
            BrokerError::Fatal(_) => Status::Fatal,
        }
    }

    /// Errors after which the accept loop must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Fatal(_))
    }

    /// Expected contention outcomes, not worth an error log line.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            BrokerError::NoFreeCores | BrokerError::NoNodeAvailable
        )
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_errors_are_soft_and_routine() {
        assert_eq!(BrokerError::NoFreeCores.status(), Status::SoftFailure);
        assert_eq!(BrokerError::NoNodeAvailable.status(), Status::SoftFailure);
        assert!(BrokerError::NoFreeCores.is_routine());
        assert!(!BrokerError::UnknownUser("bob".into()).is_routine());
    }

    #[test]
    fn contention_messages_are_distinguishable() {
        assert_eq!(BrokerError::NoFreeCores.to_string(), "No free cores.");
        assert_eq!(
            BrokerError::NoNodeAvailable.to_string(),
            "No node with this requirement."
        );
    }

    #[test]
    fn status_codes_by_class() {
        assert_eq!(BrokerError::NotAllowed("x".into()).status(), Status::Rejected);
        assert_eq!(BrokerError::InvalidKey.status(), Status::UnknownUser);
        assert_eq!(
            BrokerError::Protocol("bad".into()).status(),
            Status::InternalError
        );
        let fatal = BrokerError::Fatal("lock poisoned".into());
        assert_eq!(fatal.status(), Status::Fatal);
        assert!(fatal.is_fatal());
    }

    #[test]
    fn parse_error_names_its_source() {
        let err = BrokerError::parse("nodes", 3, "expected core count");
        assert_eq!(err.to_string(), "nodes:3: expected core count");
    }
}
