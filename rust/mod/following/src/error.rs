use thiserror::Error;

use usergraph_core::ServiceError;
use usergraph_sql::SQLError;

use crate::model::{FollowRequestView, RequestStatus};

/// Following-specific errors.
#[derive(Debug, Error)]
pub enum FollowingError {
    #[error("failed to create follow request: {0}")]
    RequestCreation(String),

    /// `prior` is the stored request as last read; `None` when it does not exist.
    #[error("failed to update follow request: {message}")]
    RequestUpdate {
        message: String,
        prior: Option<FollowRequestView>,
    },

    #[error("failed to create follower: {0}")]
    FollowerCreation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    NotFound(String),

    #[error("follow request {id} is {from} and cannot become {to}")]
    InvalidTransition {
        id: i64,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("follow request {id} is {status} and can no longer be cancelled")]
    NotCancellable { id: i64, status: RequestStatus },

    #[error("{0}")]
    Validation(String),

    #[error("user {target} has blocked user {requester}")]
    Blocked { requester: i64, target: i64 },

    #[error("{0}")]
    Conflict(String),
}

impl From<SQLError> for FollowingError {
    fn from(e: SQLError) -> Self {
        FollowingError::Persistence(e.to_string())
    }
}

impl From<FollowingError> for ServiceError {
    fn from(e: FollowingError) -> Self {
        match e {
            FollowingError::NotFound(m) => ServiceError::NotFound(m),
            FollowingError::Validation(m) => ServiceError::Validation(m),
            FollowingError::Conflict(m) => ServiceError::Conflict(m),
            e @ FollowingError::Blocked { .. } => ServiceError::PermissionDenied(e.to_string()),
            e @ (FollowingError::InvalidTransition { .. }
            | FollowingError::NotCancellable { .. }) => {
                ServiceError::InvalidTransition(e.to_string())
            }
            // Without a prior view the request was never found.
            FollowingError::RequestUpdate {
                message,
                prior: None,
            } => ServiceError::NotFound(message),
            other => ServiceError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_mapping() {
        let e: ServiceError = FollowingError::Blocked {
            requester: 1,
            target: 2,
        }
        .into();
        assert_eq!(e.error_code(), "PERMISSION_DENIED");

        let e: ServiceError = FollowingError::InvalidTransition {
            id: 3,
            from: RequestStatus::Accepted,
            to: RequestStatus::Rejected,
        }
        .into();
        assert_eq!(e.error_code(), "INVALID_TRANSITION");
        assert_eq!(
            e.to_string(),
            "follow request 3 is ACCEPTED and cannot become REJECTED"
        );

        let e: ServiceError = FollowingError::RequestUpdate {
            message: "follow request 9 not found".into(),
            prior: None,
        }
        .into();
        assert_eq!(e.error_code(), "NOT_FOUND");

        let e: ServiceError = FollowingError::RequestCreation("disk full".into()).into();
        assert_eq!(e.error_code(), "STORAGE_ERROR");
    }

    #[test]
    fn sql_errors_become_persistence() {
        let e: FollowingError = SQLError::Execution("locked".into()).into();
        assert!(matches!(e, FollowingError::Persistence(_)));
    }
}
