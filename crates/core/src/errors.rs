use thiserror::Error;

use crate::event_log::EventLogError;
use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("resourcing request has already been approved")]
    AlreadyApproved,
    #[error("resourcing request `{0}` was changed by another user")]
    Conflict(String),
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You do not have permission to perform this action.",
            Self::Conflict { .. } => {
                "The resourcing request changed in the meantime. Refresh and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::PermissionDenied(message)) => {
                Self::Forbidden { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::AlreadyApproved) => Self::Conflict {
                message: "resourcing request has already been approved".to_owned(),
                correlation_id,
            },
            ApplicationError::Domain(DomainError::Conflict(message)) => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::EventLog(error)) => {
                Self::Internal { message: error.to_string(), correlation_id }
            }
            ApplicationError::Domain(
                DomainError::Precondition(_)
                | DomainError::InvalidInput(_)
                | DomainError::FlowTransition(_)
                | DomainError::InvariantViolation(_),
            ) => Self::BadRequest { message: "domain validation failed".to_owned(), correlation_id },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::event_log::{EventLogError, EventType};

    #[test]
    fn precondition_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::Precondition(
            "cannot edit outside draft or amending".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn permission_denied_maps_to_forbidden() {
        let interface =
            ApplicationError::from(DomainError::PermissionDenied("not the chief".to_owned()))
                .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn already_approved_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::AlreadyApproved).into_interface("req-3");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn stale_commit_maps_to_conflict() {
        let interface =
            ApplicationError::from(DomainError::Conflict("request-1".to_owned())).into_interface("req-5");
        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-5");
    }

    #[test]
    fn event_context_mismatch_is_internal() {
        let interface = ApplicationError::from(DomainError::from(EventLogError::InvalidContext {
            event_type: EventType::Created,
            expected: vec!["object".to_owned()],
            supplied: Vec::new(),
        }))
        .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
    }
}
