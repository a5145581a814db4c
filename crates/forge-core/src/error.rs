//! Error taxonomy for the aggregate engine.
//!
//! Every failure surfaced by the engine maps to a stable [`ErrorCode`] so
//! callers (the routing layer, the CLI) can branch on it without parsing
//! messages:
//!
//! - [`FoldError`]: an event is not a legal transition given the log folded
//!   so far. Never retried.
//! - [`GateError`]: the validation gate rejected an event because a
//!   referenced entity is missing or the branches have no difference.
//! - [`PayloadError`]: a persisted or submitted event could not be decoded.
//! - [`StoreError`]: the document store failed.
//! - [`EngineError`]: the service surface wrapping all of the above plus
//!   collaborator failures, which propagate unchanged.

use std::fmt;

use crate::event::types::EventType;
use crate::id::{AggregateKind, CommentId};

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    AggregateNotFound,
    InvalidStateTransition,
    InvalidEventType,
    ReferenceNotFound,
    NoChanges,
    MergeConflict,
    MalformedPayload,
    StateDiverged,
    StoreFailure,
    CollaboratorFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::AggregateNotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::InvalidEventType => "E2003",
            Self::ReferenceNotFound => "E2004",
            Self::NoChanges => "E2005",
            Self::MergeConflict => "E2006",
            Self::MalformedPayload => "E3001",
            Self::StateDiverged => "E3003",
            Self::StoreFailure => "E5001",
            Self::CollaboratorFailure => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::AggregateNotFound => "Aggregate not found",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::InvalidEventType => "Invalid event type for aggregate",
            Self::ReferenceNotFound => "Referenced entity not found",
            Self::NoChanges => "No changes between branches",
            Self::MergeConflict => "Cannot merge",
            Self::MalformedPayload => "Malformed event payload",
            Self::StateDiverged => "Cached state diverged from event log",
            Self::StoreFailure => "Document store failure",
            Self::CollaboratorFailure => "Collaborator failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::AggregateNotFound => None,
            Self::InvalidStateTransition => {
                Some("Reload the aggregate; the event is not legal against its current log.")
            }
            Self::InvalidEventType => {
                Some("Submit only event types that belong to this aggregate kind.")
            }
            Self::ReferenceNotFound => Some("Create the label, milestone or user first."),
            Self::NoChanges => Some("Push at least one commit to the compare branch."),
            Self::MergeConflict => Some("Resolve the conflict between base and compare, then retry."),
            Self::MalformedPayload => Some("Check the payload shape for the event type."),
            Self::StateDiverged => Some("Run `forge rebuild` to re-fold the aggregate."),
            Self::StoreFailure => Some("Check the store path, disk space and permissions."),
            Self::CollaboratorFailure => Some("Retry once. The downstream service may be unavailable."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// FoldError
// ---------------------------------------------------------------------------

/// The three cross-cutting assignment capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Label,
    Milestone,
    User,
}

impl Capability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Milestone => "milestone",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event is not a legal transition against the log folded so far.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FoldError {
    #[error("{capability} {target} is already assigned to this {aggregate}")]
    AlreadyAssigned {
        aggregate: AggregateKind,
        capability: Capability,
        target: String,
    },

    #[error("{capability} {target} cannot be unassigned from this {aggregate}: it is not assigned")]
    CannotUnassign {
        aggregate: AggregateKind,
        capability: Capability,
        target: String,
    },

    #[error("comment {comment} on this {aggregate} cannot be updated")]
    CommentCannotBeUpdated {
        aggregate: AggregateKind,
        comment: CommentId,
    },

    #[error("comment {comment} on this {aggregate} cannot be hidden")]
    CommentCannotBeHidden {
        aggregate: AggregateKind,
        comment: CommentId,
    },

    #[error("comment {comment} on this {aggregate} cannot be deleted")]
    CommentCannotBeDeleted {
        aggregate: AggregateKind,
        comment: CommentId,
    },

    #[error("{aggregate} has not been created")]
    NotCreated { aggregate: AggregateKind },

    #[error("{aggregate} has already been created")]
    AlreadyCreated { aggregate: AggregateKind },

    #[error("{aggregate} is already closed")]
    AlreadyClosed { aggregate: AggregateKind },

    #[error("{aggregate} is already reopened")]
    AlreadyReopened { aggregate: AggregateKind },

    #[error("{aggregate} cannot be reopened: it was never closed")]
    NeverClosed { aggregate: AggregateKind },

    #[error("pull request cannot move from {from} to {to}")]
    InvalidReviewTransition { from: String, to: String },

    #[error("pull request is {review} and can no longer be edited")]
    Finalized { review: String },

    #[error("{event_type} is not a valid event type for {aggregate}")]
    InvalidEventType {
        aggregate: AggregateKind,
        event_type: EventType,
    },
}

impl FoldError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEventType { .. } => ErrorCode::InvalidEventType,
            _ => ErrorCode::InvalidStateTransition,
        }
    }
}

// ---------------------------------------------------------------------------
// GateError
// ---------------------------------------------------------------------------

/// Kind of entity a validation lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Label,
    Milestone,
    User,
    Repository,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Label => "label",
            Self::Milestone => "milestone",
            Self::User => "user",
            Self::Repository => "repository",
        })
    }
}

/// The validation gate rejected an event before folding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ReferenceKind, id: String },

    #[error("no commits between {base} and {compare}")]
    NoChanges { base: String, compare: String },
}

impl GateError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::ReferenceNotFound,
            Self::NoChanges { .. } => ErrorCode::NoChanges,
        }
    }
}

// ---------------------------------------------------------------------------
// PayloadError
// ---------------------------------------------------------------------------

/// A persisted or submitted event could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error(transparent)]
    UnknownType(#[from] crate::event::types::UnknownEventType),

    #[error(transparent)]
    WrongAggregate(#[from] FoldError),

    #[error("invalid {event_type} payload: {source}")]
    Malformed {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

impl PayloadError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::WrongAggregate(err) => err.code(),
            Self::UnknownType(_) | Self::Malformed { .. } => ErrorCode::MalformedPayload,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Document store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned by [`AggregateService`](crate::service::AggregateService).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Fold(#[from] FoldError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{kind} {id} not found")]
    AggregateNotFound { kind: AggregateKind, id: String },

    #[error("cannot merge {compare} into {base}: conflict")]
    CannotMerge { base: String, compare: String },

    #[error("cached state of {kind} {id} diverged from its event log")]
    StateDiverged { kind: AggregateKind, id: String },

    #[error("event encoding: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Fold(err) => err.code(),
            Self::Gate(err) => err.code(),
            Self::Payload(err) => err.code(),
            Self::Store(_) => ErrorCode::StoreFailure,
            Self::AggregateNotFound { .. } => ErrorCode::AggregateNotFound,
            Self::CannotMerge { .. } => ErrorCode::MergeConflict,
            Self::StateDiverged { .. } => ErrorCode::StateDiverged,
            Self::Encoding(_) => ErrorCode::InternalUnexpected,
            Self::Collaborator(_) => ErrorCode::CollaboratorFailure,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::AggregateNotFound,
            ErrorCode::InvalidStateTransition,
            ErrorCode::InvalidEventType,
            ErrorCode::ReferenceNotFound,
            ErrorCode::NoChanges,
            ErrorCode::MergeConflict,
            ErrorCode::MalformedPayload,
            ErrorCode::StateDiverged,
            ErrorCode::StoreFailure,
            ErrorCode::CollaboratorFailure,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::InvalidStateTransition.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn fold_errors_name_the_aggregate() {
        let err = FoldError::AlreadyAssigned {
            aggregate: AggregateKind::PullRequest,
            capability: Capability::Label,
            target: "l1".into(),
        };
        assert_eq!(
            err.to_string(),
            "label l1 is already assigned to this pull request"
        );
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    }

    #[test]
    fn invalid_event_type_has_its_own_code() {
        let err = FoldError::InvalidEventType {
            aggregate: AggregateKind::Issue,
            event_type: EventType::PullRequestMerged,
        };
        assert_eq!(err.code(), ErrorCode::InvalidEventType);
        assert!(err.to_string().contains("pull_request.merged"));
        assert!(err.to_string().contains("issue"));
    }

    #[test]
    fn collaborator_errors_propagate_unchanged() {
        let err = EngineError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.code(), ErrorCode::CollaboratorFailure);
    }
}
