//! Event type catalog.
//!
//! Every event carries one of these closed tags. The string representation
//! uses the `family.verb` dotted format stored in the `type` field of a
//! persisted event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Groups of event types that share a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Issue,
    PullRequest,
    /// Label, milestone and user assignment.
    Capability,
    Comment,
}

impl EventFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
            Self::Capability => "capability",
            Self::Comment => "comment",
        }
    }
}

/// The event types known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    IssueCreated,
    IssueUpdated,
    IssueClosed,
    IssueReopened,
    PullRequestCreated,
    PullRequestUpdated,
    PullRequestApproved,
    PullRequestChangesRequired,
    PullRequestCanceled,
    PullRequestReopened,
    PullRequestMerged,
    LabelAssigned,
    LabelUnassigned,
    MilestoneAssigned,
    MilestoneUnassigned,
    UserAssigned,
    UserUnassigned,
    CommentCreated,
    CommentUpdated,
    CommentHidden,
    CommentDeleted,
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}': expected one of ", self.raw)?;
        for (i, et) in EventType::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(et.as_str())?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownEventType {}

impl EventType {
    /// All known event types in catalog order.
    pub const ALL: [Self; 21] = [
        Self::IssueCreated,
        Self::IssueUpdated,
        Self::IssueClosed,
        Self::IssueReopened,
        Self::PullRequestCreated,
        Self::PullRequestUpdated,
        Self::PullRequestApproved,
        Self::PullRequestChangesRequired,
        Self::PullRequestCanceled,
        Self::PullRequestReopened,
        Self::PullRequestMerged,
        Self::LabelAssigned,
        Self::LabelUnassigned,
        Self::MilestoneAssigned,
        Self::MilestoneUnassigned,
        Self::UserAssigned,
        Self::UserUnassigned,
        Self::CommentCreated,
        Self::CommentUpdated,
        Self::CommentHidden,
        Self::CommentDeleted,
    ];

    /// Return the canonical `family.verb` string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IssueCreated => "issue.created",
            Self::IssueUpdated => "issue.updated",
            Self::IssueClosed => "issue.closed",
            Self::IssueReopened => "issue.reopened",
            Self::PullRequestCreated => "pull_request.created",
            Self::PullRequestUpdated => "pull_request.updated",
            Self::PullRequestApproved => "pull_request.approved",
            Self::PullRequestChangesRequired => "pull_request.changes_required",
            Self::PullRequestCanceled => "pull_request.canceled",
            Self::PullRequestReopened => "pull_request.reopened",
            Self::PullRequestMerged => "pull_request.merged",
            Self::LabelAssigned => "label.assigned",
            Self::LabelUnassigned => "label.unassigned",
            Self::MilestoneAssigned => "milestone.assigned",
            Self::MilestoneUnassigned => "milestone.unassigned",
            Self::UserAssigned => "user.assigned",
            Self::UserUnassigned => "user.unassigned",
            Self::CommentCreated => "comment.created",
            Self::CommentUpdated => "comment.updated",
            Self::CommentHidden => "comment.hidden",
            Self::CommentDeleted => "comment.deleted",
        }
    }

    /// Which handler family this type is routed to.
    #[must_use]
    pub const fn family(self) -> EventFamily {
        match self {
            Self::IssueCreated | Self::IssueUpdated | Self::IssueClosed | Self::IssueReopened => {
                EventFamily::Issue
            }
            Self::PullRequestCreated
            | Self::PullRequestUpdated
            | Self::PullRequestApproved
            | Self::PullRequestChangesRequired
            | Self::PullRequestCanceled
            | Self::PullRequestReopened
            | Self::PullRequestMerged => EventFamily::PullRequest,
            Self::LabelAssigned
            | Self::LabelUnassigned
            | Self::MilestoneAssigned
            | Self::MilestoneUnassigned
            | Self::UserAssigned
            | Self::UserUnassigned => EventFamily::Capability,
            Self::CommentCreated
            | Self::CommentUpdated
            | Self::CommentHidden
            | Self::CommentDeleted => EventFamily::Comment,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|et| et.as_str() == s)
            .ok_or_else(|| UnknownEventType { raw: s.to_string() })
    }
}

// Custom serde: serialize as the `family.verb` string.
impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}
