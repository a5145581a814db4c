//! Pull request aggregate.
//!
//! Review state machine:
//!
//! ```text
//!                 +--approved-------> Approved ----+
//!                 |                     |  ^       |
//!   created -> Opened           changes |  | approved
//!                 |             required v  |       |
//!                 +--changes_required-> ChangesRequired
//!
//!   Opened | Approved                    --merged--> Merged    (terminal)
//!   Opened | Approved | ChangesRequired  --canceled-> Canceled
//!   Canceled                             --reopened-> Opened
//! ```
//!
//! A `pull_request.merged` intent is never folded as authored. Planning
//! turns it into a [`MergePlan`]; once the hosting service has merged the
//! branches, [`derive_merge_events`] reifies the outcome as ordinary events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::capability::{Assignments, CapabilityEvent};
use crate::comment::{Comment, CommentEvent};
use crate::error::{FoldError, PayloadError};
use crate::event::{
    Event, EventFamily, EventPayload, EventStream, EventType, decode, marker, wrong_aggregate,
};
use crate::id::AggregateKind;
use crate::lookup::{MergeOutcome, Repository};
use crate::projection::{MergePlan, Projection, Step};
use crate::validate::Check;

/// Payload for `pull_request.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestCreated {
    pub repository: Repository,
    pub base: String,
    pub compare: String,
    pub title: String,
}

/// Payload for `pull_request.updated`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Every event a pull request log may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestEvent {
    Created(PullRequestCreated),
    Updated(PullRequestUpdated),
    Approved,
    ChangesRequired,
    Canceled,
    Reopened,
    Merged,
    Capability(CapabilityEvent),
    Comment(CommentEvent),
}

impl EventPayload for PullRequestEvent {
    const AGGREGATE: AggregateKind = AggregateKind::PullRequest;

    fn event_type(&self) -> EventType {
        match self {
            Self::Created(_) => EventType::PullRequestCreated,
            Self::Updated(_) => EventType::PullRequestUpdated,
            Self::Approved => EventType::PullRequestApproved,
            Self::ChangesRequired => EventType::PullRequestChangesRequired,
            Self::Canceled => EventType::PullRequestCanceled,
            Self::Reopened => EventType::PullRequestReopened,
            Self::Merged => EventType::PullRequestMerged,
            Self::Capability(event) => event.event_type(),
            Self::Comment(event) => event.event_type(),
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(data) => serde_json::to_value(data),
            Self::Updated(data) => serde_json::to_value(data),
            Self::Approved
            | Self::ChangesRequired
            | Self::Canceled
            | Self::Reopened
            | Self::Merged => Ok(marker()),
            Self::Capability(event) => event.to_payload(),
            Self::Comment(event) => event.to_payload(),
        }
    }

    fn from_payload(event_type: EventType, payload: Value) -> Result<Self, PayloadError> {
        match event_type {
            EventType::PullRequestCreated => decode(event_type, payload).map(Self::Created),
            EventType::PullRequestUpdated => decode(event_type, payload).map(Self::Updated),
            EventType::PullRequestApproved => Ok(Self::Approved),
            EventType::PullRequestChangesRequired => Ok(Self::ChangesRequired),
            EventType::PullRequestCanceled => Ok(Self::Canceled),
            EventType::PullRequestReopened => Ok(Self::Reopened),
            EventType::PullRequestMerged => Ok(Self::Merged),
            other => match other.family() {
                EventFamily::Capability => {
                    CapabilityEvent::from_payload(other, payload).map(|r| r.map(Self::Capability))
                }
                EventFamily::Comment => {
                    CommentEvent::from_payload(other, payload).map(|r| r.map(Self::Comment))
                }
                EventFamily::Issue | EventFamily::PullRequest => None,
            }
            .unwrap_or_else(|| Err(wrong_aggregate::<Self>(other))),
        }
    }

    fn capability(&self) -> Option<&CapabilityEvent> {
        match self {
            Self::Capability(event) => Some(event),
            _ => None,
        }
    }

    fn comment(&self) -> Option<&CommentEvent> {
        match self {
            Self::Comment(event) => Some(event),
            _ => None,
        }
    }
}

/// Review state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Opened,
    Approved,
    ChangesRequired,
    Merged,
    Canceled,
}

impl ReviewState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Approved => "approved",
            Self::ChangesRequired => "changes_required",
            Self::Merged => "merged",
            Self::Canceled => "canceled",
        }
    }

    /// Merged and canceled pull requests accept no edits. A canceled one
    /// can still be reopened.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Canceled)
    }

    /// The state reached by a review event, if legal from `self`.
    #[must_use]
    pub const fn transition(self, event: ReviewEvent) -> Option<Self> {
        match (event, self) {
            (ReviewEvent::Approve, Self::Opened | Self::ChangesRequired) => Some(Self::Approved),
            (ReviewEvent::RequireChanges, Self::Opened | Self::Approved) => {
                Some(Self::ChangesRequired)
            }
            (ReviewEvent::Cancel, Self::Opened | Self::Approved | Self::ChangesRequired) => {
                Some(Self::Canceled)
            }
            (ReviewEvent::Reopen, Self::Canceled) => Some(Self::Opened),
            (ReviewEvent::Merge, Self::Opened | Self::Approved) => Some(Self::Merged),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The review-moving subset of pull request events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    Approve,
    RequireChanges,
    Cancel,
    Reopen,
    Merge,
}

impl ReviewEvent {
    const fn target(self) -> ReviewState {
        match self {
            Self::Approve => ReviewState::Approved,
            Self::RequireChanges => ReviewState::ChangesRequired,
            Self::Cancel => ReviewState::Canceled,
            Self::Reopen => ReviewState::Opened,
            Self::Merge => ReviewState::Merged,
        }
    }
}

fn review_transition(from: ReviewState, event: ReviewEvent) -> Result<ReviewState, FoldError> {
    from.transition(event)
        .ok_or_else(|| FoldError::InvalidReviewTransition {
            from: from.as_str().to_string(),
            to: event.target().as_str().to_string(),
        })
}

fn advance(current: &mut PullRequestState, event: ReviewEvent) -> Result<(), FoldError> {
    current.review = review_transition(current.review, event)?;
    Ok(())
}

/// Current state of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestState {
    pub repository: Repository,
    pub base: String,
    pub compare: String,
    pub title: String,
    pub review: ReviewState,
    #[serde(flatten)]
    pub assignments: Assignments,
    pub comments: Vec<Comment>,
}

/// Pull request projection marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullRequest;

impl Projection for PullRequest {
    type Event = PullRequestEvent;
    type State = PullRequestState;

    const KIND: AggregateKind = AggregateKind::PullRequest;

    fn apply(
        state: &mut Option<PullRequestState>,
        event: &Event<PullRequestEvent>,
        history: &EventStream<PullRequestEvent>,
    ) -> Result<(), FoldError> {
        const AGGREGATE: AggregateKind = AggregateKind::PullRequest;

        if let PullRequestEvent::Created(data) = &event.payload {
            if state.is_some() {
                return Err(FoldError::AlreadyCreated {
                    aggregate: AGGREGATE,
                });
            }
            *state = Some(PullRequestState {
                repository: data.repository.clone(),
                base: data.base.clone(),
                compare: data.compare.clone(),
                title: data.title.clone(),
                review: ReviewState::Opened,
                assignments: Assignments::default(),
                comments: Vec::new(),
            });
            return Ok(());
        }

        let current = state.as_mut().ok_or(FoldError::NotCreated {
            aggregate: AGGREGATE,
        })?;

        match &event.payload {
            PullRequestEvent::Created(_) => Err(FoldError::AlreadyCreated {
                aggregate: AGGREGATE,
            }),
            PullRequestEvent::Updated(data) => {
                if current.review.is_terminal() {
                    return Err(FoldError::Finalized {
                        review: current.review.as_str().to_string(),
                    });
                }
                if let Some(base) = &data.base {
                    current.base.clone_from(base);
                }
                if let Some(compare) = &data.compare {
                    current.compare.clone_from(compare);
                }
                if let Some(title) = &data.title {
                    current.title.clone_from(title);
                }
                Ok(())
            }
            PullRequestEvent::Approved => advance(current, ReviewEvent::Approve),
            PullRequestEvent::ChangesRequired => advance(current, ReviewEvent::RequireChanges),
            PullRequestEvent::Canceled => advance(current, ReviewEvent::Cancel),
            PullRequestEvent::Reopened => advance(current, ReviewEvent::Reopen),
            PullRequestEvent::Merged => advance(current, ReviewEvent::Merge),
            PullRequestEvent::Capability(capability) => {
                capability.apply(history, &mut current.assignments)
            }
            PullRequestEvent::Comment(comment) => {
                comment.apply(&event.id, history, &mut current.comments)
            }
        }
    }

    fn plan(
        state: Option<&PullRequestState>,
        payload: PullRequestEvent,
    ) -> Result<Step<PullRequestEvent>, FoldError> {
        if payload != PullRequestEvent::Merged {
            return Ok(Step::Fold(payload));
        }
        let current = state.ok_or(FoldError::NotCreated {
            aggregate: AggregateKind::PullRequest,
        })?;
        review_transition(current.review, ReviewEvent::Merge)?;
        Ok(Step::Merge(MergePlan::new(
            current.repository.clone(),
            current.base.clone(),
            current.compare.clone(),
            current.title.clone(),
            derive_merge_events,
        )))
    }

    fn checks(state: Option<&PullRequestState>, payload: &PullRequestEvent) -> Vec<Check> {
        match payload {
            PullRequestEvent::Created(data) => vec![
                Check::RepositoryExists(data.repository.id.clone()),
                Check::has_commits(&data.repository, &data.base, &data.compare),
            ],
            PullRequestEvent::Updated(data) => {
                let Some(current) = state else {
                    return Vec::new();
                };
                let base = data.base.as_deref().unwrap_or(&current.base);
                let compare = data.compare.as_deref().unwrap_or(&current.compare);
                vec![Check::has_commits(&current.repository, base, compare)]
            }
            PullRequestEvent::Capability(capability) => capability.check().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn created_in(payload: &PullRequestEvent) -> Option<&Repository> {
        match payload {
            PullRequestEvent::Created(data) => Some(&data.repository),
            _ => None,
        }
    }
}

/// Events recording a successful merge: an update carrying the post-merge
/// branches and title when any of them moved, then the merge itself.
#[must_use]
pub fn derive_merge_events(
    plan: &MergePlan<PullRequestEvent>,
    outcome: &MergeOutcome,
) -> Vec<PullRequestEvent> {
    let unchanged =
        plan.base == outcome.base && plan.compare == outcome.compare && plan.title == outcome.title;
    if unchanged {
        return vec![PullRequestEvent::Merged];
    }
    vec![
        PullRequestEvent::Updated(PullRequestUpdated {
            base: Some(outcome.base.clone()),
            compare: Some(outcome.compare.clone()),
            title: Some(outcome.title.clone()),
        }),
        PullRequestEvent::Merged,
    ]
}
