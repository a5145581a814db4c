//! Issue aggregate.
//!
//! ```text
//!   created -> Open --closed--> Closed --reopened--> Reopened
//!                                  ^                     |
//!                                  +-------closed--------+
//! ```
//!
//! Close and reopen alternate strictly: the guard looks at the last of
//! `{Closed, Reopened}` in the log. Labels, assignees, milestones and
//! comments are handled by [`crate::capability`] and [`crate::comment`].

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
use crate::lookup::Repository;
use crate::projection::Projection;
use crate::validate::Check;

/// Payload for `issue.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCreated {
    pub repository: Repository,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Payload for `issue.updated`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Every event an issue log may contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueEvent {
    Created(IssueCreated),
    Updated(IssueUpdated),
    Closed,
    Reopened,
    Capability(CapabilityEvent),
    Comment(CommentEvent),
}

impl EventPayload for IssueEvent {
    const AGGREGATE: AggregateKind = AggregateKind::Issue;

    fn event_type(&self) -> EventType {
        match self {
            Self::Created(_) => EventType::IssueCreated,
            Self::Updated(_) => EventType::IssueUpdated,
            Self::Closed => EventType::IssueClosed,
            Self::Reopened => EventType::IssueReopened,
            Self::Capability(event) => event.event_type(),
            Self::Comment(event) => event.event_type(),
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(data) => serde_json::to_value(data),
            Self::Updated(data) => serde_json::to_value(data),
            Self::Closed | Self::Reopened => Ok(marker()),
            Self::Capability(event) => event.to_payload(),
            Self::Comment(event) => event.to_payload(),
        }
    }

    fn from_payload(event_type: EventType, payload: Value) -> Result<Self, PayloadError> {
        match event_type {
            EventType::IssueCreated => decode(event_type, payload).map(Self::Created),
            EventType::IssueUpdated => decode(event_type, payload).map(Self::Updated),
            EventType::IssueClosed => Ok(Self::Closed),
            EventType::IssueReopened => Ok(Self::Reopened),
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

/// Open/closed status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLifecycle {
    Open,
    Closed,
    Reopened,
}

impl IssueLifecycle {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Reopened)
    }
}

impl fmt::Display for IssueLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
        })
    }
}

/// Current state of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueState {
    pub repository: Repository,
    pub lifecycle: IssueLifecycle,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub assignments: Assignments,
    pub comments: Vec<Comment>,
}

/// Issue projection marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Issue;

impl Projection for Issue {
    type Event = IssueEvent;
    type State = IssueState;

    const KIND: AggregateKind = AggregateKind::Issue;

    fn apply(
        state: &mut Option<IssueState>,
        event: &Event<IssueEvent>,
        history: &EventStream<IssueEvent>,
    ) -> Result<(), FoldError> {
        const AGGREGATE: AggregateKind = AggregateKind::Issue;

        if let IssueEvent::Created(data) = &event.payload {
            if state.is_some() {
                return Err(FoldError::AlreadyCreated {
                    aggregate: AGGREGATE,
                });
            }
            *state = Some(IssueState {
                repository: data.repository.clone(),
                lifecycle: IssueLifecycle::Open,
                title: data.title.clone(),
                description: data.description.clone(),
                assignments: Assignments::default(),
                comments: Vec::new(),
            });
            return Ok(());
        }

        let current = state.as_mut().ok_or(FoldError::NotCreated {
            aggregate: AGGREGATE,
        })?;

        match &event.payload {
            IssueEvent::Created(_) => Err(FoldError::AlreadyCreated {
                aggregate: AGGREGATE,
            }),
            IssueEvent::Updated(data) => {
                if let Some(title) = &data.title {
                    current.title.clone_from(title);
                }
                if let Some(description) = &data.description {
                    current.description.clone_from(description);
                }
                Ok(())
            }
            IssueEvent::Closed => {
                if last_close_or_reopen(history) == Some(Toggle::Closed) {
                    return Err(FoldError::AlreadyClosed {
                        aggregate: AGGREGATE,
                    });
                }
                current.lifecycle = IssueLifecycle::Closed;
                Ok(())
            }
            IssueEvent::Reopened => match last_close_or_reopen(history) {
                None => Err(FoldError::NeverClosed {
                    aggregate: AGGREGATE,
                }),
                Some(Toggle::Reopened) => Err(FoldError::AlreadyReopened {
                    aggregate: AGGREGATE,
                }),
                Some(Toggle::Closed) => {
                    current.lifecycle = IssueLifecycle::Reopened;
                    Ok(())
                }
            },
            IssueEvent::Capability(capability) => {
                capability.apply(history, &mut current.assignments)
            }
            IssueEvent::Comment(comment) => comment.apply(&event.id, history, &mut current.comments),
        }
    }

    fn checks(_state: Option<&IssueState>, payload: &IssueEvent) -> Vec<Check> {
        match payload {
            IssueEvent::Created(data) => vec![Check::RepositoryExists(data.repository.id.clone())],
            IssueEvent::Capability(capability) => capability.check().into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn created_in(payload: &IssueEvent) -> Option<&Repository> {
        match payload {
            IssueEvent::Created(data) => Some(&data.repository),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    Closed,
    Reopened,
}

fn last_close_or_reopen(history: &EventStream<IssueEvent>) -> Option<Toggle> {
    history
        .last_matching(|event| matches!(event.payload, IssueEvent::Closed | IssueEvent::Reopened))
        .map(|event| match event.payload {
            IssueEvent::Reopened => Toggle::Reopened,
            _ => Toggle::Closed,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::LabelId;
    use crate::projection::{Aggregate, fold};
    use crate::testing::{repository, ts, user};
    use crate::id::AggregateId;

    fn created(title: &str) -> IssueEvent {
        IssueEvent::Created(IssueCreated {
            repository: repository(),
            title: title.into(),
            description: "steps to reproduce".into(),
        })
    }

    fn run(payloads: Vec<IssueEvent>) -> (Aggregate<Issue>, Vec<Result<(), FoldError>>) {
        let mut agg = Aggregate::new(AggregateId::new_unchecked("issue-1"), 1);
        let mut results = Vec::new();
        for (i, payload) in payloads.into_iter().enumerate() {
            let at = i64::try_from(i).unwrap_or(0);
            let event = agg.stamp(user("alice"), ts(at), payload).expect("stamp");
            results.push(agg.apply(event));
        }
        (agg, results)
    }

    #[test]
    fn events_before_creation_are_rejected() {
        let (agg, results) = run(vec![IssueEvent::Closed]);
        assert!(matches!(results[0], Err(FoldError::NotCreated { aggregate: AggregateKind::Issue })));
        assert!(agg.state().is_none());
        assert!(agg.events().is_empty());
    }

    #[test]
    fn second_creation_is_rejected() {
        let (_, results) = run(vec![created("a"), created("b")]);
        assert!(matches!(results[1], Err(FoldError::AlreadyCreated { .. })));
    }

    #[test]
    fn update_touches_only_present_fields() {
        let (agg, results) = run(vec![
            created("Login broken"),
            IssueEvent::Updated(IssueUpdated {
                title: Some("Login times out".into()),
                description: None,
            }),
        ]);
        assert!(results.iter().all(Result::is_ok));
        let state = agg.state().expect("state");
        assert_eq!(state.title, "Login times out");
        assert_eq!(state.description, "steps to reproduce");
    }

    #[test]
    fn close_and_reopen_alternate() {
        let (agg, results) = run(vec![
            created("T"),
            IssueEvent::Closed,
            IssueEvent::Closed,
            IssueEvent::Reopened,
            IssueEvent::Reopened,
            IssueEvent::Closed,
        ]);
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(FoldError::AlreadyClosed { .. })));
        assert!(results[3].is_ok());
        assert!(matches!(results[4], Err(FoldError::AlreadyReopened { .. })));
        assert!(results[5].is_ok());
        assert_eq!(agg.state().map(|s| s.lifecycle), Some(IssueLifecycle::Closed));
    }

    #[test]
    fn reopen_without_close_is_rejected() {
        let (agg, results) = run(vec![created("T"), IssueEvent::Reopened]);
        assert!(matches!(results[1], Err(FoldError::NeverClosed { .. })));
        assert_eq!(agg.state().map(|s| s.lifecycle), Some(IssueLifecycle::Open));
    }

    #[test]
    fn pull_request_types_do_not_decode_as_issue_events() {
        let err = IssueEvent::from_payload(EventType::PullRequestApproved, serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            PayloadError::WrongAggregate(FoldError::InvalidEventType {
                aggregate: AggregateKind::Issue,
                event_type: EventType::PullRequestApproved,
            })
        ));
    }

    #[test]
    fn markers_ignore_their_payload() {
        let decoded =
            IssueEvent::from_payload(EventType::IssueClosed, serde_json::json!({"reason": "dup"}))
                .expect("decode");
        assert_eq!(decoded, IssueEvent::Closed);
        assert_eq!(decoded.to_payload().expect("encode"), serde_json::json!({}));
    }

    #[test]
    fn state_serializes_sets_in_order() {
        let (agg, _) = run(vec![
            created("T"),
            IssueEvent::Capability(CapabilityEvent::LabelAssigned(LabelId::new_unchecked("zeta"))),
            IssueEvent::Capability(CapabilityEvent::LabelAssigned(LabelId::new_unchecked("alpha"))),
        ]);
        let json = serde_json::to_value(agg.state().expect("state")).expect("serialize");
        assert_eq!(json["labels"], serde_json::json!(["alpha", "zeta"]));
        assert_eq!(json["lifecycle"], "open");

        let refolded = fold::<Issue>(agg.events().as_slice()).expect("fold");
        assert_eq!(refolded.as_ref(), agg.state());
    }

    #[test]
    fn duplicate_label_leaves_the_first_two_events() {
        let l1 = || IssueEvent::Capability(CapabilityEvent::LabelAssigned(LabelId::new_unchecked("l1")));
        let (agg, results) = run(vec![created("T"), l1(), l1()]);

        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(matches!(
            &results[2],
            Err(FoldError::AlreadyAssigned { aggregate: AggregateKind::Issue, target, .. }) if target == "l1"
        ));
        assert_eq!(agg.version(), 2);
        let types: Vec<_> = agg.events().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec![EventType::IssueCreated, EventType::LabelAssigned]);
        let state = agg.state().expect("created");
        assert_eq!(
            state.assignments.labels.iter().collect::<Vec<_>>(),
            vec![&LabelId::new_unchecked("l1")]
        );
    }
}
