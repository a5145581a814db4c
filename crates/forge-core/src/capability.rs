//! Label / milestone / user assignment, shared by every aggregate.
//!
//! The three capabilities are structurally identical, so the legality rule
//! lives in two free functions, [`assign`] and [`unassign`], generic over the
//! set being mutated. [`CapabilityEvent::apply`] only routes an event to the
//! right set of an [`Assignments`] block.
//!
//! The rule for a target id `x`, given the last event among
//! `{Assign(x), Unassign(x)}` already in the log:
//!
//! | last event   | Assign(x)        | Unassign(x)      |
//! |--------------|------------------|------------------|
//! | none         | ok               | cannot-unassign  |
//! | Assign(x)    | already-assigned | ok               |
//! | Unassign(x)  | ok               | cannot-unassign  |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Capability, FoldError, PayloadError};
use crate::event::{EventPayload, EventStream, EventType, decode};
use crate::id::{AggregateKind, LabelId, MilestoneId, UserId};
use crate::validate::Check;

/// Direction of an assignment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assignment {
    Assigned,
    Unassigned,
}

/// The label, assignee and milestone sets of an aggregate's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignments {
    pub labels: BTreeSet<LabelId>,
    pub assignees: BTreeSet<UserId>,
    pub milestones: BTreeSet<MilestoneId>,
}

/// An assignment event, identical in shape for every aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityEvent {
    LabelAssigned(LabelId),
    LabelUnassigned(LabelId),
    MilestoneAssigned(MilestoneId),
    MilestoneUnassigned(MilestoneId),
    UserAssigned(UserId),
    UserUnassigned(UserId),
}

/// Wire body of every assignment event: `{"id": ...}`.
#[derive(Serialize, Deserialize)]
struct Target<I> {
    id: I,
}

impl CapabilityEvent {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::LabelAssigned(_) => EventType::LabelAssigned,
            Self::LabelUnassigned(_) => EventType::LabelUnassigned,
            Self::MilestoneAssigned(_) => EventType::MilestoneAssigned,
            Self::MilestoneUnassigned(_) => EventType::MilestoneUnassigned,
            Self::UserAssigned(_) => EventType::UserAssigned,
            Self::UserUnassigned(_) => EventType::UserUnassigned,
        }
    }

    #[must_use]
    pub const fn capability(&self) -> Capability {
        match self {
            Self::LabelAssigned(_) | Self::LabelUnassigned(_) => Capability::Label,
            Self::MilestoneAssigned(_) | Self::MilestoneUnassigned(_) => Capability::Milestone,
            Self::UserAssigned(_) | Self::UserUnassigned(_) => Capability::User,
        }
    }

    #[must_use]
    pub const fn assignment(&self) -> Assignment {
        match self {
            Self::LabelAssigned(_) | Self::MilestoneAssigned(_) | Self::UserAssigned(_) => {
                Assignment::Assigned
            }
            Self::LabelUnassigned(_) | Self::MilestoneUnassigned(_) | Self::UserUnassigned(_) => {
                Assignment::Unassigned
            }
        }
    }

    /// Canonical id of the label, milestone or user this event targets.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::LabelAssigned(id) | Self::LabelUnassigned(id) => id.as_str(),
            Self::MilestoneAssigned(id) | Self::MilestoneUnassigned(id) => id.as_str(),
            Self::UserAssigned(id) | Self::UserUnassigned(id) => id.as_str(),
        }
    }

    /// Whether both events concern the same capability and target id.
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.capability() == other.capability() && self.target() == other.target()
    }

    /// Existence check for the assigned entity. Unassigning needs none.
    #[must_use]
    pub fn check(&self) -> Option<Check> {
        match self {
            Self::LabelAssigned(id) => Some(Check::LabelExists(id.clone())),
            Self::MilestoneAssigned(id) => Some(Check::MilestoneExists(id.clone())),
            Self::UserAssigned(id) => Some(Check::UserExists(id.clone())),
            Self::LabelUnassigned(_) | Self::MilestoneUnassigned(_) | Self::UserUnassigned(_) => {
                None
            }
        }
    }

    pub(crate) fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::LabelAssigned(id) | Self::LabelUnassigned(id) => {
                serde_json::to_value(Target { id })
            }
            Self::MilestoneAssigned(id) | Self::MilestoneUnassigned(id) => {
                serde_json::to_value(Target { id })
            }
            Self::UserAssigned(id) | Self::UserUnassigned(id) => {
                serde_json::to_value(Target { id })
            }
        }
    }

    /// Decode an assignment payload. Returns `None` for types outside the
    /// capability family.
    pub(crate) fn from_payload(
        event_type: EventType,
        payload: Value,
    ) -> Option<Result<Self, PayloadError>> {
        let decoded = match event_type {
            EventType::LabelAssigned => {
                decode::<Target<LabelId>>(event_type, payload).map(|t| Self::LabelAssigned(t.id))
            }
            EventType::LabelUnassigned => {
                decode::<Target<LabelId>>(event_type, payload).map(|t| Self::LabelUnassigned(t.id))
            }
            EventType::MilestoneAssigned => decode::<Target<MilestoneId>>(event_type, payload)
                .map(|t| Self::MilestoneAssigned(t.id)),
            EventType::MilestoneUnassigned => decode::<Target<MilestoneId>>(event_type, payload)
                .map(|t| Self::MilestoneUnassigned(t.id)),
            EventType::UserAssigned => {
                decode::<Target<UserId>>(event_type, payload).map(|t| Self::UserAssigned(t.id))
            }
            EventType::UserUnassigned => {
                decode::<Target<UserId>>(event_type, payload).map(|t| Self::UserUnassigned(t.id))
            }
            _ => return None,
        };
        Some(decoded)
    }

    /// The direction of the last assignment event for the same target in
    /// `history`, if any.
    pub fn last_assignment<E: EventPayload>(&self, history: &EventStream<E>) -> Option<Assignment> {
        history
            .last_matching(|event| {
                event
                    .payload
                    .capability()
                    .is_some_and(|prior| prior.same_target(self))
            })
            .and_then(|event| event.payload.capability())
            .map(Self::assignment)
    }

    /// Fold this event into `assignments`, checking it against `history`
    /// (the log before this event).
    ///
    /// # Errors
    ///
    /// [`FoldError::AlreadyAssigned`] or [`FoldError::CannotUnassign`] when
    /// the event breaks the assign/unassign alternation for its target.
    pub fn apply<E: EventPayload>(
        &self,
        history: &EventStream<E>,
        assignments: &mut Assignments,
    ) -> Result<(), FoldError> {
        let aggregate = E::AGGREGATE;
        let capability = self.capability();
        let last = self.last_assignment(history);

        match self {
            Self::LabelAssigned(id) => assign(aggregate, capability, last, &mut assignments.labels, id),
            Self::LabelUnassigned(id) => {
                unassign(aggregate, capability, last, &mut assignments.labels, id)
            }
            Self::MilestoneAssigned(id) => {
                assign(aggregate, capability, last, &mut assignments.milestones, id)
            }
            Self::MilestoneUnassigned(id) => {
                unassign(aggregate, capability, last, &mut assignments.milestones, id)
            }
            Self::UserAssigned(id) => assign(aggregate, capability, last, &mut assignments.assignees, id),
            Self::UserUnassigned(id) => {
                unassign(aggregate, capability, last, &mut assignments.assignees, id)
            }
        }
    }
}

/// Add `target` to `set` unless the last assignment event for it was an
/// assign.
///
/// # Errors
///
/// [`FoldError::AlreadyAssigned`] naming the aggregate.
pub fn assign<T: Ord + Clone + fmt::Display>(
    aggregate: AggregateKind,
    capability: Capability,
    last: Option<Assignment>,
    set: &mut BTreeSet<T>,
    target: &T,
) -> Result<(), FoldError> {
    if last == Some(Assignment::Assigned) {
        return Err(FoldError::AlreadyAssigned {
            aggregate,
            capability,
            target: target.to_string(),
        });
    }
    set.insert(target.clone());
    Ok(())
}

/// Remove `target` from `set` if the last assignment event for it was an
/// assign.
///
/// # Errors
///
/// [`FoldError::CannotUnassign`] when there is no prior assign, or the last
/// event was already an unassign.
pub fn unassign<T: Ord + fmt::Display>(
    aggregate: AggregateKind,
    capability: Capability,
    last: Option<Assignment>,
    set: &mut BTreeSet<T>,
    target: &T,
) -> Result<(), FoldError> {
    if last != Some(Assignment::Assigned) {
        return Err(FoldError::CannotUnassign {
            aggregate,
            capability,
            target: target.to_string(),
        });
    }
    set.remove(target);
    Ok(())
}
