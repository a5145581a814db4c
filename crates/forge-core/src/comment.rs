//! Comment sub-lifecycle nested inside an aggregate's state.
//!
//! Comments have no event stream of their own: they are created, edited,
//! hidden and deleted by appending `comment.*` events to the parent
//! aggregate's log.
//!
//! ```text
//!            created
//!               |
//!               v
//!   updated -> Active --hidden--> Hidden   (terminal)
//!               |
//!               +----deleted----> Deleted  (terminal)
//! ```
//!
//! Guards look at the last of `{Created, Hidden, Deleted}` in the parent log
//! for the comment id. Only `Created` permits another update, hide or delete.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{FoldError, PayloadError};
use crate::event::{Event, EventPayload, EventStream, EventType, decode};
use crate::id::{CommentId, EventId};

/// Visibility of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentLifecycle {
    Active,
    Hidden,
    Deleted,
}

impl CommentLifecycle {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Hidden => "hidden",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for CommentLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A comment as projected into its parent's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub text: String,
    pub lifecycle: CommentLifecycle,
}

/// Payload for `comment.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentCreated {
    pub text: String,
}

/// Payload for `comment.updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentUpdated {
    pub comment: CommentId,
    pub text: String,
}

/// Payload for `comment.hidden` and `comment.deleted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub comment: CommentId,
}

/// A comment event, identical in shape for every aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentEvent {
    Created(CommentCreated),
    Updated(CommentUpdated),
    Hidden(CommentRef),
    Deleted(CommentRef),
}

/// The lifecycle-relevant events for one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Created,
    Hidden,
    Deleted,
}

impl CommentEvent {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Created(_) => EventType::CommentCreated,
            Self::Updated(_) => EventType::CommentUpdated,
            Self::Hidden(_) => EventType::CommentHidden,
            Self::Deleted(_) => EventType::CommentDeleted,
        }
    }

    pub(crate) fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(d) => serde_json::to_value(d),
            Self::Updated(d) => serde_json::to_value(d),
            Self::Hidden(d) | Self::Deleted(d) => serde_json::to_value(d),
        }
    }

    /// Decode a comment payload. Returns `None` for types outside the
    /// comment family.
    pub(crate) fn from_payload(
        event_type: EventType,
        payload: Value,
    ) -> Option<Result<Self, PayloadError>> {
        let decoded = match event_type {
            EventType::CommentCreated => decode(event_type, payload).map(Self::Created),
            EventType::CommentUpdated => decode(event_type, payload).map(Self::Updated),
            EventType::CommentHidden => decode(event_type, payload).map(Self::Hidden),
            EventType::CommentDeleted => decode(event_type, payload).map(Self::Deleted),
            _ => return None,
        };
        Some(decoded)
    }

    /// Fold this event into `comments`. `event_id` is the id of the event
    /// carrying it; a created comment takes its id from there.
    ///
    /// # Errors
    ///
    /// [`FoldError::CommentCannotBeUpdated`], [`FoldError::CommentCannotBeHidden`]
    /// or [`FoldError::CommentCannotBeDeleted`] when the comment does not
    /// exist or is already hidden or deleted.
    pub fn apply<E: EventPayload>(
        &self,
        event_id: &EventId,
        history: &EventStream<E>,
        comments: &mut Vec<Comment>,
    ) -> Result<(), FoldError> {
        let aggregate = E::AGGREGATE;
        match self {
            Self::Created(data) => {
                comments.push(Comment {
                    id: CommentId::from(event_id),
                    text: data.text.clone(),
                    lifecycle: CommentLifecycle::Active,
                });
                Ok(())
            }
            Self::Updated(data) => {
                let comment = active_comment(history, comments, &data.comment).ok_or_else(|| {
                    FoldError::CommentCannotBeUpdated {
                        aggregate,
                        comment: data.comment.clone(),
                    }
                })?;
                comment.text.clone_from(&data.text);
                Ok(())
            }
            Self::Hidden(data) => {
                let comment = active_comment(history, comments, &data.comment).ok_or_else(|| {
                    FoldError::CommentCannotBeHidden {
                        aggregate,
                        comment: data.comment.clone(),
                    }
                })?;
                comment.lifecycle = CommentLifecycle::Hidden;
                Ok(())
            }
            Self::Deleted(data) => {
                let comment = active_comment(history, comments, &data.comment).ok_or_else(|| {
                    FoldError::CommentCannotBeDeleted {
                        aggregate,
                        comment: data.comment.clone(),
                    }
                })?;
                comment.lifecycle = CommentLifecycle::Deleted;
                Ok(())
            }
        }
    }
}

fn marker_for<E: EventPayload>(event: &Event<E>, comment: &CommentId) -> Option<Marker> {
    match event.payload.comment()? {
        CommentEvent::Created(_) if CommentId::from(&event.id) == *comment => Some(Marker::Created),
        CommentEvent::Hidden(r) if r.comment == *comment => Some(Marker::Hidden),
        CommentEvent::Deleted(r) if r.comment == *comment => Some(Marker::Deleted),
        _ => None,
    }
}

/// The comment, if the last lifecycle event for it in `history` is its
/// creation.
fn active_comment<'a, E: EventPayload>(
    history: &EventStream<E>,
    comments: &'a mut [Comment],
    comment: &CommentId,
) -> Option<&'a mut Comment> {
    let last = history
        .last_matching(|event| marker_for(event, comment).is_some())
        .and_then(|event| marker_for(event, comment));
    if last != Some(Marker::Created) {
        return None;
    }
    comments.iter_mut().find(|c| c.id == *comment)
}
