//! Event envelope and append-only event stream.
//!
//! An [`Event`] is the immutable unit of change:
//!
//! ```text
//! {id, streamId, type, by, timeStamp, payload}
//! ```
//!
//! Callers only author the `type` + `payload` part (an intent). The engine
//! fixes `id`, `streamId`, `by` and `timeStamp` when it accepts the event
//! (see [`Event::stamp`]). The `id` is content-addressed: a BLAKE3 hash over
//! the canonical JSON of the other fields plus the event's position in its
//! stream.
//!
//! The payload type is per aggregate ([`crate::issue::IssueEvent`],
//! [`crate::pull_request::PullRequestEvent`]). The discriminant is the
//! external `type` tag, so decoding goes through
//! [`EventPayload::from_payload`] with the already-parsed [`EventType`].

pub mod canonical;
pub mod types;

pub use canonical::canonicalize_json;
pub use types::{EventFamily, EventType, UnknownEventType};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::capability::CapabilityEvent;
use crate::comment::CommentEvent;
use crate::error::PayloadError;
use crate::id::{AggregateId, AggregateKind, EventId, UserId};

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// A closed set of payloads accepted by one aggregate kind.
pub trait EventPayload: Clone + fmt::Debug + PartialEq + Send + Sync + Sized + 'static {
    /// The aggregate kind whose streams carry these payloads.
    const AGGREGATE: AggregateKind;

    /// The external type tag for this payload.
    fn event_type(&self) -> EventType;

    /// Serialize the payload body (without the type tag).
    ///
    /// # Errors
    ///
    /// Returns an error if the inner struct fails to serialize.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;

    /// Decode a payload body for a known type tag.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::WrongAggregate`] if `event_type` does not
    /// belong to this aggregate, or [`PayloadError::Malformed`] if the body
    /// does not match the type's schema.
    fn from_payload(event_type: EventType, payload: Value) -> Result<Self, PayloadError>;

    /// The shared assignment event carried by this payload, if any.
    fn capability(&self) -> Option<&CapabilityEvent> {
        None
    }

    /// The nested comment event carried by this payload, if any.
    fn comment(&self) -> Option<&CommentEvent> {
        None
    }
}

/// Body of payload-less lifecycle markers (`issue.closed`, ...).
pub(crate) fn marker() -> Value {
    json!({})
}

/// Decode `payload` as `T`, tagging failures with the event type.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(
    event_type: EventType,
    payload: Value,
) -> Result<T, PayloadError> {
    serde_json::from_value(payload).map_err(|source| PayloadError::Malformed { event_type, source })
}

/// Reject a known event type that belongs to another aggregate.
pub(crate) fn wrong_aggregate<E: EventPayload>(event_type: EventType) -> PayloadError {
    PayloadError::WrongAggregate(crate::error::FoldError::InvalidEventType {
        aggregate: E::AGGREGATE,
        event_type,
    })
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A single accepted event in an aggregate's log.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<E> {
    /// Content hash (`blake3:<hex>`), fixed at acceptance.
    pub id: EventId,
    /// The aggregate this event belongs to.
    pub stream_id: AggregateId,
    /// The actor that submitted the intent.
    pub by: UserId,
    /// Acceptance time. Primary ordering key for invariant checks.
    pub time_stamp: DateTime<Utc>,
    /// Typed payload; its variant determines the `type` tag.
    pub payload: E,
}

impl<E: EventPayload> Event<E> {
    /// Accept an intent into a stream, fixing its identity, actor and time.
    ///
    /// `position` is the index the event will occupy in the stream; it is
    /// part of the hash input so identical intents accepted in the same
    /// instant still get distinct ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn stamp(
        stream_id: AggregateId,
        position: usize,
        by: UserId,
        time_stamp: DateTime<Utc>,
        payload: E,
    ) -> Result<Self, serde_json::Error> {
        let hash_input = json!({
            "by": by.as_str(),
            "payload": payload.to_payload()?,
            "position": position,
            "streamId": stream_id.as_str(),
            "timeStamp": time_stamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "type": payload.event_type().as_str(),
        });
        let digest = blake3::hash(canonicalize_json(&hash_input).as_bytes());
        let id = EventId::new_unchecked(format!("blake3:{}", digest.to_hex()));

        Ok(Self {
            id,
            stream_id,
            by,
            time_stamp,
            payload,
        })
    }

    /// The external type tag of this event's payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

impl<E: EventPayload> fmt::Display for Event<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.time_stamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.by,
            self.event_type(),
            self.stream_id,
            self.id
        )
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRaw {
    id: EventId,
    stream_id: AggregateId,
    #[serde(rename = "type")]
    event_type: String,
    by: UserId,
    time_stamp: DateTime<Utc>,
    #[serde(default)]
    payload: Value,
}

impl<E: EventPayload> Serialize for Event<E> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = EventRaw {
            id: self.id.clone(),
            stream_id: self.stream_id.clone(),
            event_type: self.event_type().as_str().to_string(),
            by: self.by.clone(),
            time_stamp: self.time_stamp,
            payload: self.payload.to_payload().map_err(serde::ser::Error::custom)?,
        };
        raw.serialize(serializer)
    }
}

impl<'de, E: EventPayload> Deserialize<'de> for Event<E> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = EventRaw::deserialize(deserializer)?;
        let event_type: EventType = raw.event_type.parse().map_err(serde::de::Error::custom)?;
        let payload = E::from_payload(event_type, raw.payload).map_err(serde::de::Error::custom)?;
        Ok(Self {
            id: raw.id,
            stream_id: raw.stream_id,
            by: raw.by,
            time_stamp: raw.time_stamp,
            payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// Caller-authored part of an event: the type tag and payload body only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Intent {
    /// Build the wire form of a typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn encode<E: EventPayload>(payload: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: payload.event_type().as_str().to_string(),
            payload: payload.to_payload()?,
        })
    }

    /// Decode into the payload type of aggregate `E`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::UnknownType`] for tags outside the catalog,
    /// [`PayloadError::WrongAggregate`] for tags of another aggregate, and
    /// [`PayloadError::Malformed`] for bodies that do not match the schema.
    pub fn decode<E: EventPayload>(self) -> Result<E, PayloadError> {
        let event_type: EventType = self.event_type.parse()?;
        E::from_payload(event_type, self.payload)
    }
}

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Strictly append-only, ordered list of an aggregate's events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
#[serde(bound(serialize = "E: EventPayload", deserialize = "E: EventPayload"))]
pub struct EventStream<E> {
    events: Vec<Event<E>>,
}

impl<E> Default for EventStream<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E: EventPayload> EventStream<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a persisted log. The events are not re-validated here; use
    /// [`crate::projection::fold`] for that.
    #[must_use]
    pub fn from_events(events: Vec<Event<E>>) -> Self {
        Self { events }
    }

    pub fn append(&mut self, event: Event<E>) {
        self.events.push(event);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event<E>> {
        self.events.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Event<E>] {
        &self.events
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Event<E>> {
        self.events
    }

    /// The last event matching `predicate`, ordered by `time_stamp` with
    /// stream position breaking ties (later position wins).
    pub fn last_matching<P>(&self, mut predicate: P) -> Option<&Event<E>>
    where
        P: FnMut(&Event<E>) -> bool,
    {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, event)| predicate(*event))
            .max_by(|(ia, a), (ib, b)| a.time_stamp.cmp(&b.time_stamp).then(ia.cmp(ib)))
            .map(|(_, event)| event)
    }
}

impl<'a, E> IntoIterator for &'a EventStream<E> {
    type Item = &'a Event<E>;
    type IntoIter = std::slice::Iter<'a, Event<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{IssueCreated, IssueEvent, IssueUpdated};
    use crate::testing::{repository, ts, user};

    fn stream_id() -> AggregateId {
        AggregateId::new_unchecked("issue-1")
    }

    fn created() -> IssueEvent {
        IssueEvent::Created(IssueCreated {
            repository: repository(),
            title: "Fix login timeout".into(),
            description: String::new(),
        })
    }

    fn retitle(title: &str) -> IssueEvent {
        IssueEvent::Updated(IssueUpdated {
            title: Some(title.into()),
            description: None,
        })
    }

    #[test]
    fn stamped_ids_are_deterministic() {
        let a = Event::stamp(stream_id(), 0, user("alice"), ts(1), created()).expect("stamp");
        let b = Event::stamp(stream_id(), 0, user("alice"), ts(1), created()).expect("stamp");
        assert_eq!(a.id, b.id);
        assert!(a.id.as_str().starts_with("blake3:"));
    }

    #[test]
    fn position_and_actor_change_the_id() {
        let base = Event::stamp(stream_id(), 0, user("alice"), ts(1), created()).expect("stamp");
        let moved = Event::stamp(stream_id(), 1, user("alice"), ts(1), created()).expect("stamp");
        let other = Event::stamp(stream_id(), 0, user("bob"), ts(1), created()).expect("stamp");
        assert_ne!(base.id, moved.id);
        assert_ne!(base.id, other.id);
    }

    #[test]
    fn envelope_uses_camel_case_and_type_tag() {
        let event = Event::stamp(stream_id(), 0, user("alice"), ts(1), retitle("T")).expect("stamp");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "issue.updated");
        assert_eq!(json["streamId"], "issue-1");
        assert_eq!(json["by"], "alice");
        assert!(json.get("timeStamp").is_some());
        assert_eq!(json["payload"]["title"], "T");

        let back: Event<IssueEvent> = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn deserialize_rejects_foreign_and_unknown_types() {
        let event = Event::stamp(stream_id(), 0, user("alice"), ts(1), created()).expect("stamp");
        let mut json = serde_json::to_value(&event).expect("serialize");

        json["type"] = "pull_request.merged".into();
        let err = serde_json::from_value::<Event<IssueEvent>>(json.clone()).unwrap_err();
        assert!(err.to_string().contains("not a valid event type for issue"));

        json["type"] = "issue.archived".into();
        let err = serde_json::from_value::<Event<IssueEvent>>(json).unwrap_err();
        assert!(err.to_string().contains("unknown event type"));
    }

    #[test]
    fn intent_decodes_into_the_aggregate_payload() {
        let intent: Intent =
            serde_json::from_str(r#"{"type": "issue.updated", "payload": {"title": "New"}}"#)
                .expect("intent");
        assert_eq!(intent.decode::<IssueEvent>().expect("decode"), retitle("New"));

        let bad: Intent = serde_json::from_str(r#"{"type": "issue.updated", "payload": {"title": 7}}"#)
            .expect("intent");
        assert!(matches!(
            bad.decode::<IssueEvent>(),
            Err(PayloadError::Malformed { event_type: EventType::IssueUpdated, .. })
        ));
    }

    #[test]
    fn last_matching_orders_by_timestamp_then_position() {
        let mut stream = EventStream::new();
        stream.append(Event::stamp(stream_id(), 0, user("a"), ts(5), retitle("late")).expect("stamp"));
        stream.append(Event::stamp(stream_id(), 1, user("a"), ts(1), retitle("early")).expect("stamp"));
        stream.append(Event::stamp(stream_id(), 2, user("a"), ts(5), retitle("tie")).expect("stamp"));

        let last = stream.last_matching(|_| true).expect("some event");
        assert_eq!(last.payload, retitle("tie"));

        let last_early = stream
            .last_matching(|e| e.payload != retitle("tie") && e.payload != retitle("late"))
            .expect("early");
        assert_eq!(last_early.payload, retitle("early"));

        assert!(stream.last_matching(|_| false).is_none());
    }
}
