//! Projection contract: fold an event log into current state.
//!
//! A [`Projection`] is a zero-sized marker type naming an aggregate kind,
//! its event payload enum and its state type. [`fold`] is the pure
//! definition of state; [`Aggregate`] keeps a log and its cached fold side
//! by side and only ever mutates both together.
//!
//! Folding one event always sees the log *before* that event. The event is
//! appended only after its effect was computed, so an invariant check never
//! observes the event it is checking.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FoldError;
use crate::event::{Event, EventPayload, EventStream};
use crate::id::{AggregateId, AggregateKind, UserId};
use crate::lookup::{MergeOutcome, Repository};
use crate::validate::Check;

/// One aggregate kind's fold.
pub trait Projection: Clone + fmt::Debug + Default + PartialEq + Send + Sync + 'static {
    type Event: EventPayload;
    type State: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    const KIND: AggregateKind;

    /// Fold `event` into `state`. `history` is the log folded so far.
    ///
    /// # Errors
    ///
    /// Returns a [`FoldError`] when the event is not a legal transition.
    /// `state` may be partially updated in that case; callers that need
    /// atomicity fold into a copy.
    fn apply(
        state: &mut Option<Self::State>,
        event: &Event<Self::Event>,
        history: &EventStream<Self::Event>,
    ) -> Result<(), FoldError>;

    /// Decide how an authored payload enters the log.
    ///
    /// # Errors
    ///
    /// Returns a [`FoldError`] if the payload can already be ruled out.
    fn plan(
        _state: Option<&Self::State>,
        payload: Self::Event,
    ) -> Result<Step<Self::Event>, FoldError> {
        Ok(Step::Fold(payload))
    }

    /// Preconditions the validation gate must confirm before `payload` is
    /// folded.
    fn checks(state: Option<&Self::State>, payload: &Self::Event) -> Vec<Check>;

    /// The repository a created payload places the aggregate in.
    fn created_in(payload: &Self::Event) -> Option<&Repository>;
}

/// Fold a complete log from empty.
///
/// # Errors
///
/// Returns the first [`FoldError`] hit, i.e. the log is not valid.
pub fn fold<P: Projection>(events: &[Event<P::Event>]) -> Result<Option<P::State>, FoldError> {
    let mut state = None;
    let mut history = EventStream::new();
    for event in events {
        P::apply(&mut state, event, &history)?;
        history.append(event.clone());
    }
    Ok(state)
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// How an authored payload is turned into log entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Step<E> {
    /// Stamp and fold the payload as is.
    Fold(E),
    /// Resolve a merge with the hosting service first, then fold the events
    /// derived from its outcome.
    Merge(MergePlan<E>),
}

/// A merge that was legal when planned, waiting for the hosting service.
#[derive(Clone)]
pub struct MergePlan<E> {
    pub repository: Repository,
    pub base: String,
    pub compare: String,
    pub title: String,
    derive: fn(&MergePlan<E>, &MergeOutcome) -> Vec<E>,
}

impl<E> MergePlan<E> {
    #[must_use]
    pub fn new(
        repository: Repository,
        base: String,
        compare: String,
        title: String,
        derive: fn(&Self, &MergeOutcome) -> Vec<E>,
    ) -> Self {
        Self {
            repository,
            base,
            compare,
            title,
            derive,
        }
    }

    /// The events to fold, in order, for a successful merge.
    #[must_use]
    pub fn derive(&self, outcome: &MergeOutcome) -> Vec<E> {
        (self.derive)(self, outcome)
    }
}

impl<E> PartialEq for MergePlan<E> {
    fn eq(&self, other: &Self) -> bool {
        self.repository == other.repository
            && self.base == other.base
            && self.compare == other.compare
            && self.title == other.title
    }
}

impl<E> fmt::Debug for MergePlan<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergePlan")
            .field("repository", &self.repository)
            .field("base", &self.base)
            .field("compare", &self.compare)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// An event log with its cached fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Aggregate<P: Projection> {
    pub id: AggregateId,
    /// Per-repository sequence number allocated at creation.
    pub number: u64,
    events: EventStream<P::Event>,
    state: Option<P::State>,
}

impl<P: Projection> Aggregate<P> {
    /// An aggregate with no events yet.
    #[must_use]
    pub fn new(id: AggregateId, number: u64) -> Self {
        Self {
            id,
            number,
            events: EventStream::new(),
            state: None,
        }
    }

    /// Rebuild from a persisted log.
    ///
    /// # Errors
    ///
    /// Returns the [`FoldError`] of the first invalid event.
    pub fn replay(
        id: AggregateId,
        number: u64,
        events: Vec<Event<P::Event>>,
    ) -> Result<Self, FoldError> {
        let state = fold::<P>(&events)?;
        Ok(Self {
            id,
            number,
            events: EventStream::from_events(events),
            state,
        })
    }

    #[must_use]
    pub fn kind(&self) -> AggregateKind {
        P::KIND
    }

    #[must_use]
    pub fn events(&self) -> &EventStream<P::Event> {
        &self.events
    }

    #[must_use]
    pub fn state(&self) -> Option<&P::State> {
        self.state.as_ref()
    }

    /// Number of events in the log.
    #[must_use]
    pub fn version(&self) -> usize {
        self.events.len()
    }

    /// Accept a payload at the next position of this aggregate's log.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload fails to serialize.
    pub fn stamp(
        &self,
        by: UserId,
        time_stamp: DateTime<Utc>,
        payload: P::Event,
    ) -> Result<Event<P::Event>, serde_json::Error> {
        Event::stamp(self.id.clone(), self.events.len(), by, time_stamp, payload)
    }

    /// See [`Projection::plan`].
    ///
    /// # Errors
    ///
    /// Returns a [`FoldError`] if the payload is already known to be illegal.
    pub fn plan(&self, payload: P::Event) -> Result<Step<P::Event>, FoldError> {
        P::plan(self.state.as_ref(), payload)
    }

    /// Fold one stamped event and append it. On error the aggregate is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns the [`FoldError`] raised by the projection.
    pub fn apply(&mut self, event: Event<P::Event>) -> Result<(), FoldError> {
        let mut next = self.state.clone();
        P::apply(&mut next, &event, &self.events)?;
        tracing::debug!(
            kind = P::KIND.as_str(),
            aggregate = %self.id,
            event_type = %event.event_type(),
            position = self.events.len(),
            "folded event"
        );
        self.state = next;
        self.events.append(event);
        Ok(())
    }

    /// True iff the cached state equals a fresh fold of the log.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        fold::<P>(self.events.as_slice()).is_ok_and(|state| state == self.state)
    }

    /// Replace the cached state with a fresh fold of the log. Returns
    /// whether the cache changed.
    ///
    /// # Errors
    ///
    /// Returns the [`FoldError`] of the first invalid event in the log.
    pub fn refold(&mut self) -> Result<bool, FoldError> {
        let state = fold::<P>(self.events.as_slice())?;
        let changed = state != self.state;
        self.state = state;
        Ok(changed)
    }

    /// Overwrite the cached state without folding. Used to load documents
    /// whose cache is checked separately.
    #[doc(hidden)]
    pub fn set_cached_state(&mut self, state: Option<P::State>) {
        self.state = state;
    }
}
