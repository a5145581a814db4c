//! Aggregate service: load, gate, fold, persist.
//!
//! Every operation works on one aggregate and one batch of intents:
//!
//! 1. load the persisted document (or allocate a number for a new one),
//! 2. for each intent in order: decode, plan, gate, stamp and fold,
//! 3. save the whole document once.
//!
//! The first failing intent aborts the batch before anything is saved. A
//! sequence number allocated for a create that then fails is not returned,
//! so numbering may have gaps. Saves overwrite without a version check.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, FoldError, StoreError};
use crate::event::Intent;
use crate::id::{AggregateId, UserId};
use crate::lookup::{GitHosting, MergeAttempt, ReferenceLookup, SequenceAllocator};
use crate::projection::{Aggregate, Projection, Step};
use crate::store::{Document, DocumentStore};
use crate::validate::ValidationGate;

/// Everything the service talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub lookup: Arc<dyn ReferenceLookup>,
    pub git: Arc<dyn GitHosting>,
    pub counters: Arc<dyn SequenceAllocator>,
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators stamping events with wall-clock time.
    #[must_use]
    pub fn new(
        lookup: Arc<dyn ReferenceLookup>,
        git: Arc<dyn GitHosting>,
        counters: Arc<dyn SequenceAllocator>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            lookup,
            git,
            counters,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Entry point for one aggregate kind.
pub struct AggregateService<P: Projection> {
    gate: ValidationGate,
    git: Arc<dyn GitHosting>,
    counters: Arc<dyn SequenceAllocator>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    _projection: PhantomData<P>,
}

impl<P: Projection> AggregateService<P> {
    #[must_use]
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            gate: ValidationGate::new(collaborators.lookup, collaborators.git.clone()),
            git: collaborators.git,
            counters: collaborators.counters,
            store: collaborators.store,
            clock: collaborators.clock,
            config,
            _projection: PhantomData,
        }
    }

    /// Create a new aggregate. The first intent must be the kind's created
    /// event; the rest are appended after it in the same batch.
    ///
    /// # Errors
    ///
    /// Any fold, gate, payload, store or collaborator error. Nothing is
    /// persisted on error.
    pub async fn create(
        &self,
        actor: &UserId,
        intents: Vec<Intent>,
    ) -> Result<Aggregate<P>, EngineError> {
        let mut intents = intents.into_iter();
        let first = intents
            .next()
            .ok_or(FoldError::NotCreated { aggregate: P::KIND })?
            .decode::<P::Event>()?;
        let repository = P::created_in(&first)
            .ok_or(FoldError::NotCreated { aggregate: P::KIND })?
            .clone();

        self.gate.run(&P::checks(None, &first)).await?;

        let counter = self.config.counters.name_for(P::KIND);
        let number = self
            .counters
            .next_sequence_number(&repository.id, counter)
            .await?;
        let id = AggregateId::derive(P::KIND, &repository.id, number);
        let mut aggregate = Aggregate::<P>::new(id, number);

        self.submit(&mut aggregate, actor, first, false).await?;
        for intent in intents {
            let payload = intent.decode::<P::Event>()?;
            self.submit(&mut aggregate, actor, payload, true).await?;
        }

        self.persist(&aggregate, aggregate.version()).await?;
        Ok(aggregate)
    }

    /// Append a batch of intents to an existing aggregate.
    ///
    /// # Errors
    ///
    /// [`EngineError::AggregateNotFound`] if there is no such aggregate, or
    /// the first error raised by an intent. Nothing is persisted on error.
    pub async fn append_events(
        &self,
        id: &AggregateId,
        actor: &UserId,
        intents: Vec<Intent>,
    ) -> Result<Aggregate<P>, EngineError> {
        let mut aggregate = self.load(id).await?;
        let before = aggregate.version();

        for intent in intents {
            let payload = intent.decode::<P::Event>()?;
            self.submit(&mut aggregate, actor, payload, true).await?;
        }

        self.persist(&aggregate, aggregate.version() - before).await?;
        Ok(aggregate)
    }

    /// Current state from the cached fold.
    ///
    /// # Errors
    ///
    /// [`EngineError::AggregateNotFound`] if there is no such aggregate, or
    /// [`EngineError::StateDiverged`] when `verify_on_read` is set and the
    /// cache does not match the log.
    pub async fn projected_state(&self, id: &AggregateId) -> Result<P::State, EngineError> {
        let aggregate = self.load(id).await?;
        aggregate
            .state()
            .cloned()
            .ok_or_else(|| not_found::<P>(id))
    }

    /// Re-fold a stored aggregate from its log and rewrite its cached
    /// state. Returns whether the cache changed.
    ///
    /// # Errors
    ///
    /// [`EngineError::AggregateNotFound`], or the [`FoldError`] of the first
    /// invalid event if the stored log itself is invalid.
    pub async fn rebuild(&self, id: &AggregateId) -> Result<bool, EngineError> {
        let mut aggregate = self.load_unverified(id).await?;
        let changed = aggregate.refold()?;
        if changed {
            tracing::warn!(
                kind = P::KIND.as_str(),
                aggregate = %id,
                "cached state differed from event log, rewriting"
            );
            self.persist(&aggregate, 0).await?;
        }
        Ok(changed)
    }

    /// Ids of every stored aggregate of this kind.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn list(&self) -> Result<Vec<AggregateId>, EngineError> {
        Ok(self.store.list(P::KIND).await?)
    }

    async fn submit(
        &self,
        aggregate: &mut Aggregate<P>,
        actor: &UserId,
        payload: P::Event,
        gated: bool,
    ) -> Result<(), EngineError> {
        let result = self.submit_inner(aggregate, actor, payload, gated).await;
        if let Err(err) = &result {
            tracing::warn!(
                kind = P::KIND.as_str(),
                aggregate = %aggregate.id,
                code = err.code().code(),
                error = %err,
                "rejected event"
            );
        }
        result
    }

    async fn submit_inner(
        &self,
        aggregate: &mut Aggregate<P>,
        actor: &UserId,
        payload: P::Event,
        gated: bool,
    ) -> Result<(), EngineError> {
        match aggregate.plan(payload)? {
            Step::Fold(payload) => {
                if gated {
                    self.gate
                        .run(&P::checks(aggregate.state(), &payload))
                        .await?;
                }
                self.fold(aggregate, actor, payload)
            }
            Step::Merge(plan) => {
                let repository = &plan.repository;
                let attempt = self
                    .git
                    .attempt_merge(&repository.owner, &repository.name, &plan.base, &plan.compare)
                    .await?;
                let MergeAttempt::Merged(outcome) = attempt else {
                    return Err(EngineError::CannotMerge {
                        base: plan.base.clone(),
                        compare: plan.compare.clone(),
                    });
                };
                for derived in plan.derive(&outcome) {
                    self.fold(aggregate, actor, derived)?;
                }
                Ok(())
            }
        }
    }

    fn fold(
        &self,
        aggregate: &mut Aggregate<P>,
        actor: &UserId,
        payload: P::Event,
    ) -> Result<(), EngineError> {
        let event = aggregate
            .stamp(actor.clone(), self.clock.now(), payload)
            .map_err(EngineError::Encoding)?;
        aggregate.apply(event)?;
        Ok(())
    }

    async fn load_unverified(&self, id: &AggregateId) -> Result<Aggregate<P>, EngineError> {
        let document = self
            .store
            .load(P::KIND, id)
            .await?
            .ok_or_else(|| not_found::<P>(id))?;
        let aggregate: Aggregate<P> =
            serde_json::from_value(document.body).map_err(StoreError::Encoding)?;
        Ok(aggregate)
    }

    async fn load(&self, id: &AggregateId) -> Result<Aggregate<P>, EngineError> {
        let aggregate = self.load_unverified(id).await?;
        if self.config.engine.verify_on_read && !aggregate.is_consistent() {
            tracing::warn!(
                kind = P::KIND.as_str(),
                aggregate = %id,
                "cached state diverged from event log"
            );
            return Err(EngineError::StateDiverged {
                kind: P::KIND,
                id: id.to_string(),
            });
        }
        Ok(aggregate)
    }

    async fn persist(&self, aggregate: &Aggregate<P>, appended: usize) -> Result<(), EngineError> {
        let body = serde_json::to_value(aggregate).map_err(StoreError::Encoding)?;
        self.store
            .save(Document {
                kind: P::KIND,
                id: aggregate.id.clone(),
                body,
            })
            .await?;
        tracing::info!(
            kind = P::KIND.as_str(),
            aggregate = %aggregate.id,
            number = aggregate.number,
            appended,
            version = aggregate.version(),
            "persisted aggregate"
        );
        Ok(())
    }
}

fn not_found<P: Projection>(id: &AggregateId) -> EngineError {
    EngineError::AggregateNotFound {
        kind: P::KIND,
        id: id.to_string(),
    }
}
