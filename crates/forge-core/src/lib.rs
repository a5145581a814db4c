//! forge-core: event-sourced Issue and Pull Request aggregates.
//!
//! An aggregate is an append-only log of [`event::Event`]s plus a cached
//! state that always equals [`projection::fold`] of that log. The
//! [`service::AggregateService`] is the entry point: it decodes intents,
//! runs the [`validate::ValidationGate`], folds, and persists through a
//! [`store::DocumentStore`].
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in [`error`], each with a stable
//!   [`error::ErrorCode`]. Collaborator failures are `anyhow::Error` and
//!   propagate unchanged.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod capability;
pub mod clock;
pub mod comment;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod issue;
pub mod lookup;
pub mod projection;
pub mod pull_request;
pub mod service;
pub mod store;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EngineError, ErrorCode, FoldError};
pub use event::{Event, EventPayload, EventStream, EventType, Intent};
pub use id::{AggregateId, AggregateKind};
pub use issue::{Issue, IssueEvent, IssueState};
pub use projection::{Aggregate, Projection, fold};
pub use pull_request::{PullRequest, PullRequestEvent, PullRequestState};
pub use service::{AggregateService, Collaborators};
