#![allow(dead_code)]

use chrono::{DateTime, Utc};
use forge_core::clock::SteppingClock;
use forge_core::config::EngineConfig;
use forge_core::event::Intent;
use forge_core::id::{LabelId, MilestoneId, RepositoryId, UserId};
use forge_core::lookup::{
    Commit, Label, MemoryCounters, MemoryGitHost, MemoryLookup, Milestone, Repository, User,
};
use forge_core::store::{DocumentStore, MemoryStore};
use forge_core::{AggregateService, Collaborators, Issue, PullRequest};
use serde_json::{Value, json};
use std::sync::Arc;

pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

pub fn repository() -> Repository {
    Repository {
        id: RepositoryId::new("65a1f0c2b3d4e5f60718293a").expect("repository id"),
        owner: "acme".into(),
        name: "widgets".into(),
    }
}

pub fn alice() -> UserId {
    UserId::new("alice").expect("user id")
}

pub fn intent(event_type: &str, payload: Value) -> Intent {
    Intent {
        event_type: event_type.to_string(),
        payload,
    }
}

pub fn issue_created(title: &str) -> Intent {
    intent(
        "issue.created",
        json!({
            "repository": {"id": repository().id, "owner": "acme", "name": "widgets"},
            "title": title,
        }),
    )
}

pub fn pull_request_created(title: &str) -> Intent {
    intent(
        "pull_request.created",
        json!({
            "repository": {"id": repository().id, "owner": "acme", "name": "widgets"},
            "base": "main",
            "compare": "feature",
            "title": title,
        }),
    )
}

/// In-memory collaborators seeded with one repository, two labels, a
/// milestone and two users.
pub struct Harness {
    pub lookup: Arc<MemoryLookup>,
    pub git: Arc<MemoryGitHost>,
    pub counters: Arc<MemoryCounters>,
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<SteppingClock>,
    pub config: EngineConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn DocumentStore>) -> Self {
        let lookup = Arc::new(MemoryLookup::new());
        lookup.insert_repository(repository()).await;
        for id in ["l1", "l2"] {
            lookup
                .insert_label(Label {
                    id: LabelId::new(id).expect("label id"),
                    name: id.to_uppercase(),
                })
                .await;
        }
        lookup
            .insert_milestone(Milestone {
                id: MilestoneId::new("m1").expect("milestone id"),
                title: "v1.0".into(),
            })
            .await;
        for login in ["alice", "bob"] {
            lookup
                .insert_user(User {
                    id: UserId::new(login).expect("user id"),
                    login: login.into(),
                })
                .await;
        }

        let git = Arc::new(MemoryGitHost::new());
        git.set_commits(
            "acme",
            "widgets",
            "main",
            "feature",
            vec![Commit {
                sha: "4f2a9c".into(),
                message: "Add retry".into(),
            }],
        )
        .await;

        Self {
            lookup,
            git,
            counters: Arc::new(MemoryCounters::new()),
            store,
            clock: Arc::new(SteppingClock::new(base_time(), 1_000_000)),
            config: EngineConfig::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.lookup.clone(),
            self.git.clone(),
            self.counters.clone(),
            self.store.clone(),
        )
        .with_clock(self.clock.clone())
    }

    pub fn issues(&self) -> AggregateService<Issue> {
        AggregateService::new(self.collaborators(), self.config.clone())
    }

    pub fn pull_requests(&self) -> AggregateService<PullRequest> {
        AggregateService::new(self.collaborators(), self.config.clone())
    }
}
