//! Collaborator boundary: entity lookups, git hosting and sequence counters.
//!
//! The engine only needs a handful of read operations and one side effect
//! (the merge attempt) from the rest of the platform. Each is an async trait
//! so the service can hold them as `Arc<dyn ...>` and be shared across tokio
//! tasks. Failures are opaque [`anyhow::Error`]s that the engine propagates
//! unchanged.
//!
//! The `Memory*` implementations back tests and the CLI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

use crate::id::{LabelId, MilestoneId, RepositoryId, UserId};

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A repository as embedded in created events and aggregate state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
}

/// Branches and title of a pull request after the hosting service merged
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub base: String,
    pub compare: String,
    pub title: String,
}

/// Result of asking the hosting service to merge `compare` into `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    Merged(MergeOutcome),
    Conflict,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Existence checks for the entities events refer to.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn lookup_label(&self, id: &LabelId) -> anyhow::Result<Option<Label>>;

    async fn lookup_milestone(&self, id: &MilestoneId) -> anyhow::Result<Option<Milestone>>;

    async fn lookup_user(&self, id: &UserId) -> anyhow::Result<Option<User>>;

    async fn lookup_repository(&self, id: &RepositoryId) -> anyhow::Result<Option<Repository>>;
}

/// The git-hosting service.
#[async_trait]
pub trait GitHosting: Send + Sync {
    /// Commits on `compare` that are not on `base`.
    async fn commits_between(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
    ) -> anyhow::Result<Vec<Commit>>;

    /// Merge `compare` into `base`. Called at most once per merge intent.
    async fn attempt_merge(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
    ) -> anyhow::Result<MergeAttempt>;
}

/// Per-repository counters for human-readable issue and pull request
/// numbers.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    async fn next_sequence_number(
        &self,
        repository: &RepositoryId,
        counter: &str,
    ) -> anyhow::Result<u64>;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Reference lookup over in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryLookup {
    labels: RwLock<HashMap<LabelId, Label>>,
    milestones: RwLock<HashMap<MilestoneId, Milestone>>,
    users: RwLock<HashMap<UserId, User>>,
    repositories: RwLock<HashMap<RepositoryId, Repository>>,
}

impl MemoryLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_label(&self, label: Label) {
        self.labels.write().await.insert(label.id.clone(), label);
    }

    pub async fn insert_milestone(&self, milestone: Milestone) {
        self.milestones
            .write()
            .await
            .insert(milestone.id.clone(), milestone);
    }

    pub async fn insert_user(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_repository(&self, repository: Repository) {
        self.repositories
            .write()
            .await
            .insert(repository.id.clone(), repository);
    }
}

#[async_trait]
impl ReferenceLookup for MemoryLookup {
    async fn lookup_label(&self, id: &LabelId) -> anyhow::Result<Option<Label>> {
        Ok(self.labels.read().await.get(id).cloned())
    }

    async fn lookup_milestone(&self, id: &MilestoneId) -> anyhow::Result<Option<Milestone>> {
        Ok(self.milestones.read().await.get(id).cloned())
    }

    async fn lookup_user(&self, id: &UserId) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn lookup_repository(&self, id: &RepositoryId) -> anyhow::Result<Option<Repository>> {
        Ok(self.repositories.read().await.get(id).cloned())
    }
}

type BranchKey = (String, String, String, String);

fn branch_key(owner: &str, repo: &str, base: &str, compare: &str) -> BranchKey {
    (
        owner.to_string(),
        repo.to_string(),
        base.to_string(),
        compare.to_string(),
    )
}

/// Scripted git host. Branch pairs without commits report none; merges
/// without a scripted result fail as collaborator errors.
#[derive(Debug, Default)]
pub struct MemoryGitHost {
    commits: RwLock<HashMap<BranchKey, Vec<Commit>>>,
    merges: RwLock<HashMap<BranchKey, MergeAttempt>>,
    merge_calls: AtomicUsize,
}

impl MemoryGitHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_commits(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
        commits: Vec<Commit>,
    ) {
        self.commits
            .write()
            .await
            .insert(branch_key(owner, repo, base, compare), commits);
    }

    pub async fn set_merge_result(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
        attempt: MergeAttempt,
    ) {
        self.merges
            .write()
            .await
            .insert(branch_key(owner, repo, base, compare), attempt);
    }

    /// Number of merge attempts made so far.
    #[must_use]
    pub fn merge_calls(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitHosting for MemoryGitHost {
    async fn commits_between(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
    ) -> anyhow::Result<Vec<Commit>> {
        Ok(self
            .commits
            .read()
            .await
            .get(&branch_key(owner, repo, base, compare))
            .cloned()
            .unwrap_or_default())
    }

    async fn attempt_merge(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        compare: &str,
    ) -> anyhow::Result<MergeAttempt> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .merges
            .read()
            .await
            .get(&branch_key(owner, repo, base, compare))
            .cloned();
        scripted.ok_or_else(|| anyhow::anyhow!("no merge result scripted for {owner}/{repo} {compare} -> {base}"))
    }
}

/// Counters held in memory, starting at 1 for every
/// `(repository, counter)` pair.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    next: Mutex<HashMap<(RepositoryId, String), u64>>,
}

impl MemoryCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceAllocator for MemoryCounters {
    async fn next_sequence_number(
        &self,
        repository: &RepositoryId,
        counter: &str,
    ) -> anyhow::Result<u64> {
        let mut next = self.next.lock().await;
        let slot = next
            .entry((repository.clone(), counter.to_string()))
            .or_insert(0);
        *slot += 1;
        Ok(*slot)
    }
}
