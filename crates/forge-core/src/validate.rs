//! Validation gate: checks that need the rest of the platform.
//!
//! The fold is pure and only sees the log. Whether a label exists or two
//! branches differ is answered by collaborators, so each authored payload
//! first yields a list of [`Check`]s ([`crate::projection::Projection::checks`])
//! which the [`ValidationGate`] runs in order before the payload is folded.
//! The first failing check rejects the payload.
//!
//! Events derived from a merge outcome are never gated.

use std::sync::Arc;

use crate::error::{EngineError, GateError, ReferenceKind};
use crate::id::{LabelId, MilestoneId, RepositoryId, UserId};
use crate::lookup::{GitHosting, ReferenceLookup, Repository};

/// A single precondition on the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    LabelExists(LabelId),
    MilestoneExists(MilestoneId),
    UserExists(UserId),
    RepositoryExists(RepositoryId),
    /// `compare` has at least one commit not on `base`.
    HasCommits {
        owner: String,
        repo: String,
        base: String,
        compare: String,
    },
}

impl Check {
    #[must_use]
    pub fn has_commits(repository: &Repository, base: &str, compare: &str) -> Self {
        Self::HasCommits {
            owner: repository.owner.clone(),
            repo: repository.name.clone(),
            base: base.to_string(),
            compare: compare.to_string(),
        }
    }
}

/// Runs [`Check`]s against the reference lookup and git host.
#[derive(Clone)]
pub struct ValidationGate {
    lookup: Arc<dyn ReferenceLookup>,
    git: Arc<dyn GitHosting>,
}

impl ValidationGate {
    #[must_use]
    pub fn new(lookup: Arc<dyn ReferenceLookup>, git: Arc<dyn GitHosting>) -> Self {
        Self { lookup, git }
    }

    /// Run `checks` in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// [`GateError::NotFound`] or [`GateError::NoChanges`] for a failed
    /// check; collaborator failures propagate unchanged.
    pub async fn run(&self, checks: &[Check]) -> Result<(), EngineError> {
        for check in checks {
            self.check(check).await?;
        }
        Ok(())
    }

    async fn check(&self, check: &Check) -> Result<(), EngineError> {
        let missing = |kind: ReferenceKind, id: &str| {
            tracing::warn!(%kind, id, "referenced entity not found");
            EngineError::from(GateError::NotFound {
                kind,
                id: id.to_string(),
            })
        };

        match check {
            Check::LabelExists(id) => {
                if self.lookup.lookup_label(id).await?.is_none() {
                    return Err(missing(ReferenceKind::Label, id.as_str()));
                }
            }
            Check::MilestoneExists(id) => {
                if self.lookup.lookup_milestone(id).await?.is_none() {
                    return Err(missing(ReferenceKind::Milestone, id.as_str()));
                }
            }
            Check::UserExists(id) => {
                if self.lookup.lookup_user(id).await?.is_none() {
                    return Err(missing(ReferenceKind::User, id.as_str()));
                }
            }
            Check::RepositoryExists(id) => {
                if self.lookup.lookup_repository(id).await?.is_none() {
                    return Err(missing(ReferenceKind::Repository, id.as_str()));
                }
            }
            Check::HasCommits {
                owner,
                repo,
                base,
                compare,
            } => {
                let commits = self.git.commits_between(owner, repo, base, compare).await?;
                if commits.is_empty() {
                    tracing::warn!(%owner, %repo, %base, %compare, "no commits between branches");
                    return Err(GateError::NoChanges {
                        base: base.clone(),
                        compare: compare.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::lookup::{Commit, Label, MemoryGitHost, MemoryLookup};
    use crate::testing::{label, repository};

    async fn gate() -> (ValidationGate, Arc<MemoryLookup>, Arc<MemoryGitHost>) {
        let lookup = Arc::new(MemoryLookup::new());
        let git = Arc::new(MemoryGitHost::new());
        lookup
            .insert_label(Label {
                id: label("bug"),
                name: "bug".into(),
            })
            .await;
        lookup.insert_repository(repository()).await;
        (ValidationGate::new(lookup.clone(), git.clone()), lookup, git)
    }

    #[tokio::test]
    async fn existing_references_pass() {
        let (gate, _, _) = gate().await;
        gate.run(&[
            Check::RepositoryExists(repository().id),
            Check::LabelExists(label("bug")),
        ])
        .await
        .expect("all exist");
    }

    #[tokio::test]
    async fn missing_reference_is_not_found() {
        let (gate, _, _) = gate().await;
        let err = gate
            .run(&[Check::LabelExists(label("bug")), Check::LabelExists(label("nope"))])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReferenceNotFound);
        assert_eq!(err.to_string(), "label nope not found");
    }

    #[tokio::test]
    async fn branches_need_a_commit_difference() {
        let (gate, _, git) = gate().await;
        let check = Check::has_commits(&repository(), "main", "feature");
        let err = gate.run(std::slice::from_ref(&check)).await.unwrap_err();
        assert!(matches!(err, EngineError::Gate(GateError::NoChanges { .. })));

        let repo = repository();
        git.set_commits(
            &repo.owner,
            &repo.name,
            "main",
            "feature",
            vec![Commit {
                sha: "abc123".into(),
                message: "fix".into(),
            }],
        )
        .await;
        gate.run(&[check]).await.expect("commits present");
    }
}
