//! Command handlers. Each writes its result to `out` as text or JSON.

use anyhow::{Context, Result, bail};
use forge_core::config::{StoreBackend, load_config};
use forge_core::event::EventType;
use forge_core::id::AggregateId;
use forge_core::lookup::{MemoryCounters, MemoryGitHost, MemoryLookup};
use forge_core::store::open_store;
use forge_core::{Aggregate, AggregateService, Collaborators, EngineError, Event, Projection, fold};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn kv(out: &mut dyn Write, key: &str, value: impl AsRef<str>) -> std::io::Result<()> {
    writeln!(out, "{:<10} {}", format!("{key}:"), value.as_ref())
}

/// Fold a JSON array of persisted events and print the state.
pub fn replay<P: Projection>(path: &Path, json: bool, out: &mut dyn Write) -> Result<()> {
    let events: Vec<Event<P::Event>> = read_json(path)?;
    let state = fold::<P>(&events)
        .with_context(|| format!("{} log in {} is invalid", P::KIND, path.display()))?;

    if json {
        let value = json!({
            "kind": P::KIND.as_str(),
            "events": events.len(),
            "state": state,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    kv(out, "kind", P::KIND.as_str())?;
    kv(out, "events", events.len().to_string())?;
    match state {
        Some(state) => {
            writeln!(out, "state:")?;
            writeln!(out, "{}", serde_json::to_string_pretty(&state)?)?;
        }
        None => kv(out, "state", "(not created)")?,
    }
    Ok(())
}

/// Check that a stored document's cached state equals a fresh fold of its
/// log. Divergence is an error so the process exits non-zero.
pub fn verify<P: Projection>(path: &Path, json: bool, out: &mut dyn Write) -> Result<()> {
    let aggregate: Aggregate<P> = read_json(path)?;
    let consistent = aggregate.is_consistent();

    if json {
        let value = json!({
            "kind": P::KIND.as_str(),
            "id": aggregate.id,
            "version": aggregate.version(),
            "consistent": consistent,
        });
        writeln!(out, "{value}")?;
    } else {
        kv(out, "id", aggregate.id.as_str())?;
        kv(out, "version", aggregate.version().to_string())?;
        kv(out, "cache", if consistent { "ok" } else { "DIVERGED" })?;
    }

    if !consistent {
        return Err(EngineError::StateDiverged {
            kind: P::KIND,
            id: aggregate.id.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Re-fold one aggregate in the configured SQLite store.
pub async fn rebuild<P: Projection>(
    id: &str,
    config_path: Option<&Path>,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let config = load_config(config_path)?;
    if config.store.backend != StoreBackend::Sqlite {
        bail!("rebuild needs a persistent store: set store.backend = \"sqlite\"");
    }
    let store = open_store(&config.store)?;
    tracing::debug!(path = %config.store.path.display(), "opened store");

    // Rebuilding reads and writes only the store.
    let collaborators = Collaborators::new(
        Arc::new(MemoryLookup::new()),
        Arc::new(MemoryGitHost::new()),
        Arc::new(MemoryCounters::new()),
        store,
    );
    let service = AggregateService::<P>::new(collaborators, config);
    let id = AggregateId::new(id)?;
    let changed = service.rebuild(&id).await?;

    if json {
        writeln!(out, "{}", json!({"id": id, "rewritten": changed}))?;
    } else if changed {
        writeln!(out, "rebuilt {} {id}", P::KIND)?;
    } else {
        writeln!(out, "{} {id} already up to date", P::KIND)?;
    }
    Ok(())
}

/// Print every known event type with its family.
pub fn types(json: bool, out: &mut dyn Write) -> Result<()> {
    if json {
        let value: Vec<_> = EventType::ALL
            .iter()
            .map(|et| json!({"type": et.as_str(), "family": et.family().as_str()}))
            .collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }
    for et in EventType::ALL {
        writeln!(out, "{:<30} {}", et.as_str(), et.family().as_str())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use forge_core::id::{RepositoryId, UserId};
    use forge_core::issue::IssueCreated;
    use forge_core::lookup::Repository;
    use forge_core::store::{Document, DocumentStore, SqliteStore};
    use forge_core::{AggregateKind, Issue, IssueEvent};

    fn issue(title: &str) -> Aggregate<Issue> {
        let mut aggregate = Aggregate::new(AggregateId::new_unchecked("abc123"), 7);
        let by = UserId::new_unchecked("alice");
        let payloads = [
            IssueEvent::Created(IssueCreated {
                repository: Repository {
                    id: RepositoryId::new_unchecked("r1"),
                    owner: "acme".into(),
                    name: "widgets".into(),
                },
                title: title.into(),
                description: String::new(),
            }),
            IssueEvent::Closed,
        ];
        for (payload, seconds) in payloads.into_iter().zip([0_i64, 60]) {
            let at = DateTime::from_timestamp(1_700_000_000 + seconds, 0).expect("timestamp");
            let event = aggregate.stamp(by.clone(), at, payload).expect("stamp");
            aggregate.apply(event).expect("apply");
        }
        aggregate
    }

    fn tampered(title: &str) -> Aggregate<Issue> {
        let mut aggregate = issue(title);
        let mut state = aggregate.state().cloned();
        if let Some(state) = state.as_mut() {
            state.title = "tampered".into();
        }
        aggregate.set_cached_state(state);
        aggregate
    }

    fn write(dir: &Path, name: &str, value: &impl serde::Serialize) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(value).expect("encode")).expect("write");
        path
    }

    #[test]
    fn replay_prints_folded_state() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let aggregate = issue("Login broken");
        let path = write(dir.path(), "events.json", aggregate.events());

        let mut out = Vec::new();
        replay::<Issue>(&path, true, &mut out).expect("replay");
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["events"], 2);
        assert_eq!(value["state"]["title"], "Login broken");
        assert_eq!(value["state"]["lifecycle"], "closed");
    }

    #[test]
    fn replay_of_wrong_kind_fails() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = write(dir.path(), "events.json", issue("T").events());

        let mut out = Vec::new();
        assert!(replay::<forge_core::PullRequest>(&path, false, &mut out).is_err());
    }

    #[test]
    fn verify_accepts_consistent_document() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = write(dir.path(), "doc.json", &issue("T"));

        let mut out = Vec::new();
        verify::<Issue>(&path, false, &mut out).expect("consistent");
        assert!(String::from_utf8_lossy(&out).contains("ok"));
    }

    #[test]
    fn verify_reports_divergence_with_code() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = write(dir.path(), "doc.json", &tampered("T"));

        let mut out = Vec::new();
        let err = verify::<Issue>(&path, true, &mut out).unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert!(matches!(engine, EngineError::StateDiverged { .. }));
        let value: serde_json::Value = serde_json::from_slice(&out).expect("json");
        assert_eq!(value["consistent"], false);
    }

    #[tokio::test]
    async fn rebuild_rewrites_sqlite_document() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = dir.path().join("aggregates.db");
        let config = dir.path().join("forge.toml");
        std::fs::write(
            &config,
            format!("[store]\nbackend = \"sqlite\"\npath = {:?}\n", db.display().to_string()),
        )
        .expect("write config");

        let aggregate = tampered("real");
        SqliteStore::open(&db)
            .expect("open")
            .save(Document {
                kind: AggregateKind::Issue,
                id: aggregate.id.clone(),
                body: serde_json::to_value(&aggregate).expect("encode"),
            })
            .await
            .expect("save");

        let mut out = Vec::new();
        rebuild::<Issue>("abc123", Some(&config), false, &mut out)
            .await
            .expect("rebuild");
        assert!(String::from_utf8_lossy(&out).starts_with("rebuilt"));

        let mut out = Vec::new();
        rebuild::<Issue>("abc123", Some(&config), false, &mut out)
            .await
            .expect("second rebuild");
        assert!(String::from_utf8_lossy(&out).contains("already up to date"));
    }

    #[tokio::test]
    async fn rebuild_refuses_memory_backend() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = dir.path().join("forge.toml");
        std::fs::write(&config, "[store]\nbackend = \"memory\"\n").expect("write config");

        let mut out = Vec::new();
        let err = rebuild::<Issue>("abc123", Some(&config), false, &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }

    #[test]
    fn types_lists_whole_catalog() {
        let mut out = Vec::new();
        types(false, &mut out).expect("types");
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.lines().count(), EventType::ALL.len());
        assert!(text.contains("pull_request.merged"));
    }
}
