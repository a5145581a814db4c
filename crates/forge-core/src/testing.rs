//! Fixtures shared by the unit tests.

use chrono::{DateTime, Utc};

use crate::id::{LabelId, RepositoryId, UserId};
use crate::lookup::Repository;

/// `seconds` after a fixed base instant.
pub fn ts(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap_or_default()
}

pub fn user(login: &str) -> UserId {
    UserId::new_unchecked(login)
}

pub fn label(id: &str) -> LabelId {
    LabelId::new_unchecked(id)
}

pub fn repository() -> Repository {
    Repository {
        id: RepositoryId::new_unchecked("r1"),
        owner: "acme".into(),
        name: "widgets".into(),
    }
}
