//! Canonical identifiers.
//!
//! Ids reach the engine in several representations: plain strings,
//! integers, and document-store object ids (`{"$oid": "..."}`), sometimes
//! with stray whitespace or upper-case hex. Every id type here normalizes to
//! one canonical string at deserialization time, so two representations of
//! the same id compare equal with plain `==`.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which aggregate an event stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Issue,
    PullRequest,
}

impl AggregateKind {
    /// Storage key form (`issue`, `pull_request`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Issue => "issue",
            Self::PullRequest => "pull request",
        })
    }
}

impl FromStr for AggregateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(Self::Issue),
            "pull_request" | "pull-request" => Ok(Self::PullRequest),
            _ => Err(format!("unknown aggregate kind: {s}")),
        }
    }
}

/// Error returned when an id is empty after normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{raw}': ids must be non-empty")]
pub struct InvalidId {
    pub raw: String,
}

const HEX_OBJECT_ID_LEN: usize = 24;
const HEX_DIGEST_LEN: usize = 64;

/// Normalize a raw id string to its canonical form.
///
/// Whitespace is trimmed. Strings shaped like an object id (24 hex
/// characters) or a digest (64 hex characters) are lower-cased; anything
/// else is kept verbatim, so a login such as `Ada` keeps its case.
///
/// # Errors
///
/// Returns [`InvalidId`] if nothing is left after trimming.
pub fn canonicalize(raw: &str) -> Result<String, InvalidId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InvalidId {
            raw: raw.to_string(),
        });
    }
    let hex_shaped = matches!(trimmed.len(), HEX_OBJECT_ID_LEN | HEX_DIGEST_LEN)
        && trimmed.chars().all(|c| c.is_ascii_hexdigit());
    if hex_shaped {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Ok(trimmed.to_string())
    }
}

struct IdVisitor(&'static str);

impl<'de> Visitor<'de> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a {} as a string, integer or {{\"$oid\": ...}}", self.0)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        canonicalize(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut oid: Option<String> = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == "$oid" {
                let raw: String = map.next_value()?;
                oid = Some(canonicalize(&raw).map_err(de::Error::custom)?);
            } else {
                map.next_value::<de::IgnoredAny>()?;
            }
        }
        oid.ok_or_else(|| de::Error::missing_field("$oid"))
    }
}

macro_rules! canonical_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Build a canonical id from any raw representation.
            ///
            /// # Errors
            ///
            /// Returns [`InvalidId`] if the id is empty after trimming.
            pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidId> {
                canonicalize(raw.as_ref()).map(Self)
            }

            /// Wrap an already-canonical string without normalizing it.
            #[must_use]
            pub fn new_unchecked(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(IdVisitor($label)).map(Self)
            }
        }
    };
}

canonical_id!(
    /// Identity of an Issue or Pull Request aggregate.
    AggregateId,
    "aggregate id"
);
canonical_id!(
    /// Content-addressed event identity (`blake3:<hex>`).
    EventId,
    "event id"
);
canonical_id!(RepositoryId, "repository id");
canonical_id!(LabelId, "label id");
canonical_id!(MilestoneId, "milestone id");
canonical_id!(UserId, "user id");
canonical_id!(
    /// Identity of a comment nested in an aggregate. Derived from the id of
    /// the `comment.created` event that introduced it.
    CommentId,
    "comment id"
);

impl From<&EventId> for CommentId {
    fn from(event: &EventId) -> Self {
        Self(event.0.clone())
    }
}

impl AggregateId {
    /// Derive the aggregate id for the `number`-th aggregate of `kind` in a
    /// repository. Stable for a given triple.
    #[must_use]
    pub fn derive(kind: AggregateKind, repository: &RepositoryId, number: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\t");
        hasher.update(repository.as_str().as_bytes());
        hasher.update(b"\t");
        hasher.update(number.to_string().as_bytes());
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..24].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representations_of_the_same_id_compare_equal() {
        let plain: LabelId = serde_json::from_str("\"65A1F0C2B3D4E5F60718293A\"").expect("string");
        let oid: LabelId =
            serde_json::from_str(r#"{"$oid": "65a1f0c2b3d4e5f60718293a"}"#).expect("oid");
        let padded = LabelId::new("  65a1f0c2b3d4e5f60718293a ").expect("padded");
        assert_eq!(plain, oid);
        assert_eq!(oid, padded);
    }

    #[test]
    fn integer_ids_become_decimal_strings() {
        let id: UserId = serde_json::from_str("42").expect("integer");
        assert_eq!(id.as_str(), "42");
        assert_eq!(id, UserId::new("42").expect("string"));
    }

    #[test]
    fn non_hex_ids_keep_their_case() {
        let id = UserId::new("Octocat").expect("login");
        assert_eq!(id.as_str(), "Octocat");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(LabelId::new("   ").is_err());
        assert!(serde_json::from_str::<LabelId>("\"\"").is_err());
        assert!(serde_json::from_str::<LabelId>(r#"{"id": "x"}"#).is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = MilestoneId::new("ABC123").expect("id");
        assert_eq!(serde_json::to_string(&id).expect("json"), "\"ABC123\"");
    }

    #[test]
    fn only_object_id_and_digest_shapes_are_lower_cased() {
        assert_eq!(UserId::new("Ada").expect("login").as_str(), "Ada");
        assert_eq!(UserId::new("Bob").expect("login").as_str(), "Bob");
        assert_ne!(UserId::new("Ada"), UserId::new("ada"));

        let oid = RepositoryId::new("65A1F0C2B3D4E5F60718293A").expect("oid");
        assert_eq!(oid.as_str(), "65a1f0c2b3d4e5f60718293a");
        let digest = "AB".repeat(32);
        assert_eq!(LabelId::new(&digest).expect("digest").as_str(), "ab".repeat(32));
    }

    #[test]
    fn derived_aggregate_ids_are_stable_and_distinct() {
        let repo = RepositoryId::new("r1").expect("repo");
        let a = AggregateId::derive(AggregateKind::Issue, &repo, 1);
        assert_eq!(a, AggregateId::derive(AggregateKind::Issue, &repo, 1));
        assert_ne!(a, AggregateId::derive(AggregateKind::Issue, &repo, 2));
        assert_ne!(a, AggregateId::derive(AggregateKind::PullRequest, &repo, 1));
        assert_eq!(a.as_str().len(), 24);
    }

    #[test]
    fn aggregate_kind_parses_both_spellings() {
        assert_eq!("pull-request".parse::<AggregateKind>(), Ok(AggregateKind::PullRequest));
        assert_eq!("pull_request".parse::<AggregateKind>(), Ok(AggregateKind::PullRequest));
        assert_eq!(AggregateKind::PullRequest.to_string(), "pull request");
        assert!("epic".parse::<AggregateKind>().is_err());
    }
}
