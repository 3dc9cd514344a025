//! Owner-scoped record URIs
//!
//! Every cached record is addressed by `at://<did>/<collection-nsid>/<record-key>`.
//! The NSID segment tells us which entity kind the record is, so a queue entry
//! for a delete (which carries no payload) can still be routed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationFault;

pub const RECIPE_NSID: &str = "app.pantry.recipe";
pub const COLLECTION_NSID: &str = "app.pantry.collection";

const SCHEME: &str = "at://";

/// The two top-level record kinds the cache knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Recipe,
    Collection,
}

impl EntityKind {
    pub fn nsid(&self) -> &'static str {
        match self {
            EntityKind::Recipe => RECIPE_NSID,
            EntityKind::Collection => COLLECTION_NSID,
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            RECIPE_NSID => Some(EntityKind::Recipe),
            COLLECTION_NSID => Some(EntityKind::Collection),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Recipe => "recipe",
            EntityKind::Collection => "collection",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A syntactically valid `at://` URI.
///
/// Construction always goes through [`AtUri::parse`], so holding an `AtUri`
/// means the authority, collection and record key segments are well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AtUri(String);

impl AtUri {
    pub fn parse(raw: &str) -> Result<Self, ValidationFault> {
        let malformed = |reason: &str| ValidationFault::MalformedUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let rest = raw
            .strip_prefix(SCHEME)
            .ok_or_else(|| malformed("missing at:// scheme"))?;

        let mut parts = rest.split('/');
        let authority = parts.next().unwrap_or_default();
        let collection = parts.next().ok_or_else(|| malformed("missing collection"))?;
        let record_key = parts.next().ok_or_else(|| malformed("missing record key"))?;
        if parts.next().is_some() {
            return Err(malformed("too many path segments"));
        }

        if !is_valid_did(authority) {
            return Err(malformed("authority is not a did"));
        }
        if !is_valid_nsid(collection) {
            return Err(malformed("collection is not an nsid"));
        }
        if !is_valid_record_key(record_key) {
            return Err(malformed("invalid record key"));
        }

        Ok(Self(raw.to_string()))
    }

    /// Mint a fresh URI for a record owned by `did`.
    ///
    /// Record keys are time-ordered so records created later sort later.
    pub fn mint(did: &str, kind: EntityKind) -> Result<Self, ValidationFault> {
        let record_key = uuid::Uuid::now_v7().simple().to_string();
        Self::parse(&format!("{SCHEME}{did}/{}/{record_key}", kind.nsid()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> (&str, &str, &str) {
        let rest = &self.0[SCHEME.len()..];
        let mut parts = rest.splitn(3, '/');
        let authority = parts.next().unwrap_or_default();
        let collection = parts.next().unwrap_or_default();
        let record_key = parts.next().unwrap_or_default();
        (authority, collection, record_key)
    }

    /// The owning account's DID.
    pub fn authority(&self) -> &str {
        self.segments().0
    }

    pub fn collection(&self) -> &str {
        self.segments().1
    }

    pub fn record_key(&self) -> &str {
        self.segments().2
    }

    /// Entity kind implied by the collection NSID, if it is one we cache.
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::from_nsid(self.collection())
    }

    pub fn expect_kind(&self, expected: EntityKind) -> Result<(), ValidationFault> {
        match self.kind() {
            Some(actual) if actual == expected => Ok(()),
            actual => Err(ValidationFault::WrongKind {
                uri: self.0.clone(),
                expected,
                actual: actual.map(|k| k.as_str()).unwrap_or("unknown"),
            }),
        }
    }
}

fn is_valid_did(authority: &str) -> bool {
    let Some(rest) = authority.strip_prefix("did:") else {
        return false;
    };
    match rest.split_once(':') {
        Some((method, id)) => {
            !method.is_empty()
                && method.chars().all(|c| c.is_ascii_lowercase())
                && !id.is_empty()
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-'))
        }
        None => false,
    }
}

fn is_valid_nsid(nsid: &str) -> bool {
    let segments: Vec<&str> = nsid.split('.').collect();
    segments.len() >= 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !s.starts_with('-')
        })
}

fn is_valid_record_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key.len() <= 512
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-'))
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AtUri {
    type Err = ValidationFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AtUri {
    type Error = ValidationFault;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AtUri> for String {
    fn from(uri: AtUri) -> Self {
        uri.0
    }
}

impl AsRef<str> for AtUri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
