//! Typed entity identifiers.
//!
//! One generic newtype, [`Id`], branded by a zero-sized marker type so that
//! session, message, checkpoint, and snapshot ids cannot be swapped at call
//! sites even though they all wrap the same string representation.
//!
//! Ids are UUID v7, which embeds a millisecond timestamp in the high bits:
//! ids minted later in a session sort after earlier ones, and that lexical
//! ordering is what gives the snapshot store its monotonic-id guarantee
//! without a separate counter.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Brand for session ids.
pub enum SessionTag {}
/// Brand for conversation message ids.
pub enum MessageTag {}
/// Brand for summary checkpoint ids.
pub enum CheckpointTag {}
/// Brand for persisted snapshot ids.
pub enum SnapshotTag {}

/// Unique identifier for a session.
pub type SessionId = Id<SessionTag>;
/// Unique identifier for a conversation message.
pub type MessageId = Id<MessageTag>;
/// Unique identifier for a summary checkpoint.
pub type CheckpointId = Id<CheckpointTag>;
/// Unique identifier for a persisted snapshot.
pub type SnapshotId = Id<SnapshotTag>;

/// A string id branded by the marker `M`.
///
/// The marker is phantom; only the string is stored, compared, hashed, and
/// serialized. All trait impls are written out by hand so no bounds leak
/// onto `M` (the markers are uninhabited and derive nothing).
pub struct Id<M> {
    value: String,
    _brand: PhantomData<fn() -> M>,
}

impl<M> Id<M> {
    /// Mint a fresh time-ordered id (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(Uuid::now_v7().to_string())
    }

    fn wrap(value: String) -> Self {
        Self {
            value,
            _brand: PhantomData,
        }
    }

    /// View the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Unwrap into the underlying `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.value
    }
}

impl<M> Default for Id<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> From<String> for Id<M> {
    fn from(value: String) -> Self {
        Self::wrap(value)
    }
}

impl<M> From<&str> for Id<M> {
    fn from(value: &str) -> Self {
        Self::wrap(value.to_owned())
    }
}

impl<M> Clone for Id<M> {
    fn clone(&self) -> Self {
        Self::wrap(self.value.clone())
    }
}

impl<M> fmt::Debug for Id<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<M> fmt::Display for Id<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<M> PartialEq for Id<M> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<M> Eq for Id<M> {}

impl<M> Hash for Id<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<M> PartialOrd for Id<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> Ord for Id<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<M> Serialize for Id<M> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, M> Deserialize<'de> for Id<M> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::wrap)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
