//! Task identifiers.
//!
//! Ids are ULIDs: the timestamp prefix keeps them sortable by submission time
//! and the random suffix keeps ids submitted within the same millisecond apart.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "task-";

/// Identifier of a submitted task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    /// Generate a fresh id stamped with the current wall-clock time.
    pub fn generate() -> Self {
        let timestamp_ms = Utc::now().timestamp_millis() as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    /// Accepts both the displayed form (`task-<ULID>`) and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}
