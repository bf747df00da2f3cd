// src/types.rs

//! Small identifier and value types shared across the orchestrator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Identifier of an evidence image. Owned by the external evidence store.
pub type EvidenceId = u64;

/// Identifier of a worker inside the pool. Fresh ids are issued when a
/// worker is recycled.
pub type WorkerId = u64;

/// Plugin parameters (pid, address range, in-image path, ...).
///
/// A `BTreeMap` keeps iteration order stable, which the dedup key relies on.
pub type Parameters = BTreeMap<String, String>;

/// Unique task identifier, issued monotonically by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(TaskId)
            .map_err(|e| format!("invalid task id '{s}': {e}"))
    }
}

/// Deterministic identity of "the same requested work".
///
/// Computed with blake3 over the evidence id, plugin name and the
/// *normalized* parameters. Two submissions that normalize to the same
/// parameters always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn compute(evidence_id: EvidenceId, plugin: &str, params: &Parameters) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&evidence_id.to_le_bytes());
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        update_framed(&mut hasher, plugin);
        for (key, value) in params {
            update_framed(&mut hasher, key);
            update_framed(&mut hasher, value);
        }
        DedupKey(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn update_framed(hasher: &mut blake3::Hasher, part: &str) {
    hasher.update(&(part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let valid = s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit());
        if valid {
            Ok(DedupKey(s.to_ascii_lowercase()))
        } else {
            Err(format!("invalid dedup key '{s}' (expected 64 hex characters)"))
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Ledger and store critical sections never leave state half-written, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
