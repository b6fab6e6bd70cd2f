//! Durable store access.
//!
//! The engine persists four record kinds: recurring bindings, queue entries,
//! chain links and the runtime's job definitions. [`EngineStore`] is the
//! access contract; [`InMemoryStore`] and [`PostgresStore`] implement it.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, TollgateError};
use crate::jobs::{JobDefinition, JobKey, Trigger};

// ═══════════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════════

/// State shared by queue entries and chain links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    Waiting,
    Complete,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WAITING" => Ok(Self::Waiting),
            "COMPLETE" => Ok(Self::Complete),
            other => Err(TollgateError::store(format!("unknown entry state '{}'", other))),
        }
    }
}

/// Maps a recurring job's logical name to the job currently installed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBinding {
    pub id: Uuid,
    pub logical_name: String,
    pub job_key: JobKey,
    /// Normalized cron expression
    pub schedule: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecurringBinding {
    pub fn new(logical_name: impl Into<String>, job_key: JobKey, schedule: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            logical_name: logical_name.into(),
            job_key,
            schedule: schedule.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A job admitted to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Insertion sequence; breaks priority ties
    pub id: i64,
    pub instance: String,
    pub queue: String,
    pub key: JobKey,
    pub priority: i32,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// "When `first` succeeds, release `second`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub id: i64,
    pub instance: String,
    pub chain: String,
    pub first: JobKey,
    pub second: JobKey,
    pub state: EntryState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job definition with its pending trigger, as persisted by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub definition: JobDefinition,
    pub trigger: Option<Trigger>,
    pub updated_at: DateTime<Utc>,
}

impl StoredJob {
    pub fn new(definition: JobDefinition, trigger: Option<Trigger>) -> Self {
        Self {
            definition,
            trigger,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &JobKey {
        &self.definition.key
    }
}

/// Entry counts of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub complete: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Access contract over the durable store.
///
/// Queue entries and chain links are scoped by scheduler instance name; every
/// read filters on the instance passed in.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Recurring bindings
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_binding(&self, logical_name: &str) -> Result<Option<RecurringBinding>>;

    /// Fails with `DuplicateRecord` if the logical name is taken.
    async fn insert_binding(&self, binding: &RecurringBinding) -> Result<()>;

    async fn update_binding(&self, binding: &RecurringBinding) -> Result<()>;

    async fn delete_binding(&self, logical_name: &str) -> Result<bool>;

    async fn list_bindings(&self) -> Result<Vec<RecurringBinding>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Queue entries
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
    ) -> Result<Option<QueueEntry>>;

    /// Insert a WAITING entry. Fails with `DuplicateRecord` if the key is
    /// already present in the queue.
    async fn insert_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
        priority: i32,
    ) -> Result<QueueEntry>;

    /// Put an entry back to WAITING with a new priority, keeping its sequence.
    async fn reset_queue_entry(&self, id: i64, priority: i32) -> Result<()>;

    /// Up to `limit` WAITING entries, ascending priority then sequence.
    async fn fetch_waiting(&self, instance: &str, queue: &str, limit: usize)
        -> Result<Vec<QueueEntry>>;

    async fn complete_queue_entry(&self, id: i64) -> Result<()>;

    async fn list_queue_entries(
        &self,
        instance: &str,
        queue: Option<&str>,
        state: Option<EntryState>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>>;

    async fn queue_counts(&self, instance: &str, queue: &str) -> Result<QueueCounts>;

    // ─────────────────────────────────────────────────────────────────────────
    // Chain links
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a WAITING link, or reset an identical pair to WAITING.
    ///
    /// Other WAITING links of the same chain and first job are retired to
    /// COMPLETE, so at most one link per `(chain, first)` is ever WAITING.
    async fn upsert_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
        second: &JobKey,
    ) -> Result<ChainLink>;

    /// Oldest WAITING link for `(chain, first)`.
    async fn find_waiting_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
    ) -> Result<Option<ChainLink>>;

    /// Names of chains with a WAITING link on `first`.
    async fn waiting_chains_for(&self, instance: &str, first: &JobKey) -> Result<Vec<String>>;

    /// Compare-and-set the link state. Returns false if the link was not in
    /// state `from`.
    async fn transition_chain_link(&self, id: i64, from: EntryState, to: EntryState)
        -> Result<bool>;

    async fn list_chain_links(
        &self,
        instance: &str,
        chain: Option<&str>,
        state: Option<EntryState>,
    ) -> Result<Vec<ChainLink>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Job definitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or overwrite a job definition and its trigger.
    async fn save_job(&self, job: &StoredJob) -> Result<()>;

    async fn find_job(&self, key: &JobKey) -> Result<Option<StoredJob>>;

    async fn delete_job(&self, key: &JobKey) -> Result<bool>;

    /// Jobs with a pending trigger.
    async fn list_armed_jobs(&self) -> Result<Vec<StoredJob>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_state_parse() {
        assert_eq!(EntryState::from_str("waiting").unwrap(), EntryState::Waiting);
        assert_eq!(EntryState::from_str("COMPLETE").unwrap(), EntryState::Complete);
        assert!(EntryState::from_str("RUNNING").is_err());
    }

    #[test]
    fn test_entry_state_serde() {
        let json = serde_json::to_string(&EntryState::Waiting).unwrap();
        assert_eq!(json, "\"WAITING\"");
    }
}
