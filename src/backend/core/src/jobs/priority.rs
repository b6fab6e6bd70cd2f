//! Static priorities per job kind. Lower values are dispatched first.

use std::collections::HashMap;
use std::str::FromStr;

use super::JobKind;
use crate::error::Result;

/// Priority lookup for every [`JobKind`].
#[derive(Debug, Clone)]
pub struct PriorityTable {
    overrides: HashMap<JobKind, i32>,
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PriorityTable {
    /// The built-in priorities.
    pub fn standard() -> Self {
        Self {
            overrides: HashMap::new(),
        }
    }

    /// Built-in priorities with per-kind overrides keyed by kind name.
    ///
    /// # Errors
    ///
    /// Fails with `UnknownJobKind` if a key does not name a kind.
    pub fn with_overrides(overrides: &HashMap<String, i32>) -> Result<Self> {
        let overrides = overrides
            .iter()
            .map(|(name, priority)| Ok((JobKind::from_str(name)?, *priority)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { overrides })
    }

    pub fn priority(&self, kind: JobKind) -> i32 {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_priority(kind))
    }

    /// Kinds in dispatch order, with their priority.
    pub fn entries(&self) -> Vec<(JobKind, i32)> {
        let mut entries: Vec<_> = JobKind::ALL
            .into_iter()
            .map(|kind| (kind, self.priority(kind)))
            .collect();
        entries.sort_by_key(|(kind, priority)| (*priority, *kind));
        entries
    }
}

/// Built-in priority of a kind.
pub fn default_priority(kind: JobKind) -> i32 {
    match kind {
        JobKind::PublishExtension => 1,
        JobKind::DeleteExtension => 2,
        JobKind::MirrorMetadata => 4,
        JobKind::MirrorExtension => 5,
        JobKind::MirrorSitemap => 8,
    }
}

/// Built-in retry budget of a kind.
pub fn default_max_retries(kind: JobKind) -> u32 {
    match kind {
        JobKind::PublishExtension | JobKind::DeleteExtension => 3,
        JobKind::MirrorMetadata | JobKind::MirrorExtension => 10,
        JobKind::MirrorSitemap => 0,
    }
}
