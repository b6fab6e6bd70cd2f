//! Handler registry: which body runs each job kind, at what priority, with how
//! many retries.

use std::collections::HashMap;
use std::sync::Arc;

use super::priority::{default_max_retries, PriorityTable};
use super::{JobDefinition, JobHandler, JobKey, JobKind};
use crate::error::{Result, TollgateError};

/// A kind with everything needed to schedule and run it.
#[derive(Clone)]
pub struct RegisteredKind {
    pub kind: JobKind,
    pub handler: Arc<dyn JobHandler>,
    pub priority: i32,
    pub max_retries: u32,
}

impl std::fmt::Debug for RegisteredKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredKind")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// Registry of job handlers.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    kinds: HashMap<JobKind, RegisteredKind>,
    priorities: PriorityTable,
}

impl JobRegistry {
    pub fn new(priorities: PriorityTable) -> Self {
        Self {
            kinds: HashMap::new(),
            priorities,
        }
    }

    /// Register the handler for `kind` with the built-in retry budget.
    pub fn register(self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.register_with_retries(kind, handler, default_max_retries(kind))
    }

    pub fn register_with_retries(
        mut self,
        kind: JobKind,
        handler: Arc<dyn JobHandler>,
        max_retries: u32,
    ) -> Self {
        let priority = self.priorities.priority(kind);
        self.kinds.insert(
            kind,
            RegisteredKind {
                kind,
                handler,
                priority,
                max_retries,
            },
        );
        self
    }

    /// Look up a kind.
    ///
    /// # Errors
    ///
    /// Fails with `HandlerNotRegistered` when no handler was registered.
    pub fn resolve(&self, kind: JobKind) -> Result<&RegisteredKind> {
        self.kinds
            .get(&kind)
            .ok_or_else(|| TollgateError::handler_not_registered(kind.as_str()))
    }

    /// Priority of a kind, registered or not.
    pub fn priority(&self, kind: JobKind) -> i32 {
        self.priorities.priority(kind)
    }

    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    pub fn kinds(&self) -> impl Iterator<Item = &RegisteredKind> {
        self.kinds.values()
    }

    /// Build a definition carrying the kind's retry budget.
    ///
    /// Kinds with no retry budget get no retry metadata.
    pub fn new_definition(
        &self,
        kind: JobKind,
        key: JobKey,
        payload: serde_json::Value,
    ) -> Result<JobDefinition> {
        let registered = self.resolve(kind)?;
        let definition = JobDefinition::new(key, kind, payload);
        Ok(if registered.max_retries > 0 {
            definition.with_max_retries(registered.max_retries)
        } else {
            definition
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::{JobContext, JobResult};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    #[test]
    fn test_resolve() {
        let registry = JobRegistry::default().register(JobKind::MirrorExtension, Arc::new(Noop));

        let registered = registry.resolve(JobKind::MirrorExtension).unwrap();
        assert_eq!(registered.priority, 5);
        assert_eq!(registered.max_retries, 10);

        let err = registry.resolve(JobKind::PublishExtension).unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandlerNotRegistered);
    }

    #[test]
    fn test_new_definition_attaches_retry_budget() {
        let registry = JobRegistry::default()
            .register(JobKind::PublishExtension, Arc::new(Noop))
            .register(JobKind::MirrorSitemap, Arc::new(Noop));

        let publish = registry
            .new_definition(
                JobKind::PublishExtension,
                JobKey::new("ext-1", "publish"),
                serde_json::Value::Null,
            )
            .unwrap();
        assert_eq!(publish.retry.map(|r| r.max_retries), Some(3));

        let sitemap = registry
            .new_definition(
                JobKind::MirrorSitemap,
                JobKey::new("sitemap", "mirror"),
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(sitemap.retry.is_none());
    }

    #[test]
    fn test_priority_overrides_flow_into_registration() {
        let overrides = HashMap::from([("mirror_extension".to_string(), 3)]);
        let registry = JobRegistry::new(PriorityTable::with_overrides(&overrides).unwrap())
            .register_with_retries(JobKind::MirrorExtension, Arc::new(Noop), 1);

        let registered = registry.resolve(JobKind::MirrorExtension).unwrap();
        assert_eq!(registered.priority, 3);
        assert_eq!(registered.max_retries, 1);
    }
}
