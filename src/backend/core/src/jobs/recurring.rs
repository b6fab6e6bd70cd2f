//! Recurring job registry.
//!
//! A logical name ("mirror-sitemap") maps to at most one scheduled job through
//! a durable [`RecurringBinding`]. Installing is idempotent so it can run on
//! every process start; changing the cron expression swaps the scheduled job
//! in one step.

use serde::Serialize;
use std::sync::Arc;
use std::str::FromStr;
use uuid::Uuid;

use super::registry::JobRegistry;
use super::runtime::JobRuntime;
use super::{CronSchedule, JobKey, JobKind};
use crate::config::RecurringJobConfig;
use crate::error::Result;
use crate::store::{EngineStore, RecurringBinding};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstallOutcome {
    /// First installation under this name
    Installed { key: JobKey },
    /// Same schedule already installed
    Unchanged { key: JobKey },
    /// Binding was intact but its job had vanished from the runtime
    Restored { key: JobKey },
    /// Previous job torn down, new one installed
    Rescheduled { previous: JobKey, key: JobKey },
}

impl InstallOutcome {
    pub fn key(&self) -> &JobKey {
        match self {
            Self::Installed { key }
            | Self::Unchanged { key }
            | Self::Restored { key }
            | Self::Rescheduled { key, .. } => key,
        }
    }
}

/// Result of reconciling the configured recurring jobs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub unchanged: Vec<String>,
    pub rescheduled: Vec<String>,
    pub uninstalled: Vec<String>,
}

pub struct RecurringJobRegistry {
    store: Arc<dyn EngineStore>,
    runtime: Arc<dyn JobRuntime>,
    registry: Arc<JobRegistry>,
}

impl RecurringJobRegistry {
    pub fn new(
        store: Arc<dyn EngineStore>,
        runtime: Arc<dyn JobRuntime>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            store,
            runtime,
            registry,
        }
    }

    /// Install `name` on `cron`, replacing an existing schedule.
    ///
    /// # Errors
    ///
    /// A malformed cron expression or an unregistered kind fails before
    /// anything is touched. Runtime and store failures are returned as is.
    pub async fn install(
        &self,
        name: &str,
        cron: &str,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Result<InstallOutcome> {
        let schedule = CronSchedule::parse(cron)?;
        self.registry.resolve(kind)?;

        match self.store.find_binding(name).await? {
            Some(binding) if binding.schedule == schedule.as_str() => {
                if self.runtime.job(&binding.job_key).await?.is_some() {
                    tracing::debug!(name, cron = %schedule, "Recurring job unchanged");
                    return Ok(InstallOutcome::Unchanged {
                        key: binding.job_key,
                    });
                }

                let definition = self
                    .registry
                    .new_definition(kind, binding.job_key.clone(), payload)?;
                self.runtime.schedule_recurring(&definition, &schedule).await?;
                tracing::warn!(name, job = %binding.job_key, "Recurring job restored");
                Ok(InstallOutcome::Restored {
                    key: binding.job_key,
                })
            }
            Some(mut binding) => {
                let previous = binding.job_key.clone();
                self.runtime.unschedule(&previous).await?;

                let key = Self::job_key(name);
                let definition = self.registry.new_definition(kind, key.clone(), payload)?;
                self.runtime.schedule_recurring(&definition, &schedule).await?;

                let old_schedule = std::mem::replace(&mut binding.schedule, schedule.as_str().to_string());
                binding.job_key = key.clone();
                binding.updated_at = chrono::Utc::now();
                self.store.update_binding(&binding).await?;

                tracing::info!(
                    name,
                    previous = %previous,
                    job = %key,
                    from = %old_schedule,
                    to = %schedule,
                    "Recurring job rescheduled"
                );
                Ok(InstallOutcome::Rescheduled { previous, key })
            }
            None => {
                let key = Self::job_key(name);
                let definition = self.registry.new_definition(kind, key.clone(), payload)?;
                self.runtime.schedule_recurring(&definition, &schedule).await?;

                let binding = RecurringBinding::new(name, key.clone(), schedule.as_str());
                if let Err(error) = self.store.insert_binding(&binding).await {
                    if let Err(rollback) = self.runtime.unschedule(&key).await {
                        tracing::error!(name, job = %key, error = %rollback, "Failed to roll back recurring job");
                    }
                    return Err(error);
                }

                tracing::info!(name, job = %key, cron = %schedule, "Recurring job installed");
                Ok(InstallOutcome::Installed { key })
            }
        }
    }

    /// Tear down the job installed under `name`. Returns false if there was none.
    pub async fn uninstall(&self, name: &str) -> Result<bool> {
        let Some(binding) = self.store.find_binding(name).await? else {
            return Ok(false);
        };

        self.runtime.unschedule(&binding.job_key).await?;
        self.store.delete_binding(name).await?;

        tracing::info!(name, job = %binding.job_key, "Recurring job uninstalled");
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<RecurringBinding>> {
        self.store.list_bindings().await
    }

    /// Install enabled entries and uninstall disabled ones.
    ///
    /// Bindings absent from `configs` are left alone.
    pub async fn sync(&self, configs: &[RecurringJobConfig]) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for config in configs {
            if !config.enabled {
                if self.uninstall(&config.name).await? {
                    report.uninstalled.push(config.name.clone());
                }
                continue;
            }

            let kind = JobKind::from_str(&config.kind)?;
            match self
                .install(&config.name, &config.cron, kind, config.payload.clone())
                .await?
            {
                InstallOutcome::Installed { .. } | InstallOutcome::Restored { .. } => {
                    report.installed.push(config.name.clone())
                }
                InstallOutcome::Unchanged { .. } => report.unchanged.push(config.name.clone()),
                InstallOutcome::Rescheduled { .. } => report.rescheduled.push(config.name.clone()),
            }
        }

        Ok(report)
    }

    fn job_key(name: &str) -> JobKey {
        JobKey::new(format!("recurring-{}", Uuid::new_v4()), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::runtime::RecordingRuntime;
    use crate::jobs::{JobContext, JobHandler, JobResult, PriorityTable};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        async fn execute(&self, _ctx: &JobContext) -> JobResult {
            Ok(())
        }
    }

    fn recurring() -> (Arc<InMemoryStore>, Arc<RecordingRuntime>, RecurringJobRegistry) {
        let store = InMemoryStore::arc();
        let runtime = RecordingRuntime::arc("test", 2);
        let registry = Arc::new(
            JobRegistry::new(PriorityTable::standard()).register(JobKind::MirrorSitemap, Arc::new(Noop)),
        );
        let recurring = RecurringJobRegistry::new(store.clone(), runtime.clone(), registry);
        (store, runtime, recurring)
    }

    #[tokio::test]
    async fn test_install_then_same_schedule_is_noop() {
        let (store, runtime, recurring) = recurring();

        let first = recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();
        let second = recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();

        assert!(matches!(first, InstallOutcome::Installed { .. }));
        assert_eq!(second, InstallOutcome::Unchanged { key: first.key().clone() });
        assert_eq!(runtime.recurring().len(), 1);
        assert_eq!(store.list_bindings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_schedule_swaps_job() {
        let (store, runtime, recurring) = recurring();

        let first = recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();
        let second = recurring
            .install("Sync", "0 6 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();

        let InstallOutcome::Rescheduled { previous, key } = second else {
            panic!("expected reschedule, got {second:?}");
        };
        assert_eq!(&previous, first.key());
        assert_eq!(runtime.recurring(), vec![(key.clone(), "0 0 6 * * *".to_string())]);

        let binding = store.find_binding("Sync").await.unwrap().unwrap();
        assert_eq!(binding.job_key, key);
        assert_eq!(binding.schedule, "0 0 6 * * *");
    }

    #[tokio::test]
    async fn test_lost_job_is_restored() {
        let (_, runtime, recurring) = recurring();
        let first = recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();
        runtime.unschedule(first.key()).await.unwrap();

        let again = recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();
        assert_eq!(again, InstallOutcome::Restored { key: first.key().clone() });
        assert_eq!(runtime.recurring().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_fails_fast() {
        let (store, runtime, recurring) = recurring();

        let err = recurring
            .install("Sync", "whenever", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCronExpression);

        let err = recurring
            .install("Sync", "0 0 * * *", JobKind::PublishExtension, serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::HandlerNotRegistered);

        assert!(runtime.recurring().is_empty());
        assert!(store.list_bindings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall() {
        let (store, runtime, recurring) = recurring();
        assert!(!recurring.uninstall("Sync").await.unwrap());

        recurring
            .install("Sync", "0 0 * * *", JobKind::MirrorSitemap, serde_json::Value::Null)
            .await
            .unwrap();
        assert!(recurring.uninstall("Sync").await.unwrap());
        assert!(runtime.recurring().is_empty());
        assert!(store.find_binding("Sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_toggles_feature() {
        let (_, runtime, recurring) = recurring();
        let mut config = RecurringJobConfig {
            name: "Sync".to_string(),
            cron: "0 0 * * *".to_string(),
            kind: "mirror_sitemap".to_string(),
            payload: serde_json::Value::Null,
            enabled: true,
        };

        let report = recurring.sync(std::slice::from_ref(&config)).await.unwrap();
        assert_eq!(report.installed, vec!["Sync".to_string()]);

        config.enabled = false;
        let report = recurring.sync(&[config]).await.unwrap();
        assert_eq!(report.uninstalled, vec!["Sync".to_string()]);
        assert!(runtime.recurring().is_empty());
    }
}
