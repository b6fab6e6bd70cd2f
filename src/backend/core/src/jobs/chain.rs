//! Chain coordinator: "when `first` succeeds, release `second`".
//!
//! Chained jobs bypass admission control. The second job takes over the
//! worker its predecessor just gave back, so it is triggered directly
//! instead of queued.

use std::sync::Arc;
use std::time::Duration;

use super::runtime::JobRuntime;
use super::{JobDefinition, JobKey};
use crate::error::Result;
use crate::store::{ChainLink, EngineStore, EntryState};
use crate::telemetry::EngineMetrics;

pub struct ChainCoordinator {
    store: Arc<dyn EngineStore>,
    runtime: Arc<dyn JobRuntime>,
}

impl ChainCoordinator {
    pub fn new(store: Arc<dyn EngineStore>, runtime: Arc<dyn JobRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Store `second` in the runtime without firing it and record a WAITING
    /// link from `first`.
    ///
    /// Linking `first` to a different job later supersedes this link.
    pub async fn link(&self, chain: &str, first: &JobKey, second: &JobDefinition) -> Result<ChainLink> {
        self.runtime.store_job(second, true).await?;
        let link = self
            .store
            .upsert_chain_link(self.runtime.instance_name(), chain, first, &second.key)
            .await?;

        tracing::info!(chain, first = %first, second = %second.key, "Jobs chained");
        Ok(link)
    }

    /// Hand off from `first` to its successor in `chain`.
    ///
    /// Returns the released job, or `None` when `first` failed, was not
    /// chained, or its link was already consumed.
    ///
    /// # Errors
    ///
    /// If the runtime rejects the release the link goes back to WAITING and
    /// the error is returned.
    pub async fn on_job_completed(
        &self,
        chain: &str,
        first: &JobKey,
        succeeded: bool,
    ) -> Result<Option<JobKey>> {
        if !succeeded {
            return Ok(None);
        }

        let instance = self.runtime.instance_name();
        let Some(link) = self.store.find_waiting_chain_link(instance, chain, first).await? else {
            return Ok(None);
        };

        // Claim the link first so a repeated notification cannot release twice.
        if !self
            .store
            .transition_chain_link(link.id, EntryState::Waiting, EntryState::Complete)
            .await?
        {
            tracing::debug!(chain, first = %first, "Chain link already consumed");
            return Ok(None);
        }

        if let Err(error) = self.runtime.trigger_job(&link.second, Duration::ZERO).await {
            tracing::warn!(
                chain,
                first = %first,
                second = %link.second,
                error = %error,
                "Chain hand-off failed, link reopened"
            );
            if let Err(revert) = self
                .store
                .transition_chain_link(link.id, EntryState::Complete, EntryState::Waiting)
                .await
            {
                tracing::error!(chain, link_id = link.id, error = %revert, "Failed to reopen chain link");
            }
            return Err(error);
        }

        EngineMetrics::record_chain_handoff(chain);
        tracing::info!(chain, first = %first, second = %link.second, "Chain advanced");
        Ok(Some(link.second))
    }

    /// Advance every chain with a WAITING link on `first`.
    ///
    /// All chains are attempted; the first error is returned afterwards.
    pub async fn advance(&self, first: &JobKey, succeeded: bool) -> Result<Vec<JobKey>> {
        if !succeeded {
            return Ok(Vec::new());
        }

        let chains = self
            .store
            .waiting_chains_for(self.runtime.instance_name(), first)
            .await?;

        let mut released = Vec::new();
        let mut first_error = None;
        for chain in chains {
            match self.on_job_completed(&chain, first, true).await {
                Ok(Some(second)) => released.push(second),
                Ok(None) => {}
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(released),
        }
    }

    pub async fn links(&self, chain: Option<&str>, state: Option<EntryState>) -> Result<Vec<ChainLink>> {
        self.store
            .list_chain_links(self.runtime.instance_name(), chain, state)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::runtime::RecordingRuntime;
    use crate::jobs::JobKind;
    use crate::store::InMemoryStore;

    fn definition(name: &str) -> JobDefinition {
        JobDefinition::new(
            JobKey::new(name, "mirror"),
            JobKind::MirrorExtension,
            serde_json::Value::Null,
        )
    }

    fn coordinator() -> (Arc<InMemoryStore>, Arc<RecordingRuntime>, ChainCoordinator) {
        let store = InMemoryStore::arc();
        let runtime = RecordingRuntime::arc("test", 2);
        let chain = ChainCoordinator::new(store.clone(), runtime.clone());
        (store, runtime, chain)
    }

    #[tokio::test]
    async fn test_failure_does_not_advance() {
        let (_, runtime, chain) = coordinator();
        let first = JobKey::new("x", "mirror");
        chain.link("sync", &first, &definition("y")).await.unwrap();

        assert_eq!(chain.on_job_completed("sync", &first, false).await.unwrap(), None);
        assert!(runtime.released().is_empty());
    }

    #[tokio::test]
    async fn test_success_releases_once() {
        let (_, runtime, chain) = coordinator();
        let first = JobKey::new("x", "mirror");
        chain.link("sync", &first, &definition("y")).await.unwrap();

        let released = chain.on_job_completed("sync", &first, true).await.unwrap();
        assert_eq!(released, Some(JobKey::new("y", "mirror")));
        assert_eq!(chain.on_job_completed("sync", &first, true).await.unwrap(), None);
        assert_eq!(runtime.released().len(), 1);
    }

    #[tokio::test]
    async fn test_unchained_job() {
        let (_, _, chain) = coordinator();
        let released = chain
            .on_job_completed("sync", &JobKey::new("lonely", "mirror"), true)
            .await
            .unwrap();
        assert!(released.is_none());
    }

    #[tokio::test]
    async fn test_failed_trigger_reopens_link() {
        let (_, runtime, chain) = coordinator();
        let first = JobKey::new("x", "mirror");
        let second = definition("y");
        chain.link("sync", &first, &second).await.unwrap();
        runtime.unschedule(&second.key).await.unwrap();

        let err = chain.on_job_completed("sync", &first, true).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);

        let waiting = chain.links(Some("sync"), Some(EntryState::Waiting)).await.unwrap();
        assert_eq!(waiting.len(), 1);
    }

    #[tokio::test]
    async fn test_advance_walks_all_chains() {
        let (_, runtime, chain) = coordinator();
        let first = JobKey::new("x", "mirror");
        chain.link("metadata", &first, &definition("m")).await.unwrap();
        chain.link("sitemap", &first, &definition("s")).await.unwrap();

        let mut released = chain.advance(&first, true).await.unwrap();
        released.sort();
        assert_eq!(released, vec![JobKey::new("m", "mirror"), JobKey::new("s", "mirror")]);
        assert_eq!(runtime.released().len(), 2);
    }

    #[tokio::test]
    async fn test_relink_uses_latest_second() {
        let (_, runtime, chain) = coordinator();
        let first = JobKey::new("x", "mirror");
        chain.link("sync", &first, &definition("old")).await.unwrap();
        chain.link("sync", &first, &definition("new")).await.unwrap();

        chain.on_job_completed("sync", &first, true).await.unwrap();
        assert_eq!(runtime.released(), vec![JobKey::new("new", "mirror")]);
    }
}
