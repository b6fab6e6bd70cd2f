//! PostgreSQL store over the tables in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use super::{
    ChainLink, EngineStore, EntryState, QueueCounts, QueueEntry, RecurringBinding, StoredJob,
};
use crate::db::Database;
use crate::error::{ErrorCode, Result, TollgateError};
use crate::jobs::{JobDefinition, JobKey, JobKind, RetryMetadata, Trigger};

const BINDING_COLUMNS: &str =
    "id, logical_name, job_name, job_group, schedule_expression, created_at, updated_at";

const QUEUE_COLUMNS: &str = "id, scheduler_instance, queue_name, job_name, job_group, \
     priority, state, created_at, updated_at";

const LINK_COLUMNS: &str = "id, scheduler_instance, chain_name, first_job_name, \
     first_job_group, second_job_name, second_job_group, state, created_at, updated_at";

const JOB_COLUMNS: &str = "job_name, job_group, kind, payload, retries, max_retries, \
     trigger_kind, cron_expression, next_fire_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(sqlx::FromRow)]
struct BindingRow {
    id: Uuid,
    logical_name: String,
    job_name: String,
    job_group: String,
    schedule_expression: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BindingRow> for RecurringBinding {
    fn from(row: BindingRow) -> Self {
        Self {
            id: row.id,
            logical_name: row.logical_name,
            job_key: JobKey::new(row.job_name, row.job_group),
            schedule: row.schedule_expression,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct QueueEntryRow {
    id: i64,
    scheduler_instance: String,
    queue_name: String,
    job_name: String,
    job_group: String,
    priority: i32,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QueueEntryRow> for QueueEntry {
    type Error = TollgateError;

    fn try_from(row: QueueEntryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            instance: row.scheduler_instance,
            queue: row.queue_name,
            key: JobKey::new(row.job_name, row.job_group),
            priority: row.priority,
            state: EntryState::from_str(&row.state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChainLinkRow {
    id: i64,
    scheduler_instance: String,
    chain_name: String,
    first_job_name: String,
    first_job_group: String,
    second_job_name: String,
    second_job_group: String,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChainLinkRow> for ChainLink {
    type Error = TollgateError;

    fn try_from(row: ChainLinkRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            instance: row.scheduler_instance,
            chain: row.chain_name,
            first: JobKey::new(row.first_job_name, row.first_job_group),
            second: JobKey::new(row.second_job_name, row.second_job_group),
            state: EntryState::from_str(&row.state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    job_name: String,
    job_group: String,
    kind: String,
    payload: serde_json::Value,
    retries: Option<i32>,
    max_retries: Option<i32>,
    trigger_kind: Option<String>,
    cron_expression: Option<String>,
    next_fire_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for StoredJob {
    type Error = TollgateError;

    fn try_from(row: JobRow) -> Result<Self> {
        let key = JobKey::new(row.job_name, row.job_group);

        let retry = match (row.retries, row.max_retries) {
            (Some(retries), Some(max_retries)) => Some(RetryMetadata {
                retries: retries.max(0) as u32,
                max_retries: max_retries.max(0) as u32,
            }),
            _ => None,
        };

        let trigger = match (row.trigger_kind.as_deref(), row.next_fire_at) {
            (Some("once"), Some(fire_at)) => Some(Trigger::Once { fire_at }),
            (Some("cron"), Some(next_fire_at)) => Some(Trigger::Cron {
                expression: row.cron_expression.unwrap_or_default(),
                next_fire_at,
            }),
            (None, _) => None,
            (Some(other), _) => {
                return Err(TollgateError::store(format!(
                    "job {} has malformed trigger '{}'",
                    key, other
                )))
            }
        };

        Ok(Self {
            definition: JobDefinition {
                key,
                kind: JobKind::from_str(&row.kind)?,
                payload: row.payload,
                retry,
            },
            trigger,
            updated_at: row.updated_at,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = TollgateError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }
}

#[async_trait]
impl EngineStore for PostgresStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Recurring bindings
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_binding(&self, logical_name: &str) -> Result<Option<RecurringBinding>> {
        let sql = format!(
            "SELECT {} FROM tollgate_recurring_bindings WHERE logical_name = $1",
            BINDING_COLUMNS
        );
        let row = sqlx::query_as::<_, BindingRow>(&sql)
            .bind(logical_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RecurringBinding::from))
    }

    async fn insert_binding(&self, binding: &RecurringBinding) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tollgate_recurring_bindings
                (id, logical_name, job_name, job_group, schedule_expression, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(binding.id)
        .bind(&binding.logical_name)
        .bind(&binding.job_key.name)
        .bind(&binding.job_key.group)
        .bind(&binding.schedule)
        .bind(binding.created_at)
        .bind(binding.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_binding(&self, binding: &RecurringBinding) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tollgate_recurring_bindings
            SET job_name = $2, job_group = $3, schedule_expression = $4, updated_at = NOW()
            WHERE logical_name = $1
            "#,
        )
        .bind(&binding.logical_name)
        .bind(&binding.job_key.name)
        .bind(&binding.job_key.group)
        .bind(&binding.schedule)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TollgateError::new(
                ErrorCode::BindingNotFound,
                format!("Recurring binding not found: {}", binding.logical_name),
            ));
        }
        Ok(())
    }

    async fn delete_binding(&self, logical_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tollgate_recurring_bindings WHERE logical_name = $1")
            .bind(logical_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_bindings(&self) -> Result<Vec<RecurringBinding>> {
        let sql = format!(
            "SELECT {} FROM tollgate_recurring_bindings ORDER BY logical_name",
            BINDING_COLUMNS
        );
        let rows = sqlx::query_as::<_, BindingRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RecurringBinding::from).collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue entries
    // ─────────────────────────────────────────────────────────────────────────

    async fn find_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
    ) -> Result<Option<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_queue_entries
            WHERE scheduler_instance = $1 AND queue_name = $2
              AND job_name = $3 AND job_group = $4
            "#,
            QUEUE_COLUMNS
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(instance)
            .bind(queue)
            .bind(&key.name)
            .bind(&key.group)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn insert_queue_entry(
        &self,
        instance: &str,
        queue: &str,
        key: &JobKey,
        priority: i32,
    ) -> Result<QueueEntry> {
        let sql = format!(
            r#"
            INSERT INTO tollgate_queue_entries
                (scheduler_instance, queue_name, job_name, job_group, priority, state)
            VALUES ($1, $2, $3, $4, $5, 'WAITING')
            RETURNING {}
            "#,
            QUEUE_COLUMNS
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(instance)
            .bind(queue)
            .bind(&key.name)
            .bind(&key.group)
            .bind(priority)
            .fetch_one(&self.pool)
            .await?;
        QueueEntry::try_from(row)
    }

    async fn reset_queue_entry(&self, id: i64, priority: i32) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tollgate_queue_entries
            SET state = 'WAITING', priority = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(priority)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TollgateError::not_found("queue entry", id.to_string()));
        }
        Ok(())
    }

    async fn fetch_waiting(
        &self,
        instance: &str,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_queue_entries
            WHERE scheduler_instance = $1 AND queue_name = $2 AND state = 'WAITING'
            ORDER BY priority ASC, id ASC
            LIMIT $3
            "#,
            QUEUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(instance)
            .bind(queue)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn complete_queue_entry(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tollgate_queue_entries SET state = 'COMPLETE', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TollgateError::not_found("queue entry", id.to_string()));
        }
        Ok(())
    }

    async fn list_queue_entries(
        &self,
        instance: &str,
        queue: Option<&str>,
        state: Option<EntryState>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_queue_entries
            WHERE scheduler_instance = $1
              AND ($2::TEXT IS NULL OR queue_name = $2)
              AND ($3::TEXT IS NULL OR state = $3)
            ORDER BY priority ASC, id ASC
            LIMIT $4
            "#,
            QUEUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(instance)
            .bind(queue)
            .bind(state.map(|s| s.as_str()))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn queue_counts(&self, instance: &str, queue: &str) -> Result<QueueCounts> {
        let (waiting, complete): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'WAITING'),
                COUNT(*) FILTER (WHERE state = 'COMPLETE')
            FROM tollgate_queue_entries
            WHERE scheduler_instance = $1 AND queue_name = $2
            "#,
        )
        .bind(instance)
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueCounts {
            waiting: waiting as u64,
            complete: complete as u64,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chain links
    // ─────────────────────────────────────────────────────────────────────────

    async fn upsert_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
        second: &JobKey,
    ) -> Result<ChainLink> {
        let mut tx = self.pool.begin().await?;

        // Serialize relinks of the same (chain, first) so each one sees the
        // link the previous one left WAITING.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || '/' || $2 || '/' || $3 || '/' || $4, 0))")
            .bind(instance)
            .bind(chain)
            .bind(&first.name)
            .bind(&first.group)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE tollgate_chain_links
            SET state = 'COMPLETE', updated_at = NOW()
            WHERE scheduler_instance = $1 AND chain_name = $2
              AND first_job_name = $3 AND first_job_group = $4
              AND state = 'WAITING'
              AND NOT (second_job_name = $5 AND second_job_group = $6)
            "#,
        )
        .bind(instance)
        .bind(chain)
        .bind(&first.name)
        .bind(&first.group)
        .bind(&second.name)
        .bind(&second.group)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"
            INSERT INTO tollgate_chain_links
                (scheduler_instance, chain_name, first_job_name, first_job_group,
                 second_job_name, second_job_group, state)
            VALUES ($1, $2, $3, $4, $5, $6, 'WAITING')
            ON CONFLICT ON CONSTRAINT tollgate_chain_links_pair_key
            DO UPDATE SET state = 'WAITING', updated_at = NOW()
            RETURNING {}
            "#,
            LINK_COLUMNS
        );
        let row = sqlx::query_as::<_, ChainLinkRow>(&sql)
            .bind(instance)
            .bind(chain)
            .bind(&first.name)
            .bind(&first.group)
            .bind(&second.name)
            .bind(&second.group)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        ChainLink::try_from(row)
    }

    async fn find_waiting_chain_link(
        &self,
        instance: &str,
        chain: &str,
        first: &JobKey,
    ) -> Result<Option<ChainLink>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_chain_links
            WHERE scheduler_instance = $1 AND chain_name = $2
              AND first_job_name = $3 AND first_job_group = $4
              AND state = 'WAITING'
            ORDER BY id ASC
            LIMIT 1
            "#,
            LINK_COLUMNS
        );
        let row = sqlx::query_as::<_, ChainLinkRow>(&sql)
            .bind(instance)
            .bind(chain)
            .bind(&first.name)
            .bind(&first.group)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ChainLink::try_from).transpose()
    }

    async fn waiting_chains_for(&self, instance: &str, first: &JobKey) -> Result<Vec<String>> {
        let chains = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT chain_name FROM tollgate_chain_links
            WHERE scheduler_instance = $1
              AND first_job_name = $2 AND first_job_group = $3
              AND state = 'WAITING'
            ORDER BY chain_name
            "#,
        )
        .bind(instance)
        .bind(&first.name)
        .bind(&first.group)
        .fetch_all(&self.pool)
        .await?;
        Ok(chains)
    }

    async fn transition_chain_link(
        &self,
        id: i64,
        from: EntryState,
        to: EntryState,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tollgate_chain_links SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_chain_links(
        &self,
        instance: &str,
        chain: Option<&str>,
        state: Option<EntryState>,
    ) -> Result<Vec<ChainLink>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_chain_links
            WHERE scheduler_instance = $1
              AND ($2::TEXT IS NULL OR chain_name = $2)
              AND ($3::TEXT IS NULL OR state = $3)
            ORDER BY id ASC
            "#,
            LINK_COLUMNS
        );
        let rows = sqlx::query_as::<_, ChainLinkRow>(&sql)
            .bind(instance)
            .bind(chain)
            .bind(state.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job definitions
    // ─────────────────────────────────────────────────────────────────────────

    async fn save_job(&self, job: &StoredJob) -> Result<()> {
        let definition = &job.definition;
        let (trigger_kind, cron_expression, next_fire_at) = match &job.trigger {
            Some(Trigger::Once { fire_at }) => (Some("once"), None, Some(*fire_at)),
            Some(Trigger::Cron {
                expression,
                next_fire_at,
            }) => (Some("cron"), Some(expression.as_str()), Some(*next_fire_at)),
            None => (None, None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO tollgate_jobs
                (job_name, job_group, kind, payload, retries, max_retries,
                 trigger_kind, cron_expression, next_fire_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (job_name, job_group) DO UPDATE SET
                kind = EXCLUDED.kind,
                payload = EXCLUDED.payload,
                retries = EXCLUDED.retries,
                max_retries = EXCLUDED.max_retries,
                trigger_kind = EXCLUDED.trigger_kind,
                cron_expression = EXCLUDED.cron_expression,
                next_fire_at = EXCLUDED.next_fire_at,
                updated_at = NOW()
            "#,
        )
        .bind(&definition.key.name)
        .bind(&definition.key.group)
        .bind(definition.kind.as_str())
        .bind(&definition.payload)
        .bind(definition.retry.map(|r| r.retries as i32))
        .bind(definition.retry.map(|r| r.max_retries as i32))
        .bind(trigger_kind)
        .bind(cron_expression)
        .bind(next_fire_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_job(&self, key: &JobKey) -> Result<Option<StoredJob>> {
        let sql = format!(
            "SELECT {} FROM tollgate_jobs WHERE job_name = $1 AND job_group = $2",
            JOB_COLUMNS
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&key.name)
            .bind(&key.group)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StoredJob::try_from).transpose()
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tollgate_jobs WHERE job_name = $1 AND job_group = $2")
            .bind(&key.name)
            .bind(&key.group)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_armed_jobs(&self) -> Result<Vec<StoredJob>> {
        let sql = format!(
            r#"
            SELECT {} FROM tollgate_jobs
            WHERE next_fire_at IS NOT NULL
            ORDER BY job_group, job_name
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }
}

#[cfg(test)]
mod tests {
    const SCHEMA: &str = include_str!("../../migrations/20240601000000_tollgate_schema.sql");

    #[test]
    fn test_schema_allows_one_waiting_link_per_first_job() {
        let index = SCHEMA
            .split(';')
            .find(|stmt| stmt.contains("idx_tollgate_chain_links_one_waiting"))
            .expect("partial unique index on waiting links");
        assert!(index.contains("CREATE UNIQUE INDEX"));
        assert!(index.contains("(scheduler_instance, chain_name, first_job_name, first_job_group)"));
        assert!(index.contains("WHERE state = 'WAITING'"));
    }
}
