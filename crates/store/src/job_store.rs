use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use crate::error::JobStoreError;

/// A due or not-yet-due row in `job_<topic>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub job_id: i64,
    pub app_id: String,
    pub payload: Vec<u8>,
    pub ctime: DateTime<Utc>,
    pub due_time: DateTime<Utc>,
}

/// The relational job store. One instance supports any number of job-queue
/// topics, each backed by a `job_<topic>`/`job_history_<topic>` table pair,
/// and routes reads/writes for a given `app_id` into one of several shards
/// by hash — mirroring the "lookup" + "app" pool split and `app_id`-hash
/// sharding of the original MySQL-backed store, ported here onto sharded
/// Postgres pools via `sqlx`.
#[async_trait]
pub trait JobStore: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), JobStoreError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), JobStoreError> {
        Ok(())
    }

    /// Create the `job_<topic>`/`job_history_<topic>` tables for `topic` in
    /// the shard that owns `appid`, if they do not already exist.
    async fn create_job_queue(&self, appid: &str, topic: &str) -> Result<(), JobStoreError>;

    /// Enqueue a job, due `delay` from now. Returns the new job id.
    async fn add(
        &self,
        appid: &str,
        topic: &str,
        payload: Vec<u8>,
        delay: chrono::Duration,
    ) -> Result<i64, JobStoreError>;

    /// Delete a job row. Fails with `JobStoreError::NothingDeleted` if the
    /// row was already gone — the only permitted cross-actor contention on
    /// a job row, which the out-of-scope HTTP layer translates to 409.
    async fn delete(&self, appid: &str, topic: &str, job_id: i64) -> Result<(), JobStoreError>;

    /// Jobs in `topic` whose `due_time <= now`, ordered `(due_time, job_id)`
    /// ascending, up to `limit` rows.
    async fn due_jobs(&self, topic: &str, limit: i64) -> Result<Vec<Job>, JobStoreError>;

    /// Delete the job row and insert its history row in one transaction.
    /// Returns `Ok(false)` (not an error) if the job row was already gone —
    /// the delete-vs-dispatch race is expected and non-fatal here; the
    /// executor simply does not archive a job that lost the race.
    async fn archive(
        &self,
        appid: &str,
        topic: &str,
        job: &Job,
        actor_short_id: &str,
    ) -> Result<bool, JobStoreError>;
}

/// Sharded Postgres job store. `shards[hash(app_id) % shards.len()]` owns
/// every job row for that app, the way the original routed by `app_id` hash
/// into MySQL shards; `lookup` is a separate pool reserved for
/// cross-shard/administrative queries the core itself never issues.
pub struct PgJobStore {
    shards: Vec<PgPool>,
    #[allow(dead_code)]
    lookup: PgPool,
}

impl PgJobStore {
    pub async fn connect(shard_urls: &[String], lookup_url: &str) -> Result<Self, JobStoreError> {
        let mut shards = Vec::with_capacity(shard_urls.len());
        for url in shard_urls {
            shards.push(PgPoolOptions::new().max_connections(10).connect(url).await?);
        }
        let lookup = PgPoolOptions::new().max_connections(5).connect(lookup_url).await?;
        Ok(Self { shards, lookup })
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: PgPool) -> Self {
        Self {
            shards: vec![pool.clone()],
            lookup: pool,
        }
    }

    fn shard_for(&self, appid: &str) -> Result<&PgPool, JobStoreError> {
        if self.shards.is_empty() {
            return Err(JobStoreError::NoShard(appid.to_string()));
        }
        let hash = appid.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        Ok(&self.shards[(hash as usize) % self.shards.len()])
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    fn name(&self) -> &str {
        "pg-job-store"
    }

    async fn create_job_queue(&self, appid: &str, topic: &str) -> Result<(), JobStoreError> {
        let pool = self.shard_for(appid)?;
        let jobs_table = format!("job_{topic}");
        let history_table = format!("job_history_{topic}");

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{jobs_table}" (
                job_id BIGSERIAL PRIMARY KEY,
                app_id TEXT NOT NULL,
                payload BYTEA NOT NULL,
                ctime TIMESTAMPTZ NOT NULL DEFAULT now(),
                mtime TIMESTAMPTZ NOT NULL DEFAULT now(),
                due_time TIMESTAMPTZ NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{jobs_table}_due_time_idx" ON "{jobs_table}" (due_time, job_id)"#
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{jobs_table}_app_id_idx" ON "{jobs_table}" (app_id)"#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{history_table}" (
                app_id TEXT NOT NULL,
                job_id BIGINT NOT NULL,
                payload BYTEA NOT NULL,
                ctime TIMESTAMPTZ NOT NULL,
                due_time TIMESTAMPTZ NOT NULL,
                actor_id CHAR(64) NOT NULL,
                PRIMARY KEY (app_id, job_id)
            )
            "#
        ))
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn add(
        &self,
        appid: &str,
        topic: &str,
        payload: Vec<u8>,
        delay: chrono::Duration,
    ) -> Result<i64, JobStoreError> {
        let pool = self.shard_for(appid)?;
        let jobs_table = format!("job_{topic}");
        let due_time = Utc::now() + delay;

        let row = sqlx::query(&format!(
            r#"INSERT INTO "{jobs_table}" (app_id, payload, due_time) VALUES ($1, $2, $3) RETURNING job_id"#
        ))
        .bind(appid)
        .bind(&payload)
        .bind(due_time)
        .fetch_one(pool)
        .await?;

        Ok(row.get::<i64, _>("job_id"))
    }

    async fn delete(&self, appid: &str, topic: &str, job_id: i64) -> Result<(), JobStoreError> {
        let pool = self.shard_for(appid)?;
        let jobs_table = format!("job_{topic}");
        let result = sqlx::query(&format!(r#"DELETE FROM "{jobs_table}" WHERE job_id = $1"#))
            .bind(job_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::NothingDeleted);
        }
        Ok(())
    }

    async fn due_jobs(&self, topic: &str, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        // Scanned per-shard: the topic's owning app determines the shard at
        // write time, but the dispatch executor polls one logical topic
        // across whichever shard(s) currently hold rows for it.
        let jobs_table = format!("job_{topic}");
        let mut out = Vec::new();
        for pool in &self.shards {
            let rows = sqlx::query(&format!(
                r#"
                SELECT job_id, app_id, payload, ctime, due_time
                FROM "{jobs_table}"
                WHERE due_time <= now()
                ORDER BY due_time ASC, job_id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
                "#
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?;
            out.extend(rows.into_iter().map(|row| Job {
                job_id: row.get("job_id"),
                app_id: row.get("app_id"),
                payload: row.get("payload"),
                ctime: row.get("ctime"),
                due_time: row.get("due_time"),
            }));
        }
        out.sort_by(|a, b| a.due_time.cmp(&b.due_time).then(a.job_id.cmp(&b.job_id)));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn archive(
        &self,
        appid: &str,
        topic: &str,
        job: &Job,
        actor_short_id: &str,
    ) -> Result<bool, JobStoreError> {
        let pool = self.shard_for(appid)?;
        let jobs_table = format!("job_{topic}");
        let history_table = format!("job_history_{topic}");

        let mut tx = pool.begin().await?;
        let result = sqlx::query(&format!(r#"DELETE FROM "{jobs_table}" WHERE job_id = $1"#))
            .bind(job.job_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO "{history_table}" (app_id, job_id, payload, ctime, due_time, actor_id)
            VALUES ($1, $2, $3, $4, now(), $5)
            ON CONFLICT (app_id, job_id) DO NOTHING
            "#
        ))
        .bind(&job.app_id)
        .bind(job.job_id)
        .bind(&job.payload)
        .bind(job.ctime)
        .bind(actor_short_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

/// In-memory `JobStore` double for tests.
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    jobs: HashMap<String, Vec<Job>>, // topic -> rows
    history: Vec<(String, Job, String)>, // (topic, job, actor_short_id)
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self) -> Vec<(String, Job, String)> {
        self.inner.lock().await.history.clone()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    fn name(&self) -> &str {
        "in-memory-job-store"
    }

    async fn create_job_queue(&self, _appid: &str, topic: &str) -> Result<(), JobStoreError> {
        self.inner.lock().await.jobs.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn add(
        &self,
        appid: &str,
        topic: &str,
        payload: Vec<u8>,
        delay: chrono::Duration,
    ) -> Result<i64, JobStoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let job = Job {
            job_id: inner.next_id,
            app_id: appid.to_string(),
            payload,
            ctime: Utc::now(),
            due_time: Utc::now() + delay,
        };
        inner.jobs.entry(topic.to_string()).or_default().push(job);
        Ok(inner.next_id)
    }

    async fn delete(&self, _appid: &str, topic: &str, job_id: i64) -> Result<(), JobStoreError> {
        let mut inner = self.inner.lock().await;
        let rows = inner.jobs.entry(topic.to_string()).or_default();
        let before = rows.len();
        rows.retain(|j| j.job_id != job_id);
        if rows.len() == before {
            return Err(JobStoreError::NothingDeleted);
        }
        Ok(())
    }

    async fn due_jobs(&self, topic: &str, limit: i64) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        let mut due: Vec<Job> = inner
            .jobs
            .get(topic)
            .map(|rows| rows.iter().filter(|j| j.due_time <= now).cloned().collect())
            .unwrap_or_default();
        due.sort_by(|a, b| a.due_time.cmp(&b.due_time).then(a.job_id.cmp(&b.job_id)));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn archive(
        &self,
        _appid: &str,
        topic: &str,
        job: &Job,
        actor_short_id: &str,
    ) -> Result<bool, JobStoreError> {
        let mut inner = self.inner.lock().await;
        let rows = inner.jobs.entry(topic.to_string()).or_default();
        let before = rows.len();
        rows.retain(|j| j.job_id != job.job_id);
        if rows.len() == before {
            return Ok(false);
        }
        inner.history.push((topic.to_string(), job.clone(), actor_short_id.to_string()));
        Ok(true)
    }
}
