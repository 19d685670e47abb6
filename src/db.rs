//! Durable migration queue / 持久化迁移队列
//!
//! A single SQLite table with one `path TEXT PRIMARY KEY` column. A row means
//! the object still has to be migrated; it is deleted once the storage class
//! change succeeds.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use futures::stream::{self, Stream};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::validate_table_name;

/// Rows fetched per page while iterating the queue / 每页读取行数
const PAGE_SIZE: i64 = 500;

/// Queue of object keys pending a storage class change
#[derive(Clone)]
pub struct MigrationQueue {
    pool: SqlitePool,
    table: String,
}

impl MigrationQueue {
    /// Open (or create) the queue database / 打开或创建队列数据库
    pub async fn connect(database_url: &str, table: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to open queue database {}", database_url))?;

        // 设置busy_timeout，避免锁超时
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await?;

        Self::with_pool(pool, table)
    }

    /// Use an existing connection pool / 使用现有连接池
    pub fn with_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        let table = validate_table_name(table)?;
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the queue table if it does not exist / 建表（已存在则跳过）
    pub async fn ensure_queue(&self) -> Result<()> {
        let sql = format!("CREATE TABLE IF NOT EXISTS {} (path TEXT PRIMARY KEY)", self.table);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create queue table {}", self.table))?;
        Ok(())
    }

    /// Add a path. Returns `false` when it was already queued / 入队，已存在时返回false
    pub async fn enqueue(&self, path: &str) -> Result<bool> {
        let sql = format!("INSERT OR IGNORE INTO {} (path) VALUES (?)", self.table);
        let result = sqlx::query(&sql)
            .bind(path)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to queue {}", path))?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a path, no-op when absent / 出队
    pub async fn dequeue(&self, path: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE path = ?", self.table);
        let result = sqlx::query(&sql)
            .bind(path)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to remove {} from queue", path))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let (count,): (i64,) = sqlx::query_as(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Lazily stream every queued path in key order.
    ///
    /// Pages are read by key (`path > last`), so deleting entries while the
    /// stream is being consumed is safe. Calling this again starts over from
    /// the first queued path.
    pub fn list_queued(&self) -> impl Stream<Item = Result<String>> + Send + 'static {
        let queue = self.clone();
        let state = PageState { queue, cursor: String::new(), page: VecDeque::new(), exhausted: false };

        stream::try_unfold(state, next_queued)
    }

    async fn fetch_page(&self, after: &str) -> Result<Vec<String>> {
        let sql = format!("SELECT path FROM {} WHERE path > ? ORDER BY path LIMIT ?", self.table);
        let rows: Vec<(String,)> = sqlx::query_as(&sql)
            .bind(after)
            .bind(PAGE_SIZE)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read queue table {}", self.table))?;
        Ok(rows.into_iter().map(|(path,)| path).collect())
    }

    /// 关闭数据库连接池 / Close database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

struct PageState {
    queue: MigrationQueue,
    cursor: String,
    page: VecDeque<String>,
    exhausted: bool,
}

async fn next_queued(mut state: PageState) -> Result<Option<(String, PageState)>> {
    if state.page.is_empty() && !state.exhausted {
        let rows = state.queue.fetch_page(&state.cursor).await?;
        state.exhausted = (rows.len() as i64) < PAGE_SIZE;
        state.page.extend(rows);
    }
    match state.page.pop_front() {
        Some(path) => {
            state.cursor = path.clone();
            Ok(Some((path, state)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn temp_queue(dir: &tempfile::TempDir) -> MigrationQueue {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("queue.db").to_string_lossy());
        let queue = MigrationQueue::connect(&url, "s3_objects").await.unwrap();
        queue.ensure_queue().await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_ensure_queue_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = temp_queue(&dir).await;
        queue.enqueue("a/1").await.unwrap();
        queue.ensure_queue().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = temp_queue(&dir).await;
        assert!(queue.enqueue("a/1").await.unwrap());
        assert!(!queue.enqueue("a/1").await.unwrap());
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = temp_queue(&dir).await;
        assert!(!queue.dequeue("missing").await.unwrap());
        queue.enqueue("a/1").await.unwrap();
        assert!(queue.dequeue("a/1").await.unwrap());
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_queued_spans_pages() {
        let dir = tempfile::tempdir().unwrap();
        let queue = temp_queue(&dir).await;
        let total = PAGE_SIZE as usize + 7;
        for i in 0..total {
            queue.enqueue(&format!("dir/{:05}", i)).await.unwrap();
        }
        let paths: Vec<String> = queue.list_queued().try_collect().await.unwrap();
        assert_eq!(paths.len(), total);
        assert_eq!(paths[0], "dir/00000");
        assert_eq!(paths[total - 1], format!("dir/{:05}", total - 1));
    }

    #[tokio::test]
    async fn test_dequeue_while_listing() {
        let dir = tempfile::tempdir().unwrap();
        let queue = temp_queue(&dir).await;
        for path in ["x/1", "x/2", "x/3"] {
            queue.enqueue(path).await.unwrap();
        }

        let paths = queue.list_queued();
        futures::pin_mut!(paths);
        let mut seen = Vec::new();
        while let Some(path) = paths.try_next().await.unwrap() {
            if path != "x/2" {
                queue.dequeue(&path).await.unwrap();
            }
            seen.push(path);
        }
        assert_eq!(seen, vec!["x/1", "x/2", "x/3"]);

        let remaining: Vec<String> = queue.list_queued().try_collect().await.unwrap();
        assert_eq!(remaining, vec!["x/2"]);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let queue = temp_queue(&dir).await;
            queue.enqueue("a/1").await.unwrap();
            queue.close().await;
        }
        let queue = temp_queue(&dir).await;
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        // Pool is never touched when the name is rejected
        let pool = SqlitePoolOptions::new().connect_lazy("sqlite::memory:").unwrap();
        assert!(MigrationQueue::with_pool(pool, "x; DROP TABLE y").is_err());
    }
}
