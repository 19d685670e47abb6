//! Storage class migration driver / 存储类型迁移
//!
//! Two phases run in order:
//! - gather: list top-level prefixes, then every object below each prefix,
//!   and queue the ones not yet in the target storage class
//! - update: drain the queue, changing one object at a time; failures are
//!   written to the error log and stay queued for the next run

use anyhow::{Context, Result};
use futures::TryStreamExt;

use crate::config::MigrationConfig;
use crate::db::MigrationQueue;
use crate::error_log::ErrorLog;
use crate::storage::{ModifyError, ObjectStore};

/// Result of the gather phase / 收集阶段统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GatherSummary {
    pub prefixes: usize,
    pub added: usize,
    pub already_queued: usize,
    /// Objects already in the target storage class
    pub up_to_date: usize,
}

/// Result of the update phase / 更新阶段统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    pub migrated: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub gather: Option<GatherSummary>,
    pub update: Option<UpdateSummary>,
    /// Entries left in the queue after the run / 运行结束后剩余的队列项
    pub remaining: i64,
}

/// Drives one migration run against a storage backend
pub struct Migrator {
    config: MigrationConfig,
    queue: MigrationQueue,
    store: Box<dyn ObjectStore>,
    error_log: ErrorLog,
}

impl Migrator {
    pub fn new(config: MigrationConfig, queue: MigrationQueue, store: Box<dyn ObjectStore>) -> Self {
        let error_log = ErrorLog::new(config.error_log.clone());
        Self { config, queue, store, error_log }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn queue(&self) -> &MigrationQueue {
        &self.queue
    }

    /// Ensure the queue, then gather and/or update as requested / 按配置执行
    pub async fn run(&self) -> Result<RunSummary> {
        self.queue.ensure_queue().await?;

        let mut summary = RunSummary::default();
        if self.config.gather {
            summary.gather = Some(self.gather().await?);
        }
        if self.config.update {
            summary.update = Some(self.update().await?);
        }
        summary.remaining = self.queue.count().await?;

        tracing::info!("{} object(s) waiting in queue table {}", summary.remaining, self.queue.table());
        Ok(summary)
    }

    /// Queue every object below the top-level prefixes that is not yet in the
    /// target storage class. Listing failures abort the phase.
    pub async fn gather(&self) -> Result<GatherSummary> {
        let mut summary = GatherSummary::default();
        let target = &self.config.storage_class;

        tracing::info!("Getting top level dirs in bucket: {}", self.config.display_path());
        let prefixes = self.store
            .list_prefixes(&self.config.base_prefix)
            .await
            .with_context(|| format!("Failed to list top level dirs of {}", self.config.display_path()))?;

        for prefix in prefixes {
            tracing::info!("Getting objects in dir: {}", prefix);
            self.pause().await;
            let objects = self.store
                .list_objects(&prefix)
                .await
                .with_context(|| format!("Failed to list objects in {}", prefix))?;
            summary.prefixes += 1;

            for object in objects {
                if !object.needs_migration(target) {
                    summary.up_to_date += 1;
                    continue;
                }
                if self.queue.enqueue(&object.key).await? {
                    tracing::info!("Adding object to cache: {} ({})", object.key, object.effective_storage_class());
                    summary.added += 1;
                } else {
                    tracing::debug!("Already queued: {}", object.key);
                    summary.already_queued += 1;
                }
            }
        }

        tracing::info!(
            "Gather finished: {} dir(s), {} added, {} already queued, {} already {}",
            summary.prefixes, summary.added, summary.already_queued, summary.up_to_date, target
        );
        Ok(summary)
    }

    /// Change the storage class of every queued object. Per-object failures
    /// are logged and leave the object queued; they never abort the phase.
    pub async fn update(&self) -> Result<UpdateSummary> {
        let mut summary = UpdateSummary::default();
        let target = &self.config.storage_class;

        let paths = self.queue.list_queued();
        futures::pin_mut!(paths);

        while let Some(path) = paths.try_next().await? {
            tracing::info!("Changing storage class of object: {}", path);
            match self.change_storage_class(&path).await {
                Ok(()) => {
                    tracing::info!("Successfully changed storage class of {} to {}", path, target);
                    self.queue.dequeue(&path).await?;
                    tracing::info!("Deleting object from cache: {}", path);
                    summary.migrated += 1;
                }
                Err(e) => {
                    let message = format!("Error changing storage class of {} to {}: {}", path, target, e);
                    tracing::error!("{}", message);
                    self.error_log.append(&message).await?;
                    summary.failed += 1;
                }
            }
        }

        if summary.failed > 0 {
            tracing::warn!(
                "Update finished: {} migrated, {} failed (see {:?})",
                summary.migrated, summary.failed, self.error_log.path()
            );
        } else {
            tracing::info!("Update finished: {} migrated", summary.migrated);
        }
        Ok(summary)
    }

    /// One object, retrying transient failures up to `retries` times
    async fn change_storage_class(&self, path: &str) -> Result<(), ModifyError> {
        let max_attempts = self.config.retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.pause().await;
            match self.store.set_storage_class(path, &self.config.storage_class).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!("{} failed (attempt {}/{}): {}, retrying...", path, attempt, max_attempts, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pause(&self) {
        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
    }
}
