//! Append-only log of failed storage class changes / 失败记录日志

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Plain text error log, one line per failed object
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, creating the file if needed / 追加一行，文件不存在则创建
    pub async fn append(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open error log {:?}", self.path))?;

        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), message.trim_end());
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write error log {:?}", self.path))?;
        file.flush().await?;
        Ok(())
    }
}
