//! Object storage abstraction / 对象存储抽象
//!
//! The migrator only needs three primitives from a backend: a non-recursive
//! prefix listing, a recursive object listing that reports storage classes,
//! and an in-place storage class change.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage class reported when the backend omits one / 未返回存储类型时的默认值
pub const IMPLICIT_STORAGE_CLASS: &str = "STANDARD";

/// One object returned by a recursive listing / 递归列举返回的对象
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    /// Full object key / 完整对象键
    pub key: String,
    #[serde(default)]
    pub storage_class: Option<String>,
}

impl ObjectSummary {
    pub fn new(key: impl Into<String>, storage_class: Option<&str>) -> Self {
        Self {
            key: key.into(),
            storage_class: storage_class.map(str::to_string),
        }
    }

    pub fn effective_storage_class(&self) -> &str {
        self.storage_class.as_deref().unwrap_or(IMPLICIT_STORAGE_CLASS)
    }

    /// Whether the object still has to be moved to `target` / 是否需要迁移
    pub fn needs_migration(&self, target: &str) -> bool {
        !self.effective_storage_class().eq_ignore_ascii_case(target)
    }
}

/// Failure of a single storage class change / 单个对象修改失败
#[derive(Debug, Error)]
pub enum ModifyError {
    /// Network failures, throttling and server errors / 网络错误、限流、服务端错误
    #[error("transient failure{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },
    /// Permission, not found and other client errors / 权限、对象不存在等
    #[error("permanent failure{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    match *status {
        Some(code) => format!(" (HTTP {})", code),
        None => String::new(),
    }
}

impl ModifyError {
    /// Classify an HTTP status code / 按HTTP状态码分类
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 408 || status == 429 || status >= 500 {
            ModifyError::Transient { status: Some(status), message }
        } else {
            ModifyError::Permanent { status: Some(status), message }
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ModifyError::Transient { status: None, message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ModifyError::Transient { .. })
    }
}

/// Object storage backend used by the migrator / 迁移器使用的对象存储后端
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs / 后端名称
    fn name(&self) -> &str;

    /// Common prefixes directly below `prefix` (delimiter `/`) / 列出直接子目录
    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>>;

    /// All objects below `prefix`, recursively / 递归列出对象
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;

    /// Rewrite `key` in place with a new storage class / 原地修改存储类型
    async fn set_storage_class(&self, key: &str, storage_class: &str) -> Result<(), ModifyError>;
}
