//! S3驱动核心实现
//!
//! 设计原则：
//! - 只提供迁移需要的原语（list_prefixes, list_objects, set_storage_class）
//! - 修改存储类型使用CopyObject原地复制（源=目标，附带x-amz-storage-class）
//! - 复制后通过HeadObject校验存储类型

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::Region;

use crate::storage::{ModifyError, ObjectStore, ObjectSummary, IMPLICIT_STORAGE_CLASS};
use super::config::S3Config;

const STORAGE_CLASS_HEADER: &str = "x-amz-storage-class";
const METADATA_DIRECTIVE_HEADER: &str = "x-amz-metadata-directive";

/// S3驱动
pub struct S3Driver {
    bucket: Box<Bucket>,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(bucket_name: &str, config: &S3Config) -> Result<Self> {
        let bucket = Self::create_bucket(bucket_name, config)?;
        Ok(Self { bucket })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(bucket_name: &str, config: &S3Config) -> Result<Box<Bucket>> {
        // 未配置密钥时交给默认凭证链（环境变量、~/.aws/credentials）
        let credentials = Credentials::new(
            non_empty(&config.access_key_id),
            non_empty(&config.secret_access_key),
            None,
            non_empty(&config.session_token),
            None,
        ).map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.resolved_endpoint(),
        };

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;

        let bucket = if config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };

        tracing::debug!("S3 bucket client ready: {} ({})", bucket_name, config.resolved_endpoint());
        Ok(bucket)
    }

    /// HeadObject校验存储类型
    async fn verify_storage_class(&self, key: &str, storage_class: &str) -> Result<(), ModifyError> {
        let (head, code) = self.bucket
            .head_object(key)
            .await
            .map_err(classify_s3_error)?;

        if !(200..300).contains(&code) {
            return Err(ModifyError::from_status(code, "HeadObject after CopyObject failed"));
        }

        let actual = head.storage_class.as_deref().unwrap_or(IMPLICIT_STORAGE_CLASS);
        if !actual.eq_ignore_ascii_case(storage_class) {
            return Err(ModifyError::Permanent {
                status: Some(code),
                message: format!("storage class is still {} after CopyObject", actual),
            });
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn classify_s3_error(err: S3Error) -> ModifyError {
    match err {
        S3Error::HttpFailWithBody(code, body) => ModifyError::from_status(code, body),
        other => ModifyError::transport(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for S3Driver {
    fn name(&self) -> &str {
        "S3"
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let results = self.bucket
            .list(prefix.to_string(), Some("/".to_string()))
            .await
            .map_err(|e| anyhow!("列出S3目录失败: {}", e))?;

        let mut prefixes = Vec::new();
        for result in results {
            for cp in result.common_prefixes.unwrap_or_default() {
                if cp.prefix != prefix {
                    prefixes.push(cp.prefix);
                }
            }
        }
        Ok(prefixes)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let results = self.bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| anyhow!("列出S3对象失败: {}", e))?;

        let mut objects = Vec::new();
        for result in results {
            for obj in result.contents {
                // 跳过目录标记
                if obj.key.ends_with('/') {
                    continue;
                }
                objects.push(ObjectSummary {
                    key: obj.key,
                    storage_class: obj.storage_class,
                });
            }
        }
        Ok(objects)
    }

    async fn set_storage_class(&self, key: &str, storage_class: &str) -> Result<(), ModifyError> {
        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(key);

        let mut bucket = (*self.bucket).clone();
        bucket.add_header(STORAGE_CLASS_HEADER, storage_class);
        bucket.add_header(METADATA_DIRECTIVE_HEADER, "COPY");

        tracing::debug!("S3 CopyObject: key={}, encoded={}, storage_class={}", key, encoded_src, storage_class);

        let code = bucket
            .copy_object_internal(encoded_src.as_ref(), key)
            .await
            .map_err(classify_s3_error)?;

        if !(200..300).contains(&code) {
            return Err(ModifyError::from_status(code, format!("CopyObject returned HTTP {}", code)));
        }

        self.verify_storage_class(key, storage_class).await
    }
}
