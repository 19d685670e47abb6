// Driver package / 驱动包
pub mod s3;

use anyhow::Result;

use crate::drivers::s3::{S3Config, S3Driver};
use crate::storage::ObjectStore;

/// Create the object store for `bucket` / 创建存储桶对应的驱动
pub fn create_store(bucket: &str, config: &S3Config) -> Result<Box<dyn ObjectStore>> {
    let driver = S3Driver::new(bucket, config)?;
    tracing::info!("Using {} driver for bucket {}", driver.name(), bucket);
    Ok(Box::new(driver))
}
