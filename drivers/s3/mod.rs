//! S3对象存储驱动
//!
//! 基于rust-s3，实现迁移所需的列举与存储类型修改

mod config;
mod driver;

pub use config::S3Config;
pub use driver::S3Driver;
