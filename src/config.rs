//! Application configuration module / 应用配置模块
//!
//! Command line arguments are parsed once into [`MigrationConfig`], which is
//! then handed to the migrator by value. S3 connection settings live in an
//! optional JSON file (see [`crate::drivers::s3::S3Config`]).

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::drivers::s3::S3Config;

pub const DEFAULT_STORAGE_CLASS: &str = "GLACIER_IR";
pub const DEFAULT_TABLE_NAME: &str = "s3_objects";
pub const DEFAULT_ERROR_LOG: &str = "/tmp/update-storage-class-error.log";
pub const DEFAULT_DB_FILE: &str = "s3_objects_list.db";

/// Storage classes accepted by S3 CopyObject / S3支持的存储类型
pub const STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "REDUCED_REDUNDANCY",
    "STANDARD_IA",
    "ONEZONE_IA",
    "INTELLIGENT_TIERING",
    "GLACIER",
    "DEEP_ARCHIVE",
    "GLACIER_IR",
    "OUTPOSTS",
    "SNOW",
    "EXPRESS_ONEZONE",
];

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid table name regex"));

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("MIGRATOR_BUILD_TIME"),
    ")"
);

/// Change the storage class of objects in an S3 bucket.
///
/// Objects are first gathered into a local SQLite queue, then updated one by
/// one. Objects that fail to update stay queued for the next run.
#[derive(Clone, Debug, Parser)]
#[command(version, long_version = LONG_VERSION, about)]
pub struct CliArgs {
    /// S3 folder path for the objects to be updated (`bucket` or `bucket/prefix`)
    pub bucket_path: String,

    /// Table in the SQLite database to use
    #[arg(short, long, default_value = DEFAULT_TABLE_NAME)]
    pub table: String,

    /// Desired storage class for the S3 objects
    #[arg(short, long, default_value = DEFAULT_STORAGE_CLASS)]
    pub storage_class: String,

    /// File to log errors when updating storage class
    #[arg(short, long, default_value = DEFAULT_ERROR_LOG)]
    pub error_log: PathBuf,

    /// Gather objects in bucket_path to store in the SQLite database
    #[arg(long)]
    pub gather: bool,

    /// Change storage class for objects already stored in the SQLite database
    #[arg(long)]
    pub update: bool,

    /// Time in seconds to sleep between S3 requests
    #[arg(long, default_value_t = 0.0, value_parser = parse_sleep_arg)]
    pub sleep: f64,

    /// SQLite database file holding the queue
    #[arg(long, default_value = DEFAULT_DB_FILE)]
    pub db: PathBuf,

    /// JSON file with S3 connection settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra attempts for transient update failures
    #[arg(long, default_value_t = 0)]
    pub retries: u32,
}

fn parse_sleep_arg(arg: &str) -> Result<f64, String> {
    let value: f64 = arg.parse().map_err(|e| format!("{}", e))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("sleep must be a non-negative number of seconds, got {}", arg));
    }
    Ok(value)
}

/// Settings for one migration run / 单次迁移运行配置
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Bucket name / 存储桶名称
    pub bucket: String,
    /// Base prefix inside the bucket, empty or ending in `/` / 存储桶内前缀
    pub base_prefix: String,
    pub storage_class: String,
    pub table: String,
    pub db_path: PathBuf,
    pub error_log: PathBuf,
    pub gather: bool,
    pub update: bool,
    /// Pause before each remote request / 每次请求前的等待时间
    pub delay: Duration,
    pub retries: u32,
}

impl MigrationConfig {
    /// Config with defaults for everything but the bucket path / 默认配置
    pub fn new(bucket_path: &str) -> Result<Self> {
        let (bucket, base_prefix) = split_bucket_path(bucket_path)?;
        Ok(Self {
            bucket,
            base_prefix,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            table: DEFAULT_TABLE_NAME.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            error_log: PathBuf::from(DEFAULT_ERROR_LOG),
            gather: false,
            update: false,
            delay: Duration::ZERO,
            retries: 0,
        })
    }

    /// Get the SQLite connection URL / 获取数据库连接URL
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.db_path.to_string_lossy())
    }

    /// `s3://bucket/prefix` form used in log messages
    pub fn display_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.base_prefix)
    }
}

impl CliArgs {
    /// Validate arguments and build the run configuration / 校验参数并生成配置
    pub fn into_config(self) -> Result<(MigrationConfig, S3Config)> {
        let mut config = MigrationConfig::new(&self.bucket_path)?;
        config.table = validate_table_name(&self.table)?;
        config.storage_class = normalize_storage_class(&self.storage_class)?;
        config.error_log = self.error_log;
        config.db_path = self.db;
        config.gather = self.gather;
        config.update = self.update;
        config.delay = Duration::from_secs_f64(self.sleep);
        config.retries = self.retries;

        let s3 = load_s3_config(self.config.as_deref())?;
        Ok((config, s3))
    }
}

/// Split `bucket/sub/dir` into the bucket name and a `/`-terminated prefix
pub fn split_bucket_path(bucket_path: &str) -> Result<(String, String)> {
    let trimmed = bucket_path.trim().trim_start_matches("s3://").trim_matches('/');
    let (bucket, prefix) = match trimmed.split_once('/') {
        Some((bucket, rest)) => (bucket, rest.trim_matches('/')),
        None => (trimmed, ""),
    };
    if bucket.is_empty() {
        bail!("S3 folder path is required");
    }
    let prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    };
    Ok((bucket.to_string(), prefix))
}

/// Table names end up in SQL text, so only plain identifiers are allowed
pub fn validate_table_name(table: &str) -> Result<String> {
    if TABLE_NAME_RE.is_match(table) {
        Ok(table.to_string())
    } else {
        Err(anyhow!(
            "Invalid table name {:?}: use letters, digits and underscores, starting with a letter or underscore",
            table
        ))
    }
}

/// Upper-case a storage class and check it is one S3 knows / 规范化存储类型
pub fn normalize_storage_class(storage_class: &str) -> Result<String> {
    let upper = storage_class.trim().to_ascii_uppercase();
    if STORAGE_CLASSES.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(anyhow!(
            "Unknown storage class {:?}, expected one of: {}",
            storage_class,
            STORAGE_CLASSES.join(", ")
        ))
    }
}

/// Load S3 connection settings from file, then apply environment overrides / 加载S3连接配置
pub fn load_s3_config(path: Option<&Path>) -> Result<S3Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            let config: S3Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {:?}", path))?;
            tracing::info!("Loaded S3 configuration from {:?}", path);
            config
        }
        None => S3Config::default(),
    };

    if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
        config.endpoint = endpoint;
    }
    if let Ok(region) = std::env::var("S3_REGION") {
        config.region = region;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_bucket_path() {
        assert_eq!(split_bucket_path("my-bucket").unwrap(), ("my-bucket".to_string(), String::new()));
        assert_eq!(split_bucket_path("my-bucket/").unwrap(), ("my-bucket".to_string(), String::new()));
        assert_eq!(
            split_bucket_path("s3://my-bucket/logs/2020/").unwrap(),
            ("my-bucket".to_string(), "logs/2020/".to_string())
        );
        assert_eq!(
            split_bucket_path("my-bucket/logs").unwrap(),
            ("my-bucket".to_string(), "logs/".to_string())
        );
        assert!(split_bucket_path("").is_err());
        assert!(split_bucket_path("s3:///").is_err());
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("s3_objects").is_ok());
        assert!(validate_table_name("_queue2").is_ok());
        assert!(validate_table_name("2queue").is_err());
        assert!(validate_table_name("objects; DROP TABLE x").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_normalize_storage_class() {
        assert_eq!(normalize_storage_class("glacier_ir").unwrap(), "GLACIER_IR");
        assert_eq!(normalize_storage_class(" DEEP_ARCHIVE ").unwrap(), "DEEP_ARCHIVE");
        assert!(normalize_storage_class("COLDLINE").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::try_parse_from(["storage-class-migrator", "my-bucket"]).unwrap();
        assert_eq!(args.table, DEFAULT_TABLE_NAME);
        assert_eq!(args.storage_class, DEFAULT_STORAGE_CLASS);
        assert_eq!(args.error_log, PathBuf::from(DEFAULT_ERROR_LOG));
        assert_eq!(args.db, PathBuf::from(DEFAULT_DB_FILE));
        assert!(!args.gather);
        assert!(!args.update);
        assert_eq!(args.sleep, 0.0);
        assert_eq!(args.retries, 0);
    }

    #[test]
    fn test_cli_into_config() {
        let args = CliArgs::try_parse_from([
            "storage-class-migrator",
            "my-bucket/archive",
            "-t",
            "queue",
            "-s",
            "deep_archive",
            "--gather",
            "--update",
            "--sleep",
            "0.5",
        ])
        .unwrap();
        let (config, _) = args.into_config().unwrap();
        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.base_prefix, "archive/");
        assert_eq!(config.table, "queue");
        assert_eq!(config.storage_class, "DEEP_ARCHIVE");
        assert!(config.gather && config.update);
        assert_eq!(config.delay, Duration::from_millis(500));
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        assert!(CliArgs::try_parse_from(["storage-class-migrator"]).is_err());
        assert!(CliArgs::try_parse_from(["storage-class-migrator", "b", "--sleep", "-1"]).is_err());
        assert!(CliArgs::try_parse_from(["storage-class-migrator", "b", "--sleep", "NaN"]).is_err());

        let args = CliArgs::try_parse_from(["storage-class-migrator", "b", "-t", "bad-name"]).unwrap();
        assert!(args.into_config().is_err());
    }

    #[test]
    fn test_load_s3_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"endpoint": "http://localhost:9000", "access_key_id": "ak", "secret_access_key": "sk", "force_path_style": true}}"#
        )
        .unwrap();
        let config = load_s3_config(Some(file.path())).unwrap();
        if std::env::var("S3_ENDPOINT").is_err() {
            assert_eq!(config.endpoint, "http://localhost:9000");
        }
        assert_eq!(config.access_key_id, "ak");
        assert!(config.force_path_style);
    }

    #[test]
    fn test_load_s3_config_missing_file() {
        assert!(load_s3_config(Some(Path::new("/nonexistent/s3.json"))).is_err());
    }
}
