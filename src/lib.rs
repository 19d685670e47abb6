pub mod config;
pub mod db;
pub mod error_log;
pub mod migrate;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use config::{CliArgs, MigrationConfig};
pub use db::MigrationQueue;
pub use migrate::{Migrator, RunSummary};
pub use storage::{ModifyError, ObjectStore, ObjectSummary};
