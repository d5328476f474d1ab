//! polystore: one storage contract over S3-compatible, local and in-memory backends
//! / 统一存储接口（S3兼容、本地、内存后端）

pub mod config;
pub mod error;
pub mod storage;
pub mod utils;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use drivers::local::{LocalConfig, LocalStorage};
pub use drivers::memory::{MemoryConfig, MemoryStorage};
pub use drivers::s3::{DeleteMode, S3Config, S3Storage};
pub use error::{Result, StorageError};
pub use storage::{
    Capability, Content, FileReader, Metadata, OpenFile, Storage, StorageExt, StorageManager,
    UserMetadata, WriteHandle, WriteOutcome,
};

// Register all storage drivers (call unified registration function from drivers module) / 注册所有存储驱动
pub async fn register_storage_drivers(manager: &storage::StorageManager) -> Result<()> {
    drivers::register_all(manager).await
}
