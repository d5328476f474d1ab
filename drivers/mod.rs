// Driver package / 驱动包
pub mod local;
pub mod memory;
pub mod s3;

use crate::error::Result;
use crate::storage::StorageManager;

/// Register all drivers to StorageManager / 注册所有驱动
pub async fn register_all(manager: &StorageManager) -> Result<()> {
    // Register local driver (using LocalStorageFactory from storage module) / 注册本地驱动
    manager.register_factory(Box::new(crate::storage::LocalStorageFactory)).await?;
    // Register in-memory driver / 注册内存驱动
    manager.register_factory(Box::new(memory::MemoryStorageFactory)).await?;
    // Register S3 driver / 注册S3对象存储驱动
    manager.register_factory(Box::new(s3::S3StorageFactory)).await?;
    Ok(())
}
