//! S3-compatible object storage backend / S3兼容对象存储后端

mod config;
mod driver;
mod error;
mod factory;

pub use config::{DeleteMode, S3Config};
pub use driver::S3Storage;
pub use factory::S3StorageFactory;
