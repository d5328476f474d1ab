//! Shared test setup / 测试公共初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a log subscriber once; later calls are no-ops / 初始化测试日志
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("polystore=debug")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
