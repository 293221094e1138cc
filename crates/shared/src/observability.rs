//! 日志初始化
//!
//! 所有服务入口统一调用 `init`：日志级别来自配置（可被 RUST_LOG 覆盖），
//! 生产环境输出 JSON 格式便于采集，开发环境输出带颜色的文本格式。

use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::error::{Result, ShopError};

/// 初始化全局 tracing 订阅器，进程内只能调用一次
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let result = if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| ShopError::Config(format!("初始化日志订阅器失败: {e}")))
}
