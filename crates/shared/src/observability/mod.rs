//! 可观测性模块
//!
//! 所有命令行工具通过单一入口点初始化日志。

pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::AppConfig;

/// 按应用配置初始化日志
///
/// # Example
///
/// ```ignore
/// use compat_shared::{config::AppConfig, observability};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("compat-check")?;
///     observability::init(&config)?;
///
///     // 应用逻辑...
///
///     Ok(())
/// }
/// ```
pub fn init(config: &AppConfig) -> Result<()> {
    tracing::init(&config.observability)?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        log_format = %config.observability.log_format,
        "Observability initialized"
    );

    Ok(())
}
