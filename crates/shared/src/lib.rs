//! 共享库
//!
//! 包含命令行工具共用的配置加载和日志初始化。

pub mod config;
pub mod observability;
