//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// 无法解析的版本号作为错误返回，而不是视为不匹配
    pub strict_semver: bool,
    /// 推导事实的超时（毫秒），0 表示不限制
    pub fact_timeout_ms: u64,
    pub max_condition_depth: usize,
    pub allow_undefined_facts: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            strict_semver: false,
            fact_timeout_ms: 5000,
            max_condition_depth: 64,
            allow_undefined_facts: false,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineSettings,
    pub observability: ObservabilityConfig,
    /// 预置的已知版本，事实名 -> 版本号
    pub facts: BTreeMap<String, String>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（COMPAT_ 前缀，层级用双下划线，如 COMPAT_ENGINE__STRICT_SEMVER -> engine.strict_semver）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("COMPAT_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(service_name, Path::new(&config_dir), &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(service_name: &str, config_dir: &Path, env: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", service_name))).required(false))
            .add_source(
                Environment::with_prefix("COMPAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
