//! 规则引擎错误类型
//!
//! 错误需要 `Clone`：事实推导的失败结果会被记忆化，并分发给所有等待同一事实的调用方。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("事实未定义: {0}")]
    UndefinedFact(String),

    #[error("未知的操作符: {0}")]
    UnknownOperator(String),

    #[error("操作符已存在: {0}")]
    DuplicateOperator(String),

    #[error("事实存在循环依赖: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("条件嵌套过深: 深度 {depth} 超过上限 {max}")]
    ConditionTooDeep { depth: usize, max: usize },

    #[error("事实推导超时: {fact} ({timeout_ms}ms)")]
    FactTimeout { fact: String, timeout_ms: u64 },

    #[error("版本解析失败: {0}")]
    ParseError(String),

    #[error("规则无效: {0}")]
    InvalidRule(String),

    #[error("路径表达式无效 '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("事实推导失败: {fact}: {message}")]
    DerivationFailed { fact: String, message: String },

    #[error("JSON 序列化错误: {0}")]
    JsonError(String),
}

impl RuleError {
    /// 推导函数内部失败时使用的便捷构造
    pub fn derivation(fact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DerivationFailed {
            fact: fact.into(),
            message: message.into(),
        }
    }

    /// 是否属于调用方的编程契约错误（引用了未注册的事实或操作符）
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::UndefinedFact(_) | Self::UnknownOperator(_))
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
