//! 兼容性规则引擎
//!
//! 声明式规则评估，支持：
//! - JSON 规则定义（all/any 条件树、事实路径提取）
//! - 版本范围匹配和可扩展的操作符注册表
//! - 按需推导、单次执行并记忆化的事实存储（循环依赖检测、超时）
//! - 不短路的注解评估，规则结果与成功/失败回调
//! - 基于已解析事实的汇总报告

pub mod almanac;
pub mod catalog;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod facts;
pub mod models;
pub mod operators;
pub mod path;
pub mod summary;
pub mod version;

pub use almanac::{Almanac, AlmanacOptions, DerivationEvent};
pub use engine::{Engine, EngineOptions, RuleCallback, RunReport};
pub use error::{Result, RuleError};
pub use evaluator::ConditionEvaluator;
pub use facts::{Fact, FactDeriver, FactOptions};
pub use models::{Condition, ConditionNode, ConditionResult, Event, LeafResult, Rule, RuleOutcome, RuleResult};
pub use operators::{semver_match, Operator, OperatorRegistry};
pub use summary::{describe_failures, FactSummary, SummaryEntry, SummaryReporter};
pub use version::{satisfies, VersionMatcher};
