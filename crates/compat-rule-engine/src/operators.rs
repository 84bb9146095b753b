//! 规则操作符注册表
//!
//! 操作符按名称注册，比较函数签名为 `(事实值, 条件值) -> Result<bool>`。
//! 事实值缺失（未提取到路径）时以 `None` 传入。

use crate::error::{Result, RuleError};
use crate::version::VersionMatcher;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 版本范围操作符名称
pub const SEMVER_MATCH: &str = "semvermatch";

type Comparator = dyn Fn(Option<&Value>, &Value) -> Result<bool> + Send + Sync;

/// 命名的比较操作符
#[derive(Clone)]
pub struct Operator {
    name: String,
    comparator: Arc<Comparator>,
}

impl Operator {
    pub fn new<F>(name: impl Into<String>, comparator: F) -> Self
    where
        F: Fn(Option<&Value>, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            comparator: Arc::new(comparator),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, fact_value: Option<&Value>, expected: &Value) -> Result<bool> {
        (self.comparator)(fact_value, expected)
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator").field("name", &self.name).finish()
    }
}

/// 操作符注册表
///
/// 注册同名操作符会被拒绝，避免静默覆盖内置操作符。
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl OperatorRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含内置操作符的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for operator in builtin_operators() {
            registry
                .operators
                .insert(operator.name().to_string(), operator);
        }
        registry
    }

    pub fn register(&mut self, operator: Operator) -> Result<()> {
        if self.operators.contains_key(operator.name()) {
            return Err(RuleError::DuplicateOperator(operator.name().to_string()));
        }
        self.operators.insert(operator.name().to_string(), operator);
        Ok(())
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, comparator: F) -> Result<()>
    where
        F: Fn(Option<&Value>, &Value) -> Result<bool> + Send + Sync + 'static,
    {
        self.register(Operator::new(name, comparator))
    }

    pub fn resolve(&self, name: &str) -> Result<&Operator> {
        self.operators
            .get(name)
            .ok_or_else(|| RuleError::UnknownOperator(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// 已注册的操作符名称（排序后）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// 基于版本约束匹配的 `semvermatch` 操作符
///
/// 事实值为版本号字符串，条件值为范围表达式。非严格模式下无法解析的版本视为不匹配。
pub fn semver_match(strict: bool) -> Operator {
    let matcher = VersionMatcher::new(strict);

    Operator::new(SEMVER_MATCH, move |fact, expected| {
        let Some(fact) = fact else {
            return Ok(false);
        };

        match (fact.as_str(), expected.as_str()) {
            (Some(version), Some(range)) => matcher.matches(version, range),
            _ if matcher.is_strict() => Err(RuleError::ParseError(format!(
                "semvermatch 需要字符串版本和范围, 实际 {} 与 {}",
                type_name(fact),
                type_name(expected)
            ))),
            _ => Ok(false),
        }
    })
}

fn builtin_operators() -> Vec<Operator> {
    let patterns = RegexCache::default();

    vec![
        Operator::new("equal", |fact, expected| Ok(fact.is_some_and(|f| eq(f, expected)))),
        Operator::new("notEqual", |fact, expected| Ok(!fact.is_some_and(|f| eq(f, expected)))),
        Operator::new("in", |fact, expected| Ok(fact.is_some_and(|f| in_list(f, expected)))),
        Operator::new("notIn", |fact, expected| {
            Ok(expected.is_array() && !fact.is_some_and(|f| in_list(f, expected)))
        }),
        Operator::new("contains", |fact, expected| Ok(fact.is_some_and(|f| contains(f, expected) == Some(true)))),
        Operator::new("doesNotContain", |fact, expected| {
            Ok(fact.is_some_and(|f| contains(f, expected) == Some(false)))
        }),
        Operator::new("lessThan", |fact, expected| Ok(compare(fact, expected, |a, b| a < b))),
        Operator::new("lessThanInclusive", |fact, expected| Ok(compare(fact, expected, |a, b| a <= b))),
        Operator::new("greaterThan", |fact, expected| Ok(compare(fact, expected, |a, b| a > b))),
        Operator::new("greaterThanInclusive", |fact, expected| Ok(compare(fact, expected, |a, b| a >= b))),
        Operator::new("regex", move |fact, expected| match fact {
            Some(f) => patterns.is_match(f, expected),
            None => Ok(false),
        }),
    ]
}

/// 相等比较，数值统一按浮点比较（100 == 100.0）
fn eq(field: &Value, expected: &Value) -> bool {
    if let (Some(f1), Some(f2)) = (field.as_f64(), expected.as_f64()) {
        return (f1 - f2).abs() < f64::EPSILON;
    }
    field == expected
}

/// 数值比较，任一侧不是数值时不匹配
fn compare<F>(field: Option<&Value>, expected: &Value, cmp: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (field.and_then(Value::as_f64), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// 列表包含检查 (in)
fn in_list(field: &Value, expected: &Value) -> bool {
    expected
        .as_array()
        .is_some_and(|arr| arr.iter().any(|item| eq(field, item)))
}

/// 字符串/数组包含检查，事实值类型不适用时返回 `None`
fn contains(field: &Value, expected: &Value) -> Option<bool> {
    match field {
        Value::String(s) => expected.as_str().map(|sub| s.contains(sub)),
        Value::Array(arr) => Some(arr.iter().any(|item| eq(item, expected))),
        _ => None,
    }
}

/// 按模式缓存编译后的正则，同一注册表的所有求值共享
#[derive(Debug, Default)]
struct RegexCache {
    compiled: DashMap<String, Regex>,
}

impl RegexCache {
    /// 正则表达式匹配，事实值不是字符串时不匹配
    fn is_match(&self, field: &Value, expected: &Value) -> Result<bool> {
        let Some(s) = field.as_str() else {
            return Ok(false);
        };

        let pattern = expected.as_str().ok_or_else(|| {
            RuleError::InvalidRule(format!("regex 操作符需要字符串值, 实际 {}", type_name(expected)))
        })?;

        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(regex.is_match(s));
        }

        // 规则注册时已预验证过模式
        let regex = Regex::new(pattern)
            .map_err(|e| RuleError::InvalidRule(format!("无效的正则表达式 '{}': {}", pattern, e)))?;
        let matched = regex.is_match(s);
        self.compiled.insert(pattern.to_string(), regex);

        Ok(matched)
    }
}

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
