//! 规则引擎领域模型
//!
//! JSON 形状与 json-rules-engine 的规则定义保持一致：
//! 叶子条件为 `{fact, operator, value, path?, params?}`，组合条件为 `{all: [...]}` 或 `{any: [...]}`。

use crate::error::RuleError;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// 事件描述（规则成功/失败时分发，也用于标记事实推导）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// 叶子条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub fact: String,
    pub operator: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Condition {
    pub fn new(fact: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fact: fact.into(),
            operator: operator.into(),
            value: value.into(),
            path: None,
            params: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// 条件节点（叶子或 all/any 组合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionNode {
    All(Vec<ConditionNode>),
    Any(Vec<ConditionNode>),
    #[serde(untagged)]
    Leaf(Condition),
}

impl ConditionNode {
    pub fn all(children: Vec<ConditionNode>) -> Self {
        Self::All(children)
    }

    pub fn any(children: Vec<ConditionNode>) -> Self {
        Self::Any(children)
    }

    /// 嵌套深度，叶子为 1
    ///
    /// 使用显式栈遍历，超深的树也不会耗尽调用栈。
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];

        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            if let Self::All(children) | Self::Any(children) = node {
                stack.extend(children.iter().map(|c| (c, depth + 1)));
            }
        }

        max
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

fn default_priority() -> u32 {
    1
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    pub conditions: ConditionNode,
    pub event: Event,
}

impl Rule {
    pub fn new(conditions: ConditionNode, event: Event) -> Self {
        Self {
            name: None,
            priority: default_priority(),
            conditions,
            event,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// 用于日志的规则标识：优先使用名称，否则使用事件类型
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.event.event_type)
    }
}

/// 叶子条件的评估结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeafResult {
    #[serde(flatten)]
    pub condition: Condition,
    /// 经过路径提取后的事实值，缺失时为 `None`
    #[serde(rename = "factResult")]
    pub fact_result: Option<Value>,
    pub result: bool,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<RuleError>,
}

/// 带注解的条件树，与 `ConditionNode` 同构
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionResult {
    All { all: Vec<ConditionResult>, result: bool },
    Any { any: Vec<ConditionResult>, result: bool },
    Leaf(LeafResult),
}

impl ConditionResult {
    pub fn result(&self) -> bool {
        match self {
            Self::All { result, .. } | Self::Any { result, .. } => *result,
            Self::Leaf(leaf) => leaf.result,
        }
    }

    /// 按子节点顺序查找第一个叶子错误
    pub fn first_error(&self) -> Option<&RuleError> {
        match self {
            Self::All { all: children, .. } | Self::Any { any: children, .. } => {
                children.iter().find_map(|c| c.first_error())
            }
            Self::Leaf(leaf) => leaf.error.as_ref(),
        }
    }

    /// 按深度优先顺序收集所有叶子
    pub fn leaves(&self) -> Vec<&LeafResult> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a LeafResult>) {
        match self {
            Self::All { all: children, .. } | Self::Any { any: children, .. } => {
                for child in children {
                    child.collect_leaves(leaves);
                }
            }
            Self::Leaf(leaf) => leaves.push(leaf),
        }
    }
}

/// 单条规则在一次运行中的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub priority: u32,
    pub event: Event,
    pub result: bool,
    /// 条件树无法评估时（如嵌套过深）为 `None`
    pub conditions: Option<ConditionResult>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<RuleError>,
}

impl RuleResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn outcome(&self) -> RuleOutcome {
        if self.result {
            RuleOutcome::Success
        } else {
            RuleOutcome::Failure
        }
    }
}

/// 规则结果类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOutcome {
    Success,
    Failure,
}

impl fmt::Display for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<RuleError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.collect_str(err),
        None => serializer.serialize_none(),
    }
}
