//! 规则编译器
//!
//! 在规则加入引擎时校验结构：操作符必须已注册、路径表达式合法、嵌套深度不超限，
//! 并预提取规则引用的所有事实名称。结构错误在任何运行开始前直接返回给调用方。

use crate::error::{Result, RuleError};
use crate::evaluator::DEFAULT_MAX_DEPTH;
use crate::models::{Condition, ConditionNode, Event, Rule};
use crate::operators::{OperatorRegistry, SEMVER_MATCH};
use crate::path::FactPath;
use crate::version::VersionRange;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    /// 规则引用的所有事实名称
    pub required_facts: BTreeSet<String>,
    /// 预解析的路径表达式，按原始表达式索引
    pub paths: HashMap<String, FactPath>,
    /// 编译序号，同时反映规则加入引擎的顺序
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn name(&self) -> Option<&str> {
        self.rule.name.as_deref()
    }

    pub fn label(&self) -> &str {
        self.rule.label()
    }

    pub fn priority(&self) -> u32 {
        self.rule.priority
    }

    pub fn conditions(&self) -> &ConditionNode {
        &self.rule.conditions
    }

    pub fn event(&self) -> &Event {
        &self.rule.event
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
    max_depth: usize,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self {
            compile_version: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str, operators: &OperatorRegistry) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule, operators)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule, operators: &OperatorRegistry) -> Result<CompiledRule> {
        self.validate_rule(&rule, operators)?;

        let required_facts = self.extract_facts(&rule.conditions);
        let mut paths = HashMap::new();
        self.collect_paths(&rule.conditions, &mut paths)?;

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            required_facts,
            paths,
            compile_version: self.compile_version,
        })
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &Rule, operators: &OperatorRegistry) -> Result<()> {
        if rule.event.event_type.is_empty() {
            return Err(RuleError::InvalidRule("规则事件类型不能为空".to_string()));
        }

        if rule.priority == 0 {
            return Err(RuleError::InvalidRule(format!(
                "规则 '{}' 的优先级必须大于 0",
                rule.label()
            )));
        }

        // 先检查深度，后续递归校验不会过深
        let depth = rule.conditions.depth();
        if depth > self.max_depth {
            return Err(RuleError::ConditionTooDeep {
                depth,
                max: self.max_depth,
            });
        }

        self.validate_node(&rule.conditions, "conditions", operators)
    }

    /// 验证条件节点
    fn validate_node(&self, node: &ConditionNode, path: &str, operators: &OperatorRegistry) -> Result<()> {
        match node {
            ConditionNode::Leaf(condition) => self.validate_condition(condition, path, operators),
            ConditionNode::All(children) | ConditionNode::Any(children) => {
                let kind = if matches!(node, ConditionNode::All(_)) { "all" } else { "any" };

                if children.is_empty() {
                    warn!("组合条件 '{}.{}' 为空，all 恒为真，any 恒为假", path, kind);
                }

                for (i, child) in children.iter().enumerate() {
                    let child_path = format!("{}.{}[{}]", path, kind, i);
                    self.validate_node(child, &child_path, operators)?;
                }

                Ok(())
            }
        }
    }

    /// 验证叶子条件
    fn validate_condition(&self, cond: &Condition, path: &str, operators: &OperatorRegistry) -> Result<()> {
        if cond.fact.is_empty() {
            return Err(RuleError::InvalidRule(format!("条件 '{}' 的事实名称不能为空", path)));
        }

        operators.resolve(&cond.operator)?;

        if let Some(fact_path) = &cond.path {
            FactPath::parse(fact_path)?;
        }

        self.validate_operator_value(cond, path)
    }

    /// 验证操作符和值的兼容性
    fn validate_operator_value(&self, cond: &Condition, path: &str) -> Result<()> {
        match cond.operator.as_str() {
            "in" | "notIn" => {
                if !cond.value.is_array() {
                    return Err(RuleError::InvalidRule(format!(
                        "条件 '{}' 的 {} 操作符需要数组值",
                        path, cond.operator
                    )));
                }
            }
            "regex" => {
                let pattern = cond.value.as_str().ok_or_else(|| {
                    RuleError::InvalidRule(format!("条件 '{}' 的 regex 操作符需要字符串值", path))
                })?;
                regex::Regex::new(pattern).map_err(|e| {
                    RuleError::InvalidRule(format!("条件 '{}' 的正则表达式无效: {}", path, e))
                })?;
            }
            SEMVER_MATCH => {
                let range = cond.value.as_str().ok_or_else(|| {
                    RuleError::InvalidRule(format!("条件 '{}' 的版本范围必须是字符串", path))
                })?;
                VersionRange::parse(range)?;
            }
            _ => {
                // 自定义操作符不做值校验
            }
        }

        Ok(())
    }

    /// 提取规则中引用的所有事实
    fn extract_facts(&self, node: &ConditionNode) -> BTreeSet<String> {
        let mut facts = BTreeSet::new();
        self.collect_facts(node, &mut facts);
        facts
    }

    fn collect_paths(&self, node: &ConditionNode, paths: &mut HashMap<String, FactPath>) -> Result<()> {
        match node {
            ConditionNode::Leaf(condition) => {
                if let Some(path) = &condition.path {
                    if !paths.contains_key(path) {
                        paths.insert(path.clone(), FactPath::parse(path)?);
                    }
                }
            }
            ConditionNode::All(children) | ConditionNode::Any(children) => {
                for child in children {
                    self.collect_paths(child, paths)?;
                }
            }
        }
        Ok(())
    }

    fn collect_facts(&self, node: &ConditionNode, facts: &mut BTreeSet<String>) {
        match node {
            ConditionNode::Leaf(condition) => {
                facts.insert(condition.fact.clone());
            }
            ConditionNode::All(children) | ConditionNode::Any(children) => {
                for child in children {
                    self.collect_facts(child, facts);
                }
            }
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
