//! 条件树评估器
//!
//! 递归评估 all/any 条件树，生成带注解的结果树。
//! 组合节点总是评估全部子节点（不短路），保证每个被引用的推导事实都会被解析并记忆化，
//! 汇总报告看到的是完整的事实集合。

use crate::almanac::Almanac;
use crate::compiler::CompiledRule;
use crate::error::{Result, RuleError};
use crate::models::{Condition, ConditionNode, ConditionResult, LeafResult};
use crate::operators::OperatorRegistry;
use crate::path::FactPath;
use futures::future::{join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// 默认的最大嵌套深度
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// 条件树评估器
pub struct ConditionEvaluator<'a> {
    operators: &'a OperatorRegistry,
    max_depth: usize,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(operators: &'a OperatorRegistry) -> Self {
        Self {
            operators,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 评估条件树，任一叶子出错时返回按子节点顺序的第一个错误
    pub async fn evaluate(
        &self,
        node: &ConditionNode,
        almanac: &Almanac,
    ) -> Result<(bool, ConditionResult)> {
        let annotated = self.evaluate_annotated(node, almanac).await?;

        if let Some(err) = annotated.first_error() {
            return Err(err.clone());
        }

        Ok((annotated.result(), annotated))
    }

    /// 评估条件树，叶子错误记录在注解中而不是中断评估
    ///
    /// 只有超过深度上限时才直接返回错误。
    pub async fn evaluate_annotated(
        &self,
        node: &ConditionNode,
        almanac: &Almanac,
    ) -> Result<ConditionResult> {
        self.evaluate_with_paths(node, &HashMap::new(), almanac).await
    }

    /// 评估编译后的规则，路径表达式使用编译时解析好的结果
    pub async fn evaluate_compiled(&self, rule: &CompiledRule, almanac: &Almanac) -> Result<ConditionResult> {
        self.evaluate_with_paths(rule.conditions(), &rule.paths, almanac).await
    }

    async fn evaluate_with_paths(
        &self,
        node: &ConditionNode,
        paths: &HashMap<String, FactPath>,
        almanac: &Almanac,
    ) -> Result<ConditionResult> {
        let depth = node.depth();
        if depth > self.max_depth {
            return Err(RuleError::ConditionTooDeep {
                depth,
                max: self.max_depth,
            });
        }

        Ok(self.evaluate_node(node, paths, almanac).await)
    }

    fn evaluate_node<'b>(
        &'b self,
        node: &'b ConditionNode,
        paths: &'b HashMap<String, FactPath>,
        almanac: &'b Almanac,
    ) -> BoxFuture<'b, ConditionResult> {
        async move {
            match node {
                ConditionNode::Leaf(condition) => {
                    ConditionResult::Leaf(self.evaluate_leaf(condition, paths, almanac).await)
                }
                ConditionNode::All(children) => {
                    let all = self.evaluate_children(children, paths, almanac).await;
                    let result = all.iter().all(ConditionResult::result);
                    ConditionResult::All { all, result }
                }
                ConditionNode::Any(children) => {
                    let any = self.evaluate_children(children, paths, almanac).await;
                    let result = any.iter().any(ConditionResult::result);
                    ConditionResult::Any { any, result }
                }
            }
        }
        .boxed()
    }

    /// 并发评估全部子节点，结果保持子节点顺序
    async fn evaluate_children(
        &self,
        children: &[ConditionNode],
        paths: &HashMap<String, FactPath>,
        almanac: &Almanac,
    ) -> Vec<ConditionResult> {
        join_all(children.iter().map(|child| self.evaluate_node(child, paths, almanac))).await
    }

    async fn evaluate_leaf(
        &self,
        condition: &Condition,
        paths: &HashMap<String, FactPath>,
        almanac: &Almanac,
    ) -> LeafResult {
        match self.compare(condition, paths, almanac).await {
            Ok((fact_result, result)) => LeafResult {
                condition: condition.clone(),
                fact_result,
                result,
                error: None,
            },
            Err(err) => {
                debug!(fact = %condition.fact, error = %err, "条件评估失败");
                LeafResult {
                    condition: condition.clone(),
                    fact_result: None,
                    result: false,
                    error: Some(err),
                }
            }
        }
    }

    async fn compare(
        &self,
        condition: &Condition,
        paths: &HashMap<String, FactPath>,
        almanac: &Almanac,
    ) -> Result<(Option<Value>, bool)> {
        let null = Value::Null;
        let params = condition.params.as_ref().unwrap_or(&null);

        let fact_value = almanac.try_fact_value(&condition.fact, params).await?;

        let fact_result = match (&condition.path, fact_value.as_deref()) {
            (Some(path), Some(value)) => match paths.get(path) {
                Some(parsed) => parsed.extract(value).cloned(),
                None => FactPath::parse(path)?.extract(value).cloned(),
            },
            (None, Some(value)) => Some(value.clone()),
            (_, None) => None,
        };

        let operator = self.operators.resolve(&condition.operator)?;
        let result = operator.evaluate(fact_result.as_ref(), &condition.value)?;

        debug!(
            fact = %condition.fact,
            operator = %condition.operator,
            value = %condition.value,
            fact_result = ?fact_result,
            result,
            "条件评估完成"
        );

        Ok((fact_result, result))
    }
}
