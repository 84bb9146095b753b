//! 规则执行器
//!
//! 对单条规则评估条件树并生成 `RuleResult`。评估错误被隔离在该规则的结果中
//! （规则视为未满足并附带错误），不会中断同一次运行中的其他规则。

use crate::almanac::Almanac;
use crate::compiler::CompiledRule;
use crate::evaluator::ConditionEvaluator;
use crate::models::{ConditionResult, RuleResult};
use crate::operators::OperatorRegistry;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// 规则执行器
pub struct RuleExecutor<'a> {
    evaluator: ConditionEvaluator<'a>,
}

impl<'a> RuleExecutor<'a> {
    pub fn new(operators: &'a OperatorRegistry, max_depth: usize) -> Self {
        Self {
            evaluator: ConditionEvaluator::new(operators).with_max_depth(max_depth),
        }
    }

    /// 执行规则评估
    #[instrument(skip_all, fields(rule = %rule.label(), priority = rule.priority()))]
    pub async fn execute(&self, rule: &CompiledRule, almanac: &Almanac) -> RuleResult {
        let start = Instant::now();

        let (conditions, error) = match self
            .evaluator
            .evaluate_compiled(rule, almanac)
            .await
        {
            Ok(tree) => {
                let error = tree.first_error().cloned();
                (Some(tree), error)
            }
            Err(err) => (None, Some(err)),
        };

        let result = error.is_none() && conditions.as_ref().is_some_and(ConditionResult::result);

        if let Some(err) = &error {
            warn!(error = %err, contract_violation = err.is_contract_violation(), "规则评估出错");
        }

        debug!(
            result,
            elapsed_us = start.elapsed().as_micros() as u64,
            "规则评估完成"
        );

        RuleResult {
            name: rule.name().map(str::to_string),
            priority: rule.priority(),
            event: rule.event().clone(),
            result,
            conditions,
            error,
        }
    }
}
