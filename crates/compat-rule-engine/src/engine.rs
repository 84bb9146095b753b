//! 规则引擎
//!
//! 持有规则、事实定义、操作符和通知回调。每次 `run` 创建一个新的 [`Almanac`]，
//! 运行之间不共享任何可变状态。规则按优先级从高到低分组，同组规则并发评估。

use crate::almanac::{Almanac, AlmanacOptions};
use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::evaluator::DEFAULT_MAX_DEPTH;
use crate::executor::RuleExecutor;
use crate::facts::Fact;
use crate::models::{Event, Rule, RuleOutcome, RuleResult};
use crate::operators::{Operator, OperatorRegistry};
use futures::future::join_all;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, Span};
use uuid::Uuid;

/// 规则结果通知回调
pub type RuleCallback = Arc<dyn Fn(&Event, &Almanac, &RuleResult) + Send + Sync>;

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 未注册的事实按缺失值处理
    pub allow_undefined_facts: bool,
    /// 推导事实的默认超时
    pub fact_timeout: Option<Duration>,
    /// 条件树最大嵌套深度
    pub max_condition_depth: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            allow_undefined_facts: false,
            fact_timeout: None,
            max_condition_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// 规则引擎
pub struct Engine {
    options: EngineOptions,
    operators: OperatorRegistry,
    compiler: RuleCompiler,
    rules: Vec<CompiledRule>,
    facts: BTreeMap<String, Fact>,
    on_success: Vec<RuleCallback>,
    on_failure: Vec<RuleCallback>,
}

impl Engine {
    /// 使用默认配置和内置操作符创建引擎
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            compiler: RuleCompiler::new().with_max_depth(options.max_condition_depth),
            options,
            operators: OperatorRegistry::with_defaults(),
            rules: Vec::new(),
            facts: BTreeMap::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// 注册自定义操作符，同名操作符返回 `DuplicateOperator`
    pub fn add_operator(&mut self, operator: Operator) -> Result<()> {
        let name = operator.name().to_string();
        self.operators.register(operator)?;
        info!(operator = %name, "操作符已注册");
        Ok(())
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// 加入规则；结构错误（未知操作符、非法路径等）立即返回
    #[instrument(skip_all, fields(rule = %rule.label()))]
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        let compiled = self.compiler.compile(rule, &self.operators)?;
        info!(facts = ?compiled.required_facts, "规则已加载");
        self.rules.push(compiled);
        Ok(())
    }

    /// 从 JSON 字符串加入规则
    pub fn add_rule_from_json(&mut self, json: &str) -> Result<()> {
        let rule: Rule = serde_json::from_str(json)?;
        self.add_rule(rule)
    }

    /// 按名称移除规则，返回是否有规则被移除
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name() != Some(name));
        before != self.rules.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|r| &r.rule)
    }

    /// 注册事实定义；同名事实会被替换
    pub fn add_fact(&mut self, fact: Fact) {
        info!(fact = %fact.id, derived = fact.is_derived(), "事实已注册");
        self.facts.insert(fact.id.clone(), fact);
    }

    pub fn remove_fact(&mut self, id: &str) -> bool {
        self.facts.remove(id).is_some()
    }

    /// 注册规则成功时的回调
    pub fn on_success<F>(&mut self, callback: F)
    where
        F: Fn(&Event, &Almanac, &RuleResult) + Send + Sync + 'static,
    {
        self.on_success.push(Arc::new(callback));
    }

    /// 注册规则失败（包括评估出错）时的回调
    pub fn on_failure<F>(&mut self, callback: F)
    where
        F: Fn(&Event, &Almanac, &RuleResult) + Send + Sync + 'static,
    {
        self.on_failure.push(Arc::new(callback));
    }

    /// 使用已注册的事实运行全部规则
    pub async fn run(&self) -> RunReport {
        self.run_with_facts(std::iter::empty::<(String, Value)>()).await
    }

    /// 运行全部规则，`runtime_facts` 只在本次运行中生效并覆盖同名事实
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run_with_facts<I, K>(&self, runtime_facts: I) -> RunReport
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));

        let almanac = Almanac::new(AlmanacOptions {
            allow_undefined_facts: self.options.allow_undefined_facts,
            fact_timeout: self.options.fact_timeout,
        });
        for fact in self.facts.values() {
            almanac.add_fact(fact.clone());
        }
        for (id, value) in runtime_facts {
            almanac.add_runtime_fact(id, value);
        }

        let executor = RuleExecutor::new(&self.operators, self.options.max_condition_depth);
        let mut results = Vec::with_capacity(self.rules.len());

        for group in self.prioritized_rules() {
            let group_results = join_all(group.iter().map(|rule| executor.execute(rule, &almanac))).await;

            for result in group_results {
                self.notify(&almanac, &result);
                results.push(result);
            }
        }

        let report = RunReport {
            run_id,
            results,
            almanac,
        };

        info!(
            rules = report.results.len(),
            succeeded = report.successes().count(),
            failed = report.failures().count(),
            errors = report.errors().count(),
            "规则运行完成"
        );

        report
    }

    /// 按优先级从高到低分组，组内保持加入顺序
    fn prioritized_rules(&self) -> Vec<Vec<&CompiledRule>> {
        let mut ordered: Vec<&CompiledRule> = self.rules.iter().collect();
        ordered.sort_by_key(|r| (Reverse(r.priority()), r.compile_version));

        ordered
            .chunk_by(|a, b| a.priority() == b.priority())
            .map(<[&CompiledRule]>::to_vec)
            .collect()
    }

    fn notify(&self, almanac: &Almanac, result: &RuleResult) {
        let outcome = result.outcome();
        almanac.add_event(outcome, result.event.clone());

        let callbacks = match outcome {
            RuleOutcome::Success => &self.on_success,
            RuleOutcome::Failure => &self.on_failure,
        };
        for callback in callbacks {
            callback(&result.event, almanac, result);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次运行的结果
pub struct RunReport {
    pub run_id: Uuid,
    /// 按优先级、加入顺序排列的规则结果
    pub results: Vec<RuleResult>,
    /// 本次运行的事实存储，可用于生成汇总
    pub almanac: Almanac,
}

impl RunReport {
    pub fn successes(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| r.result)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.result)
    }

    pub fn errors(&self) -> impl Iterator<Item = (&RuleResult, &RuleError)> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r, e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.result)
    }

    /// 按名称查找规则结果
    pub fn result(&self, name: &str) -> Option<&RuleResult> {
        self.results.iter().find(|r| r.name.as_deref() == Some(name))
    }

    /// 把引用未注册事实/操作符这类调用方错误作为顶层错误返回
    pub fn ensure_no_contract_violations(&self) -> Result<()> {
        match self.errors().find(|(_, e)| e.is_contract_violation()) {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }
}
