//! 事实汇总
//!
//! 运行结束后根据 Almanac 中已经记忆化的值生成一行可读的事实汇总，
//! 以及失败叶子条件的诊断信息。汇总从不触发新的推导。

use crate::almanac::Almanac;
use crate::error::Result;
use crate::models::{ConditionResult, LeafResult};
use crate::path::FactPath;
use serde::Serialize;
use serde_json::Value;

/// 汇总中的一项
#[derive(Debug, Clone)]
pub struct SummaryEntry {
    pub fact: String,
    pub label: String,
    path: Option<FactPath>,
}

impl SummaryEntry {
    pub fn new(fact: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            fact: fact.into(),
            label: label.into(),
            path: None,
        }
    }

    /// 展示事实值中的某个字段，例如 `$.version`
    pub fn with_path(mut self, path: &str) -> Result<Self> {
        self.path = Some(FactPath::parse(path)?);
        Ok(self)
    }
}

/// 单个事实的汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactSummary {
    pub name: String,
    pub label: String,
    /// 尚未解析或路径缺失时为 `None`
    pub value: Option<Value>,
    pub inferred: bool,
}

/// 事实汇总生成器
#[derive(Debug, Clone, Default)]
pub struct SummaryReporter {
    entries: Vec<SummaryEntry>,
}

impl SummaryReporter {
    pub fn new(entries: Vec<SummaryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[SummaryEntry] {
        &self.entries
    }

    /// 按条目顺序收集已解析的事实
    ///
    /// 推导事实或值中带有 `"inferred": true` 的事实标记为推断得到。
    pub fn collect(&self, almanac: &Almanac) -> Vec<FactSummary> {
        self.entries
            .iter()
            .map(|entry| {
                let resolved = almanac.resolved_value(&entry.fact);

                let value = resolved.as_deref().and_then(|v| match &entry.path {
                    Some(path) => path.extract(v).cloned(),
                    None => Some(v.clone()),
                });

                let flagged = resolved
                    .as_deref()
                    .and_then(|v| v.get("inferred"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let inferred = value.is_some() && (flagged || almanac.is_inferred(&entry.fact) == Some(true));

                FactSummary {
                    name: entry.fact.clone(),
                    label: entry.label.clone(),
                    value,
                    inferred,
                }
            })
            .collect()
    }

    /// 渲染为 `Fabric=1.4.4 NodeEnv=1.4.4 [inferred] ...`
    pub fn render(&self, almanac: &Almanac) -> String {
        let mut line = String::new();

        for summary in self.collect(almanac) {
            if !line.is_empty() {
                line.push(' ');
            }
            let value = summary
                .value
                .as_ref()
                .map_or_else(|| "unresolved".to_string(), display_value);
            line.push_str(&format!("{}={}", summary.label, value));
            if summary.inferred {
                line.push_str(" [inferred]");
            }
        }

        line
    }
}

/// 每个未满足的叶子条件生成一行诊断
pub fn describe_failures(conditions: &ConditionResult) -> Vec<String> {
    conditions
        .leaves()
        .into_iter()
        .filter(|leaf| !leaf.result)
        .map(describe_leaf)
        .collect()
}

fn describe_leaf(leaf: &LeafResult) -> String {
    let condition = &leaf.condition;

    if let Some(err) = &leaf.error {
        return format!("{}: {}", condition.fact, err);
    }

    let actual = leaf
        .fact_result
        .as_ref()
        .map_or_else(|| "nothing".to_string(), display_value);

    format!(
        "{} at {} is NOT compatible with {}",
        condition.fact,
        actual,
        display_value(&condition.value)
    )
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::facts::Fact;
    use crate::models::Condition;
    use serde_json::json;

    fn reporter() -> SummaryReporter {
        SummaryReporter::new(vec![
            SummaryEntry::new("fabric", "Fabric").with_path("$.version").unwrap(),
            SummaryEntry::new("nodeenv", "NodeEnv").with_path("$.version").unwrap(),
        ])
    }

    #[tokio::test]
    async fn test_render_resolved_facts() {
        let almanac = Almanac::default();
        almanac.add_runtime_fact("fabric", json!({"version": "1.4.4"}));
        almanac.add_fact(Fact::derived("nodeenv", |_params: Value, _almanac: Almanac| async {
            Ok(json!({"version": "1.4.4", "inferred": true}))
        }));

        almanac.fact_value("nodeenv").await.unwrap();

        assert_eq!(reporter().render(&almanac), "Fabric=1.4.4 NodeEnv=1.4.4 [inferred]");
    }

    #[tokio::test]
    async fn test_collect_never_derives() {
        let almanac = Almanac::default();
        almanac.add_runtime_fact("fabric", json!({"version": "1.4.4"}));
        almanac.add_fact(Fact::derived("nodeenv", |_params: Value, _almanac: Almanac| async {
            Ok(json!({"version": "1.4.4"}))
        }));

        let summary = reporter().collect(&almanac);

        assert_eq!(summary[0].value, Some(json!("1.4.4")));
        assert!(!summary[0].inferred);
        assert_eq!(summary[1].value, None);
        assert!(!summary[1].inferred);
        assert!(almanac.resolved_value("nodeenv").is_none());
        assert_eq!(reporter().render(&almanac), "Fabric=1.4.4 NodeEnv=unresolved");
    }

    #[test]
    fn test_describe_failures() {
        let failed = LeafResult {
            condition: Condition::new("nodejs-runtime", "semvermatch", "^12.2.0").with_path("$.version"),
            fact_result: Some(json!("8.9.6")),
            result: false,
            error: None,
        };
        let passed = LeafResult {
            condition: Condition::new("fabric", "equal", "1.4.4"),
            fact_result: Some(json!("1.4.4")),
            result: true,
            error: None,
        };
        let errored = LeafResult {
            condition: Condition::new("ghost", "equal", 1),
            fact_result: None,
            result: false,
            error: Some(RuleError::UndefinedFact("ghost".to_string())),
        };
        let tree = ConditionResult::Any {
            any: vec![
                ConditionResult::Leaf(failed),
                ConditionResult::Leaf(passed),
                ConditionResult::Leaf(errored),
            ],
            result: true,
        };

        let lines = describe_failures(&tree);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "nodejs-runtime at 8.9.6 is NOT compatible with ^12.2.0");
        assert!(lines[1].starts_with("ghost: "));
    }
}
