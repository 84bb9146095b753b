//! 内置的兼容性目录
//!
//! Hyperledger Fabric 的 Node.js 链码兼容性规则，以及从 Fabric 版本推断
//! Node 环境和 Node.js 运行时版本的推导事实。

use crate::almanac::Almanac;
use crate::error::Result;
use crate::facts::Fact;
use crate::models::{Event, Rule};
use crate::summary::{SummaryEntry, SummaryReporter};
use crate::version::satisfies;
use serde_json::{json, Value};

pub const FABRIC: &str = "fabric";
pub const NODE_ENV: &str = "nodeenv";
pub const NODEJS_RUNTIME: &str = "nodejs-runtime";
pub const CHAINCODE_LIBRARY: &str = "chaincode-library";

const NODEJS_CHAINCODE_RULE: &str = include_str!("../rules/nodejs-chaincode.json");

/// Node.js 链码兼容性规则
pub fn nodejs_chaincode_rule() -> Result<Rule> {
    Ok(serde_json::from_str(NODEJS_CHAINCODE_RULE)?)
}

/// 版本号形式的事实值：`{"version": "1.4.4"}`
pub fn version_fact(version: &str) -> Value {
    json!({ "version": version })
}

/// 按 Fabric 版本推断 Node 环境
pub fn node_env_fact() -> Fact {
    Fact::derived(NODE_ENV, |_params: Value, almanac: Almanac| async move {
        let fabric = almanac.fact_value(FABRIC).await?;

        Ok(infer(
            &fabric,
            &[("^2.0.0", "2.0.0"), ("^1.4.4", "1.4.4")],
        ))
    })
}

/// 按 Node 环境推断 Node.js 运行时
pub fn nodejs_runtime_fact() -> Fact {
    Fact::derived(NODEJS_RUNTIME, |_params: Value, almanac: Almanac| async move {
        let node_env = almanac.fact_value(NODE_ENV).await?;

        Ok(infer(
            &node_env,
            &[("^2.0.0", "12.2.0"), ("^1.4.0", "8.9.6")],
        ))
    })
    .with_event(Event::new("added nodeversions"))
}

/// 依次匹配 `(范围, 推断版本)`，都不匹配时返回空对象
fn infer(source: &Value, table: &[(&str, &str)]) -> Value {
    let Some(version) = source.get("version").and_then(Value::as_str) else {
        return json!({});
    };

    table
        .iter()
        .find(|(range, _)| satisfies(version, range))
        .map_or_else(
            || json!({}),
            |(_, inferred)| json!({ "version": inferred, "inferred": true }),
        )
}

/// 汇总行：`Fabric=… NodeEnv=… NodeJS=… ChaincodeLib=…`
pub fn chaincode_summary() -> Result<SummaryReporter> {
    let entries = [
        (FABRIC, "Fabric"),
        (NODE_ENV, "NodeEnv"),
        (NODEJS_RUNTIME, "NodeJS"),
        (CHAINCODE_LIBRARY, "ChaincodeLib"),
    ]
    .into_iter()
    .map(|(fact, label)| SummaryEntry::new(fact, label).with_path("$.version"))
    .collect::<Result<Vec<_>>>()?;

    Ok(SummaryReporter::new(entries))
}
