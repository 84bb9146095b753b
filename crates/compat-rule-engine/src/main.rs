//! compat-check
//!
//! 检查 Fabric、Node.js 运行时与链码库版本组合是否兼容。
//!
//! 用法：`compat-check [fact=version ...]`，例如
//! `compat-check fabric=1.4.4 chaincode-library=2.0.0`。
//! 所有规则满足时退出码为 0，否则为 1。

use anyhow::{bail, Context, Result};
use compat_shared::config::{AppConfig, EngineSettings};
use compat_shared::observability;
use rule_engine::catalog::{self, version_fact};
use rule_engine::{describe_failures, semver_match, Engine, EngineOptions, RunReport};
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

const SERVICE_NAME: &str = "compat-check";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });

    if let Err(e) = observability::init(&config) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let mut versions = config.facts.clone();
    versions.extend(parse_args(std::env::args().skip(1))?);

    let engine = build_engine(&config.engine)?;
    info!(facts = ?versions, "Starting compatibility check");

    let report = engine
        .run_with_facts(versions.iter().map(|(fact, version)| (fact.clone(), version_fact(version))))
        .await;

    if let Err(e) = report.ensure_no_contract_violations() {
        warn!(error = %e, "Rule referenced an unknown fact or operator");
    }

    print_report(&report)?;

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

/// 解析 `fact=version` 形式的参数
fn parse_args(args: impl Iterator<Item = String>) -> Result<BTreeMap<String, String>> {
    let mut facts = BTreeMap::new();

    for arg in args {
        let Some((fact, version)) = arg.split_once('=') else {
            bail!("invalid argument '{}', expected fact=version", arg);
        };
        if fact.trim().is_empty() || version.trim().is_empty() {
            bail!("invalid argument '{}', expected fact=version", arg);
        }
        facts.insert(fact.trim().to_string(), version.trim().to_string());
    }

    Ok(facts)
}

fn build_engine(settings: &EngineSettings) -> Result<Engine> {
    let mut engine = Engine::with_options(EngineOptions {
        allow_undefined_facts: settings.allow_undefined_facts,
        fact_timeout: (settings.fact_timeout_ms > 0).then(|| Duration::from_millis(settings.fact_timeout_ms)),
        max_condition_depth: settings.max_condition_depth,
    });

    engine.add_operator(semver_match(settings.strict_semver))?;
    engine
        .add_rule(catalog::nodejs_chaincode_rule()?)
        .context("failed to load bundled rule")?;

    engine.add_fact(catalog::node_env_fact());
    engine.add_fact(catalog::nodejs_runtime_fact());

    Ok(engine)
}

fn print_report(report: &RunReport) -> Result<()> {
    let summary = catalog::chaincode_summary()?.render(&report.almanac);

    for result in &report.results {
        let rule = result.name.as_deref().unwrap_or(&result.event.event_type);

        if result.result {
            println!("Success: [{}] {}", rule, summary);
            continue;
        }

        println!("Failure: [{}] {}", rule, summary);
        if let Some(conditions) = &result.conditions {
            for line in describe_failures(conditions) {
                println!("  {}", line);
            }
        }
        if let Some(err) = &result.error {
            println!("  error: {}", err);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_parse_args() {
        let facts = parse_args(args(&["fabric=1.4.4", "chaincode-library = 2.0.0"])).unwrap();
        assert_eq!(facts.get("fabric").map(String::as_str), Some("1.4.4"));
        assert_eq!(facts.get("chaincode-library").map(String::as_str), Some("2.0.0"));
    }

    #[test]
    fn test_parse_args_rejects_malformed() {
        assert!(parse_args(args(&["fabric"])).is_err());
        assert!(parse_args(args(&["=1.4.4"])).is_err());
        assert!(parse_args(args(&["fabric="])).is_err());
    }

    #[tokio::test]
    async fn test_bundled_engine() {
        let engine = build_engine(&EngineSettings::default()).unwrap();

        let report = engine
            .run_with_facts([
                ("fabric", version_fact("1.4.4")),
                ("chaincode-library", version_fact("1.4.0")),
            ])
            .await;

        assert!(report.all_succeeded());
    }
}
