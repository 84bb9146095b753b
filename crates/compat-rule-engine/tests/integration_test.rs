//! 规则引擎集成测试
//!
//! 测试完整的规则加载、事实推导、评估和汇总工作流。

use parking_lot::Mutex;
use rule_engine::catalog::{self, version_fact, CHAINCODE_LIBRARY, FABRIC, NODEJS_RUNTIME, NODE_ENV};
use rule_engine::{
    describe_failures, semver_match, Almanac, Condition, ConditionNode, ConditionResult, Engine,
    EngineOptions, Event, Fact, Operator, Rule, RuleError, RuleOutcome,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 创建加载了链码兼容性规则和推导事实的引擎
fn create_chaincode_engine() -> Engine {
    let mut engine = Engine::new();
    engine.add_operator(semver_match(false)).unwrap();
    engine.add_rule(catalog::nodejs_chaincode_rule().unwrap()).unwrap();
    engine.add_fact(catalog::node_env_fact());
    engine.add_fact(catalog::nodejs_runtime_fact());
    engine
}

fn leaf(fact: &str, operator: &str, value: Value) -> ConditionNode {
    Condition::new(fact, operator, value).into()
}

/// 计数的推导事实
fn counting_fact(id: &str, counter: Arc<AtomicUsize>, value: Value) -> Fact {
    Fact::derived(id, move |_params: Value, _almanac: Almanac| {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move { Ok(value) }
    })
}

#[tokio::test]
async fn test_chaincode_2_0_0_incompatible() {
    let engine = create_chaincode_engine();

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("2.0.0")),
        ])
        .await;

    let result = report.result("nodeJSChaincodeCompatible").unwrap();
    assert!(!result.result);
    assert!(result.error.is_none());
    assert_eq!(result.outcome(), RuleOutcome::Failure);

    let lines = describe_failures(result.conditions.as_ref().unwrap());
    assert_eq!(
        lines,
        vec![
            "nodejs-runtime at 8.9.6 is NOT compatible with ^12.2.0",
            "chaincode-library at 2.0.0 is NOT compatible with ^1.4.0",
            "chaincode-library at 2.0.0 is NOT compatible with ^1.4.0",
        ]
    );
}

#[tokio::test]
async fn test_chaincode_1_4_0_compatible_via_second_branch() {
    let engine = create_chaincode_engine();

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("1.4.0")),
        ])
        .await;

    assert!(report.all_succeeded());
    let conditions = report.results[0].conditions.as_ref().unwrap();
    let ConditionResult::Any { any, result } = conditions else {
        panic!("expected any at the root");
    };
    assert!(*result);
    assert!(!any[0].result());
    assert!(any[1].result());
}

#[tokio::test]
async fn test_path_extraction_compares_field() {
    let engine = create_chaincode_engine();

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, json!({"version": "2.0.0", "inferred": true})),
        ])
        .await;

    let leaves = report.results[0].conditions.as_ref().unwrap().leaves();
    let chaincode = leaves
        .iter()
        .find(|l| l.condition.fact == CHAINCODE_LIBRARY)
        .unwrap();
    assert_eq!(chaincode.fact_result, Some(json!("2.0.0")));
}

#[tokio::test]
async fn test_summary_reflects_all_inferred_facts() {
    let engine = create_chaincode_engine();

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("2.0.0")),
        ])
        .await;

    let summary = catalog::chaincode_summary().unwrap();
    assert_eq!(
        summary.render(&report.almanac),
        "Fabric=1.4.4 NodeEnv=1.4.4 [inferred] NodeJS=8.9.6 [inferred] ChaincodeLib=2.0.0"
    );

    let events = report.almanac.derivation_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].fact, NODEJS_RUNTIME);
    assert_eq!(events[0].event, Event::new("added nodeversions"));
}

#[tokio::test]
async fn test_summary_never_triggers_derivation() {
    let mut engine = Engine::new();
    let counter = Arc::new(AtomicUsize::new(0));
    engine.add_fact(counting_fact(NODE_ENV, counter.clone(), version_fact("1.4.4")));
    engine
        .add_rule(Rule::new(leaf("fabric", "equal", json!(1)), Event::new("unrelated")))
        .unwrap();

    let report = engine.run_with_facts([(FABRIC, json!(1))]).await;
    let summary = catalog::chaincode_summary().unwrap().collect(&report.almanac);

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    let node_env = summary.iter().find(|s| s.name == NODE_ENV).unwrap();
    assert_eq!(node_env.value, None);
}

#[tokio::test]
async fn test_derived_fact_runs_once_per_run() {
    let mut engine = Engine::new();
    let counter = Arc::new(AtomicUsize::new(0));
    engine.add_fact(counting_fact("runtime", counter.clone(), json!(8)));

    for i in 0..3 {
        engine
            .add_rule(
                Rule::new(
                    ConditionNode::all(vec![
                        leaf("runtime", "greaterThan", json!(i)),
                        leaf("runtime", "lessThan", json!(100)),
                    ]),
                    Event::new(format!("rule-{}", i)),
                )
                .with_priority(i + 1),
            )
            .unwrap();
    }

    let report = engine.run().await;
    assert!(report.all_succeeded());
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let first = report.almanac.fact_value("runtime").await.unwrap();
    let second = report.almanac.fact_value("runtime").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // 新的运行使用新的事实存储
    engine.run().await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_runs_are_deterministic() {
    let engine = create_chaincode_engine();
    let facts = || {
        [
            (FABRIC, version_fact("2.2.0")),
            (CHAINCODE_LIBRARY, version_fact("2.0.0")),
        ]
    };

    let first = engine.run_with_facts(facts()).await;
    let second = engine.run_with_facts(facts()).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.results, second.results);
    assert!(first.all_succeeded());
}

#[tokio::test]
async fn test_undefined_fact_isolated_to_rule() {
    let mut engine = create_chaincode_engine();
    engine
        .add_rule(
            Rule::new(leaf("fabric", "equal", json!("x")), Event::new("other")).with_name("other"),
        )
        .unwrap();

    // chaincode-library 未提供
    let report = engine.run_with_facts([(FABRIC, version_fact("1.4.4"))]).await;

    let chaincode = report.result("nodeJSChaincodeCompatible").unwrap();
    assert!(!chaincode.result);
    assert_eq!(
        chaincode.error,
        Some(RuleError::UndefinedFact(CHAINCODE_LIBRARY.to_string()))
    );

    let other = report.result("other").unwrap();
    assert!(other.error.is_none());
    assert_eq!(report.errors().count(), 1);
    assert!(report.ensure_no_contract_violations().is_err());
}

#[tokio::test]
async fn test_self_cycle_detected() {
    let mut engine = Engine::new();
    engine.add_fact(Fact::derived("loop", |_params: Value, almanac: Almanac| async move {
        let value = almanac.fact_value("loop").await?;
        Ok((*value).clone())
    }));
    engine
        .add_rule(Rule::new(leaf("loop", "equal", json!(1)), Event::new("loop")).with_name("loop"))
        .unwrap();

    let report = engine.run().await;

    let result = report.result("loop").unwrap();
    assert!(!result.result);
    assert!(matches!(result.error, Some(RuleError::CyclicDependency { .. })));
}

#[tokio::test]
async fn test_mutual_cycle_detected() {
    let mut engine = Engine::new();
    engine.add_fact(Fact::derived("a", |_params: Value, almanac: Almanac| async move {
        let value = almanac.fact_value("b").await?;
        Ok((*value).clone())
    }));
    engine.add_fact(Fact::derived("b", |_params: Value, almanac: Almanac| async move {
        let value = almanac.fact_value("a").await?;
        Ok((*value).clone())
    }));
    engine
        .add_rule(
            Rule::new(
                ConditionNode::any(vec![leaf("a", "equal", json!(1)), leaf("b", "equal", json!(1))]),
                Event::new("cycle"),
            )
            .with_name("cycle"),
        )
        .unwrap();

    let report = engine.run().await;

    let result = report.result("cycle").unwrap();
    assert!(!result.result);
    assert!(matches!(result.error, Some(RuleError::CyclicDependency { .. })));
}

#[tokio::test]
async fn test_cycle_across_concurrent_rules() {
    let mut engine = Engine::new();
    engine.add_fact(Fact::derived("a", |_params: Value, almanac: Almanac| async move {
        tokio::task::yield_now().await;
        let value = almanac.fact_value("b").await?;
        Ok((*value).clone())
    }));
    engine.add_fact(Fact::derived("b", |_params: Value, almanac: Almanac| async move {
        tokio::task::yield_now().await;
        let value = almanac.fact_value("a").await?;
        Ok((*value).clone())
    }));
    engine
        .add_rule(Rule::new(leaf("a", "equal", json!(1)), Event::new("a")).with_name("a"))
        .unwrap();
    engine
        .add_rule(Rule::new(leaf("b", "equal", json!(1)), Event::new("b")).with_name("b"))
        .unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), engine.run())
        .await
        .expect("cyclic facts must not deadlock");

    for name in ["a", "b"] {
        let result = report.result(name).unwrap();
        assert!(!result.result);
        assert!(matches!(result.error, Some(RuleError::CyclicDependency { .. })));
    }
}

#[tokio::test(start_paused = true)]
async fn test_stuck_fact_times_out() {
    let mut engine = Engine::with_options(EngineOptions {
        fact_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    engine.add_fact(Fact::derived("stuck", |_params: Value, _almanac: Almanac| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!(1))
    }));
    engine
        .add_rule(Rule::new(leaf("stuck", "equal", json!(1)), Event::new("stuck")).with_name("stuck"))
        .unwrap();
    engine
        .add_rule(Rule::new(leaf("ok", "equal", json!(1)), Event::new("ok")).with_name("ok"))
        .unwrap();

    let report = engine.run_with_facts([("ok", json!(1))]).await;

    assert_eq!(
        report.result("stuck").unwrap().error,
        Some(RuleError::FactTimeout {
            fact: "stuck".to_string(),
            timeout_ms: 100,
        })
    );
    assert!(report.result("ok").unwrap().result);
}

#[tokio::test]
async fn test_params_are_part_of_memo_key() {
    let mut engine = Engine::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();
    engine.add_fact(Fact::derived("double", move |params: Value, _almanac: Almanac| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            let n = params.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        }
    }));
    engine
        .add_rule(Rule::new(
            ConditionNode::all(vec![
                Condition::new("double", "equal", 4).with_params(json!({"n": 2})).into(),
                Condition::new("double", "equal", 4).with_params(json!({"n": 2})).into(),
                Condition::new("double", "equal", 6).with_params(json!({"n": 3})).into(),
            ]),
            Event::new("params"),
        ))
        .unwrap();

    let report = engine.run().await;

    assert!(report.all_succeeded());
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_callbacks_and_rule_events() {
    let mut engine = create_chaincode_engine();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let success = seen.clone();
    engine.on_success(move |event, almanac, _result| {
        let runtime = almanac.resolved_value(NODEJS_RUNTIME).unwrap();
        success.lock().push(format!("success:{}:{}", event.event_type, runtime["version"]));
    });
    let failure = seen.clone();
    engine.on_failure(move |event, _almanac, result| {
        failure.lock().push(format!("failure:{}:{}", event.event_type, result.result));
    });

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("1.4.0")),
        ])
        .await;
    engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("2.0.0")),
        ])
        .await;

    assert_eq!(
        *seen.lock(),
        vec![
            "success:chaincode-node:\"8.9.6\"".to_string(),
            "failure:chaincode-node:false".to_string(),
        ]
    );
    let events = report.almanac.events(RuleOutcome::Success);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].params,
        Some(json!({"message": "Supported NodeJS and Chaincode Library combination"}))
    );
}

#[tokio::test]
async fn test_custom_operator() {
    let mut engine = Engine::new();
    engine
        .add_operator(Operator::new("startsWith", |fact, expected| {
            Ok(match (fact.and_then(Value::as_str), expected.as_str()) {
                (Some(f), Some(e)) => f.starts_with(e),
                _ => false,
            })
        }))
        .unwrap();
    engine
        .add_rule(Rule::new(leaf("peer", "startsWith", json!("hyperledger/")), Event::new("peer")))
        .unwrap();

    let report = engine
        .run_with_facts([("peer", json!("hyperledger/fabric-peer:1.4.4"))])
        .await;

    assert!(report.all_succeeded());
    assert_eq!(
        engine.add_operator(Operator::new("startsWith", |_, _| Ok(false))),
        Err(RuleError::DuplicateOperator("startsWith".to_string()))
    );
}

#[tokio::test]
async fn test_rule_json_round_trip() {
    let rule = catalog::nodejs_chaincode_rule().unwrap();

    let json = serde_json::to_string(&rule).unwrap();
    let parsed: Rule = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, rule);

    let mut engine = Engine::new();
    engine.add_operator(semver_match(false)).unwrap();
    engine.add_rule_from_json(&json).unwrap();
    assert_eq!(engine.rules().count(), 1);
}

#[tokio::test]
async fn test_rule_result_serialization() {
    let engine = create_chaincode_engine();

    let report = engine
        .run_with_facts([
            (FABRIC, version_fact("1.4.4")),
            (CHAINCODE_LIBRARY, version_fact("2.0.0")),
        ])
        .await;

    let value = serde_json::to_value(&report.results[0]).unwrap();
    assert_eq!(value["result"], json!(false));
    assert_eq!(value["event"]["type"], json!("chaincode-node"));
    assert_eq!(value["conditions"]["result"], json!(false));

    let first_leaf = &value["conditions"]["any"][0]["all"][0];
    assert_eq!(first_leaf["fact"], json!("nodejs-runtime"));
    assert_eq!(first_leaf["factResult"], json!("8.9.6"));
    assert_eq!(first_leaf["result"], json!(false));
}

#[tokio::test]
async fn test_strict_semver_reports_parse_error() {
    let mut engine = Engine::new();
    engine.add_operator(semver_match(true)).unwrap();
    engine
        .add_rule(
            Rule::new(leaf("fabric", "semvermatch", json!("^1.4.0")), Event::new("fabric"))
                .with_name("fabric"),
        )
        .unwrap();

    let report = engine.run_with_facts([(FABRIC, json!("latest"))]).await;

    let result = report.result("fabric").unwrap();
    assert!(!result.result);
    assert!(matches!(result.error, Some(RuleError::ParseError(_))));
    // 解析错误不是调用方契约错误
    assert!(report.ensure_no_contract_violations().is_ok());
}
