//! 事实存储（Almanac）
//!
//! 每次运行一个实例，保存事实定义和记忆化结果：
//! - 每个 (事实, 参数) 条目持有一个 `OnceCell`，并发读取同一事实时只执行一次推导，
//!   其余调用方等待同一个结果（包括失败结果）
//! - 推导中的 (事实, 参数) 条目之间维护一张等待图，请求会形成环时立即返回 `CyclicDependency`，不会死锁
//! - 推导可以按事实或全局配置超时

use crate::error::{Result, RuleError};
use crate::facts::{Fact, FactDefinition, FactDeriver};
use crate::models::{Event, RuleOutcome};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

type FactOutcome = Result<Arc<Value>>;

/// Almanac 配置
#[derive(Debug, Clone, Default)]
pub struct AlmanacOptions {
    /// 为 true 时未注册的事实按缺失值处理，而不是返回 `UndefinedFact`
    pub allow_undefined_facts: bool,
    /// 推导事实的默认超时
    pub fact_timeout: Option<Duration>,
}

/// 事实推导时记录的诊断事件
#[derive(Debug, Clone, PartialEq)]
pub struct DerivationEvent {
    pub fact: String,
    pub event: Event,
}

struct FactEntry {
    fact: Fact,
    /// 记忆化结果，键为参数的 JSON 文本
    values: DashMap<String, Arc<OnceCell<FactOutcome>>>,
}

impl FactEntry {
    fn new(fact: Fact) -> Self {
        Self {
            fact,
            values: DashMap::new(),
        }
    }

    fn cell(&self, params: &Value) -> Arc<OnceCell<FactOutcome>> {
        self.values
            .entry(cache_key(params))
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

fn cache_key(params: &Value) -> String {
    params.to_string()
}

/// 等待图中的节点：事实名加参数，与记忆化条目一一对应
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WaitNode {
    fact: String,
    params: String,
}

impl WaitNode {
    fn new(fact: &str, params: &Value) -> Self {
        Self {
            fact: fact.to_string(),
            params: cache_key(params),
        }
    }
}

/// 推导中条目之间的等待关系，边 `a -> b` 表示 a 的推导正在等待 b
///
/// 同一事实以不同参数递归请求不构成环。
#[derive(Debug, Default)]
struct WaitGraph {
    edges: HashMap<WaitNode, HashMap<WaitNode, usize>>,
}

impl WaitGraph {
    /// 添加等待边；如果 `to` 已经（间接）在等待 `from`，返回环路上的事实名
    fn add(&mut self, from: &WaitNode, to: &WaitNode) -> std::result::Result<(), Vec<String>> {
        if let Some(path) = self.path(to, from) {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(from.fact.clone());
            cycle.extend(path.into_iter().map(|node| node.fact.clone()));
            return Err(cycle);
        }

        *self
            .edges
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_default() += 1;
        Ok(())
    }

    fn remove(&mut self, from: &WaitNode, to: &WaitNode) {
        if let Some(targets) = self.edges.get_mut(from) {
            if let Some(count) = targets.get_mut(to) {
                *count -= 1;
                if *count == 0 {
                    targets.remove(to);
                }
            }
            if targets.is_empty() {
                self.edges.remove(from);
            }
        }
    }

    /// 广度优先查找 start 到 goal 的路径（包含两端）
    fn path<'a>(&'a self, start: &'a WaitNode, goal: &'a WaitNode) -> Option<Vec<&'a WaitNode>> {
        if start == goal {
            return Some(vec![start]);
        }

        let mut parents: HashMap<&WaitNode, &WaitNode> = HashMap::new();
        let mut visited: HashSet<&WaitNode> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            let Some(targets) = self.edges.get(node) else {
                continue;
            };
            for next in targets.keys() {
                if !visited.insert(next) {
                    continue;
                }
                parents.insert(next, node);
                if next == goal {
                    let mut path = vec![goal];
                    let mut current = goal;
                    while let Some(&parent) = parents.get(current) {
                        path.push(parent);
                        current = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }
}

/// 等待边的守卫，离开作用域（包括 future 被取消）时移除边
struct WaitGuard<'a> {
    graph: &'a Mutex<WaitGraph>,
    from: Arc<WaitNode>,
    to: WaitNode,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.graph.lock().remove(&self.from, &self.to);
    }
}

struct AlmanacInner {
    options: AlmanacOptions,
    facts: DashMap<String, Arc<FactEntry>>,
    waits: Mutex<WaitGraph>,
    derivation_events: Mutex<Vec<DerivationEvent>>,
    rule_events: Mutex<Vec<(RuleOutcome, Event)>>,
}

/// 事实存储
///
/// 克隆开销很小，所有克隆共享同一份事实和缓存。
#[derive(Clone)]
pub struct Almanac {
    inner: Arc<AlmanacInner>,
    /// 推导函数拿到的句柄记录自己正在推导的条目，用于维护等待图
    resolving: Option<Arc<WaitNode>>,
}

impl Almanac {
    pub fn new(options: AlmanacOptions) -> Self {
        Self {
            inner: Arc::new(AlmanacInner {
                options,
                facts: DashMap::new(),
                waits: Mutex::new(WaitGraph::default()),
                derivation_events: Mutex::new(Vec::new()),
                rule_events: Mutex::new(Vec::new()),
            }),
            resolving: None,
        }
    }

    pub fn options(&self) -> &AlmanacOptions {
        &self.inner.options
    }

    /// 注册事实；同名事实会被替换，已缓存的值一并清除
    pub fn add_fact(&self, fact: Fact) {
        debug!(fact = %fact.id, derived = fact.is_derived(), "注册事实");
        self.inner
            .facts
            .insert(fact.id.clone(), Arc::new(FactEntry::new(fact)));
    }

    /// 注册运行时静态事实
    pub fn add_runtime_fact(&self, id: impl Into<String>, value: Value) {
        self.add_fact(Fact::new(id, value));
    }

    pub fn has_fact(&self, id: &str) -> bool {
        self.inner.facts.contains_key(id)
    }

    /// 已注册的事实名称（排序后）
    pub fn fact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.facts.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// 当前句柄正在推导的事实
    pub fn resolving(&self) -> Option<&str> {
        self.resolving.as_deref().map(|node| node.fact.as_str())
    }

    /// 读取事实值，未注册时总是返回 `UndefinedFact`
    pub async fn fact_value(&self, id: &str) -> Result<Arc<Value>> {
        self.fact_value_with_params(id, &Value::Null).await
    }

    pub async fn fact_value_with_params(&self, id: &str, params: &Value) -> Result<Arc<Value>> {
        self.resolve(id, params)
            .await?
            .ok_or_else(|| RuleError::UndefinedFact(id.to_string()))
    }

    /// 读取事实值；开启 `allow_undefined_facts` 时未注册的事实返回 `None`
    pub async fn try_fact_value(&self, id: &str, params: &Value) -> Result<Option<Arc<Value>>> {
        self.resolve(id, params).await
    }

    #[instrument(level = "debug", skip(self, params), fields(resolving = self.resolving()))]
    async fn resolve(&self, id: &str, params: &Value) -> Result<Option<Arc<Value>>> {
        let Some(entry) = self.entry(id) else {
            if self.inner.options.allow_undefined_facts {
                debug!(fact = id, "事实未定义，按缺失值处理");
                return Ok(None);
            }
            return Err(RuleError::UndefinedFact(id.to_string()));
        };

        let deriver = match &entry.fact.definition {
            FactDefinition::Static(value) => return Ok(Some(Arc::clone(value))),
            FactDefinition::Derived(deriver) => Arc::clone(deriver),
        };

        let _guard = self.wait_on(WaitNode::new(id, params))?;

        if !entry.fact.options.cache {
            return self.derive(&entry, deriver.as_ref(), params).await.map(Some);
        }

        let cell = entry.cell(params);
        cell.get_or_init(|| self.derive(&entry, deriver.as_ref(), params))
            .await
            .clone()
            .map(Some)
    }

    /// 只读取已经记忆化的值，从不触发推导
    pub fn resolved_value(&self, id: &str) -> Option<Arc<Value>> {
        let entry = self.entry(id)?;
        match &entry.fact.definition {
            FactDefinition::Static(value) => Some(Arc::clone(value)),
            FactDefinition::Derived(_) => entry
                .values
                .get(&cache_key(&Value::Null))
                .and_then(|cell| cell.get().and_then(|r| r.as_ref().ok().cloned())),
        }
    }

    /// 事实是否由推导得到；未注册时返回 `None`
    pub fn is_inferred(&self, id: &str) -> Option<bool> {
        self.entry(id).map(|e| e.fact.is_derived())
    }

    pub fn derivation_events(&self) -> Vec<DerivationEvent> {
        self.inner.derivation_events.lock().clone()
    }

    /// 记录规则事件
    pub fn add_event(&self, outcome: RuleOutcome, event: Event) {
        self.inner.rule_events.lock().push((outcome, event));
    }

    pub fn events(&self, outcome: RuleOutcome) -> Vec<Event> {
        self.inner
            .rule_events
            .lock()
            .iter()
            .filter(|(o, _)| *o == outcome)
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn entry(&self, id: &str) -> Option<Arc<FactEntry>> {
        self.inner.facts.get(id).map(|e| Arc::clone(e.value()))
    }

    fn wait_on(&self, to: WaitNode) -> Result<Option<WaitGuard<'_>>> {
        let Some(from) = &self.resolving else {
            return Ok(None);
        };

        self.inner
            .waits
            .lock()
            .add(from, &to)
            .map_err(|cycle| {
                warn!(cycle = ?cycle, "检测到事实循环依赖");
                RuleError::CyclicDependency { cycle }
            })?;

        Ok(Some(WaitGuard {
            graph: &self.inner.waits,
            from: Arc::clone(from),
            to,
        }))
    }

    async fn derive(&self, entry: &FactEntry, deriver: &dyn FactDeriver, params: &Value) -> FactOutcome {
        let id = entry.fact.id.as_str();
        let handle = Almanac {
            inner: Arc::clone(&self.inner),
            resolving: Some(Arc::new(WaitNode::new(id, params))),
        };

        debug!(fact = id, "开始推导事实");

        let outcome = match entry.fact.options.timeout.or(self.inner.options.fact_timeout) {
            Some(limit) => tokio::time::timeout(limit, deriver.derive(params, &handle))
                .await
                .unwrap_or_else(|_| {
                    Err(RuleError::FactTimeout {
                        fact: id.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }),
            None => deriver.derive(params, &handle).await,
        };

        match &outcome {
            Ok(value) => {
                debug!(fact = id, value = %value, "事实推导完成");
                if let Some(event) = &entry.fact.options.event {
                    self.inner.derivation_events.lock().push(DerivationEvent {
                        fact: id.to_string(),
                        event: event.clone(),
                    });
                }
            }
            Err(e) => warn!(fact = id, error = %e, "事实推导失败"),
        }

        outcome.map(Arc::new)
    }
}

impl Default for Almanac {
    fn default() -> Self {
        Self::new(AlmanacOptions::default())
    }
}
