//! 事实定义
//!
//! 事实要么是注册时就确定的静态值，要么由推导函数在运行时按需计算。
//! 推导函数可以通过传入的 [`Almanac`] 读取其他事实。

use crate::almanac::Almanac;
use crate::error::Result;
use crate::models::Event;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 事实推导函数
#[async_trait]
pub trait FactDeriver: Send + Sync {
    async fn derive(&self, params: &Value, almanac: &Almanac) -> Result<Value>;
}

/// 闭包形式的推导函数：`|params, almanac| async move { ... }`
struct FnDeriver<F>(F);

#[async_trait]
impl<F, Fut> FactDeriver for FnDeriver<F>
where
    F: Fn(Value, Almanac) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn derive(&self, params: &Value, almanac: &Almanac) -> Result<Value> {
        (self.0)(params.clone(), almanac.clone()).await
    }
}

/// 事实定义
#[derive(Clone)]
pub enum FactDefinition {
    Static(Arc<Value>),
    Derived(Arc<dyn FactDeriver>),
}

impl fmt::Debug for FactDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// 事实选项
#[derive(Debug, Clone)]
pub struct FactOptions {
    /// 为 false 时每次读取都重新推导，不做记忆化
    pub cache: bool,
    /// 推导发生时记录的诊断事件
    pub event: Option<Event>,
    /// 推导超时，未设置时使用 Almanac 的默认值
    pub timeout: Option<Duration>,
}

impl Default for FactOptions {
    fn default() -> Self {
        Self {
            cache: true,
            event: None,
            timeout: None,
        }
    }
}

/// 命名事实
#[derive(Debug, Clone)]
pub struct Fact {
    pub id: String,
    pub definition: FactDefinition,
    pub options: FactOptions,
}

impl Fact {
    /// 静态事实
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            definition: FactDefinition::Static(Arc::new(value)),
            options: FactOptions::default(),
        }
    }

    /// 由闭包推导的事实
    pub fn derived<F, Fut>(id: impl Into<String>, derive: F) -> Self
    where
        F: Fn(Value, Almanac) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::with_deriver(id, Arc::new(FnDeriver(derive)))
    }

    /// 由 [`FactDeriver`] 实现推导的事实
    pub fn with_deriver(id: impl Into<String>, deriver: Arc<dyn FactDeriver>) -> Self {
        Self {
            id: id.into(),
            definition: FactDefinition::Derived(deriver),
            options: FactOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FactOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.options.event = Some(event);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.options.cache = false;
        self
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.definition, FactDefinition::Derived(_))
    }
}
