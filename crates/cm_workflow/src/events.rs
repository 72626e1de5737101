// crates/cm_workflow/src/events.rs

//! 事件系统模块
//!
//! 编排器在每个关键节点发出 [`CouplingEvent`]，由 [`EventDispatcher`]
//! 分发给已注册的监听器。

use std::sync::Arc;

use cm_physics::EngineKind;
use parking_lot::RwLock;

use crate::error::ErrorKind;
use crate::phase::Phase;

/// 耦合事件
#[derive(Debug, Clone, PartialEq)]
pub enum CouplingEvent {
    /// 窗口完成
    StepCompleted {
        /// 窗口序号
        step: u64,
        /// 窗口起点
        t0: f64,
        /// 窗口终点
        t1: f64,
        /// 激活的引擎
        active: Vec<EngineKind>,
        /// 冲突单元数
        conflicts: usize,
    },
    /// 适配器失败，以减半步长重试
    RetryScheduled {
        /// 失败的引擎
        kind: EngineKind,
        /// 第几次重试
        attempt: u32,
        /// 新的子步 [s]
        dt: f64,
        /// 失败描述
        error: String,
    },
    /// 检查点已保存
    CheckpointSaved {
        /// 窗口序号
        step: u64,
        /// 模拟时间
        time: f64,
        /// 文件路径（内存存储时为空）
        path: Option<String>,
    },
    /// 已回滚到检查点
    RolledBack {
        /// 检查点窗口序号
        step: u64,
        /// 检查点时间
        time: f64,
    },
    /// 运行结束
    Terminated {
        /// 最终时间
        time: f64,
        /// 完成的窗口数
        steps: u64,
        /// 若因致命错误结束，则为错误类别
        error: Option<ErrorKind>,
        /// 结束时所在阶段
        phase: Phase,
    },
}

impl CouplingEvent {
    /// 获取事件名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::StepCompleted { .. } => "StepCompleted",
            Self::RetryScheduled { .. } => "RetryScheduled",
            Self::CheckpointSaved { .. } => "CheckpointSaved",
            Self::RolledBack { .. } => "RolledBack",
            Self::Terminated { .. } => "Terminated",
        }
    }
}

/// 事件监听器trait
pub trait EventListener: Send + Sync {
    /// 处理事件
    fn on_event(&self, event: &CouplingEvent);

    /// 获取监听器名称 (用于调试)
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// 函数式事件监听器
pub struct FnListener<F>
where
    F: Fn(&CouplingEvent) + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnListener<F>
where
    F: Fn(&CouplingEvent) + Send + Sync,
{
    /// 创建函数式监听器
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&CouplingEvent) + Send + Sync,
{
    fn on_event(&self, event: &CouplingEvent) {
        (self.handler)(event);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 日志事件监听器
pub struct LoggingListener {
    prefix: String,
    verbose: bool,
}

impl LoggingListener {
    /// 创建日志监听器
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            verbose: false,
        }
    }

    /// 设置详细模式（逐窗口输出）
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

impl EventListener for LoggingListener {
    fn on_event(&self, event: &CouplingEvent) {
        let msg = match event {
            CouplingEvent::StepCompleted {
                step,
                t0,
                t1,
                active,
                conflicts,
            } if self.verbose => {
                format!(
                    "step {} [{:.1}, {:.1}) engines={:?} conflicts={}",
                    step, t0, t1, active, conflicts
                )
            }
            CouplingEvent::RetryScheduled {
                kind,
                attempt,
                dt,
                error,
            } => {
                format!("{} failed ({}), retry #{} with dt={:.3}s", kind, error, attempt, dt)
            }
            CouplingEvent::CheckpointSaved { step, time, path } => match path {
                Some(p) => format!("checkpoint at step {} (t={:.1}s): {}", step, time, p),
                None => format!("checkpoint at step {} (t={:.1}s) kept in memory", step, time),
            },
            CouplingEvent::RolledBack { step, time } => {
                format!("rolled back to step {} (t={:.1}s)", step, time)
            }
            CouplingEvent::Terminated {
                time,
                steps,
                error,
                phase,
            } => match error {
                Some(kind) => format!("terminated by {} error in {} at t={:.1}s", kind, phase, time),
                None => format!("finished at t={:.1}s after {} steps", time, steps),
            },
            _ => return,
        };

        tracing::info!("{}: {}", self.prefix, msg);
    }

    fn name(&self) -> &str {
        "LoggingListener"
    }
}

/// 事件分发器
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    /// 创建新的事件分发器
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// 添加监听器
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        let name = listener.name().to_string();
        self.listeners.write().push(listener);
        tracing::debug!("Added event listener: {}", name);
    }

    /// 添加函数式监听器
    pub fn add_fn_listener<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&CouplingEvent) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(FnListener::new(name, handler)));
    }

    /// 移除监听器
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// 清除所有监听器
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// 分发事件
    pub fn emit(&self, event: CouplingEvent) {
        let listeners = self.listeners.read();
        tracing::trace!("Emitting event: {}", event.name());
        for listener in listeners.iter() {
            listener.on_event(&event);
        }
    }

    /// 获取监听器数量
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}
