// crates/cm_workflow/src/executor.rs

//! 引擎执行器
//!
//! 每次适配器调用都在独立工作线程上进行，调用方通过
//! `mpsc::recv_timeout` 等待结果。超时后取消该调用的 [`CancelToken`]，
//! 并以 [`AdapterFailure::Timeout`] 返回；迟到的结果被丢弃，不会提交。
//!
//! 策略为并行且风、水掩码不相交时，两个引擎同时运行并读取同一快照；
//! 否则按配置顺序依次调用。

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cm_config::ExecutionPolicy;
use cm_physics::forcing::mask::disjoint;
use cm_physics::{AdapterFailure, AdapterOutput, CancelToken, CouplingAdapter, EngineKind, StepRequest};
use tracing::{debug, warn};

const DEFAULT_ORDER: [EngineKind; 2] = [EngineKind::Aeolian, EngineKind::Hydro];

/// 调用方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// 依次调用
    Sequential,
    /// 并行调用
    Parallel,
}

/// 引擎执行器
#[derive(Clone)]
pub struct EngineExecutor {
    adapters: BTreeMap<EngineKind, Arc<dyn CouplingAdapter>>,
    policy: ExecutionPolicy,
    timeout: Duration,
}

/// 正在运行的调用
struct Pending {
    kind: EngineKind,
    cancel: CancelToken,
    rx: mpsc::Receiver<Result<AdapterOutput, AdapterFailure>>,
}

impl EngineExecutor {
    /// 创建
    pub fn new(policy: ExecutionPolicy, timeout: Duration) -> Self {
        Self {
            adapters: BTreeMap::new(),
            policy,
            timeout,
        }
    }

    /// 注册适配器（同类型覆盖）
    pub fn with_adapter(mut self, adapter: Arc<dyn CouplingAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// 获取适配器
    pub fn adapter(&self, kind: EngineKind) -> Result<&Arc<dyn CouplingAdapter>, AdapterFailure> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| AdapterFailure::engine(kind, "no adapter registered"))
    }

    /// 已注册的引擎
    pub fn kinds(&self) -> Vec<EngineKind> {
        self.adapters.keys().copied().collect()
    }

    /// 调用超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 查询稳定子步
    pub fn stable_step(&self, kind: EngineKind, request: &StepRequest) -> Result<f64, AdapterFailure> {
        self.adapter(kind)?.stable_step(request)
    }

    /// 调用顺序
    fn order(&self, kinds: &[EngineKind]) -> Vec<EngineKind> {
        let preferred: &[EngineKind] = match &self.policy {
            ExecutionPolicy::Sequential { order } => order.as_slice(),
            ExecutionPolicy::Parallel => &DEFAULT_ORDER,
        };
        let mut out: Vec<EngineKind> = preferred.iter().copied().filter(|k| kinds.contains(k)).collect();
        for kind in kinds {
            if !out.contains(kind) {
                out.push(*kind);
            }
        }
        out
    }

    /// 本次窗口的调用方式
    pub fn dispatch_for(&self, kinds: &[EngineKind], request: &StepRequest) -> Dispatch {
        if self.policy == ExecutionPolicy::Parallel
            && kinds.len() > 1
            && disjoint(&request.window.wind_mask(), &request.window.water_mask())
        {
            Dispatch::Parallel
        } else {
            Dispatch::Sequential
        }
    }

    /// 调用窗口内的所有激活引擎，输出按调用顺序排列
    pub fn run(&self, kinds: &[EngineKind], request: &StepRequest) -> Result<Vec<AdapterOutput>, AdapterFailure> {
        let order = self.order(kinds);
        match self.dispatch_for(&order, request) {
            Dispatch::Parallel => {
                debug!(engines = ?order, "并行调用引擎");
                let deadline = Instant::now() + self.timeout;
                let pending = order
                    .iter()
                    .map(|kind| self.spawn(*kind, request))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut outputs = Vec::with_capacity(pending.len());
                let mut first_err = None;
                for p in pending {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.wait(p, remaining) {
                        Ok(out) => outputs.push(out),
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }
                match first_err {
                    Some(e) => Err(e),
                    None => Ok(outputs),
                }
            }
            Dispatch::Sequential => {
                let mut outputs = Vec::with_capacity(order.len());
                for kind in order {
                    let p = self.spawn(kind, request)?;
                    outputs.push(self.wait(p, self.timeout)?);
                }
                Ok(outputs)
            }
        }
    }

    /// 在工作线程上启动一次调用
    fn spawn(&self, kind: EngineKind, request: &StepRequest) -> Result<Pending, AdapterFailure> {
        let adapter = Arc::clone(self.adapter(kind)?);
        let cancel = CancelToken::new();
        let request = StepRequest {
            cancel: cancel.clone(),
            ..request.clone()
        };
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("cm-{}", kind))
            .spawn(move || {
                let _ = tx.send(adapter.step(&request));
            })
            .map_err(|e| AdapterFailure::engine(kind, format!("failed to spawn worker: {}", e)))?;
        Ok(Pending { kind, cancel, rx })
    }

    /// 等待调用完成
    fn wait(&self, pending: Pending, timeout: Duration) -> Result<AdapterOutput, AdapterFailure> {
        match pending.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                pending.cancel.cancel();
                warn!(engine = %pending.kind, timeout = self.timeout.as_secs_f64(), "引擎调用超时，已请求取消");
                Err(AdapterFailure::Timeout {
                    kind: pending.kind,
                    seconds: self.timeout.as_secs_f64(),
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(AdapterFailure::engine(pending.kind, "worker thread terminated without result"))
            }
        }
    }
}

impl std::fmt::Debug for EngineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineExecutor")
            .field("adapters", &self.kinds())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}
