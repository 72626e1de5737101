// crates/cm_workflow/src/orchestrator.rs

//! 耦合编排器
//!
//! 驱动整个耦合循环的状态机：
//!
//! ```text
//! Idle ─► Checkpointing ─► Scheduling ─► RunningEngines ─► Reconciling ─► UpdatingVegetation
//!                              ▲                │  ▲                               │
//!                              │                └──┘ 失败: 步长减半重试              │
//!                              └──────────── (Checkpointing) ◄─────────────────────┘
//! ```
//!
//! 时间线结束或发生致命错误时进入 `Terminated`。致命错误会把会话回滚到
//! 最近的检查点，并返回带有失败迁移、窗口与错误类别的 [`FatalError`]。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cm_foundation::CmError;
use cm_io::Checkpoint;
use cm_physics::{
    AeolianAdapter, CancelToken, FluxReconciler, FluxRelaxationEngine, ForcingWindow, HydroAdapter,
    ParcelRoutingEngine, StepRequest, VegetationFeedback, VegetationManager,
};
use tracing::{debug, error, info, warn};

use crate::error::{CouplingError, ErrorKind, FatalError};
use crate::events::{CouplingEvent, EventDispatcher};
use crate::executor::EngineExecutor;
use crate::phase::{Phase, Transition};
use crate::record::{EngineReport, RetryRecord, TimestepRecord};
use crate::schedule::Scheduler;
use crate::session::{CouplingSession, SessionId};
use crate::storage::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

/// 运行摘要
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// 会话ID
    pub session: SessionId,
    /// 完成的窗口数
    pub steps: u64,
    /// 最终模拟时间 [s]
    pub final_time: f64,
    /// 冲突单元合计
    pub conflicts: usize,
    /// 重试次数合计
    pub retries: usize,
    /// 植被死亡单元合计
    pub deaths: usize,
    /// 分摊处理的质量违例次数
    pub mass_violations: usize,
    /// 植被越界截断次数
    pub vegetation_errors: usize,
    /// 写出的检查点数
    pub checkpoints: u64,
    /// 是否因停止请求提前结束
    pub stopped: bool,
    /// 墙钟耗时
    pub elapsed: Duration,
}

/// 耦合编排器
pub struct Orchestrator {
    session: CouplingSession,
    executor: EngineExecutor,
    scheduler: Scheduler,
    reconciler: FluxReconciler,
    vegetation: VegetationManager,
    store: Box<dyn CheckpointStore>,
    events: Arc<EventDispatcher>,
    phase: Phase,
    transition: Transition,
    window: (f64, f64),
    last_checkpoint: Option<Checkpoint>,
    checkpoints: u64,
    retry_limit: u32,
    stop: Arc<AtomicBool>,
}

impl Orchestrator {
    /// 使用给定的执行器创建
    pub fn new(session: CouplingSession, executor: EngineExecutor) -> Result<Self, CouplingError> {
        let config = session.config();
        let registry = session.registry();
        for kind in executor.kinds() {
            registry.grid(executor.adapter(kind)?.native_grid())?;
        }

        let canonical = session.canonical_grid()?;
        let vegetation = VegetationManager::new(config.vegetation.clone(), &canonical)?;
        let reconciler = FluxReconciler::new(Arc::clone(registry), canonical.id(), config.reconciliation);
        let store: Box<dyn CheckpointStore> = match &config.checkpoint.directory {
            Some(dir) => Box::new(FileCheckpointStore::new(dir, config.checkpoint.keep)),
            None => Box::new(MemoryCheckpointStore::new(config.checkpoint.keep)),
        };

        Ok(Self {
            scheduler: Scheduler::from_config(&config.execution),
            retry_limit: config.execution.retry_limit,
            reconciler,
            vegetation,
            store,
            events: Arc::new(EventDispatcher::new()),
            phase: Phase::Idle,
            transition: Transition {
                from: Phase::Idle,
                to: Phase::Idle,
            },
            window: (session.time(), session.time()),
            last_checkpoint: None,
            checkpoints: 0,
            stop: Arc::new(AtomicBool::new(false)),
            executor,
            session,
        })
    }

    /// 使用内置参考引擎创建
    pub fn with_reference_engines(session: CouplingSession) -> Result<Self, CouplingError> {
        let config = session.config();
        let registry = session.registry();
        let grids = session.grids();

        let aeolian = AeolianAdapter::new(
            FluxRelaxationEngine::new(config.aeolian.clone()),
            Arc::clone(registry),
            grids.canonical,
            grids.aeolian,
            config.adapters,
        )?;
        let hydro = HydroAdapter::new(
            ParcelRoutingEngine::new(config.hydro.clone()),
            Arc::clone(registry),
            grids.canonical,
            grids.hydro,
            config.adapters,
            config.seed,
        )?;
        let executor = EngineExecutor::new(
            config.execution.policy.clone(),
            Duration::from_secs_f64(config.execution.adapter_timeout_secs),
        )
        .with_adapter(Arc::new(aeolian))
        .with_adapter(Arc::new(hydro));

        Self::new(session, executor)
    }

    /// 替换检查点存储
    pub fn with_store(mut self, store: Box<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// 事件分发器
    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// 会话
    pub fn session(&self) -> &CouplingSession {
        &self.session
    }

    /// 取出会话
    pub fn into_session(self) -> CouplingSession {
        self.session
    }

    /// 当前阶段
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 停止标志，置位后在下一个窗口开始前结束运行
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// 内存中保留的最近检查点
    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.last_checkpoint.as_ref()
    }

    /// 运行到时间线结束
    pub fn run(&mut self) -> Result<RunSummary, FatalError> {
        let started = Instant::now();
        info!(
            session = %self.session.id(),
            start = self.session.time(),
            end = self.session.timeline().end_time,
            store = %self.store.describe(),
            "开始耦合运行"
        );

        let mut stopped = false;
        while !self.phase.is_terminal() && !self.session.is_finished() {
            if self.stop.load(Ordering::SeqCst) {
                info!(step = self.session.step(), "收到停止请求");
                stopped = true;
                break;
            }
            self.step()?;
        }
        if !self.phase.is_terminal() {
            self.terminate(None);
        }

        let summary = self.summary(stopped, started.elapsed());
        info!(
            steps = summary.steps,
            time = summary.final_time,
            conflicts = summary.conflicts,
            retries = summary.retries,
            elapsed = ?summary.elapsed,
            "耦合运行结束"
        );
        Ok(summary)
    }

    /// 推进一个窗口
    ///
    /// 首次调用时先写出初始检查点。时间线已结束或已终止时返回 `Ok(None)`。
    pub fn step(&mut self) -> Result<Option<TimestepRecord>, FatalError> {
        if self.phase.is_terminal() || self.session.is_finished() {
            return Ok(None);
        }
        if self.phase == Phase::Idle {
            let started = self
                .enter(Phase::Checkpointing)
                .and_then(|_| self.write_checkpoint());
            if let Err(source) = started {
                return Err(self.fail(source));
            }
        }
        match self.advance() {
            Ok(record) => Ok(Some(record)),
            Err(source) => Err(self.fail(source)),
        }
    }

    /// 进入下一阶段
    fn enter(&mut self, to: Phase) -> Result<(), CouplingError> {
        if !self.phase.can_transition_to(to) {
            return Err(CmError::internal(format!("非法状态迁移: {} -> {}", self.phase, to)).into());
        }
        self.transition = Transition { from: self.phase, to };
        self.phase = to;
        Ok(())
    }

    /// 一个完整窗口
    fn advance(&mut self) -> Result<TimestepRecord, CouplingError> {
        let t = self.session.time();
        let step = self.session.step() + 1;
        self.window = (t, t);
        self.enter(Phase::Scheduling)?;

        let grid = self.session.canonical_grid()?;
        let snapshot = self.session.topography().snapshot();
        let feedback = Arc::new(VegetationFeedback::from_state(
            self.session.vegetation(),
            self.vegetation.params(),
        ));

        let executor = &self.executor;
        let (mut entry, window) = self
            .scheduler
            .next(step, t, self.session.timeline(), &grid, |kind, probe| {
                let request = StepRequest {
                    window: Arc::new(probe.clone()),
                    snapshot: Arc::clone(&snapshot),
                    feedback: Arc::clone(&feedback),
                    cancel: CancelToken::new(),
                };
                executor.stable_step(kind, &request)
            })?;
        self.window = (entry.t0, entry.t1);
        debug!(step, t0 = entry.t0, t1 = entry.t1, engines = ?entry.kinds(), "窗口已调度");

        self.enter(Phase::RunningEngines)?;
        let mut window = Arc::new(window);
        let mut retries = Vec::new();
        let outputs = loop {
            if entry.is_idle() {
                break Vec::new();
            }
            let request = StepRequest {
                window: Arc::clone(&window),
                snapshot: Arc::clone(&snapshot),
                feedback: Arc::clone(&feedback),
                cancel: CancelToken::new(),
            };
            match self.executor.run(&entry.kinds(), &request) {
                Ok(outputs) => break outputs,
                Err(failure) => {
                    if retries.len() >= self.retry_limit as usize {
                        warn!(step, attempts = retries.len(), "重试次数已用尽");
                        return Err(failure.into());
                    }
                    let failed_dt = entry.dt();
                    entry = entry.halved();
                    window = Arc::new(ForcingWindow::build(self.session.timeline(), entry.t0, entry.t1, &grid));
                    self.window = (entry.t0, entry.t1);
                    warn!(step, error = %failure, dt = entry.dt(), "引擎失败，减半步长重试");
                    self.events.emit(CouplingEvent::RetryScheduled {
                        kind: failure.kind(),
                        attempt: retries.len() as u32 + 1,
                        dt: entry.dt(),
                        error: failure.to_string(),
                    });
                    retries.push(RetryRecord {
                        dt: failed_dt,
                        error: failure.to_string(),
                    });
                    self.enter(Phase::RunningEngines)?;
                }
            }
        };

        self.enter(Phase::Reconciling)?;
        let reconciliation = self.reconciler.reconcile(&outputs, &window, &snapshot)?;
        let outcome = self.session.topography_mut().apply(&reconciliation.delta)?;
        let after = self.session.topography().snapshot();

        self.enter(Phase::UpdatingVegetation)?;
        let vegetation = self
            .vegetation
            .update(self.session.vegetation_mut(), &snapshot, &after, &window)?;

        let unstable = entry.unstable_engines();
        let record = TimestepRecord {
            step,
            t0: entry.t0,
            t1: entry.t1,
            active: entry.kinds(),
            elevation_delta: outcome.applied,
            vegetation,
            attribution: reconciliation.sources,
            reconciliation: reconciliation.diagnostics,
            clamped: outcome.clamped,
            engines: outputs
                .iter()
                .map(|o| {
                    let mut warnings = o.diagnostics.warnings.clone();
                    if unstable.contains(&o.kind) {
                        warnings.push(format!("稳定子步小于窗口长度 {} s，按最小子步推进", entry.dt()));
                    }
                    EngineReport {
                        kind: o.kind,
                        iterations: o.diagnostics.iterations,
                        warnings,
                    }
                })
                .collect(),
            retries,
            topography_version: outcome.version,
        };
        self.session.commit(record.clone());

        debug!(
            step,
            t = record.t1,
            conflicts = record.conflicts(),
            residual = record.mass_residual(),
            deaths = record.vegetation.deaths,
            "窗口完成"
        );
        self.events.emit(CouplingEvent::StepCompleted {
            step,
            t0: record.t0,
            t1: record.t1,
            active: record.active.clone(),
            conflicts: record.conflicts(),
        });

        if step % self.session.config().checkpoint.interval_steps == 0 {
            self.enter(Phase::Checkpointing)?;
            self.write_checkpoint()?;
        }
        Ok(record)
    }

    /// 写出检查点并保留在内存中
    fn write_checkpoint(&mut self) -> Result<(), CouplingError> {
        let checkpoint = self.session.checkpoint()?;
        let path = self.store.save(&checkpoint)?;
        self.session.mark_checkpoint(path.clone());
        self.events.emit(CouplingEvent::CheckpointSaved {
            step: checkpoint.step,
            time: checkpoint.time,
            path: path.map(|p| p.display().to_string()),
        });
        self.last_checkpoint = Some(checkpoint);
        self.checkpoints += 1;
        Ok(())
    }

    /// 处理致命错误：回滚并终止
    fn fail(&mut self, source: CouplingError) -> FatalError {
        let kind = source.kind();
        error!(
            transition = %self.transition,
            t0 = self.window.0,
            t1 = self.window.1,
            kind = %kind,
            "致命错误: {}",
            source
        );

        let restored_step = match self.last_checkpoint.take() {
            Some(checkpoint) => {
                let restored = self.session.restore(&checkpoint);
                let step = checkpoint.step;
                let time = checkpoint.time;
                self.last_checkpoint = Some(checkpoint);
                match restored {
                    Ok(()) => {
                        self.events.emit(CouplingEvent::RolledBack { step, time });
                        Some(step)
                    }
                    Err(e) => {
                        error!("回滚失败: {}", e);
                        None
                    }
                }
            }
            None => None,
        };

        let fatal = FatalError {
            transition: self.transition,
            window: self.window,
            restored_step,
            source,
        };
        self.terminate(Some(kind));
        fatal
    }

    /// 进入终止状态
    fn terminate(&mut self, error: Option<ErrorKind>) {
        let phase = self.phase;
        self.phase = Phase::Terminated;
        self.events.emit(CouplingEvent::Terminated {
            time: self.session.time(),
            steps: self.session.step(),
            error,
            phase,
        });
    }

    fn summary(&self, stopped: bool, elapsed: Duration) -> RunSummary {
        let history = self.session.history();
        RunSummary {
            session: self.session.id(),
            steps: self.session.step(),
            final_time: self.session.time(),
            conflicts: history.iter().map(|r| r.conflicts()).sum(),
            retries: history.iter().map(|r| r.retries.len()).sum(),
            deaths: history.iter().map(|r| r.vegetation.deaths).sum(),
            mass_violations: history.iter().filter(|r| r.reconciliation.violation.is_some()).count(),
            vegetation_errors: history.iter().map(|r| r.vegetation_errors().len()).sum(),
            checkpoints: self.checkpoints,
            stopped,
            elapsed,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session", &self.session.id())
            .field("phase", &self.phase)
            .field("step", &self.session.step())
            .field("time", &self.session.time())
            .field("executor", &self.executor)
            .finish()
    }
}
