//! The controller that owns one scan run.
//!
//! A [`ScanSession`] holds everything the workers share. The controller
//! thread drives the worker pool and the checkpoint timer; callers steer the
//! run through a [`ScanHandle`]. Only the controller writes checkpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, ScanCheckpoint};
use crate::config::{ScanKind, ScanSettings};
use crate::error::{OracleError, ScanError};
use crate::model::ClusterResult;
use crate::oracle::OracleFactory;
use crate::progress::{
    Control, EtaPolicy, Progress, ScanState, SessionClock, Throughput,
};
use crate::scheduler::{
    run_worker, sweep_region_radius, Claims, ScanMode, WorkPlan, WorkerContext,
};
use crate::store::ResultStore;

/// Read-only view for whoever presents the scan.
#[derive(Clone, Debug)]
pub struct ProgressReport {
    pub state: ScanState,
    pub kind: ScanKind,
    /// First unit of this session.
    pub start: i64,
    /// Every unit below this one is done.
    pub cursor: i64,
    /// Exclusive end of the unit range; `None` for an open sweep.
    pub end: Option<i64>,
    /// Units between `start` and `end` (all rows for an area scan).
    pub total_units: Option<u64>,
    pub busy_workers: usize,
    pub cells_evaluated: u64,
    pub seeds_checked: u64,
    pub elapsed: Duration,
    pub throughput: Throughput,
    pub results: Vec<ClusterResult>,
    pub checkpoint_failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanOutcome {
    pub state: ScanState,
    /// Low-water mark at the end of the run.
    pub cursor: i64,
    pub checkpoint: ScanCheckpoint,
    pub cells_evaluated: u64,
    /// Checkpoint writes that failed, periodic and final.
    pub checkpoint_failures: u64,
}

pub struct ScanSession {
    settings: ScanSettings,
    plan: WorkPlan,
    base: ScanCheckpoint,
    control: Control,
    progress: Progress,
    claims: Claims,
    start: i64,
    store: Arc<ResultStore>,
    clock: SessionClock,
    eta: EtaPolicy,
    checkpoint_failures: AtomicU64,
}

impl ScanSession {
    /// Validate `settings`, then launch the run on its own controller thread.
    ///
    /// `resume` supplies the cursors; results go into `store`, which may
    /// already hold earlier discoveries. With a `checkpoint` store the run
    /// persists itself periodically and once more when it ends.
    pub fn start<F>(
        factory: Arc<F>,
        settings: ScanSettings,
        resume: ScanCheckpoint,
        store: Arc<ResultStore>,
        checkpoint: Option<CheckpointStore>,
    ) -> Result<ScanHandle, ScanError>
    where
        F: OracleFactory + 'static,
    {
        Self::start_with_policy(
            factory,
            settings,
            resume,
            store,
            checkpoint,
            EtaPolicy::default(),
        )
    }

    pub fn start_with_policy<F>(
        factory: Arc<F>,
        settings: ScanSettings,
        resume: ScanCheckpoint,
        store: Arc<ResultStore>,
        checkpoint: Option<CheckpointStore>,
        eta: EtaPolicy,
    ) -> Result<ScanHandle, ScanError>
    where
        F: OracleFactory + 'static,
    {
        if settings.threads < 1 {
            return Err(ScanError::InvalidThreads(settings.threads as i64));
        }
        if settings.checkpoint_every.is_zero() {
            return Err(ScanError::InvalidInterval);
        }
        let params = factory.params();
        if params.alignment_unit <= 0 || params.region_blocks <= 0 {
            return Err(OracleError::Internal(format!(
                "non-positive grid constants {params:?}"
            ))
            .into());
        }

        let (mode, start) = match settings.kind {
            ScanKind::Area => {
                if settings.radius <= 0 {
                    return Err(ScanError::InvalidRadius(i64::from(settings.radius)));
                }
                let recorded = resume.area_radius != 0;
                let cursor = if recorded && !resume.area_matches(settings.seed, settings.radius) {
                    info!(
                        "区域游标属于其他扫描，从头开始 / area cursor belongs to seed {} r={}, restarting",
                        resume.area_seed, resume.area_radius
                    );
                    0
                } else {
                    resume.area_cursor.max(0)
                };
                (
                    ScanMode::Area {
                        seed: settings.seed,
                        radius: settings.radius,
                    },
                    cursor,
                )
            }
            ScanKind::Sweep => {
                if settings.sweep_radius_blocks <= 0 {
                    return Err(ScanError::InvalidRadius(i64::from(
                        settings.sweep_radius_blocks,
                    )));
                }
                (
                    ScanMode::Sweep {
                        region_radius: sweep_region_radius(
                            settings.sweep_radius_blocks,
                            params.region_blocks,
                        ),
                        end_seed: settings.end_seed,
                    },
                    resume.next_seed,
                )
            }
        };
        let plan = WorkPlan {
            mode,
            unit: params.alignment_unit,
            partition: settings.partition,
            low_priority: settings.low_priority,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.threads)
            .thread_name(|i| format!("scan-worker-{i}"))
            .build()
            .map_err(|e| ScanError::WorkerPool(e.to_string()))?;

        let session = Arc::new(ScanSession {
            claims: Claims::new(start, plan.end(), settings.threads, plan.partition()),
            start,
            settings,
            plan,
            base: resume,
            control: Control::new(),
            progress: Progress::new(),
            store,
            clock: SessionClock::start(),
            eta,
            checkpoint_failures: AtomicU64::new(0),
        });
        session.control.start();
        info!(
            "扫描开始 / scan started: {:?}, {} threads, cursor {}",
            session.plan.mode, session.settings.threads, start
        );

        let controller = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name("scan-controller".into())
                .spawn(move || session.drive(pool, factory, checkpoint))
        };
        let controller = controller.map_err(|e| {
            session.control.cancel();
            ScanError::WorkerPool(e.to_string())
        })?;
        Ok(ScanHandle {
            session,
            controller: Some(controller),
        })
    }

    fn drive<F>(
        self: Arc<Self>,
        pool: rayon::ThreadPool,
        factory: Arc<F>,
        checkpoint: Option<CheckpointStore>,
    ) -> ScanOutcome
    where
        F: OracleFactory + 'static,
    {
        let timer = checkpoint.clone().map(|store| {
            let session = Arc::clone(&self);
            thread::spawn(move || {
                let every = session.settings.checkpoint_every;
                while !session.control.wait_terminal(every) {
                    session.write_checkpoint(&store);
                }
            })
        });

        let session = &*self;
        let factory = &*factory;
        pool.scope(|s| {
            for worker in 0..session.claims.workers() {
                s.spawn(move |_| session.work(worker, factory));
            }
        });

        // A pause can land after the last claim came back empty.
        if self.claims.exhausted() && self.control.complete() {
            info!("扫描完成 / scan completed");
        }
        if !self.control.state().is_terminal() {
            self.control.cancel();
        }
        if let Some(timer) = timer {
            if timer.join().is_err() {
                warn!("检查点线程异常退出 / checkpoint timer panicked");
            }
        }
        if let Some(store) = &checkpoint {
            self.write_checkpoint(store);
        }
        let outcome = ScanOutcome {
            state: self.control.state(),
            cursor: self.claims.low_water(),
            checkpoint: self.checkpoint_state(),
            cells_evaluated: self.progress.cells(),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
        };
        info!(
            "扫描结束 / scan finished: {} after {} cells, cursor {}",
            outcome.state.label(),
            outcome.cells_evaluated,
            outcome.cursor
        );
        outcome
    }

    fn work<F: OracleFactory>(&self, worker: usize, factory: &F) {
        let mut oracle = match factory.create() {
            Ok(oracle) => oracle,
            Err(e) => {
                self.fault(worker, e);
                return;
            }
        };
        let ctx = WorkerContext {
            plan: &self.plan,
            control: &self.control,
            progress: &self.progress,
            store: &self.store,
            claims: &self.claims,
        };
        if let Err(e) = run_worker(worker, &mut oracle, &ctx) {
            self.fault(worker, e);
        }
        debug!("worker {worker} exited");
    }

    fn fault(&self, worker: usize, e: OracleError) {
        error!("worker {worker}: 生成器故障 / oracle fault: {e}");
        self.control.fault(e.to_string());
    }

    /// Cursors as they should be persisted right now.
    pub fn checkpoint_state(&self) -> ScanCheckpoint {
        let mark = self.claims.low_water();
        let mut state = ScanCheckpoint {
            settings: self.settings.persisted(),
            ..self.base.clone()
        };
        match self.plan.mode {
            ScanMode::Area { seed, radius } => {
                state.area_cursor = mark;
                state.area_seed = seed;
                state.area_radius = i64::from(radius);
            }
            ScanMode::Sweep { .. } => state.next_seed = mark,
        }
        state
    }

    fn write_checkpoint(&self, store: &CheckpointStore) -> bool {
        let state = self.checkpoint_state();
        // The lock is held for the copy only.
        let results = self.store.snapshot();
        match store.save(&state, &results) {
            Ok(()) => {
                debug!(
                    "checkpoint: cursor {} / next seed {}, {} results",
                    state.area_cursor,
                    state.next_seed,
                    results.len()
                );
                true
            }
            Err(e) => {
                self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
                warn!("检查点失败，稍后重试 / checkpoint failed, will retry: {e}");
                false
            }
        }
    }

    pub fn report(&self) -> ProgressReport {
        let cursor = self.claims.low_water();
        let end = self.plan.end();
        let cells = self.progress.cells();
        let elapsed = self.clock.elapsed();
        let remaining = end.map(|e| (e - cursor).max(0) as u64 * self.plan.cells_per_unit());
        let total_units = match self.plan.mode {
            ScanMode::Area { .. } => self.plan.total_units(),
            ScanMode::Sweep { .. } => end.map(|e| (e - self.start).max(0) as u64),
        };
        ProgressReport {
            state: self.control.state(),
            kind: self.settings.kind,
            start: self.start,
            cursor,
            end,
            total_units,
            busy_workers: self.claims.busy(),
            cells_evaluated: cells,
            seeds_checked: self.progress.seeds(),
            elapsed,
            throughput: Throughput::measure(cells, elapsed, remaining, &self.eta),
            results: self.store.snapshot(),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
        }
    }
}

/// Caller-side control of a running scan.
///
/// Dropping the handle cancels the run and waits for it.
pub struct ScanHandle {
    session: Arc<ScanSession>,
    controller: Option<JoinHandle<ScanOutcome>>,
}

impl ScanHandle {
    pub fn pause(&self) -> bool {
        self.session.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.session.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.session.control.cancel()
    }

    pub fn state(&self) -> ScanState {
        self.session.control.state()
    }

    pub fn report(&self) -> ProgressReport {
        self.session.report()
    }

    pub fn is_finished(&self) -> bool {
        self.controller.as_ref().map_or(true, |c| c.is_finished())
    }

    /// Block until the run ends and the final checkpoint is written.
    pub fn wait(mut self) -> ScanOutcome {
        self.join()
    }

    fn join(&mut self) -> ScanOutcome {
        let fallback = |session: &ScanSession| ScanOutcome {
            state: ScanState::Faulted("controller thread panicked".into()),
            cursor: session.claims.low_water(),
            checkpoint: session.checkpoint_state(),
            cells_evaluated: session.progress.cells(),
            checkpoint_failures: session.checkpoint_failures.load(Ordering::Relaxed),
        };
        match self.controller.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| fallback(self.session.as_ref())),
            None => fallback(self.session.as_ref()),
        }
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        if self.controller.is_some() {
            self.session.control.cancel();
            let _ = self.join();
        }
    }
}
