//! Work units, claiming, and the per-thread worker loop.

use std::ops::Range;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;

use crate::classify::{evaluate_region, Scratch};
use crate::error::OracleError;
use crate::model::{ClusterResult, RegionCoord, Seed};
use crate::oracle::Oracle;
use crate::progress::{Control, Gate, LocalTally, Progress};
use crate::store::ResultStore;

const IDLE: i64 = i64::MAX;

/// What varies between work units.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Fixed seed over regions `[-radius, radius]²`; one unit per `rx` row.
    Area { seed: Seed, radius: i32 },
    /// One unit per seed over a small square around the origin.
    Sweep {
        region_radius: i32,
        end_seed: Option<Seed>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Partition {
    /// All workers pull rows from one cursor.
    #[default]
    Shared,
    /// Each worker owns a contiguous block of rows.
    Sliced,
}

/// Regions needed to cover `radius_blocks` around the origin, plus one.
pub fn sweep_region_radius(radius_blocks: i32, region_blocks: i32) -> i32 {
    radius_blocks / region_blocks.max(1) + 1
}

/// Split `[start, end)` into `workers` contiguous ranges whose lengths
/// differ by at most one.
pub fn row_slices(start: i64, end: i64, workers: usize) -> Vec<Range<i64>> {
    let workers = workers.max(1) as i64;
    let len = (end - start).max(0);
    let base = len / workers;
    let extra = len % workers;
    let mut slices = Vec::with_capacity(workers as usize);
    let mut lo = start;
    for i in 0..workers {
        let hi = lo + base + i64::from(i < extra);
        slices.push(lo..hi);
        lo = hi;
    }
    slices
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkPlan {
    pub mode: ScanMode,
    pub unit: i32,
    pub partition: Partition,
    pub low_priority: bool,
}

impl WorkPlan {
    /// Exclusive end of the unit range, if the scan has one.
    pub fn end(&self) -> Option<i64> {
        match self.mode {
            ScanMode::Area { radius, .. } => Some(2 * i64::from(radius) + 1),
            ScanMode::Sweep { end_seed, .. } => end_seed,
        }
    }

    pub fn total_units(&self) -> Option<u64> {
        match self.mode {
            ScanMode::Area { radius, .. } => Some(2 * radius as u64 + 1),
            ScanMode::Sweep { .. } => None,
        }
    }

    pub fn cells_per_unit(&self) -> u64 {
        match self.mode {
            ScanMode::Area { radius, .. } => 2 * radius as u64 + 1,
            ScanMode::Sweep { region_radius, .. } => {
                let side = 2 * region_radius as u64 + 1;
                side * side
            }
        }
    }

    pub fn partition(&self) -> Partition {
        match self.mode {
            ScanMode::Area { .. } => self.partition,
            ScanMode::Sweep { .. } => Partition::Shared,
        }
    }
}

#[derive(Debug)]
struct SliceCursor {
    next: AtomicI64,
    end: i64,
}

/// Claim bookkeeping for one run.
///
/// Besides handing out units it tracks a low-water mark: every unit below
/// it has been fully evaluated, so it is the value safe to persist.
#[derive(Debug)]
pub struct Claims {
    partition: Partition,
    shared: AtomicI64,
    slices: Vec<SliceCursor>,
    in_flight: Vec<AtomicI64>,
    failed: AtomicI64,
    end: Option<i64>,
}

impl Claims {
    pub fn new(start: i64, end: Option<i64>, workers: usize, partition: Partition) -> Self {
        let workers = workers.max(1);
        let start = end.map_or(start, |e| start.min(e));
        let (partition, slices) = match (partition, end) {
            (Partition::Sliced, Some(end)) => (
                Partition::Sliced,
                row_slices(start, end, workers)
                    .into_iter()
                    .map(|r| SliceCursor {
                        next: AtomicI64::new(r.start),
                        end: r.end,
                    })
                    .collect(),
            ),
            _ => (Partition::Shared, Vec::new()),
        };
        Self {
            partition,
            shared: AtomicI64::new(start),
            slices,
            in_flight: (0..workers).map(|_| AtomicI64::new(IDLE)).collect(),
            failed: AtomicI64::new(IDLE),
            end,
        }
    }

    pub fn workers(&self) -> usize {
        self.in_flight.len()
    }

    /// Next unit for `worker`, or `None` when its share of the work is gone.
    pub fn claim(&self, worker: usize) -> Option<i64> {
        let slot = &self.in_flight[worker];
        match self.partition {
            Partition::Shared => {
                // Publish a lower bound before taking the unit so a concurrent
                // low_water() never sees the unit neither claimed nor in flight.
                slot.store(self.shared.load(Ordering::SeqCst), Ordering::SeqCst);
                let unit = self.shared.fetch_add(1, Ordering::SeqCst);
                if self.end.is_some_and(|end| unit >= end) {
                    slot.store(IDLE, Ordering::SeqCst);
                    return None;
                }
                slot.store(unit, Ordering::SeqCst);
                Some(unit)
            }
            Partition::Sliced => {
                let slice = &self.slices[worker];
                let unit = slice.next.load(Ordering::SeqCst);
                if unit >= slice.end {
                    return None;
                }
                slot.store(unit, Ordering::SeqCst);
                slice.next.store(unit + 1, Ordering::SeqCst);
                Some(unit)
            }
        }
    }

    pub fn finish(&self, worker: usize) {
        self.in_flight[worker].store(IDLE, Ordering::SeqCst);
    }

    /// Record that `unit` could not be completed. It stays below the mark.
    pub fn fail(&self, worker: usize, unit: i64) {
        self.failed.fetch_min(unit, Ordering::SeqCst);
        self.finish(worker);
    }

    /// Lowest unit that is not known to be complete.
    pub fn low_water(&self) -> i64 {
        // Cursors before slots; see claim().
        let mut mark = match self.partition {
            Partition::Shared => self.shared.load(Ordering::SeqCst),
            Partition::Sliced => self.end.unwrap_or(IDLE),
        };
        for slice in &self.slices {
            let next = slice.next.load(Ordering::SeqCst);
            if next < slice.end {
                mark = mark.min(next);
            }
        }
        for slot in &self.in_flight {
            mark = mark.min(slot.load(Ordering::SeqCst));
        }
        mark = mark.min(self.failed.load(Ordering::SeqCst));
        match self.end {
            Some(end) => mark.min(end),
            None => mark,
        }
    }

    /// Workers currently holding a unit.
    pub fn busy(&self) -> usize {
        self.in_flight
            .iter()
            .filter(|slot| slot.load(Ordering::SeqCst) != IDLE)
            .count()
    }

    /// True once every unit up to the end has been evaluated.
    pub fn exhausted(&self) -> bool {
        self.end.is_some_and(|end| self.low_water() >= end)
    }
}

/// Everything a worker touches besides its own oracle.
pub struct WorkerContext<'a> {
    pub plan: &'a WorkPlan,
    pub control: &'a Control,
    pub progress: &'a Progress,
    pub store: &'a ResultStore,
    pub claims: &'a Claims,
}

/// Claim and evaluate units until none remain or the run stops.
///
/// Returns the first oracle fault; the faulted unit is left unfinished
/// in `claims` so it is scanned again on resume.
pub fn run_worker<O: Oracle + ?Sized>(
    worker: usize,
    oracle: &mut O,
    ctx: &WorkerContext<'_>,
) -> Result<(), OracleError> {
    let mut scratch = Scratch::new();
    let mut found = Vec::new();
    let mut tally = ctx.progress.tally();

    if let ScanMode::Area { seed, .. } = ctx.plan.mode {
        oracle.set_seed(seed)?;
    }

    while ctx.control.gate() == Gate::Proceed {
        let Some(unit) = ctx.claims.claim(worker) else {
            break;
        };
        found.clear();
        let outcome = evaluate_unit(
            oracle,
            ctx.plan,
            unit,
            &mut scratch,
            &mut found,
            &mut tally,
        );
        ctx.store.insert_batch(&found);
        tally.flush();
        if let Err(e) = outcome {
            ctx.claims.fail(worker, unit);
            return Err(e);
        }
        if matches!(ctx.plan.mode, ScanMode::Sweep { .. }) {
            ctx.progress.add_seed();
        }
        ctx.claims.finish(worker);
        if ctx.plan.low_priority {
            thread::yield_now();
        }
    }
    Ok(())
}

fn evaluate_unit<O: Oracle + ?Sized>(
    oracle: &mut O,
    plan: &WorkPlan,
    unit: i64,
    scratch: &mut Scratch,
    found: &mut Vec<ClusterResult>,
    tally: &mut LocalTally<'_>,
) -> Result<(), OracleError> {
    match plan.mode {
        ScanMode::Area { seed, radius } => {
            let rx = (unit - i64::from(radius)) as i32;
            for rz in -radius..=radius {
                evaluate_region(
                    oracle,
                    seed,
                    RegionCoord::new(rx, rz),
                    plan.unit,
                    false,
                    scratch,
                    found,
                )?;
                tally.add(1);
            }
        }
        ScanMode::Sweep { region_radius, .. } => {
            let seed = unit;
            oracle.set_seed(seed)?;
            for rx in -region_radius..=region_radius {
                for rz in -region_radius..=region_radius {
                    evaluate_region(
                        oracle,
                        seed,
                        RegionCoord::new(rx, rz),
                        plan.unit,
                        true,
                        scratch,
                        found,
                    )?;
                    tally.add(1);
                }
            }
        }
    }
    Ok(())
}
