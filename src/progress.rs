//! Run state, cooperative pause/cancel, and throughput accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Cells a worker evaluates before publishing its local tally.
pub const FLUSH_EVERY: u64 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Faulted(String),
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Cancelled | ScanState::Faulted(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Running => "running",
            ScanState::Paused => "paused",
            ScanState::Completed => "completed",
            ScanState::Cancelled => "cancelled",
            ScanState::Faulted(_) => "faulted",
        }
    }
}

/// What a worker should do before claiming its next unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Stop,
}

/// State machine shared by the controller and every worker.
#[derive(Debug)]
pub struct Control {
    state: Mutex<ScanState>,
    wake: Condvar,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScanState::Idle),
            wake: Condvar::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state.lock().clone()
    }

    fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&ScanState) -> Option<ScanState>,
    {
        let mut state = self.state.lock();
        match f(&state) {
            Some(next) => {
                *state = next;
                self.wake.notify_all();
                true
            }
            None => false,
        }
    }

    pub fn start(&self) -> bool {
        self.transition(|s| match s {
            ScanState::Idle => Some(ScanState::Running),
            _ => None,
        })
    }

    pub fn pause(&self) -> bool {
        self.transition(|s| match s {
            ScanState::Running => Some(ScanState::Paused),
            _ => None,
        })
    }

    pub fn resume(&self) -> bool {
        self.transition(|s| match s {
            ScanState::Paused => Some(ScanState::Running),
            _ => None,
        })
    }

    pub fn cancel(&self) -> bool {
        self.transition(|s| match s {
            ScanState::Running | ScanState::Paused => Some(ScanState::Cancelled),
            _ => None,
        })
    }

    /// A paused scan whose units are all done is complete as well.
    pub fn complete(&self) -> bool {
        self.transition(|s| match s {
            ScanState::Running | ScanState::Paused => Some(ScanState::Completed),
            _ => None,
        })
    }

    /// First fault wins; a later one, or one after completion, is ignored.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.transition(move |s| match s {
            ScanState::Running | ScanState::Paused => Some(ScanState::Faulted(reason)),
            _ => None,
        })
    }

    /// Block while paused; report whether the caller may claim more work.
    pub fn gate(&self) -> Gate {
        let mut state = self.state.lock();
        while *state == ScanState::Paused {
            self.wake.wait(&mut state);
        }
        if *state == ScanState::Running {
            Gate::Proceed
        } else {
            Gate::Stop
        }
    }

    /// Sleep until the next transition or `timeout`; true once the run is over.
    pub fn wait_terminal(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            self.wake.wait_for(&mut state, timeout);
        }
        state.is_terminal()
    }
}

/// Shared lock-free counters.
#[derive(Debug, Default)]
pub struct Progress {
    cells: AtomicU64,
    seeds: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cells(&self) -> u64 {
        self.cells.load(Ordering::Relaxed)
    }

    pub fn seeds(&self) -> u64 {
        self.seeds.load(Ordering::Relaxed)
    }

    pub fn add_seed(&self) {
        self.seeds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.cells.store(0, Ordering::Relaxed);
        self.seeds.store(0, Ordering::Relaxed);
    }

    pub fn tally(&self) -> LocalTally<'_> {
        LocalTally {
            shared: self,
            pending: 0,
        }
    }
}

/// Per-worker batch of cell counts. Flushes on drop.
#[derive(Debug)]
pub struct LocalTally<'a> {
    shared: &'a Progress,
    pending: u64,
}

impl LocalTally<'_> {
    pub fn add(&mut self, cells: u64) {
        self.pending += cells;
        if self.pending >= FLUSH_EVERY {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        if self.pending > 0 {
            self.shared.cells.fetch_add(self.pending, Ordering::Relaxed);
            self.pending = 0;
        }
    }
}

impl Drop for LocalTally<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Thresholds an estimate must clear before it is shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EtaPolicy {
    pub min_elapsed: Duration,
    pub min_cells: u64,
}

impl Default for EtaPolicy {
    fn default() -> Self {
        Self {
            min_elapsed: Duration::from_secs(3),
            min_cells: 4096,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Throughput {
    pub cells_per_sec: f64,
    pub eta: Option<Duration>,
}

impl Throughput {
    /// `remaining` is `None` when the scan has no natural end.
    pub fn measure(
        cells: u64,
        elapsed: Duration,
        remaining: Option<u64>,
        policy: &EtaPolicy,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let cells_per_sec = if secs > 0.0 {
            cells as f64 / secs
        } else {
            0.0
        };
        let stable = elapsed >= policy.min_elapsed && cells >= policy.min_cells;
        let eta = match remaining {
            Some(left) if stable && cells_per_sec > 0.0 => {
                Some(Duration::from_secs_f64(left as f64 / cells_per_sec))
            }
            _ => None,
        };
        Self { cells_per_sec, eta }
    }
}

/// Wall clock for the current session.
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    started: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn legal_transitions() {
        let c = Control::new();
        assert!(!c.pause());
        assert!(c.start());
        assert!(!c.start());
        assert!(c.pause());
        assert!(!c.start());
        assert!(c.resume());
        assert!(c.complete());
        assert_eq!(c.state(), ScanState::Completed);
        assert!(!c.cancel());
        assert!(!c.fault("late"));
        assert!(!c.complete());
    }

    #[test]
    fn complete_from_paused_releases_waiters() {
        let c = Arc::new(Control::new());
        c.start();
        c.pause();
        let gate = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.gate())
        };
        let timer = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.wait_terminal(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(c.complete());
        assert_eq!(c.state(), ScanState::Completed);
        assert!(!c.resume());
        assert_eq!(gate.join().unwrap(), Gate::Stop);
        assert!(timer.join().unwrap());
    }

    #[test]
    fn cancel_from_paused_and_first_fault_wins() {
        let c = Control::new();
        c.start();
        c.pause();
        assert!(c.cancel());
        assert_eq!(c.state(), ScanState::Cancelled);

        let c = Control::new();
        c.start();
        assert!(c.fault("disk on fire"));
        assert!(!c.fault("second"));
        assert_eq!(c.state(), ScanState::Faulted("disk on fire".into()));
        assert_eq!(c.gate(), Gate::Stop);
    }

    #[test]
    fn paused_gate_blocks_until_resumed() {
        let c = Arc::new(Control::new());
        c.start();
        c.pause();
        let waiter = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.gate())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        c.resume();
        assert_eq!(waiter.join().unwrap(), Gate::Proceed);
    }

    #[test]
    fn paused_gate_releases_on_cancel() {
        let c = Arc::new(Control::new());
        c.start();
        c.pause();
        let waiter = {
            let c = Arc::clone(&c);
            thread::spawn(move || c.gate())
        };
        thread::sleep(Duration::from_millis(20));
        c.cancel();
        assert_eq!(waiter.join().unwrap(), Gate::Stop);
    }

    #[test]
    fn tally_batches_and_flushes_on_drop() {
        let p = Progress::new();
        {
            let mut t = p.tally();
            t.add(FLUSH_EVERY - 1);
            assert_eq!(p.cells(), 0);
            t.add(1);
            assert_eq!(p.cells(), FLUSH_EVERY);
            t.add(5);
        }
        assert_eq!(p.cells(), FLUSH_EVERY + 5);
    }

    #[test]
    fn eta_waits_for_enough_time_and_samples() {
        let policy = EtaPolicy::default();
        let early = Throughput::measure(1_000_000, Duration::from_secs(1), Some(10), &policy);
        assert!(early.eta.is_none());
        let sparse = Throughput::measure(100, Duration::from_secs(10), Some(10), &policy);
        assert!(sparse.eta.is_none());

        let steady = Throughput::measure(10_000, Duration::from_secs(10), Some(5_000), &policy);
        assert_eq!(steady.cells_per_sec, 1000.0);
        assert_eq!(steady.eta, Some(Duration::from_secs(5)));

        let open = Throughput::measure(10_000, Duration::from_secs(10), None, &policy);
        assert!(open.eta.is_none());
    }
}
