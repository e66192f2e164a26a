// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::fault::report_fault;
use crate::job::panic_message;
use crate::{Branch, ERR_POISONED_LOCK, Error, Result};

/// The tick interval used when none is specified.
pub const DEFAULT_TICK: Duration = Duration::from_millis(1000);

/// The source tag under which tick callback failures reach the fault sink.
const FAULT_SOURCE: &str = "supervisor";

type TickCallback = Box<dyn FnMut() + Send>;

/// A control loop that periodically resizes one or more branches toward a worker band.
///
/// Every tick, for each supervised branch, the supervisor reads the queue depth and the live
/// worker count and issues at most one resize step:
///
/// - depth > 0 and fewer than `max` workers: grow by one;
/// - depth == 0 and more than `min` workers: shrink by one;
/// - otherwise leave the branch alone.
///
/// The single step per tick is deliberate: it damps oscillation under bursty load and bounds
/// the worst-case rate of worker churn.
///
/// # Observation discipline
///
/// Branches are observed through [`Weak`] references: a supervised branch that gets destroyed
/// is silently skipped (and pruned) on the next tick rather than touched after free. A
/// [`Workspace`][crate::Workspace] additionally guarantees teardown order, stopping its
/// supervisors before its branches.
///
/// # Thread safety
///
/// All operations take `&self` and are safe to call concurrently. [`stop`][Self::stop] must
/// not be called from the controller thread itself (i.e. from inside a tick callback).
pub struct Supervisor {
    shared: Arc<Shared>,
    controller: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Shared {
    min: usize,
    max: usize,
    tick: Duration,
    state: Mutex<State>,
    /// Wakes the controller out of its tick sleep so stop takes effect promptly.
    wake: Condvar,
}

struct State {
    branches: Vec<Weak<Branch>>,
    callback: Option<TickCallback>,
    paused: bool,
    stopping: bool,
}

impl Supervisor {
    /// Creates a supervisor with the given worker band and the [default tick][DEFAULT_TICK].
    ///
    /// The controller thread is not started until the first branch is
    /// [supervised][Self::supervise].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBounds`] unless `1 <= min <= max`.
    pub fn new(min: usize, max: usize) -> Result<Self> {
        Self::with_tick(min, max, DEFAULT_TICK)
    }

    /// Creates a supervisor with the given worker band and tick interval.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBounds`] unless `1 <= min <= max`.
    pub fn with_tick(min: usize, max: usize, tick: Duration) -> Result<Self> {
        if min == 0 || min > max {
            return Err(Error::InvalidBounds { min, max });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                min,
                max,
                tick,
                state: Mutex::new(State {
                    branches: Vec::new(),
                    callback: None,
                    paused: false,
                    stopping: false,
                }),
                wake: Condvar::new(),
            }),
            controller: Mutex::new(None),
        })
    }

    /// Registers a branch for supervision. Idempotent for a branch that is already supervised.
    ///
    /// The supervisor holds only a weak reference; it never keeps the branch alive. The first
    /// registration starts the controller thread.
    pub fn supervise(&self, branch: &Arc<Branch>) {
        let candidate = Arc::downgrade(branch);

        {
            let mut state = self.shared.state.lock().expect(ERR_POISONED_LOCK);

            if state
                .branches
                .iter()
                .any(|supervised| Weak::ptr_eq(supervised, &candidate))
            {
                return;
            }

            state.branches.push(candidate);
            debug!(branch = branch.name(), "branch now supervised");
        }

        self.ensure_controller();
    }

    /// Installs the tick callback, replacing any previous one.
    ///
    /// The callback runs exactly once per tick, after the rebalance pass, on the controller
    /// thread. A panic escaping it goes to the [fault sink][crate::set_fault_sink] and the
    /// controller keeps ticking.
    pub fn on_tick<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.shared.state.lock().expect(ERR_POISONED_LOCK);
        state.callback = Some(Box::new(callback));
    }

    /// Makes subsequent ticks skip the rebalance pass and the callback. Ticking itself
    /// continues, so [`resume`][Self::resume] takes effect on the next tick.
    pub fn pause(&self) {
        self.shared.state.lock().expect(ERR_POISONED_LOCK).paused = true;
    }

    /// Re-enables the rebalance pass and the callback.
    pub fn resume(&self) {
        self.shared.state.lock().expect(ERR_POISONED_LOCK).paused = false;
    }

    /// Stops the controller thread and waits for it to exit. Safe to call multiple times;
    /// invoked automatically on drop.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().expect(ERR_POISONED_LOCK);
            state.stopping = true;
        }
        self.shared.wake.notify_all();

        let controller = self.controller.lock().expect(ERR_POISONED_LOCK).take();
        if let Some(controller) = controller {
            _ = controller.join();
        }
    }

    /// Starts the controller thread if it is not running and the supervisor was not stopped.
    fn ensure_controller(&self) {
        let mut slot = self.controller.lock().expect(ERR_POISONED_LOCK);

        if slot.is_some() {
            return;
        }

        // A stopped supervisor stays stopped; supervise after stop only records the branch.
        if self.shared.state.lock().expect(ERR_POISONED_LOCK).stopping {
            return;
        }

        let shared = Arc::clone(&self.shared);
        *slot = Some(
            thread::Builder::new()
                .name("supervisor".to_string())
                .spawn(move || controller_loop(&shared))
                .expect("failed to spawn the supervisor controller thread"),
        );
    }

    #[cfg(test)]
    pub(crate) fn supervised_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .expect(ERR_POISONED_LOCK)
            .branches
            .len()
    }
}

impl Drop for Supervisor {
    // Inconvenient to test because we would be checking for "does some code stop executing".
    #[cfg_attr(test, mutants::skip)]
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Supervisor {
    // We have no contract to test here - can return anything.
    #[cfg_attr(test, mutants::skip)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("min", &self.shared.min)
            .field("max", &self.shared.max)
            .field("tick", &self.shared.tick)
            .finish_non_exhaustive()
    }
}

// Timing logic; mutations produce hangs or slow ticks rather than wrong observable values.
#[cfg_attr(test, mutants::skip)]
fn controller_loop(shared: &Shared) {
    debug!(
        min = shared.min,
        max = shared.max,
        "supervisor controller started"
    );

    let mut state = shared.state.lock().expect(ERR_POISONED_LOCK);

    'ticking: loop {
        // One full tick interval of sleep, resistant to spurious wakeups; stop cuts it short.
        let deadline = Instant::now() + shared.tick;
        loop {
            if state.stopping {
                break 'ticking;
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| !r.is_zero()) else {
                break;
            };

            state = shared
                .wake
                .wait_timeout(state, remaining)
                .expect(ERR_POISONED_LOCK)
                .0;
        }

        if state.paused {
            continue;
        }

        // Upgrade the observed branches and drop references to ones that no longer exist.
        state.branches.retain(|weak| weak.strong_count() > 0);
        let branches: Vec<Arc<Branch>> = state.branches.iter().filter_map(Weak::upgrade).collect();

        // The rebalance pass and the callback run without the state lock so user code inside
        // the callback may call pause/resume/supervise without deadlocking.
        let mut callback = state.callback.take();
        drop(state);

        for branch in &branches {
            rebalance(shared.min, shared.max, branch);
        }

        if let Some(callback) = callback.as_mut() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                report_fault(FAULT_SOURCE, &panic_message(&*payload));
            }
        }

        state = shared.state.lock().expect(ERR_POISONED_LOCK);
        if state.callback.is_none() {
            state.callback = callback;
        }
    }

    debug!("supervisor controller stopped");
}

/// Applies at most one resize step to a branch based on its current load.
fn rebalance(min: usize, max: usize, branch: &Branch) {
    let depth = branch.queue_len();
    let workers = branch.worker_count();

    if depth > 0 && workers < max {
        trace!(
            branch = branch.name(),
            depth, workers, "queue backed up, growing by one"
        );
        branch.grow(1);
    } else if depth == 0 && workers > min {
        trace!(
            branch = branch.name(),
            workers, "queue empty, shrinking by one"
        );
        branch.shrink(1);
    }
}
