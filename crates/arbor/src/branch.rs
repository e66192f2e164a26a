// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use std::{fmt, mem};

use tracing::debug;

use crate::fault::report_fault;
use crate::job::{Job, JobHandle, QueueEntry, panic_message};
use crate::{ERR_POISONED_LOCK, Error, Result};

/// The outcome of [`Branch::wait_idle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The queue was empty and every worker idle at some instant during the wait.
    Drained,
    /// The deadline elapsed first.
    TimedOut,
}

/// Configures and constructs a [`Branch`].
///
/// Obtained via [`Branch::builder()`]. All settings have defaults: one worker, the name
/// `branch`.
#[derive(Debug)]
pub struct BranchBuilder {
    name: String,
    workers: usize,
}

impl BranchBuilder {
    const fn new() -> Self {
        Self {
            name: String::new(),
            workers: 1,
        }
    }

    /// Sets the branch name. The name is descriptive only - it tags worker threads, log events
    /// and fault reports, and does not need to be unique.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the initial worker count. Zero is allowed: such a branch queues work without
    /// executing it until it is grown.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self
    }

    /// Constructs the branch, spawning its initial workers eagerly.
    #[must_use]
    pub fn build(self) -> Branch {
        let name = if self.name.is_empty() {
            "branch".to_string()
        } else {
            self.name
        };

        Branch::start(name, self.workers)
    }
}

/// A dynamic thread pool with one internal task queue.
///
/// A branch owns a set of worker threads and a dual-ended queue of jobs: urgent jobs enter at
/// the head, normal jobs and sequential batches at the tail, and workers always pop from the
/// head. The worker set can be grown and shrunk at any time, by the caller or by a
/// [`Supervisor`][crate::Supervisor] observing the queue.
///
/// # Exception policy
///
/// Exactly one of two behaviors applies to every job:
///
/// - A value-less job ([`post`][Self::post] and friends) that panics is caught and reported to
///   the process-wide [fault sink][crate::set_fault_sink]; the worker continues.
/// - A value-producing job ([`submit`][Self::submit] and friends) that panics has the panic
///   captured and delivered through its [`JobHandle`], re-raised when the caller joins it.
///
/// A panic never takes down a worker.
///
/// # Ownership
///
/// The branch owns its workers and its queue. Dropping the branch stops accepting jobs, lets
/// the workers drain everything still queued, and blocks until every worker thread (including
/// previously retired ones) has exited.
///
/// # Thread safety
///
/// All operations take `&self` and are safe to call concurrently from any number of threads.
pub struct Branch {
    shared: Arc<Shared>,
    roster: Mutex<Roster>,
}

/// State shared between the branch handle and its worker threads.
struct Shared {
    name: String,
    queue: Mutex<QueueState>,
    /// Signals workers that an entry was inserted (or that draining began).
    work_ready: Condvar,
    /// Signals `wait_idle` callers that the queue emptied and the last busy worker finished.
    drained: Condvar,
}

struct QueueState {
    entries: VecDeque<QueueEntry>,
    /// Number of workers currently executing an entry. Together with `entries.is_empty()` this
    /// defines the drained condition.
    busy: usize,
    draining: bool,
}

/// Bookkeeping for the worker threads the branch has spawned.
struct Roster {
    workers: HashMap<ThreadId, WorkerHandle>,
    /// Join handles of retired workers. They may still be finishing their current task; drop
    /// joins them along with everyone else so destruction accounts for every thread ever
    /// spawned.
    retired: Vec<thread::JoinHandle<()>>,
    /// The steady-state size the branch converges to. Mutated only by grow/shrink.
    target: usize,
}

struct WorkerHandle {
    retire: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

impl Branch {
    /// Returns a builder for configuring a branch.
    #[must_use]
    pub const fn builder() -> BranchBuilder {
        BranchBuilder::new()
    }

    /// Creates a branch with the given number of eagerly spawned workers and a default name.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::builder().workers(workers).build()
    }

    /// Creates a named branch with the given number of eagerly spawned workers.
    #[must_use]
    pub fn named(name: impl Into<String>, workers: usize) -> Self {
        Self::builder().name(name).workers(workers).build()
    }

    fn start(name: String, workers: usize) -> Self {
        let branch = Self {
            shared: Arc::new(Shared {
                name,
                queue: Mutex::new(QueueState {
                    entries: VecDeque::new(),
                    busy: 0,
                    draining: false,
                }),
                work_ready: Condvar::new(),
                drained: Condvar::new(),
            }),
            roster: Mutex::new(Roster {
                workers: HashMap::new(),
                retired: Vec::new(),
                target: 0,
            }),
        };

        branch.grow(workers);
        branch
    }

    /// The branch's descriptive name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Enqueues a value-producing job at the queue tail and returns a handle to its result.
    ///
    /// If the branch is draining, the job is rejected and the returned handle yields
    /// [`Error::ShuttingDown`] when joined.
    pub fn submit<F, R>(&self, body: F) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(body, false)
    }

    /// Enqueues a value-producing job at the queue head.
    ///
    /// Urgent jobs run before anything queued behind them but do not preempt a job a worker has
    /// already started. Among urgent jobs still queued, the most recently submitted runs first.
    pub fn submit_urgent<F, R>(&self, body: F) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(body, true)
    }

    fn submit_inner<F, R>(&self, body: F, urgent: bool) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(body))
                .map_err(|payload| Error::JobPanicked(panic_message(&*payload)));

            // The caller may have dropped the handle; that simply discards the result.
            _ = tx.send(outcome);
        });

        // On a draining branch the entry is dropped right here, which drops the sender and
        // makes join() report the shutdown through the channel.
        _ = self.enqueue(QueueEntry::Single(job), urgent);

        JobHandle::new(rx)
    }

    /// Enqueues a value-less job at the queue tail.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] if the branch is draining.
    pub fn post<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(QueueEntry::Single(Box::new(body)), false)
    }

    /// Enqueues a value-less job at the queue head. See [`submit_urgent`][Self::submit_urgent]
    /// for the urgency semantics.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] if the branch is draining.
    pub fn post_urgent<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(QueueEntry::Single(Box::new(body)), true)
    }

    /// Enqueues a sequential batch: the jobs become one queue entry and run back to back on one
    /// worker, in the given order, with no other work interleaved on that worker.
    ///
    /// The batch form exists to amortize queue synchronization for many tiny jobs, so it is
    /// intended for two or more of them; fewer is accepted and behaves like the equivalent
    /// plain posts. A panic in one element is reported to the fault sink once and skips the
    /// remaining elements of that batch.
    ///
    /// # Errors
    ///
    /// [`Error::ShuttingDown`] if the branch is draining.
    pub fn post_batch(&self, jobs: Vec<Job>) -> Result<()> {
        self.enqueue(QueueEntry::Batch(jobs), false)
    }

    fn enqueue(&self, entry: QueueEntry, urgent: bool) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock().expect(ERR_POISONED_LOCK);

            if queue.draining {
                return Err(Error::ShuttingDown);
            }

            if urgent {
                queue.entries.push_front(entry);
            } else {
                queue.entries.push_back(entry);
            }
        }

        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Blocks until the queue is empty and every worker is idle, or until the timeout elapses.
    ///
    /// `None` waits indefinitely. Insertions that arrive during the wait reset the emptiness
    /// condition, so under continuous submission this only returns [`WaitOutcome::Drained`]
    /// once the branch catches an idle instant. On an already idle branch it returns
    /// immediately.
    ///
    /// Note that a branch with queued work and zero workers never drains by itself.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> WaitOutcome {
        let mut queue = self.shared.queue.lock().expect(ERR_POISONED_LOCK);

        let Some(timeout) = timeout else {
            while !(queue.entries.is_empty() && queue.busy == 0) {
                queue = self.shared.drained.wait(queue).expect(ERR_POISONED_LOCK);
            }
            return WaitOutcome::Drained;
        };

        let deadline = Instant::now() + timeout;
        while !(queue.entries.is_empty() && queue.busy == 0) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|r| !r.is_zero()) else {
                return WaitOutcome::TimedOut;
            };

            queue = self
                .shared
                .drained
                .wait_timeout(queue, remaining)
                .expect(ERR_POISONED_LOCK)
                .0;
        }

        WaitOutcome::Drained
    }

    /// Spawns `count` additional workers immediately and raises the target count by the same
    /// amount.
    pub fn grow(&self, count: usize) {
        if count == 0 {
            return;
        }

        // A draining branch spawns no new workers.
        if self.shared.queue.lock().expect(ERR_POISONED_LOCK).draining {
            return;
        }

        let mut roster = self.roster.lock().expect(ERR_POISONED_LOCK);

        for _ in 0..count {
            let (id, handle) = spawn_worker(&self.shared);
            roster.workers.insert(id, handle);
        }

        roster.target = roster.target.saturating_add(count);

        debug!(
            branch = self.shared.name.as_str(),
            added = count,
            target = roster.target,
            "grew worker set"
        );
    }

    /// Marks up to `count` arbitrarily chosen workers to exit after their current task and
    /// lowers the target count accordingly (saturating at zero).
    ///
    /// Executing work is never interrupted; the marked workers finish what they are doing,
    /// skip any remaining queued work, and exit. Returns immediately.
    pub fn shrink(&self, count: usize) {
        if count == 0 {
            return;
        }

        {
            let mut roster = self.roster.lock().expect(ERR_POISONED_LOCK);

            let victims: Vec<ThreadId> = roster.workers.keys().take(count).copied().collect();
            for id in &victims {
                let handle = roster
                    .workers
                    .remove(id)
                    .expect("victim was chosen from the roster under the same lock");
                handle.retire.store(true, Ordering::Release);
                roster.retired.push(handle.join);
            }

            roster.target = roster.target.saturating_sub(count);

            debug!(
                branch = self.shared.name.as_str(),
                removed = victims.len(),
                target = roster.target,
                "shrank worker set"
            );
        }

        // Retiring workers may be parked on the work condvar; wake everyone so they notice.
        self.shared.work_ready.notify_all();
    }

    /// The current live worker count. An eventually consistent snapshot: a worker retired by
    /// [`shrink`][Self::shrink] leaves the count immediately even though its thread may still
    /// be finishing its current task.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.roster.lock().expect(ERR_POISONED_LOCK).workers.len()
    }

    /// The number of queue entries inserted and not yet popped. A sequential batch counts as
    /// one entry. An eventually consistent snapshot, not transactional with submission or
    /// execution.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().expect(ERR_POISONED_LOCK).entries.len()
    }

    /// The steady-state worker count the branch currently converges to.
    #[must_use]
    pub fn target_worker_count(&self) -> usize {
        self.roster.lock().expect(ERR_POISONED_LOCK).target
    }

    /// Stops acceptance of new jobs and tells the workers to exit once the queue is drained.
    fn begin_drain(&self) {
        {
            let mut queue = self.shared.queue.lock().expect(ERR_POISONED_LOCK);
            queue.draining = true;
        }

        self.shared.work_ready.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn enter_draining_for_test(&self) {
        self.begin_drain();
    }
}

impl Drop for Branch {
    // Mutating the drain/join sequence away produces hangs, not observable return values.
    #[cfg_attr(test, mutants::skip)]
    fn drop(&mut self) {
        self.begin_drain();

        let (workers, retired) = {
            let mut roster = self.roster.lock().expect(ERR_POISONED_LOCK);
            (
                mem::take(&mut roster.workers),
                mem::take(&mut roster.retired),
            )
        };

        // Joining outside the roster lock: workers do not touch the roster, but introspection
        // calls from other threads holding an Arc clone must not deadlock against us.
        for (_, worker) in workers {
            _ = worker.join.join();
        }
        for join in retired {
            _ = join.join();
        }

        debug!(branch = self.shared.name.as_str(), "branch stopped");
    }
}

impl fmt::Debug for Branch {
    // We have no contract to test here - can return anything.
    #[cfg_attr(test, mutants::skip)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.shared.name)
            .field("workers", &self.worker_count())
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

fn spawn_worker(shared: &Arc<Shared>) -> (ThreadId, WorkerHandle) {
    let retire = Arc::new(AtomicBool::new(false));

    let join = thread::Builder::new()
        .name(format!("{}-worker", shared.name))
        .spawn({
            let shared = Arc::clone(shared);
            let retire = Arc::clone(&retire);
            move || worker_loop(&shared, &retire)
        })
        .expect("failed to spawn a worker thread");

    (join.thread().id(), WorkerHandle { retire, join })
}

fn worker_loop(shared: &Shared, retire: &AtomicBool) {
    debug!(branch = shared.name.as_str(), "worker started");

    loop {
        let entry = {
            let mut queue = shared.queue.lock().expect(ERR_POISONED_LOCK);

            loop {
                // Retirement wins over remaining work: shrink promises "after the current
                // task", not "after the queue drains".
                if retire.load(Ordering::Acquire) {
                    debug!(branch = shared.name.as_str(), "worker retired");
                    return;
                }

                if let Some(entry) = queue.entries.pop_front() {
                    queue.busy += 1;
                    break entry;
                }

                if queue.draining {
                    debug!(branch = shared.name.as_str(), "worker exiting, branch drained");
                    return;
                }

                queue = shared.work_ready.wait(queue).expect(ERR_POISONED_LOCK);
            }
        };

        run_entry(&shared.name, entry);

        let mut queue = shared.queue.lock().expect(ERR_POISONED_LOCK);
        queue.busy -= 1;
        if queue.entries.is_empty() && queue.busy == 0 {
            shared.drained.notify_all();
        }
    }
}

/// Executes one queue entry under the value-less half of the exception policy.
///
/// Value-producing jobs catch their own panics inside the job closure (to route them into the
/// result channel), so the catch here only ever fires for value-less work.
fn run_entry(branch_name: &str, entry: QueueEntry) {
    let outcome = match entry {
        QueueEntry::Single(job) => panic::catch_unwind(AssertUnwindSafe(job)),
        // The composite body is the unit the policy applies to: a panic in one element skips
        // the elements after it and is reported once.
        QueueEntry::Batch(jobs) => panic::catch_unwind(AssertUnwindSafe(move || {
            for job in jobs {
                job();
            }
        })),
    };

    if let Err(payload) = outcome {
        report_fault(branch_name, &panic_message(&*payload));
    }
}
