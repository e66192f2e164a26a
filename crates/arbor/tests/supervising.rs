// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arbor::{Branch, Supervisor, WaitOutcome};
use arbor_testing::{TEST_TIMEOUT, execute_or_abandon};

/// A tick short enough to keep tests fast while leaving room for slow CI schedulers.
const FAST_TICK: Duration = Duration::from_millis(20);

/// Blocks until `condition` holds or a conservative deadline passes; panics on timeout.
fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn idle_branch_shrinks_to_lower_bound_and_stays() {
    // With an empty queue the supervisor steps the worker set down, one per tick, until
    // it reaches the lower bound - and not past it.
    execute_or_abandon(|| {
        let supervisor = Supervisor::with_tick(2, 4, FAST_TICK).unwrap();
        let branch = Arc::new(Branch::new(4));

        supervisor.supervise(&branch);
        wait_until("shrink to the lower bound", || branch.worker_count() == 2);

        // Several more ticks must not shrink below the bound.
        thread::sleep(FAST_TICK * 5);
        assert_eq!(branch.worker_count(), 2);
        assert_eq!(branch.target_worker_count(), 2);
    })
    .unwrap();
}

#[test]
fn backed_up_branch_grows_to_upper_bound() {
    // A continuously non-empty queue drives the worker set up to the upper bound, at most
    // one worker per tick.
    execute_or_abandon(|| {
        let supervisor = Supervisor::with_tick(2, 4, FAST_TICK).unwrap();
        let branch = Arc::new(Branch::new(2));

        // Enough brief sleeps to keep the queue non-empty through the ramp-up.
        for _ in 0..400 {
            branch
                .post(|| thread::sleep(Duration::from_millis(2)))
                .unwrap();
        }

        supervisor.supervise(&branch);
        wait_until("growth to the upper bound", || branch.worker_count() == 4);

        supervisor.stop();
        assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
    })
    .unwrap();
}
