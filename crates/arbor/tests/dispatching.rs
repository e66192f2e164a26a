// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use arbor::{Branch, Supervisor, WaitOutcome, Workspace};
use arbor_testing::execute_or_abandon;

#[test]
fn dispatch_balances_load_between_two_branches() {
    // Two single-worker branches under a stream of uniform brief jobs must split the work
    // roughly evenly - the depth comparison steers each job at the emptier branch.
    execute_or_abandon(|| {
        let mut workspace = Workspace::new();
        let counters = [
            Arc::new(AtomicUsize::new(0)),
            Arc::new(AtomicUsize::new(0)),
        ];

        workspace.attach_branch(Branch::named("left", 1));
        workspace.attach_branch(Branch::named("right", 1));

        // Each job identifies the branch that ran it by the worker thread's name prefix.
        for _ in 0..1000 {
            let left_counter = Arc::clone(&counters[0]);
            let right_counter = Arc::clone(&counters[1]);

            workspace
                .post(move || {
                    let on_left = thread::current()
                        .name()
                        .is_some_and(|name| name.starts_with("left"));
                    if on_left {
                        left_counter.fetch_add(1, Ordering::Relaxed);
                    } else {
                        right_counter.fetch_add(1, Ordering::Relaxed);
                    }

                    thread::sleep(Duration::from_millis(1));
                })
                .unwrap();
        }

        workspace.for_each_branch(|branch| {
            assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
        });

        let left_count = counters[0].load(Ordering::Relaxed);
        let right_count = counters[1].load(Ordering::Relaxed);
        assert_eq!(left_count + right_count, 1000);
        assert!(
            (400..=600).contains(&left_count),
            "lopsided split: {left_count} vs {right_count}"
        );
    })
    .unwrap();
}

#[test]
fn teardown_stops_supervisors_before_branches() {
    // A workspace owning a supervisor actively observing its branches must tear down
    // without hanging or panicking; the supervisor is stopped first by drop order.
    execute_or_abandon(|| {
        let mut workspace = Workspace::new();

        let branch_id = workspace.attach_branch(Branch::new(2));
        let supervisor = Supervisor::with_tick(1, 4, Duration::from_millis(10)).unwrap();
        supervisor.supervise(workspace.branch(branch_id).unwrap());
        workspace.attach_supervisor(supervisor);

        for _ in 0..50 {
            workspace
                .post(|| thread::sleep(Duration::from_millis(1)))
                .unwrap();
        }

        drop(workspace);
    })
    .unwrap();
}
