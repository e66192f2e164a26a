// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arbor::{Branch, Error, WaitOutcome};
use arbor_testing::execute_or_abandon;

#[test]
fn drain_executes_all_queued_jobs() {
    // Submitting n jobs and draining runs exactly n bodies.
    execute_or_abandon(|| {
        let branch = Branch::new(4);
        let executed = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let executed_clone = Arc::clone(&executed);
            branch
                .post(move || {
                    executed_clone.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }

        assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
        assert_eq!(executed.load(Ordering::Relaxed), 100);
    })
    .unwrap();
}

#[test]
fn drop_runs_queued_jobs_before_stopping() {
    // Destruction drains: everything accepted before the drop still executes.
    execute_or_abandon(|| {
        let executed = Arc::new(AtomicUsize::new(0));

        {
            let branch = Branch::new(1);
            for _ in 0..5 {
                let executed_clone = Arc::clone(&executed);
                branch
                    .post(move || {
                        executed_clone.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
            }
        }

        assert_eq!(executed.load(Ordering::Relaxed), 5);
    })
    .unwrap();
}

#[test]
fn zero_worker_branch_queues_and_abandons_on_drop() {
    // With no workers the queue only accumulates; dropping the branch abandons the queued
    // jobs, which a value handle observes as a shutdown.
    execute_or_abandon(|| {
        let branch = Branch::new(0);

        let handle = branch.submit(|| 11);
        assert_eq!(branch.queue_len(), 1);

        drop(branch);
        assert!(matches!(handle.join(), Err(Error::ShuttingDown)));
    })
    .unwrap();
}
