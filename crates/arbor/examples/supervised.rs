// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::thread;
use std::time::Duration;

use arbor::{Branch, Supervisor, WaitOutcome, Workspace};

// A workspace with two branches under one supervisor: flood the workspace with brief jobs and
// watch the pools grow toward the band's upper bound, then drain and let them shrink back.
fn main() {
    let _logging = arbor_testing::log_to_console();

    let mut workspace = Workspace::new();
    let io = workspace.attach_branch(Branch::named("io", 1));
    let compute = workspace.attach_branch(Branch::named("compute", 1));

    let supervisor = Supervisor::with_tick(1, 4, Duration::from_millis(100)).unwrap();
    supervisor.supervise(workspace.branch(io).unwrap());
    supervisor.supervise(workspace.branch(compute).unwrap());
    supervisor.on_tick(|| println!("tick"));
    workspace.attach_supervisor(supervisor);

    for _ in 0..500 {
        workspace
            .post(|| thread::sleep(Duration::from_millis(5)))
            .unwrap();
    }

    thread::sleep(Duration::from_millis(600));
    workspace.for_each_branch(|branch| {
        println!(
            "{}: {} workers, {} queued",
            branch.name(),
            branch.worker_count(),
            branch.queue_len()
        );
    });

    workspace.for_each_branch(|branch| {
        assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
    });
}
