// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use arbor::{Branch, Error};

// Validate that both halves of the exception policy are visible in the terminal: a value-less
// job failure reaches the fault sink, and a value-producing one is re-raised at the join.
fn main() {
    arbor::set_fault_sink(|source, detail| {
        println!("fault sink received from {source}: {detail}");
    });

    let branch = Branch::named("panicky", 1);

    branch
        .post(|| panic!("a fire-and-forget job failed"))
        .unwrap();

    let handle = branch.submit(|| -> u32 { panic!("a value-producing job failed") });
    match handle.join() {
        Err(Error::JobPanicked(message)) => println!("join re-raised: {message}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    branch.wait_idle(None);
}
