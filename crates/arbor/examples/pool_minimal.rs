// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use arbor::{Branch, WaitOutcome};

fn main() {
    let _logging = arbor_testing::log_to_console();

    let branch = Branch::named("minimal", 2);

    branch.post(|| println!("Hello, world!")).unwrap();

    let answer = branch.submit(|| 6 * 7);
    println!("The answer is {}", answer.join().unwrap());

    assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
}
