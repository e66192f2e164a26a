// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test aids for the Arbor workspace: a conservative timeout for anything that
//! could hang, and console logging wiring for tests and examples.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing_appender::non_blocking::WorkerGuard;

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// We are conservative here and allow much time - this is only to break out of infinite loops,
/// not for any situations that are actually expected.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a thread-safe function on a background thread and abandons it if
/// it does not complete before [`TEST_TIMEOUT`].
///
/// Returns `None` if the function panicked or timed out, in which case the
/// background thread is left behind - the caller is expected to fail the test.
#[must_use]
pub fn execute_or_abandon<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    // There are multiple ways for the called function to fail:
    // 1. It fails to finish in the allowed time span.
    // 2. It panics, so the result is never sent.
    //
    // In both cases, the channel will get closed and recv_timeout
    // will signal an error saying the channel is broken.
    thread::spawn(move || {
        let result = f();
        sender.send(result).unwrap();
    });

    receiver.recv_timeout(TEST_TIMEOUT).ok()
}

/// Wires up an asynchronous console log output, intended for use in examples and tests. The
/// returned guard will ensure that all contents are flushed on drop, ensuring test isolation.
///
/// # Panics
///
/// Panics if logging has already been configured for this process. Logging can only be configured
/// once per process (because we set a global config to catch all logs from all threads). This
/// means you must use the nextest test runner to run tests using this capability, as nextest
/// isolates each test to its own process.
pub fn log_to_console() -> WorkerGuard {
    let (non_blocking_stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(non_blocking_stdout)
        .try_init()
        .expect("logging already configured - you must use the nextest test runner to run this test, so each test is isolated into its own process; alternatively, run one test at a time");

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_or_abandon_returns_result() {
        assert_eq!(execute_or_abandon(|| 40 + 2), Some(42));
    }

    #[test]
    fn execute_or_abandon_swallows_panic() {
        assert_eq!(execute_or_abandon(|| -> u32 { panic!("boom") }), None);
    }
}
