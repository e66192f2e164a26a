// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt;

use crate::{Error, Result};

/// An opaque value-less unit of work, executed at most once on some worker thread of a branch.
///
/// Jobs that produce a value do not use this alias - they are accepted as plain closures by
/// [`Branch::submit`][crate::Branch::submit] and paired with a [`JobHandle`] instead.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// One entry of a branch's task queue.
///
/// A sequential batch is deliberately a single entry: it is enqueued once, popped once, and its
/// elements run back to back on one worker without re-entering the queue. This is what makes the
/// batch class pay the queue synchronization cost once instead of per element.
pub(crate) enum QueueEntry {
    Single(Job),
    Batch(Vec<Job>),
}

impl fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Single"),
            Self::Batch(jobs) => f.debug_tuple("Batch").field(&jobs.len()).finish(),
        }
    }
}

/// Enables the caller to obtain the result of a value-producing job running on a branch.
///
/// Submitting a value-producing job supplies the caller one of these. The handle is a one-shot
/// single-consumer channel: [`join()`][Self::join] consumes the handle, blocks until the job has
/// run, and returns the job's result.
///
/// If the job's body panicked, the captured panic message is re-raised as
/// [`Error::JobPanicked`]. If the branch rejected or abandoned the job because it was draining,
/// joining yields [`Error::ShuttingDown`].
///
/// Dropping the handle without joining is allowed - the job still runs, its result is discarded.
pub struct JobHandle<R> {
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> JobHandle<R> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<R>>) -> Self {
        Self { rx }
    }

    /// Blocks until the job has completed and returns its result.
    ///
    /// A panic in the job body is re-raised here as [`Error::JobPanicked`] carrying the panic
    /// message. A job that was rejected at submission, or abandoned because its branch was
    /// destroyed before a worker could run it, yields [`Error::ShuttingDown`].
    pub fn join(self) -> Result<R> {
        // A dropped sender means the job closure was destroyed without running: the branch
        // refused it at submission or threw away the queue during teardown.
        match self.rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ShuttingDown),
        }
    }
}

impl<R> fmt::Debug for JobHandle<R> {
    // We have no contract to test here - can return anything.
    #[cfg_attr(test, mutants::skip)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").finish_non_exhaustive()
    }
}

/// Extracts a human-readable message from a panic payload.
///
/// Panics raised via `panic!("...")` carry a `&str` or `String` payload; anything else gets a
/// placeholder so the fault report is still well-formed.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_maps_dropped_sender_to_shutting_down() {
        // A handle whose sender is destroyed without firing must not hang or panic - it reports
        // the shutdown error, matching what happens when a draining branch discards a job.
        let (tx, rx) = oneshot::channel::<Result<u32>>();
        drop(tx);

        let handle = JobHandle::new(rx);
        assert!(matches!(handle.join(), Err(Error::ShuttingDown)));
    }

    #[test]
    fn join_returns_value() {
        let (tx, rx) = oneshot::channel::<Result<u32>>();
        tx.send(Ok(7)).unwrap();

        assert_eq!(JobHandle::new(rx).join().unwrap(), 7);
    }

    #[test]
    fn panic_message_extracts_both_string_forms() {
        let static_payload: Box<dyn Any + Send> = Box::new("static message");
        let owned_payload: Box<dyn Any + Send> = Box::new("owned message".to_string());
        let other_payload: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(&*static_payload), "static message");
        assert_eq!(panic_message(&*owned_payload), "owned message");
        assert_eq!(panic_message(&*other_payload), "non-string panic payload");
    }
}
