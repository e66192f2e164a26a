// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An embeddable task execution substrate for application processes that need a shared
//! background execution facility with priority differentiation, batched lightweight work, and
//! automatic pool sizing.
//!
//! Three components compose bottom-up:
//!
//! - [`Branch`]: a dynamic thread pool owning a dual-ended task queue and a set of worker
//!   threads, with normal, urgent, and sequential-batch submission.
//! - [`Supervisor`]: a periodic control loop that resizes supervised branches toward a
//!   configured worker band.
//! - [`Workspace`]: an owning container that assigns stable identifiers, dispatches jobs to
//!   the least-loaded branch, and enforces teardown order.
//!
//! ```
//! use arbor::{Branch, WaitOutcome};
//!
//! let branch = Branch::named("background", 2);
//!
//! let answer = branch.submit(|| 6 * 7);
//! branch.post(|| println!("fire and forget")).unwrap();
//!
//! assert_eq!(answer.join().unwrap(), 42);
//! assert_eq!(branch.wait_idle(None), WaitOutcome::Drained);
//! ```

// Public API surface.
mod branch;
mod error;
mod fault;
mod job;
mod supervisor;
mod workspace;

pub use branch::{Branch, BranchBuilder, WaitOutcome};
pub use error::{Error, Result};
pub use fault::set_fault_sink;
pub use job::{Job, JobHandle};
pub use supervisor::{DEFAULT_TICK, Supervisor};
pub use workspace::{BranchId, SupervisorId, Workspace};

// Internal to the crate but re-exported at crate root for reduced hassle.
mod constants;

pub(crate) use constants::ERR_POISONED_LOCK;
