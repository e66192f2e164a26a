// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::{BranchId, SupervisorId};

/// A specialized `Result` type for Arbor operations that return an Arbor
/// [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in Arbor.
///
/// This is an umbrella type for all kinds of errors that can be returned by Arbor, including
/// programming errors (e.g. invalid supervisor bounds) and operational outcomes (e.g. a job
/// submitted to a branch that is already draining). Future versions may add additional enum
/// variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The target branch (or the workspace that owns it) has begun draining and no longer
    /// accepts submissions.
    ///
    /// For value-less submissions this is returned at the submission site. For value-producing
    /// submissions it is delivered through the job's result channel and surfaced when the
    /// caller joins the handle.
    #[error("the branch is shutting down and no longer accepts jobs")]
    ShuttingDown,

    /// A value-producing job's body panicked. The captured panic message is re-raised here
    /// when the caller inspects the job's result.
    ///
    /// Value-less jobs never surface this variant - their failures go to the fault sink.
    #[error("the job panicked: {0}")]
    JobPanicked(String),

    /// A supervisor was constructed with an invalid worker band. The band must satisfy
    /// `1 <= min <= max`.
    #[error("invalid supervisor bounds: min {min} must satisfy 1 <= min <= max {max}")]
    InvalidBounds {
        /// The rejected lower bound.
        min: usize,
        /// The rejected upper bound.
        max: usize,
    },

    /// A workspace lookup or detach named a branch identifier that is not currently attached.
    #[error("no branch is attached under {0}")]
    UnknownBranch(BranchId),

    /// A workspace lookup or detach named a supervisor identifier that is not currently attached.
    #[error("no supervisor is attached under {0}")]
    UnknownSupervisor(SupervisorId),

    /// A workspace dispatch was attempted while no branches were attached.
    #[error("the workspace has no attached branches to dispatch to")]
    NoBranches,
}
