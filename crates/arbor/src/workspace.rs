// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::job::{Job, JobHandle};
use crate::{Branch, Error, Result, Supervisor};

/// Identifies a branch within the [`Workspace`] that issued it.
///
/// Identifiers are opaque, monotonically allocated, and never reused within a workspace
/// instance. They are meaningless to any other workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchId(u64);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}

/// Identifies a supervisor within the [`Workspace`] that issued it.
///
/// A disjoint identifier space from [`BranchId`], with the same allocation rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SupervisorId(u64);

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "supervisor-{}", self.0)
    }
}

/// An owning container for branches and supervisors with a dispatch entry point.
///
/// The workspace assigns each attached component a stable identifier, routes externally
/// submitted jobs to the attached branch with the lightest observed load, and enforces teardown
/// order: on drop, every supervisor is stopped before any branch is destroyed, so a supervisor
/// can never observe a branch mid-teardown.
///
/// # Dispatch policy
///
/// Among attached branches, dispatch picks the one with the smallest queue depth at that
/// moment, breaking ties with a round-robin cursor over the branches in identifier order. The
/// scan is deliberately not atomic with the subsequent enqueue: under contention a suboptimal
/// branch may occasionally be picked, in exchange for never holding a global lock while
/// dispatching.
///
/// # Thread safety
///
/// Attachment and detachment take `&mut self`, so the borrow checker enforces that no dispatch
/// or lookup races a mutation. Dispatch and lookup take `&self` and may be used concurrently
/// from any number of threads once attachment is quiescent.
pub struct Workspace {
    // Field order doubles as a teardown-order backstop: supervisors drop before branches.
    supervisors: BTreeMap<SupervisorId, Supervisor>,
    branches: BTreeMap<BranchId, Arc<Branch>>,
    next_branch_id: u64,
    next_supervisor_id: u64,
    /// Round-robin cursor for dispatch tie-breaking.
    cursor: AtomicUsize,
}

impl Workspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supervisors: BTreeMap::new(),
            branches: BTreeMap::new(),
            next_branch_id: 0,
            next_supervisor_id: 0,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Takes ownership of a branch and returns its identifier.
    pub fn attach_branch(&mut self, branch: Branch) -> BranchId {
        let id = BranchId(self.next_branch_id);
        self.next_branch_id += 1;

        debug!(%id, branch = branch.name(), "branch attached");
        self.branches.insert(id, Arc::new(branch));
        id
    }

    /// Takes ownership of a supervisor and returns its identifier.
    pub fn attach_supervisor(&mut self, supervisor: Supervisor) -> SupervisorId {
        let id = SupervisorId(self.next_supervisor_id);
        self.next_supervisor_id += 1;

        debug!(%id, "supervisor attached");
        self.supervisors.insert(id, supervisor);
        id
    }

    /// Releases ownership of a branch and returns it. Subsequent lookups with the identifier
    /// fail.
    ///
    /// Detaching a branch that a workspace-owned supervisor is still observing is permitted:
    /// supervision is weak, so once the returned reference is dropped the supervisor simply
    /// skips the branch. To keep it both alive and unsupervised, stop the supervisor first.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBranch`] if the identifier is not currently attached.
    pub fn detach_branch(&mut self, id: BranchId) -> Result<Arc<Branch>> {
        self.branches.remove(&id).ok_or(Error::UnknownBranch(id))
    }

    /// Releases ownership of a supervisor and returns it. Subsequent lookups with the
    /// identifier fail.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSupervisor`] if the identifier is not currently attached.
    pub fn detach_supervisor(&mut self, id: SupervisorId) -> Result<Supervisor> {
        self.supervisors
            .remove(&id)
            .ok_or(Error::UnknownSupervisor(id))
    }

    /// Looks up an attached branch.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownBranch`] if the identifier is not currently attached.
    pub fn branch(&self, id: BranchId) -> Result<&Arc<Branch>> {
        self.branches.get(&id).ok_or(Error::UnknownBranch(id))
    }

    /// Looks up an attached supervisor.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSupervisor`] if the identifier is not currently attached.
    pub fn supervisor(&self, id: SupervisorId) -> Result<&Supervisor> {
        self.supervisors.get(&id).ok_or(Error::UnknownSupervisor(id))
    }

    /// Applies `visit` to every attached branch in identifier order.
    ///
    /// The usual way to orchestrate draining: visit each branch with
    /// [`wait_idle`][Branch::wait_idle].
    pub fn for_each_branch(&self, mut visit: impl FnMut(&Branch)) {
        for branch in self.branches.values() {
            visit(branch);
        }
    }

    /// Dispatches a value-less job to the least-loaded branch.
    ///
    /// # Errors
    ///
    /// [`Error::NoBranches`] with nothing attached; [`Error::ShuttingDown`] if the chosen
    /// branch is draining.
    pub fn post<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pick()?.post(body)
    }

    /// Dispatches a value-less urgent job to the least-loaded branch.
    ///
    /// # Errors
    ///
    /// [`Error::NoBranches`] with nothing attached; [`Error::ShuttingDown`] if the chosen
    /// branch is draining.
    pub fn post_urgent<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pick()?.post_urgent(body)
    }

    /// Dispatches a sequential batch to the least-loaded branch. The whole batch lands on one
    /// branch and runs on one of its workers.
    ///
    /// # Errors
    ///
    /// [`Error::NoBranches`] with nothing attached; [`Error::ShuttingDown`] if the chosen
    /// branch is draining.
    pub fn post_batch(&self, jobs: Vec<Job>) -> Result<()> {
        self.pick()?.post_batch(jobs)
    }

    /// Dispatches a value-producing job to the least-loaded branch and returns its handle.
    ///
    /// # Errors
    ///
    /// [`Error::NoBranches`] with nothing attached.
    pub fn submit<F, R>(&self, body: F) -> Result<JobHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.pick()?.submit(body))
    }

    /// Dispatches a value-producing urgent job to the least-loaded branch and returns its
    /// handle.
    ///
    /// # Errors
    ///
    /// [`Error::NoBranches`] with nothing attached.
    pub fn submit_urgent<F, R>(&self, body: F) -> Result<JobHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.pick()?.submit_urgent(body))
    }

    /// Picks the dispatch target: smallest observed queue depth, round-robin among ties.
    fn pick(&self) -> Result<&Arc<Branch>> {
        let depths: Vec<(&Arc<Branch>, usize)> = self
            .branches
            .values()
            .map(|branch| (branch, branch.queue_len()))
            .collect();

        let lightest = depths
            .iter()
            .map(|(_, depth)| *depth)
            .min()
            .ok_or(Error::NoBranches)?;

        let tied: Vec<&Arc<Branch>> = depths
            .into_iter()
            .filter(|(_, depth)| *depth == lightest)
            .map(|(branch, _)| branch)
            .collect();

        // Minimal effort round-robin over the tied branches; prevents permanent starvation of
        // any branch under uniform load.
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % tied.len();
        Ok(tied[index])
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Workspace {
    // Mutating the teardown order produces use-after-drop observation windows, not values a
    // test can cheaply assert on.
    #[cfg_attr(test, mutants::skip)]
    fn drop(&mut self) {
        // Supervisors first, newest first, so no controller can observe a branch once branch
        // teardown begins.
        while let Some((id, supervisor)) = self.supervisors.pop_last() {
            supervisor.stop();
            debug!(%id, "supervisor stopped and destroyed");
            drop(supervisor);
        }

        // Then the branches, newest first; each drop drains its queue and joins its workers.
        while let Some((id, branch)) = self.branches.pop_last() {
            debug!(%id, "branch destroyed");
            drop(branch);
        }
    }
}

impl fmt::Debug for Workspace {
    // We have no contract to test here - can return anything.
    #[cfg_attr(test, mutants::skip)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("branches", &self.branches.len())
            .field("supervisors", &self.supervisors.len())
            .finish()
    }
}
