// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A lock being poisoned means a thread panicked while executing core scheduling logic.
/// The queue or roster may be in an inconsistent state, so we do not try to continue.
pub(crate) const ERR_POISONED_LOCK: &str =
    "poisoned lock - cannot continue execution because scheduling state may be inconsistent";
