// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::RwLock;

use crate::ERR_POISONED_LOCK;

/// The process-wide fault sink slot. `None` means the default sink (one line to stderr).
static SINK: RwLock<Option<Box<SinkFn>>> = RwLock::new(None);

type SinkFn = dyn Fn(&str, &str) + Send + Sync;

/// Installs a process-wide sink for faults that cannot be surfaced to any caller.
///
/// A fault report is a `(source, detail)` pair: the source names the component the failure
/// escaped from (typically a branch name, or `supervisor` for tick callbacks) and the detail
/// carries the captured panic message.
///
/// Value-less jobs intentionally cannot propagate failures upward - the submitter discarded the
/// handle - so the sink is the only surface for them. The default sink writes a single line to
/// the process error stream.
///
/// Install the sink during initialization, before submitting work. Swapping is not synchronized
/// against concurrent reports: a report racing a swap may reach either sink.
pub fn set_fault_sink<F>(sink: F)
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    *SINK.write().expect(ERR_POISONED_LOCK) = Some(Box::new(sink));
}

/// Delivers a fault to the installed sink, or to stderr if none is installed.
///
/// Also emits a tracing event so the failure shows up in structured logs; the sink remains the
/// contractual surface.
pub(crate) fn report_fault(source: &str, detail: &str) {
    tracing::error!(source, detail, "job failure swallowed");

    let sink = SINK.read().expect(ERR_POISONED_LOCK);
    match sink.as_ref() {
        Some(sink) => sink(source, detail),
        None => eprintln!("{source}: {detail}"),
    }
}

#[cfg(test)]
pub(crate) mod test_sink {
    use std::sync::{Mutex, Once};

    // The sink slot is process-global and tests run in parallel, so every sink-observing test
    // in this crate shares one capturing sink and filters by its own marker string.
    static REPORTS: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();

    pub(crate) fn install() {
        INSTALL.call_once(|| {
            crate::set_fault_sink(|source, detail| {
                REPORTS
                    .lock()
                    .unwrap()
                    .push((source.to_string(), detail.to_string()));
            });
        });
    }

    pub(crate) fn reports_containing(marker: &str) -> usize {
        REPORTS
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, detail)| detail.contains(marker))
            .count()
    }
}
