//! Slot writes recorded while a pass runs.
//!
//! State writes made by the evaluating thread are deferred and applied when
//! the pass commits. Ref writes go through immediately (the component reads
//! them back in the same pass) but the first write to each cell records its
//! previous value, restored if the pass is discarded. Writes from other
//! threads are never held back.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::trace;

type Write = Box<dyn FnOnce() + Send>;

struct Recording {
    thread: ThreadId,
    deferred: Vec<Write>,
    undo: Vec<Write>,
    touched: HashSet<usize>,
}

impl Recording {
    fn is_current(&self) -> bool {
        self.thread == thread::current().id()
    }
}

/// Shared by a store and the setters and refs its hooks hand out.
#[derive(Clone, Default)]
pub(crate) struct PassJournal {
    inner: Arc<Mutex<Option<Recording>>>,
}

impl PassJournal {
    /// Start recording on the calling thread.
    pub(crate) fn open(&self) {
        *self.inner.lock() = Some(Recording {
            thread: thread::current().id(),
            deferred: Vec::new(),
            undo: Vec::new(),
            touched: HashSet::new(),
        });
    }

    /// Stop recording. A committed pass applies its deferred writes in
    /// order; a discarded one rolls its ref writes back, newest first.
    pub(crate) fn close(&self, commit: bool) {
        let Some(rec) = self.inner.lock().take() else {
            return;
        };
        trace!(commit, deferred = rec.deferred.len(), undo = rec.undo.len(), "closing pass journal");
        if commit {
            for write in rec.deferred {
                write();
            }
        } else {
            for undo in rec.undo.into_iter().rev() {
                undo();
            }
        }
    }

    /// Run `write` now, or hold it until commit when called mid-pass.
    pub(crate) fn write_or_defer(&self, write: impl FnOnce() + Send + 'static) {
        {
            let mut guard = self.inner.lock();
            if let Some(rec) = guard.as_mut().filter(|r| r.is_current()) {
                rec.deferred.push(Box::new(write));
                return;
            }
        }
        write();
    }

    /// Record how to undo the first mid-pass write to the cell `id`.
    pub(crate) fn remember(&self, id: usize, undo: impl FnOnce() -> Write) {
        let mut guard = self.inner.lock();
        if let Some(rec) = guard.as_mut().filter(|r| r.is_current())
            && rec.touched.insert(id)
        {
            rec.undo.push(undo());
        }
    }
}

impl std::fmt::Debug for PassJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        f.debug_struct("PassJournal")
            .field("recording", &guard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn writes_outside_a_pass_apply_at_once() {
        let journal = PassJournal::default();
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        journal.write_or_defer(move || {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deferred_writes_wait_for_commit() {
        let journal = PassJournal::default();
        let hits = Arc::new(AtomicU32::new(0));
        for commit in [false, true] {
            journal.open();
            let h = Arc::clone(&hits);
            journal.write_or_defer(move || {
                let _ = h.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(hits.load(Ordering::SeqCst), 0);
            journal.close(commit);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn other_threads_are_not_deferred() {
        let journal = PassJournal::default();
        journal.open();
        let hits = Arc::new(AtomicU32::new(0));
        let (j, h) = (journal.clone(), Arc::clone(&hits));
        thread::spawn(move || {
            j.write_or_defer(move || {
                let _ = h.fetch_add(1, Ordering::SeqCst);
            });
        })
        .join()
        .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        journal.close(false);
    }

    #[test]
    fn discarded_pass_runs_first_undo_per_cell() {
        let journal = PassJournal::default();
        let cell = Arc::new(Mutex::new(0u32));
        journal.open();
        for _ in 0..3 {
            let c = Arc::clone(&cell);
            let old = *cell.lock();
            journal.remember(1, move || -> Write { Box::new(move || *c.lock() = old) });
            *cell.lock() += 1;
        }
        journal.close(false);
        assert_eq!(*cell.lock(), 0);
    }
}
