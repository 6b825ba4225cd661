//! Managed-thread registry and last-stopped bookkeeping.
//!
//! Threads are registered from thread-create callbacks and dropped on
//! thread-exit. The registry also owns the last-stopped-thread cell
//! used by pause thread selection, and the last-stop site used to
//! de-duplicate repeated debugger-break stops on one statement.

use netdbg_core::runtime::{RuntimeThread, ThreadRef};
use netdbg_core::types::{IlOffset, IlRange, MethodToken, ModuleAddress, ThreadId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

/// The (module, method, statement range) a stop event was attributed
/// to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSite {
    /// Module of the stop location.
    pub module: ModuleAddress,
    /// Method of the stop location.
    pub method: MethodToken,
    /// IL range of the statement.
    pub range: IlRange,
}

#[derive(Default)]
struct ThreadsInner {
    threads: BTreeMap<ThreadId, ThreadRef>,
    last_stopped: Option<ThreadId>,
    last_stop_site: Option<(ThreadId, StopSite)>,
}

/// Registry of live managed threads.
#[derive(Default)]
pub struct Threads {
    inner: Mutex<ThreadsInner>,
}

impl Threads {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a thread from a thread-create callback.
    pub fn register(&self, thread: ThreadRef) {
        let id = thread.id();
        trace!(%id, "thread registered");
        self.inner.lock().threads.insert(id, thread);
    }

    /// Drop a thread on thread-exit. Returns true when the thread was
    /// known.
    pub fn unregister(&self, id: ThreadId) -> bool {
        let mut inner = self.inner.lock();
        if inner.last_stopped == Some(id) {
            inner.last_stopped = None;
        }
        if matches!(inner.last_stop_site, Some((site_id, _)) if site_id == id) {
            inner.last_stop_site = None;
        }
        inner.threads.remove(&id).is_some()
    }

    /// Look a thread up by id.
    #[must_use]
    pub fn get(&self, id: ThreadId) -> Option<ThreadRef> {
        self.inner.lock().threads.get(&id).cloned()
    }

    /// All live threads, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<ThreadRef> {
        self.inner.lock().threads.values().cloned().collect()
    }

    /// The lowest-id live thread, if any.
    #[must_use]
    pub fn first(&self) -> Option<ThreadRef> {
        self.inner.lock().threads.values().next().cloned()
    }

    /// Record the thread the last stop event was attributed to.
    pub fn set_last_stopped(&self, id: ThreadId) {
        self.inner.lock().last_stopped = Some(id);
    }

    /// The thread of the last stop event.
    #[must_use]
    pub fn last_stopped(&self) -> Option<ThreadId> {
        self.inner.lock().last_stopped
    }

    /// Forget the last stopped thread (called on resume).
    pub fn invalidate_last_stopped(&self) {
        self.inner.lock().last_stopped = None;
    }

    /// Record the statement a stop event landed on.
    pub fn record_stop_site(&self, id: ThreadId, site: StopSite) {
        self.inner.lock().last_stop_site = Some((id, site));
    }

    /// True when a new stop on `id` at the given location would repeat
    /// the previous stop's statement.
    #[must_use]
    pub fn repeats_last_stop(
        &self,
        id: ThreadId,
        module: ModuleAddress,
        method: MethodToken,
        offset: IlOffset,
    ) -> bool {
        let inner = self.inner.lock();
        match &inner.last_stop_site {
            Some((site_id, site)) => {
                *site_id == id
                    && site.module == module
                    && site.method == method
                    && site.range.contains(offset)
            }
            None => false,
        }
    }

    /// Drop every thread (process exit or detach).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.threads.clear();
        inner.last_stopped = None;
        inner.last_stop_site = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockThread;
    use std::sync::Arc;

    #[test]
    fn register_and_list_ordered() {
        let threads = Threads::new();
        threads.register(Arc::new(MockThread::detached(ThreadId(20))));
        threads.register(Arc::new(MockThread::detached(ThreadId(3))));

        let ids: Vec<ThreadId> = threads.list().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![ThreadId(3), ThreadId(20)]);
        assert_eq!(threads.first().unwrap().id(), ThreadId(3));
    }

    #[test]
    fn unregister_clears_last_stopped() {
        let threads = Threads::new();
        threads.register(Arc::new(MockThread::detached(ThreadId(5))));
        threads.set_last_stopped(ThreadId(5));
        assert_eq!(threads.last_stopped(), Some(ThreadId(5)));

        assert!(threads.unregister(ThreadId(5)));
        assert_eq!(threads.last_stopped(), None);
        assert!(!threads.unregister(ThreadId(5)));
    }

    #[test]
    fn stop_site_dedup() {
        let threads = Threads::new();
        let site = StopSite {
            module: ModuleAddress(0x1000),
            method: MethodToken(0x0600_0001),
            range: IlRange {
                start: IlOffset(4),
                end: IlOffset(10),
            },
        };
        threads.record_stop_site(ThreadId(1), site);

        assert!(threads.repeats_last_stop(
            ThreadId(1),
            ModuleAddress(0x1000),
            MethodToken(0x0600_0001),
            IlOffset(6)
        ));
        // Different thread, same statement.
        assert!(!threads.repeats_last_stop(
            ThreadId(2),
            ModuleAddress(0x1000),
            MethodToken(0x0600_0001),
            IlOffset(6)
        ));
        // Past the statement.
        assert!(!threads.repeats_last_stop(
            ThreadId(1),
            ModuleAddress(0x1000),
            MethodToken(0x0600_0001),
            IlOffset(10)
        ));
    }
}
