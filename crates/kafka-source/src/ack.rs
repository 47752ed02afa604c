//! Bounded tracker of in-flight offsets.
//!
//! Only unresolved offsets are kept, in arrival order. Each entry remembers the
//! offset tracked right before it, so once every older entry is resolved that
//! predecessor is the safe commit level. Workers resolve entries in any order
//! and a resolved entry leaves the tracker immediately.

use crate::error::{Error, Result};
use kafka_types::Offset;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending,
    /// Nacked, waiting for the dead-letter hand-off to succeed.
    DeadLettering,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    seq: u64,
    offset: Offset,
    /// Offset tracked immediately before this one.
    prev: Option<Offset>,
    state: EntryState,
}

/// Opaque token correlating one tracked offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckHandle {
    seq: u64,
    offset: Offset,
}

impl AckHandle {
    /// Offset this handle was issued for.
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

struct Tracker {
    /// Unresolved entries, ordered by `seq`.
    entries: VecDeque<Entry>,
    capacity: usize,
    next_seq: u64,
    last_tracked: Option<Offset>,
    commit_level: Option<Offset>,
}

impl Tracker {
    fn position(&self, handle: &AckHandle) -> Result<usize> {
        match self.entries.binary_search_by_key(&handle.seq, |e| e.seq) {
            Ok(pos) if self.entries[pos].offset == handle.offset => Ok(pos),
            Err(_) if handle.seq < self.next_seq => Err(Error::AlreadyResolved {
                offset: handle.offset,
            }),
            _ => Err(Error::StaleHandle {
                offset: handle.offset,
            }),
        }
    }

    /// Raise the commit level to the newest offset with no unresolved predecessor.
    fn advance(&mut self) {
        let candidate = match self.entries.front() {
            Some(oldest) => oldest.prev,
            None => self.last_tracked,
        };
        if candidate > self.commit_level {
            self.commit_level = candidate;
        }
    }
}

/// Tracks outstanding offsets for one partition and computes the safe commit offset.
///
/// `track` is called by the single intake loop, `ack`/`nack` by any number of
/// workers and `commit_level` by the commit loop. All of them serialize on an
/// internal mutex; the critical sections never block or await.
pub struct AckManager {
    tracker: Mutex<Tracker>,
    idle: Notify,
}

impl AckManager {
    /// Create a tracker that holds at most `max_outstanding` unresolved offsets.
    pub fn new(max_outstanding: usize) -> Self {
        let capacity = max_outstanding.max(1);
        Self {
            tracker: Mutex::new(Tracker {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                next_seq: 0,
                last_tracked: None,
                commit_level: None,
            }),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `offset` as pending and return its handle.
    ///
    /// Never blocks: fails with [`Error::CapacityExceeded`] while
    /// `max_outstanding` offsets are unresolved, leaving backoff to the caller.
    /// Offsets must be strictly increasing.
    pub fn track(&self, offset: Offset) -> Result<AckHandle> {
        let mut tracker = self.lock();
        if let Some(last) = tracker.last_tracked {
            if offset <= last {
                return Err(Error::OutOfOrder { offset, last });
            }
        }
        if tracker.entries.len() == tracker.capacity {
            return Err(Error::CapacityExceeded {
                capacity: tracker.capacity,
            });
        }

        let handle = AckHandle {
            seq: tracker.next_seq,
            offset,
        };
        let prev = tracker.last_tracked;
        tracker.entries.push_back(Entry {
            seq: handle.seq,
            offset,
            prev,
            state: EntryState::Pending,
        });
        tracker.next_seq += 1;
        tracker.last_tracked = Some(offset);
        Ok(handle)
    }

    /// Mark the offset as fully resolved, freeing its capacity immediately.
    pub fn ack(&self, handle: &AckHandle) -> Result<()> {
        let mut tracker = self.lock();
        let pos = tracker.position(handle)?;
        tracker.entries.remove(pos);
        tracker.advance();
        let idle = tracker.entries.is_empty();
        drop(tracker);

        if idle {
            self.idle.notify_waiters();
        }
        Ok(())
    }

    /// Record that processing failed and the offset is being dead-lettered.
    ///
    /// The entry stays unresolved and holds back the commit level until
    /// [`AckManager::ack`] is called after a successful hand-off.
    pub fn nack(&self, handle: &AckHandle) -> Result<()> {
        let mut tracker = self.lock();
        let pos = tracker.position(handle)?;
        let entry = &mut tracker.entries[pos];
        match entry.state {
            EntryState::Pending => {
                entry.state = EntryState::DeadLettering;
                Ok(())
            }
            EntryState::DeadLettering => Err(Error::AlreadyDeadLettered {
                offset: handle.offset,
            }),
        }
    }

    /// Highest tracked offset whose predecessors (among tracked offsets) are all resolved.
    ///
    /// `None` until the first offset is resolved. Never decreases.
    pub fn commit_level(&self) -> Option<Offset> {
        self.lock().commit_level
    }

    /// Number of offsets tracked but not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.lock().entries.len()
    }

    /// Maximum number of unresolved offsets tracked at once.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Wait until no tracked offset remains unresolved.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}
