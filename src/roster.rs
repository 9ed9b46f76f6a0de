use std::collections::HashMap;
use std::thread::JoinHandle;

/// Which tier a worker belongs to
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WorkerKind {
    /// Started on demand up to the persistent target and never retired
    Persistent,
    /// Started under backlog pressure, retires after the idle timeout
    Transient,
}

pub type WorkerId = usize;

/// Handles of the live workers, split by tier.
///
/// The roster itself is not synchronized. The pool keeps it behind a single
/// mutex so that "check the counts, then insert" and transient self-removal
/// are linearizable with respect to each other. A worker id lives in at most
/// one of the two sets.
pub struct Roster {
    persistent: Vec<(WorkerId, JoinHandle<()>)>,
    transient: HashMap<WorkerId, JoinHandle<()>>,
}

impl Roster {
    pub fn new() -> Roster {
        Roster {
            persistent: Vec::new(),
            transient: HashMap::new(),
        }
    }

    /// Returns `true` if one more worker of `kind` may be started.
    ///
    /// Persistent workers are bounded by `persistent_target`, transient ones by
    /// the total `max_workers` ceiling shared with the persistent tier.
    pub fn has_room(&self, kind: WorkerKind, persistent_target: usize, max_workers: usize) -> bool {
        match kind {
            WorkerKind::Persistent => self.persistent.len() < persistent_target,
            WorkerKind::Transient => self.len() < max_workers,
        }
    }

    pub fn insert(&mut self, kind: WorkerKind, id: WorkerId, handle: JoinHandle<()>) {
        match kind {
            WorkerKind::Persistent => self.persistent.push((id, handle)),
            WorkerKind::Transient => {
                let prev = self.transient.insert(id, handle);
                debug_assert!(prev.is_none(), "worker id reused");
            }
        }
    }

    /// Remove a retiring transient worker, returning its handle.
    pub fn remove_transient(&mut self, id: WorkerId) -> Option<JoinHandle<()>> {
        self.transient.remove(&id)
    }

    pub fn persistent_len(&self) -> usize {
        self.persistent.len()
    }

    pub fn transient_len(&self) -> usize {
        self.transient.len()
    }

    pub fn len(&self) -> usize {
        self.persistent.len() + self.transient.len()
    }
}

impl Default for Roster {
    fn default() -> Roster {
        Roster::new()
    }
}
