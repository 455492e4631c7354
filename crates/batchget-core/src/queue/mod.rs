//! Re-prioritizable queue of pending files.
//!
//! Ordered by (priority rank, insertion order). Entries live in an arena
//! keyed by a sequence number; the heap only holds `(rank, seq)` keys. Removing
//! or re-prioritizing a file drops its arena slot, which leaves the heap key
//! behind as a tombstone that `pop` skips. Poison pills rank ahead of every
//! file so a worker asked to exit does so before taking more work.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::{Condvar, Mutex};

use crate::model::{FileEntry, Priority};

/// Rank used for poison pills (files rank 1..=3).
const POISON_RANK: u8 = 0;

/// What a worker gets back from `pop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    File(FileEntry),
    /// The worker should exit.
    Poison,
}

enum Slot {
    File(FileEntry),
    Poison,
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Reverse<(u8, u64)>>,
    slots: HashMap<u64, Slot>,
    by_name: HashMap<String, u64>,
    next_seq: u64,
}

impl QueueState {
    fn push(&mut self, rank: u8, slot: Slot) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((rank, seq)));
        self.slots.insert(seq, slot);
        seq
    }

    fn unlink(&mut self, name: &str) -> Option<FileEntry> {
        let seq = self.by_name.remove(name)?;
        match self.slots.remove(&seq) {
            Some(Slot::File(file)) => Some(file),
            _ => None,
        }
    }

    fn pop_live(&mut self) -> Option<Popped> {
        while let Some(Reverse((_, seq))) = self.heap.pop() {
            match self.slots.remove(&seq) {
                Some(Slot::File(file)) => {
                    self.by_name.remove(&file.name);
                    return Some(Popped::File(file));
                }
                Some(Slot::Poison) => return Some(Popped::Poison),
                // Tombstone left by remove/put.
                None => continue,
            }
        }
        None
    }
}

/// Blocking priority queue of files, addressed by file name.
#[derive(Default)]
pub struct FileQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `file`, replacing any queued entry with the same name.
    pub fn put(&self, file: FileEntry) {
        let mut st = self.state.lock();
        st.unlink(&file.name);
        let name = file.name.clone();
        let seq = st.push(file.priority.rank(), Slot::File(file));
        st.by_name.insert(name, seq);
        drop(st);
        self.ready.notify_one();
    }

    /// Tombstone the entry for `name`. Returns false if it was not queued.
    pub fn remove(&self, name: &str) -> bool {
        self.state.lock().unlink(name).is_some()
    }

    /// Move a queued file to a new priority. Returns false if it was not queued.
    pub fn reprioritize(&self, name: &str, priority: Priority) -> bool {
        let mut st = self.state.lock();
        let Some(mut file) = st.unlink(name) else {
            return false;
        };
        file.priority = priority;
        let seq = st.push(priority.rank(), Slot::File(file));
        st.by_name.insert(name.to_string(), seq);
        true
    }

    /// Queue one poison pill; exactly one worker will see it.
    pub fn put_poison(&self) {
        self.state.lock().push(POISON_RANK, Slot::Poison);
        self.ready.notify_one();
    }

    /// Block until a live entry is available.
    pub fn pop(&self) -> Popped {
        let mut st = self.state.lock();
        loop {
            if let Some(popped) = st.pop_live() {
                return popped;
            }
            self.ready.wait(&mut st);
        }
    }

    /// Non-blocking `pop`.
    pub fn try_pop(&self) -> Option<Popped> {
        self.state.lock().pop_live()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().by_name.contains_key(name)
    }

    /// Number of live files (poison pills and tombstones excluded).
    pub fn len(&self) -> usize {
        self.state.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
