/// Per-worker scratch arena
///
/// Hits do not own their edit vector's storage. The arena owns a free-list
/// of edit-vector nodes; a hit holds an [`EditsHandle`] that returns its node
/// on drop. Cloning a hit allocates a fresh node and deep-copies the edits.
/// This is the only allocation on the alignment hot path once the free-list
/// is warm.
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::align::edit::Edit;

/// Free-list of edit vectors, shared by all hits of one worker.
#[derive(Debug, Default)]
pub struct EditPool {
    free: RefCell<Vec<Vec<Edit>>>,
}

impl EditPool {
    fn take(&self) -> Vec<Edit> {
        self.free.borrow_mut().pop().unwrap_or_default()
    }

    fn give(&self, mut buf: Vec<Edit>) {
        buf.clear();
        self.free.borrow_mut().push(buf);
    }

    /// Number of nodes currently parked in the free-list.
    pub fn free_nodes(&self) -> usize {
        self.free.borrow().len()
    }
}

/// Opaque handle to one edit-vector node borrowed from an [`EditPool`].
#[derive(Debug)]
pub struct EditsHandle {
    pool: Rc<EditPool>,
    buf: Option<Vec<Edit>>,
}

impl EditsHandle {
    pub fn new(pool: &Rc<EditPool>) -> Self {
        Self {
            pool: Rc::clone(pool),
            buf: Some(pool.take()),
        }
    }
}

impl Deref for EditsHandle {
    type Target = Vec<Edit>;
    fn deref(&self) -> &Vec<Edit> {
        self.buf.as_ref().expect("edits node present until drop")
    }
}

impl DerefMut for EditsHandle {
    fn deref_mut(&mut self) -> &mut Vec<Edit> {
        self.buf.as_mut().expect("edits node present until drop")
    }
}

impl Clone for EditsHandle {
    fn clone(&self) -> Self {
        let mut buf = self.pool.take();
        buf.extend_from_slice(self);
        Self {
            pool: Rc::clone(&self.pool),
            buf: Some(buf),
        }
    }
}

impl Drop for EditsHandle {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give(buf);
        }
    }
}

impl PartialEq for EditsHandle {
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}
impl Eq for EditsHandle {}

/// Per-worker scratch: reference-extraction buffers, score-prefix arrays,
/// and the edit free-list.
#[derive(Debug, Default)]
pub struct SharedTempVars {
    pub pool: Rc<EditPool>,
    pub ref_buf: Vec<u8>,
    pub ref_buf2: Vec<u8>,
    pub temp_scores: Vec<i64>,
    pub temp_scores2: Vec<i64>,
}

impl SharedTempVars {
    pub fn new() -> Self {
        Self::default()
    }
}
