//! Append-only storage with stable element addresses.
//!
//! Elements live in fixed-capacity chunks. A chunk's buffer is allocated once
//! with `CHUNK_CAPACITY` slots and is never pushed past that capacity, so it
//! never reallocates; growing the collection only adds chunks. References
//! handed out by [`StableVec::push`] therefore stay valid for as long as the
//! collection itself.

use std::cell::RefCell;
use std::fmt;

/// Elements per chunk.
const CHUNK_CAPACITY: usize = 32;

/// Append-only vector whose elements never move.
pub struct StableVec<T> {
    chunks: RefCell<Vec<Vec<T>>>,
}

impl<T> StableVec<T> {
    pub fn new() -> Self {
        Self {
            chunks: RefCell::new(Vec::new()),
        }
    }

    /// Append `value` and return a reference to it.
    ///
    /// Takes `&self` so earlier references can be held across later pushes.
    pub fn push(&self, value: T) -> &T {
        let mut chunks = self.chunks.borrow_mut();
        let ptr: *const T = match chunks.last_mut() {
            Some(chunk) if chunk.len() < CHUNK_CAPACITY => {
                let slot = chunk.len();
                chunk.push(value);
                // Safety: `slot` < len after the push.
                unsafe { chunk.as_ptr().add(slot) }
            }
            _ => {
                let mut chunk = Vec::with_capacity(CHUNK_CAPACITY);
                chunk.push(value);
                let ptr = chunk.as_ptr();
                // Moving the Vec header into `chunks` does not move its buffer.
                chunks.push(chunk);
                ptr
            }
        };
        // Safety: the element sits in a chunk buffer that is never reallocated
        // (len never exceeds the initial capacity), never mutated through after
        // the push, and only freed when `self` is dropped.
        unsafe { &*ptr }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        let chunks = self.chunks.borrow();
        let element = chunks
            .get(index / CHUNK_CAPACITY)?
            .get(index % CHUNK_CAPACITY)?;
        let ptr: *const T = element;
        // Safety: see `push`; the address outlives the RefCell borrow.
        Some(unsafe { &*ptr })
    }

    pub fn len(&self) -> usize {
        let chunks = self.chunks.borrow();
        match chunks.last() {
            Some(last) => (chunks.len() - 1) * CHUNK_CAPACITY + last.len(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }
}

impl<T> Default for StableVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for StableVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
