//! Mark-and-sweep garbage collection for runtime objects.
//!
//! Objects live in fixed-capacity chunks and are addressed by [`Gc`] handles
//! (slot index plus generation), so a handle to a collected object can be
//! detected instead of dereferenced. An object is a root while its root count
//! is non-zero; root counts are raised and lowered by persistent handles.
//! Collection marks from the roots (plus any extra roots the caller passes)
//! and frees every unmarked slot into a pool for reuse.
//!
//! The heap never collects on its own. The runtime decides when collection is
//! safe (no script executing) and asks via [`Heap::should_collect`].

use std::fmt;

// ============================================================================
// ChunkBitmask - 256-bit bitmask for marking objects within a chunk
// ============================================================================

/// One mark bit per slot of a chunk.
#[derive(Clone, Copy, Default)]
struct ChunkBitmask {
    bits: [u64; 4],
}

impl ChunkBitmask {
    #[inline]
    fn set(&mut self, index: usize) {
        if let Some(word) = self.bits.get_mut(index >> 6) {
            *word |= 1 << (index & 63);
        }
    }

    #[inline]
    fn get(&self, index: usize) -> bool {
        self.bits
            .get(index >> 6)
            .is_some_and(|word| word & (1 << (index & 63)) != 0)
    }

    #[inline]
    fn clear(&mut self) {
        self.bits = [0; 4];
    }
}

/// Slots per chunk; matches the 256 bits of [`ChunkBitmask`].
const CHUNK_CAPACITY: usize = 256;

/// Default threshold: collect after this many net allocations.
pub const DEFAULT_GC_THRESHOLD: usize = 100;

// ============================================================================
// Gc - handle to a heap slot
// ============================================================================

/// Handle to a GC-managed object.
///
/// Copyable and free to hold; it does not keep the object alive. Only roots
/// do that. A handle whose object has been collected resolves to `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Gc {
    index: u32,
    generation: u32,
}

impl Gc {
    /// Slot index (stable for the lifetime of the object).
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn ptr_eq(a: Gc, b: Gc) -> bool {
        a == b
    }

    fn chunk(self) -> usize {
        self.index as usize / CHUNK_CAPACITY
    }

    fn slot(self) -> usize {
        self.index as usize % CHUNK_CAPACITY
    }
}

impl fmt::Debug for Gc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({}v{})", self.index, self.generation)
    }
}

// ============================================================================
// Traceable trait - for discovering object references
// ============================================================================

/// Types stored in a [`Heap`] report the handles they hold so the mark phase
/// can follow them.
pub trait Traceable {
    fn trace<F: FnMut(Gc)>(&self, visitor: F);
}

// ============================================================================
// Heap
// ============================================================================

struct Slot<T> {
    generation: u32,
    roots: u32,
    data: Option<T>,
}

struct Chunk<T> {
    slots: Vec<Slot<T>>,
    marks: ChunkBitmask,
}

/// Chunked object arena with root counting and mark-and-sweep collection.
pub struct Heap<T: Traceable> {
    chunks: Vec<Chunk<T>>,
    /// Freed slot indices, reused before new slots are created.
    free_list: Vec<u32>,
    /// Mark stack kept between cycles to reuse its capacity.
    mark_stack: Vec<Gc>,
    net_allocs: usize,
    gc_threshold: usize,
}

impl<T: Traceable> Heap<T> {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_GC_THRESHOLD)
    }

    pub fn with_threshold(gc_threshold: usize) -> Self {
        Self {
            chunks: Vec::new(),
            free_list: Vec::new(),
            mark_stack: Vec::new(),
            net_allocs: 0,
            gc_threshold,
        }
    }

    /// Allocate a new object. The object starts unrooted.
    pub fn alloc(&mut self, data: T) -> Gc {
        self.net_allocs += 1;

        if let Some(index) = self.free_list.pop() {
            let gc = Gc {
                index,
                generation: 0,
            };
            if let Some(slot) = self.slot_mut(gc) {
                slot.data = Some(data);
                slot.roots = 0;
                return Gc {
                    index,
                    generation: slot.generation,
                };
            }
            return gc;
        }

        let need_new_chunk = self
            .chunks
            .last()
            .is_none_or(|chunk| chunk.slots.len() >= CHUNK_CAPACITY);
        if need_new_chunk {
            self.chunks.push(Chunk {
                slots: Vec::with_capacity(CHUNK_CAPACITY),
                marks: ChunkBitmask::default(),
            });
        }

        let chunk_idx = self.chunks.len().saturating_sub(1);
        let mut index = 0;
        if let Some(chunk) = self.chunks.last_mut() {
            index = (chunk_idx * CHUNK_CAPACITY + chunk.slots.len()) as u32;
            chunk.slots.push(Slot {
                generation: 0,
                roots: 0,
                data: Some(data),
            });
        }
        Gc {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, gc: Gc) -> Option<&T> {
        let slot = self.chunks.get(gc.chunk())?.slots.get(gc.slot())?;
        if slot.generation != gc.generation {
            return None;
        }
        slot.data.as_ref()
    }

    pub fn get_mut(&mut self, gc: Gc) -> Option<&mut T> {
        let slot = self.slot_mut(gc)?;
        if slot.generation != gc.generation {
            return None;
        }
        slot.data.as_mut()
    }

    pub fn contains(&self, gc: Gc) -> bool {
        self.get(gc).is_some()
    }

    /// Add a root reference to `gc`. Returns false if the object is gone.
    pub fn root(&mut self, gc: Gc) -> bool {
        match self.live_slot_mut(gc) {
            Some(slot) => {
                slot.roots += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one root reference from `gc`.
    pub fn unroot(&mut self, gc: Gc) {
        if let Some(slot) = self.live_slot_mut(gc) {
            slot.roots = slot.roots.saturating_sub(1);
        }
    }

    pub fn root_count(&self, gc: Gc) -> u32 {
        self.chunks
            .get(gc.chunk())
            .and_then(|chunk| chunk.slots.get(gc.slot()))
            .filter(|slot| slot.generation == gc.generation && slot.data.is_some())
            .map_or(0, |slot| slot.roots)
    }

    /// True once net allocations since the last cycle reach the threshold.
    pub fn should_collect(&self) -> bool {
        self.gc_threshold > 0 && self.net_allocs >= self.gc_threshold
    }

    /// Set the GC threshold (0 = never request collection)
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.gc_threshold = threshold;
    }

    /// Run a full mark-and-sweep cycle. Returns the number of objects freed.
    pub fn collect(&mut self, extra_roots: impl IntoIterator<Item = Gc>) -> usize {
        self.mark(extra_roots);
        let collected = self.sweep();
        self.net_allocs = 0;
        collected
    }

    pub fn stats(&self) -> GcStats {
        let total_objects: usize = self.chunks.iter().map(|c| c.slots.len()).sum();
        let rooted_objects = self
            .chunks
            .iter()
            .flat_map(|c| c.slots.iter())
            .filter(|s| s.data.is_some() && s.roots > 0)
            .count();
        GcStats {
            total_objects,
            pooled_objects: self.free_list.len(),
            live_objects: total_objects - self.free_list.len(),
            rooted_objects,
        }
    }

    fn slot_mut(&mut self, gc: Gc) -> Option<&mut Slot<T>> {
        self.chunks.get_mut(gc.chunk())?.slots.get_mut(gc.slot())
    }

    fn live_slot_mut(&mut self, gc: Gc) -> Option<&mut Slot<T>> {
        self.slot_mut(gc)
            .filter(|slot| slot.generation == gc.generation && slot.data.is_some())
    }

    /// Mark phase: trace from roots to find all reachable objects
    fn mark(&mut self, extra_roots: impl IntoIterator<Item = Gc>) {
        for chunk in &mut self.chunks {
            chunk.marks.clear();
        }

        let mut stack = std::mem::take(&mut self.mark_stack);
        stack.clear();
        stack.extend(extra_roots);

        for (chunk_idx, chunk) in self.chunks.iter().enumerate() {
            for (slot_idx, slot) in chunk.slots.iter().enumerate() {
                if slot.data.is_some() && slot.roots > 0 {
                    stack.push(Gc {
                        index: (chunk_idx * CHUNK_CAPACITY + slot_idx) as u32,
                        generation: slot.generation,
                    });
                }
            }
        }

        // Iterative so deep object chains cannot overflow the native stack.
        while let Some(gc) = stack.pop() {
            let Some(chunk) = self.chunks.get_mut(gc.chunk()) else {
                continue;
            };
            if chunk.marks.get(gc.slot()) {
                continue;
            }
            let Some(slot) = chunk.slots.get(gc.slot()) else {
                continue;
            };
            if slot.generation != gc.generation {
                continue;
            }
            let Some(data) = slot.data.as_ref() else {
                continue;
            };
            data.trace(|child| stack.push(child));
            chunk.marks.set(gc.slot());
        }

        self.mark_stack = stack;
    }

    /// Sweep phase: free every unmarked live slot.
    fn sweep(&mut self) -> usize {
        let mut collected = 0;
        for (chunk_idx, chunk) in self.chunks.iter_mut().enumerate() {
            let marks = chunk.marks;
            for (slot_idx, slot) in chunk.slots.iter_mut().enumerate() {
                if slot.data.is_some() && !marks.get(slot_idx) {
                    slot.data = None;
                    slot.roots = 0;
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free_list
                        .push((chunk_idx * CHUNK_CAPACITY + slot_idx) as u32);
                    collected += 1;
                }
            }
        }
        collected
    }
}

impl<T: Traceable> Default for Heap<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// GcStats - statistics about the GC
// ============================================================================

/// Statistics about the garbage collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Total number of slots (including pooled)
    pub total_objects: usize,
    /// Number of freed slots waiting for reuse
    pub pooled_objects: usize,
    /// Number of live objects
    pub live_objects: usize,
    /// Number of live objects with a non-zero root count
    pub rooted_objects: usize,
}

// ============================================================================
// Tests
// ============================================================================
