//! Typed memory allocator
//!
//! spec.md:128 requires [`Topology::dup`] to "allocate via the target's
//! TMA" rather than simply cloning. The original's TMA
//! (`struct hwloc_tma`/`hwloc_tma_malloc`, `examples/original_source/hwloc/cpukinds.c:40-44`)
//! is a tiny allocator-table struct carrying a `dont_free` flag: when set,
//! the duplicate's arena outlives the `Topology` that built it and its
//! owner (not `Drop`) is responsible for releasing it. [`Tma`] is that
//! seam; [`ObjectArena`] is what actually stores objects, either in a plain
//! `Vec` (every build/restrict/merge path) or in a [`TmaBlock`] (the one
//! arena [`Topology::dup`] produces).

use crate::{error::Error, object::ObjectData};
use std::{
    alloc::Layout,
    fmt,
    ptr::NonNull,
    sync::Arc,
};

/// A pluggable allocator for duplicated topology arenas
///
/// Implementations must hand back zeroed, correctly aligned storage for
/// `ObjectData`, and agree with their own [`Tma::dont_free`] answer: if it
/// ever returns `true`, [`Tma::free`] must not release the block (someone
/// else owns its lifetime), and [`TmaBlock`] will also skip running the
/// elements' destructors since their backing allocation no longer belongs
/// to this process's allocator bookkeeping.
pub trait Tma: Send + Sync {
    /// Allocate `len` zeroed slots, or `None` on allocation failure
    fn calloc(&self, len: usize) -> Option<NonNull<ObjectData>>;

    /// Release a block this allocator produced via [`Tma::calloc`]
    fn free(&self, ptr: NonNull<ObjectData>, len: usize);

    /// Whether blocks from this allocator are ever actually freed
    fn dont_free(&self) -> bool {
        false
    }
}

/// The default allocator: Rust's global allocator, always freed on drop
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTma;

impl Tma for DefaultTma {
    fn calloc(&self, len: usize) -> Option<NonNull<ObjectData>> {
        alloc_zeroed_block(len)
    }

    fn free(&self, ptr: NonNull<ObjectData>, len: usize) {
        if len == 0 {
            return;
        }
        let layout = Layout::array::<ObjectData>(len).expect("layout matches the one used to allocate");
        unsafe { std::alloc::dealloc(ptr.as_ptr().cast(), layout) };
    }
}

/// A `libc` `calloc`/`free`-backed allocator
///
/// [`MallocTma::leaking`] builds one whose blocks are never released by
/// this process: the destination arena is handed off to something else
/// (matching spec.md:128's `dont_free` case), and [`TmaBlock::drop`]
/// correspondingly skips both the elements' destructors and the call to
/// [`Tma::free`] so nothing still reachable through the handed-off memory
/// is torn down twice.
#[derive(Debug, Clone, Copy)]
pub struct MallocTma {
    dont_free: bool,
}

impl MallocTma {
    pub fn new() -> Self {
        Self { dont_free: false }
    }

    pub fn leaking() -> Self {
        Self { dont_free: true }
    }
}

impl Default for MallocTma {
    fn default() -> Self {
        Self::new()
    }
}

impl Tma for MallocTma {
    fn calloc(&self, len: usize) -> Option<NonNull<ObjectData>> {
        if len == 0 {
            return Some(NonNull::dangling());
        }
        let _layout = Layout::array::<ObjectData>(len).ok()?;
        let raw = unsafe { libc::calloc(len, std::mem::size_of::<ObjectData>()) } as *mut ObjectData;
        NonNull::new(raw)
    }

    fn free(&self, ptr: NonNull<ObjectData>, len: usize) {
        if self.dont_free || len == 0 {
            return;
        }
        unsafe { libc::free(ptr.as_ptr().cast()) };
    }

    fn dont_free(&self) -> bool {
        self.dont_free
    }
}

fn alloc_zeroed_block(len: usize) -> Option<NonNull<ObjectData>> {
    if len == 0 {
        return Some(NonNull::dangling());
    }
    let layout = Layout::array::<ObjectData>(len).ok()?;
    let raw = unsafe { std::alloc::alloc_zeroed(layout) } as *mut ObjectData;
    NonNull::new(raw)
}

/// Raw, TMA-owned storage for an object arena
///
/// Unlike a `Vec<ObjectData>`, this block's memory was not necessarily
/// obtained from the global allocator, so it cannot be wrapped in a `Vec`
/// (whose `Drop` always calls the global allocator's `dealloc`): it needs
/// its own `Drop` that calls back into the [`Tma`] that produced it.
pub(crate) struct TmaBlock {
    ptr: NonNull<ObjectData>,
    len: usize,
    tma: Arc<dyn Tma>,
}

impl TmaBlock {
    /// Move every element of `source` into a block fresh from `tma`
    pub(crate) fn from_vec(mut source: Vec<ObjectData>, tma: Arc<dyn Tma>) -> Result<Self, Error> {
        let len = source.len();
        let ptr = tma.calloc(len).ok_or(Error::NoMem)?;
        for (offset, item) in source.drain(..).enumerate() {
            // SAFETY: `ptr` has room for `len` elements and `offset < len`;
            // the slot holds allocator-zeroed bytes, not a live `ObjectData`,
            // so this initializes rather than overwrites-and-drops.
            unsafe { ptr.as_ptr().add(offset).write(item) };
        }
        Ok(Self { ptr, len, tma })
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[ObjectData] {
        // SAFETY: `ptr` was written for exactly `self.len` elements and
        // nothing else aliases this block while it's alive.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [ObjectData] {
        // SAFETY: as above, and `&mut self` rules out aliasing.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for TmaBlock {
    fn drop(&mut self) {
        if !self.tma.dont_free() {
            for offset in 0..self.len {
                // SAFETY: every slot in `0..self.len` was initialized by
                // `from_vec` and is dropped at most once, here.
                unsafe { std::ptr::drop_in_place(self.ptr.as_ptr().add(offset)) };
            }
        }
        self.tma.free(self.ptr, self.len);
    }
}

impl fmt::Debug for TmaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TmaBlock").field("len", &self.len).finish()
    }
}

// SAFETY: a `TmaBlock` exclusively owns its elements the same way a
// `Vec<ObjectData>` does; `Topology` never exposes shared access to two
// handles on the same block.
unsafe impl Send for TmaBlock {}
unsafe impl Sync for TmaBlock {}

/// Storage backing a topology's object arena
///
/// `Heap` is what every build/filter/restrict path produces; `Tma` is
/// produced only by [`Topology::dup`](crate::topology::Topology::dup),
/// whose allocation spec.md:128 routes through the target's TMA instead of
/// the ordinary global allocator.
pub(crate) enum ObjectArena {
    Heap(Vec<ObjectData>),
    Tma(TmaBlock),
}

impl ObjectArena {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Heap(v) => v.len(),
            Self::Tma(b) => b.len(),
        }
    }

    pub(crate) fn as_slice(&self) -> &[ObjectData] {
        match self {
            Self::Heap(v) => v.as_slice(),
            Self::Tma(b) => b.as_slice(),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [ObjectData] {
        match self {
            Self::Heap(v) => v.as_mut_slice(),
            Self::Tma(b) => b.as_mut_slice(),
        }
    }

    pub(crate) fn iter(&self) -> std::slice::Iter<'_, ObjectData> {
        self.as_slice().iter()
    }

    pub(crate) fn to_vec(&self) -> Vec<ObjectData> {
        self.as_slice().to_vec()
    }

    /// Append a new object
    ///
    /// Only ever called by [`crate::topology::Topology::allocate`] during
    /// discovery, which always runs on a freshly built (`Heap`-backed)
    /// topology, never on a [`Topology::dup`] result.
    pub(crate) fn push(&mut self, data: ObjectData) {
        match self {
            Self::Heap(v) => v.push(data),
            Self::Tma(_) => unreachable!("a TMA-backed arena is never grown after dup"),
        }
    }
}

impl std::ops::Index<usize> for ObjectArena {
    type Output = ObjectData;

    fn index(&self, index: usize) -> &ObjectData {
        &self.as_slice()[index]
    }
}

impl std::ops::IndexMut<usize> for ObjectArena {
    fn index_mut(&mut self, index: usize) -> &mut ObjectData {
        &mut self.as_mut_slice()[index]
    }
}

impl fmt::Debug for ObjectArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectArena").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::types::ObjectType;

    #[test]
    fn tma_block_round_trips_elements() {
        let source = vec![
            ObjectData::new(ObjectType::Machine, 0, 0, 0),
            ObjectData::new(ObjectType::Package, 1, 0, 1),
        ];
        let block = TmaBlock::from_vec(source.clone(), Arc::new(DefaultTma)).unwrap();
        assert_eq!(block.as_slice().len(), 2);
        assert_eq!(block.as_slice()[1].object_type, ObjectType::Package);
    }

    #[test]
    fn leaking_malloc_tma_skips_free_and_drop() {
        let tma = MallocTma::leaking();
        assert!(tma.dont_free());
        let ptr = tma.calloc(4).unwrap();
        // A leaking TMA's `free` must be a deliberate no-op, not a crash.
        tma.free(ptr, 4);
    }

    #[test]
    fn empty_arena_allocates_a_dangling_but_valid_block() {
        let block = TmaBlock::from_vec(Vec::new(), Arc::new(DefaultTma)).unwrap();
        assert_eq!(block.len(), 0);
        assert!(block.as_slice().is_empty());
    }
}
