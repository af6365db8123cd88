// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 The objvm Authors

//! Fixed-size slab allocator.
//!
//! Memory is carved into page-aligned [`Block`]s, each holding a fixed
//! number of `Object`-sized cells plus a header. Because a block is never
//! larger than one page, masking any interior pointer down to the page
//! boundary always lands on that block's own header — recovering "which
//! block owns this pointer" in O(1) without a global hash table.
//!
//! Allocation pops a recycled cell if one is free, otherwise bumps the
//! block's allocation pointer; a full block is skipped in favor of
//! allocating (and leaking, for the process lifetime — consistent with
//! "never teardown during normal operation") a fresh one. Freed cells are
//! tracked by index rather than by overlaying a link pointer on the
//! just-dropped memory, so a swept cell's bytes are never reinterpreted
//! until the next `alloc` writes a fresh `Object` into them.

use crate::object::Object;
use parking_lot::Mutex;
use std::alloc::{Layout, alloc, handle_alloc_error};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;

const PAGE_SIZE: usize = 4096;

fn cell_size() -> usize {
    // Round up to 16-byte alignment so every cell's low nibble is free for
    // Value's heap-pointer tag.
    (std::mem::size_of::<Object>() + 15) & !15
}

fn header_size() -> usize {
    (std::mem::size_of::<BlockHeader>() + 15) & !15
}

/// Header living at the start of every page-aligned block. Only the fields
/// needed to recover capacity/cell-size from a masked pointer live here;
/// occupancy bookkeeping lives in [`Block`] itself since it isn't needed by
/// the O(1) pointer-to-block recovery path.
#[repr(C, align(16))]
struct BlockHeader {
    capacity: usize,
    cell_size: usize,
}

/// One page-aligned region of cells.
pub struct Block {
    base: NonNull<u8>,
    bump: Cell<usize>,
    free_indices: RefCell<Vec<usize>>,
    occupied: RefCell<Vec<bool>>,
}

// SAFETY: a Block's contents are only ever mutated by the single running
// fiber (enforced by the scheduler's semaphore protocol) and only ever
// reached from behind `Allocator`'s Mutex.
unsafe impl Send for Block {}

impl Block {
    fn new() -> Self {
        let layout = Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).expect("valid page layout");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(ptr) else {
            // `mmap`/equivalent failure is fatal; there is no recovery path.
            handle_alloc_error(layout);
        };

        let cell_size = cell_size();
        let capacity = (PAGE_SIZE - header_size()) / cell_size;

        let header = base.as_ptr().cast::<BlockHeader>();
        // SAFETY: `header` points at freshly allocated, correctly aligned
        // and sized memory for a `BlockHeader`.
        unsafe {
            header.write(BlockHeader { capacity, cell_size });
        }

        Self {
            base,
            bump: Cell::new(0),
            free_indices: RefCell::new(Vec::new()),
            occupied: RefCell::new(Vec::new()),
        }
    }

    fn header(&self) -> &BlockHeader {
        // SAFETY: header was written in `new` and the block is never freed.
        unsafe { &*self.base.as_ptr().cast::<BlockHeader>() }
    }

    fn cell_ptr(&self, index: usize) -> *mut u8 {
        let header = self.header();
        // SAFETY: index < capacity is the caller's responsibility; the
        // result stays within the page we allocated.
        unsafe { self.base.as_ptr().add(header_size() + index * header.cell_size) }
    }

    /// Pop a recycled cell, or bump-allocate a fresh one. `None` if full.
    fn alloc_cell(&self) -> Option<*mut Object> {
        if let Some(index) = self.free_indices.borrow_mut().pop() {
            self.occupied.borrow_mut()[index] = true;
            return Some(self.cell_ptr(index).cast::<Object>());
        }

        let bump = self.bump.get();
        if bump >= self.header().capacity {
            return None;
        }
        self.bump.set(bump + 1);
        self.occupied.borrow_mut().push(true);
        Some(self.cell_ptr(bump).cast::<Object>())
    }

    /// Drop the `Object` at `ptr` and mark its slot free.
    ///
    /// # Safety
    /// `ptr` must point at a live, initialized `Object` cell that belongs
    /// to this block and was obtained from [`Block::alloc_cell`].
    unsafe fn free_cell(&self, ptr: *mut Object) {
        let index = self.index_of(ptr);
        // SAFETY: caller guarantees `ptr` is a live, block-owned cell.
        unsafe {
            std::ptr::drop_in_place(ptr);
        }
        self.occupied.borrow_mut()[index] = false;
        self.free_indices.borrow_mut().push(index);
    }

    fn index_of(&self, ptr: *mut Object) -> usize {
        let start = self.base.as_ptr() as usize + header_size();
        (ptr as usize - start) / self.header().cell_size
    }

    /// True if `ptr` falls within this block's cell region.
    fn owns(&self, ptr: *const u8) -> bool {
        let start = self.base.as_ptr() as usize;
        (start..start + PAGE_SIZE).contains(&(ptr as usize))
    }

    /// Given any interior pointer, recover the page-aligned block base in
    /// O(1) by masking — the usual page-offset trick for slab allocators.
    /// Only meaningful for pointers that actually came from a `Block`.
    #[must_use]
    pub fn base_of(ptr: *const u8) -> *const u8 {
        let masked = (ptr as usize) & !(PAGE_SIZE - 1);
        masked as *const u8
    }

    fn bump_count(&self) -> usize {
        self.bump.get()
    }

    fn is_occupied(&self, index: usize) -> bool {
        self.occupied.borrow()[index]
    }
}

/// Owns every [`Block`] the runtime has carved out so far.
pub struct Allocator {
    blocks: Mutex<Vec<Block>>,
}

impl Allocator {
    #[must_use]
    pub fn new() -> Self {
        Self { blocks: Mutex::new(Vec::new()) }
    }

    /// Allocate a cell and write `object` into it, returning the resulting
    /// pointer. Never fails — a fresh block is carved out if every existing
    /// one is full, and carving one out aborts the process on OS failure.
    pub fn alloc(&self, object: Object) -> *mut Object {
        let mut blocks = self.blocks.lock();
        for block in blocks.iter() {
            if let Some(ptr) = block.alloc_cell() {
                // SAFETY: `ptr` is freshly reserved, aligned, uninitialized
                // memory sized for an `Object`.
                unsafe { ptr.write(object) };
                return ptr;
            }
        }
        let block = Block::new();
        let ptr = block.alloc_cell().expect("freshly carved block has capacity");
        // SAFETY: see above.
        unsafe { ptr.write(object) };
        blocks.push(block);
        ptr
    }

    /// Run the object's drop glue and return the cell to its block's free
    /// list.
    ///
    /// # Safety
    /// `ptr` must have come from a previous `alloc` call on this allocator
    /// and must not still be reachable from any root or live fiber.
    pub unsafe fn free(&self, ptr: *mut Object) {
        let blocks = self.blocks.lock();
        for block in blocks.iter() {
            if block.owns(ptr.cast()) {
                // SAFETY: caller guarantees the cell is unreachable and was
                // allocated from this block.
                unsafe { block.free_cell(ptr) };
                return;
            }
        }
        debug_assert!(false, "freed pointer not owned by any block (double free?)");
    }

    /// Visit every currently occupied cell across every block — used by
    /// the GC sweep to find cells that are neither on a free list nor
    /// marked reachable.
    pub fn for_each_occupied_cell(&self, mut f: impl FnMut(*mut Object)) {
        let blocks = self.blocks.lock();
        for block in blocks.iter() {
            for i in 0..block.bump_count() {
                if block.is_occupied(i) {
                    f(block.cell_ptr(i).cast::<Object>());
                }
            }
        }
    }

    /// Number of cells currently occupied across every block. Drives the
    /// adaptive collection threshold.
    #[must_use]
    pub fn occupied_count(&self) -> usize {
        let blocks = self.blocks.lock();
        blocks.iter().map(|b| (0..b.bump_count()).filter(|&i| b.is_occupied(i)).count()).sum()
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}
