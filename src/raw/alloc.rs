use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::probe;
use super::utils::{Counter, Stack};

// A hash table laid out in a single allocation.
//
// Note that the type of the entries is erased, the table is accessed
// through the typed `Table` handle.
#[repr(transparent)]
pub struct RawTable(u8);

// The table allocation's layout.
//
// The hash and entry arrays trail the header, at offsets computed from
// the capacity.
#[repr(C)]
struct TableLayout<T> {
    mask: usize,
    limit: usize,
    state: State<T>,
    hashes: [AtomicU32; 0],
    entries: [AtomicPtr<T>; 0],
}

/// Resize bookkeeping for a table.
pub struct State<T> {
    /// The successor table, set once a resize has been initiated.
    pub next: AtomicPtr<RawTable>,

    /// The number of threads racing to allocate the successor table.
    pub resizers: AtomicU32,

    /// The next chunk of slots to be claimed by a copying thread.
    pub copy_idx: AtomicUsize,

    /// The number of slots whose migration has completed.
    pub copy_done: AtomicUsize,

    /// Approximate number of claimed slots, whether live, tombstone,
    /// or with an in-flight first write.
    pub slots: AtomicUsize,

    /// Approximate number of live entries.
    ///
    /// The counter is shared with the successor table so that the count
    /// survives a resize without a reconciliation pass.
    pub size: Arc<Counter>,

    /// The live count observed when this table was allocated, used to
    /// detect a thrashing resize.
    pub prev_size: usize,

    /// Entries whose retirement has been deferred by successor tables.
    pub deferred: Stack<*mut T>,
}

// Manages a table allocation.
#[repr(C)]
pub struct Table<T> {
    // The raw table pointer.
    pub raw: *mut RawTable,
    // A mask to get an index into the table.
    pub mask: usize,
    // The maximum probe length for this table.
    pub limit: usize,
    _t: PhantomData<T>,
}

impl<T> Copy for Table<T> {}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Table<T> {
    /// Allocate a table with the given capacity, sharing the given
    /// live-entry counter.
    ///
    /// The capacity must be a non-zero power of two.
    pub fn alloc(capacity: usize, size: Arc<Counter>, prev_size: usize) -> Table<T> {
        debug_assert!(capacity.is_power_of_two());

        let layout = Self::layout(capacity);

        unsafe {
            // Note that the hash array must start out zeroed, and the entry
            // array must start out null.
            let ptr = alloc::alloc_zeroed(layout);

            if ptr.is_null() {
                alloc::handle_alloc_error(layout);
            }

            // Write the table header.
            ptr.cast::<TableLayout<T>>().write(TableLayout {
                mask: capacity - 1,
                limit: probe::limit(capacity),
                state: State {
                    next: AtomicPtr::new(ptr::null_mut()),
                    resizers: AtomicU32::new(0),
                    copy_idx: AtomicUsize::new(0),
                    copy_done: AtomicUsize::new(0),
                    slots: AtomicUsize::new(0),
                    size,
                    prev_size,
                    deferred: Stack::new(),
                },
                hashes: [],
                entries: [],
            });

            Table {
                raw: ptr.cast::<RawTable>(),
                mask: capacity - 1,
                limit: probe::limit(capacity),
                _t: PhantomData,
            }
        }
    }

    /// Creates a `Table` handle from a raw table pointer.
    ///
    /// # Safety
    ///
    /// The pointer must have been returned by `Table::alloc` and not
    /// have been deallocated.
    #[inline]
    pub unsafe fn from_raw(raw: *mut RawTable) -> Table<T> {
        let layout = unsafe { &*raw.cast::<TableLayout<T>>() };

        Table {
            raw,
            mask: layout.mask,
            limit: layout.limit,
            _t: PhantomData,
        }
    }

    /// The number of slots in this table.
    #[inline]
    pub fn len(&self) -> usize {
        self.mask + 1
    }

    /// Returns the hash word for the slot at the given index.
    ///
    /// # Safety
    ///
    /// The index must be in-bounds for the table length.
    #[inline]
    pub unsafe fn hash(&self, i: usize) -> &AtomicU32 {
        debug_assert!(i < self.len());

        // Safety: The caller guarantees the index is in-bounds.
        unsafe {
            &*self
                .raw
                .cast::<u8>()
                .add(Self::hashes_offset() + i * mem::size_of::<AtomicU32>())
                .cast::<AtomicU32>()
        }
    }

    /// Returns the entry pointer for the slot at the given index.
    ///
    /// # Safety
    ///
    /// The index must be in-bounds for the table length.
    #[inline]
    pub unsafe fn entry(&self, i: usize) -> &AtomicPtr<T> {
        debug_assert!(i < self.len());

        // Safety: The caller guarantees the index is in-bounds.
        unsafe {
            &*self
                .raw
                .cast::<u8>()
                .add(Self::entries_offset(self.len()) + i * mem::size_of::<AtomicPtr<T>>())
                .cast::<AtomicPtr<T>>()
        }
    }

    /// Returns a reference to the table's resize state.
    #[inline]
    pub fn state(&self) -> &State<T> {
        unsafe { &(*self.raw.cast::<TableLayout<T>>()).state }
    }

    /// Returns a mutable reference to the table's resize state.
    #[inline]
    pub fn state_mut(&mut self) -> &mut State<T> {
        unsafe { &mut (*self.raw.cast::<TableLayout<T>>()).state }
    }

    /// Returns a handle to the successor table, if one has been installed.
    #[inline]
    pub fn next_table(&self) -> Option<Table<T>> {
        let next = self.state().next.load(Ordering::Acquire);

        if next.is_null() {
            return None;
        }

        // Safety: Successor pointers are only ever set to valid allocations,
        // and live at least as long as this table is reachable.
        Some(unsafe { Table::from_raw(next) })
    }

    /// Deallocate the table.
    ///
    /// # Safety
    ///
    /// The table must not be accessed after this call. Note that this does
    /// not drop any entries, nor drain the deferred retirement stack.
    pub unsafe fn dealloc(table: Table<T>) {
        let layout = Self::layout(table.len());

        unsafe {
            // Drop the header, releasing our reference to the shared counter.
            ptr::drop_in_place(table.raw.cast::<TableLayout<T>>());
            alloc::dealloc(table.raw.cast::<u8>(), layout)
        }
    }

    // The offset of the hash array in a table allocation.
    #[inline]
    const fn hashes_offset() -> usize {
        mem::size_of::<TableLayout<T>>()
    }

    // The offset of the entry array in a table allocation, padded to
    // fulfill the alignment of an entry pointer.
    #[inline]
    fn entries_offset(capacity: usize) -> usize {
        let align = mem::align_of::<AtomicPtr<T>>();
        (Self::hashes_offset() + capacity * mem::size_of::<AtomicU32>() + align - 1) & !(align - 1)
    }

    // Returns the layout of a table allocation.
    #[inline]
    fn layout(capacity: usize) -> Layout {
        let size = Self::entries_offset(capacity) + capacity * mem::size_of::<AtomicPtr<T>>();
        Layout::from_size_align(size, mem::align_of::<TableLayout<T>>()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        unsafe {
            let table: Table<u8> = Table::alloc(4, Arc::new(Counter::default()), 0);
            let table: Table<u8> = Table::from_raw(table.raw);
            assert_eq!(table.len(), 4);
            assert_eq!(table.mask, 3);
            assert_eq!(table.limit, 4);

            for i in 0..4 {
                assert_eq!(table.hash(i).load(Ordering::Relaxed), 0);
                assert!(table.entry(i).load(Ordering::Relaxed).is_null());
            }

            Table::dealloc(table);
        }
    }
}
