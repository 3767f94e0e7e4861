use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};
use std::sync::OnceLock;

// Stand-ins for the strict-provenance pointer methods, which are not yet
// stable on this crate's minimum toolchain.
pub trait PointerExt: Sized {
    // The numeric address of this pointer.
    fn addr(self) -> usize;

    // Rebuilds the pointer with a transformed address.
    fn map_addr(self, f: impl FnOnce(usize) -> usize) -> Self;
}

impl<T> PointerExt for *mut T {
    #[inline(always)]
    fn addr(self) -> usize {
        self as usize
    }

    #[inline(always)]
    fn map_addr(self, f: impl FnOnce(usize) -> usize) -> Self {
        f(self.addr()) as Self
    }
}

// A pointer that reserves its low bits for state.
//
// `raw` is the word exactly as stored in the table; `ptr` has the state
// bits cleared and is the only half that may be dereferenced.
pub struct Tagged<T> {
    pub raw: *mut T,
    pub ptr: *mut T,
}

impl<T> Tagged<T> {
    // Splits a stored word into its two halves, treating the bits of
    // `mask` as state.
    #[inline]
    pub fn split(raw: *mut T, mask: usize) -> Tagged<T> {
        Tagged {
            raw,
            ptr: raw.map_addr(|addr| addr & !mask),
        }
    }

    // Wraps a pointer that carries no state bits.
    #[inline]
    pub fn plain(ptr: *mut T) -> Tagged<T> {
        Tagged { raw: ptr, ptr }
    }

    // The state bits of this pointer.
    //
    // The two halves differ exactly in the bits that were masked off, so
    // no mask is needed here.
    #[inline]
    pub fn tag(self) -> usize {
        self.raw.addr() ^ self.ptr.addr()
    }

    // Returns this pointer with additional state bits set.
    #[inline]
    pub fn with_tag(self, bits: usize) -> Tagged<T> {
        Tagged {
            raw: self.raw.map_addr(|addr| addr | bits),
            ptr: self.ptr,
        }
    }
}

impl<T> Copy for Tagged<T> {}

impl<T> Clone for Tagged<T> {
    fn clone(&self) -> Self {
        *self
    }
}

/// Pads and aligns a value to the length of a cache line.
// Source: https://github.com/crossbeam-rs/crossbeam/blob/master/crossbeam-utils/src/cache_padded.rs#L63.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
#[cfg_attr(
    any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
    ),
    repr(align(128))
)]
#[cfg_attr(
    any(
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "riscv64",
    ),
    repr(align(32))
)]
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(
    not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
        target_arch = "arm",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "riscv64",
        target_arch = "s390x",
    )),
    repr(align(64))
)]
pub struct CachePadded<T> {
    pub value: T,
}

// A sharded atomic counter.
//
// Sharding the length counter is extremely important, as a single point
// of contention for insertions and deletions significantly degrades
// concurrent performance.
pub struct Counter(Box<[CachePadded<AtomicIsize>]>);

impl Default for Counter {
    fn default() -> Counter {
        // `available_parallelism` is quite slow (microseconds).
        static CPUS: OnceLock<usize> = OnceLock::new();
        let num_cpus = *CPUS.get_or_init(|| {
            std::thread::available_parallelism()
                .map(Into::into)
                .unwrap_or(1)
        });

        // Round up to the next power-of-two for fast modulo.
        let shards = (0..num_cpus.next_power_of_two())
            .map(|_| Default::default())
            .collect();

        Counter(shards)
    }
}

impl Counter {
    // Return the shard for the given thread ID.
    #[inline]
    pub fn get(&self, guard: &impl seize::Guard) -> &AtomicIsize {
        // Guard thread IDs are essentially perfectly sharded due to
        // the internal thread ID allocator, which makes contention
        // very unlikely even with the exact number of shards as CPUs.
        let shard = guard.thread_id() & (self.0.len() - 1);

        &self.0[shard].value
    }

    // Returns the sum of all counter shards.
    #[inline]
    pub fn sum(&self) -> usize {
        self.0
            .iter()
            .map(|x| x.value.load(Ordering::Relaxed))
            .sum::<isize>()
            .try_into()
            // Depending on the order of deletions and insertions this might
            // be transiently negative, in which case the map is empty.
            .unwrap_or(0)
    }
}

/// A simple lock-free, append-only, stack of pointers.
///
/// This stack is used to defer the reclamation of entries that were mirrored
/// into a successor table but may still be reachable through the table they
/// were copied from.
pub struct Stack<T> {
    head: AtomicPtr<Node<T>>,
}

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

impl<T> Stack<T> {
    /// Create a new `Stack`.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Add an entry to the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        // Splice the node in at the head, retrying on contention. All of
        // the orderings are `Relaxed`: the stack is only ever read through
        // `&mut self`, and whatever handed out that exclusive reference
        // already synchronized with every push.
        loop {
            let head = self.head.load(Ordering::Relaxed);

            // Chain the rest of the stack behind the new node.
            unsafe { (*node).next = head }

            if self
                .head
                .compare_exchange(head, node, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Drain all elements from the stack.
    pub fn drain(&mut self, mut f: impl FnMut(T)) {
        let mut head = *self.head.get_mut();
        *self.head.get_mut() = ptr::null_mut();

        while !head.is_null() {
            // Safety: We have `&mut self` and the node is non-null.
            let owned_head = unsafe { Box::from_raw(head) };

            // Drain the element.
            f(owned_head.value);

            // Continue iterating over the stack.
            head = owned_head.next;
        }
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}
