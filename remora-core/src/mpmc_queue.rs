use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::thread;

const CHUNK_SIZE: usize = 64;

// One storage cell of a chunk. The occupancy flag publishes the value: a
// producer constructs into `value` and then stores `occupied = true` with
// release ordering; a consumer observes the flag with acquire ordering
// before reading the cell.
//
struct Slot<T> {
    occupied: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Chunk<T> {
    next: AtomicPtr<Chunk<T>>,
    push_index: AtomicUsize,
    pop_index: AtomicUsize,
    active_readers: AtomicUsize,
    retired: AtomicBool,
    slots: Box<[Slot<T>]>,
}

impl<T> Chunk<T> {
    fn new() -> Self {
        let slots = (0..CHUNK_SIZE)
            .map(|_| Slot {
                occupied: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Chunk {
            next: AtomicPtr::new(ptr::null_mut()),
            push_index: AtomicUsize::new(0),
            pop_index: AtomicUsize::new(0),
            active_readers: AtomicUsize::new(0),
            retired: AtomicBool::new(false),
            slots,
        }
    }
}

/// A lock-free multi-producer/multi-consumer FIFO of owned values.
///
/// The queue is a singly linked list of fixed-size chunks. Producers reserve
/// a slot by fetch-adding the chunk-local `push_index` and construct in
/// place; when a chunk overflows they race to CAS a fresh chunk onto the
/// tail. Consumers reserve with a CAS on `pop_index`; the consumer that
/// drains a chunk advances the global head and retires it. Retirement defers
/// recycling until `active_readers` (held across the reservation-to-read
/// window) drops to zero, then parks the chunk on a per-queue free list —
/// chunk memory is reused, never freed, until the queue is dropped.
///
/// Ordering: per producer, values are popped in push order; across
/// producers, the order is the interleaving of their `push_index`
/// reservations. The release/acquire pair on the occupancy flag gives
/// `push` → `pop` a happens-before edge.
///
pub struct MpmcQueue<T> {
    head: AtomicPtr<Chunk<T>>,
    tail: AtomicPtr<Chunk<T>>,
    free_list: AtomicPtr<Chunk<T>>,
}

// SAFETY: values cross threads by ownership transfer through the slots; all
// shared queue state is accessed through atomics.
//
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    pub fn new() -> Self {
        let initial = Box::into_raw(Box::new(Chunk::new()));

        MpmcQueue {
            head: AtomicPtr::new(initial),
            tail: AtomicPtr::new(initial),
            free_list: AtomicPtr::new(ptr::null_mut()),
        }
    }

    // Enqueues a value. Returns false only on unrecoverable allocation
    // failure (which in practice aborts the process before this reports).
    //
    pub fn push(&self, value: T) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let tail_ref = unsafe { &*tail };
            let index = tail_ref.push_index.fetch_add(1, Ordering::Relaxed);

            if index < tail_ref.slots.len() {
                let slot = &tail_ref.slots[index];
                if !slot.occupied.load(Ordering::Acquire) {
                    // SAFETY: the fetch_add above made this thread the sole
                    // owner of the reserved slot.
                    //
                    unsafe { (*slot.value.get()).write(value) };
                    slot.occupied.store(true, Ordering::Release);
                    return true;
                }
                // A straggling reader from a previous cycle of this chunk
                // still holds the slot; abandon the index and retry.
                //
                continue;
            }

            // Chunk overflow: race to link a fresh chunk onto the tail.
            //
            let new_chunk = self.allocate_chunk();
            match tail_ref.next.compare_exchange(
                ptr::null_mut(),
                new_chunk,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.tail.store(new_chunk, Ordering::Release);
                }
                Err(current) => {
                    // Another producer linked first; hand ours back and help
                    // the tail forward.
                    //
                    self.release_chunk(new_chunk);
                    if !current.is_null() {
                        let _ = self.tail.compare_exchange(
                            tail,
                            current,
                            Ordering::Release,
                            Ordering::Relaxed,
                        );
                    }
                }
            }
        }
    }

    // Dequeues a value, or `None` when the queue is empty.
    //
    pub fn pop(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let head_ref = unsafe { &*head };
            let index = head_ref.pop_index.load(Ordering::Acquire);
            let push_index = head_ref.push_index.load(Ordering::Acquire);

            if index >= head_ref.slots.len() {
                // Chunk fully consumed; advance the head and retire it.
                //
                let next = head_ref.next.load(Ordering::Acquire);
                if next.is_null() {
                    return None;
                }
                if self
                    .head
                    .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    self.retire_chunk(head);
                }
                continue;
            }

            if index >= push_index {
                // No published values in this chunk. If producers have moved
                // on, follow them; otherwise the queue is empty.
                //
                let next = head_ref.next.load(Ordering::Acquire);
                if next.is_null() {
                    return None;
                }
                if self
                    .head
                    .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    self.retire_chunk(head);
                }
                continue;
            }

            if head_ref
                .pop_index
                .compare_exchange_weak(index, index + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            // Reserved. Hold the reader count so the chunk cannot be
            // recycled between reservation and consumption.
            //
            head_ref.active_readers.fetch_add(1, Ordering::Acquire);

            let slot = &head_ref.slots[index];
            while !slot.occupied.load(Ordering::Acquire) {
                // The producer reserved this slot but has not published yet.
                //
                thread::yield_now();
            }

            // SAFETY: the pop_index CAS made this thread the sole consumer
            // of the slot, and the occupied flag was observed with acquire
            // ordering after the producer's release store.
            //
            let value = unsafe { (*slot.value.get()).assume_init_read() };
            slot.occupied.store(false, Ordering::Release);

            head_ref.active_readers.fetch_sub(1, Ordering::Release);
            self.try_release_chunk(head);

            return Some(value);
        }
    }

    /// Approximate emptiness check. Exact only in quiescent states; callers
    /// use it as a hint (the reactor shortcuts its poll timeout with it).
    ///
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let head_ref = unsafe { &*head };
        let pop_index = head_ref.pop_index.load(Ordering::Acquire);
        let push_index = head_ref.push_index.load(Ordering::Acquire);

        pop_index >= push_index.min(head_ref.slots.len())
            && head_ref.next.load(Ordering::Acquire).is_null()
    }

    fn allocate_chunk(&self) -> *mut Chunk<T> {
        // Reuse a parked chunk if one is available.
        //
        let mut chunk = self.free_list.load(Ordering::Acquire);
        while !chunk.is_null() {
            let next = unsafe { (*chunk).next.load(Ordering::Relaxed) };
            match self.free_list.compare_exchange_weak(
                chunk,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    let chunk_ref = unsafe { &*chunk };
                    chunk_ref.push_index.store(0, Ordering::Relaxed);
                    chunk_ref.pop_index.store(0, Ordering::Relaxed);
                    chunk_ref.next.store(ptr::null_mut(), Ordering::Relaxed);
                    chunk_ref.active_readers.store(0, Ordering::Relaxed);
                    chunk_ref.retired.store(false, Ordering::Relaxed);
                    return chunk;
                }
                Err(current) => chunk = current,
            }
        }

        Box::into_raw(Box::new(Chunk::new()))
    }

    fn release_chunk(&self, chunk: *mut Chunk<T>) {
        let mut old_head = self.free_list.load(Ordering::Acquire);
        loop {
            unsafe { (*chunk).next.store(old_head, Ordering::Relaxed) };
            match self.free_list.compare_exchange_weak(
                old_head,
                chunk,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => old_head = current,
            }
        }
    }

    fn retire_chunk(&self, chunk: *mut Chunk<T>) {
        unsafe { (*chunk).retired.store(true, Ordering::Release) };
        self.try_release_chunk(chunk);
    }

    fn try_release_chunk(&self, chunk: *mut Chunk<T>) {
        let chunk_ref = unsafe { &*chunk };
        if chunk_ref.active_readers.load(Ordering::Acquire) == 0
            && chunk_ref
                .retired
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.release_chunk(chunk);
        }
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        let drop_chain = |start: *mut Chunk<T>| {
            let mut current = start;
            while !current.is_null() {
                let mut chunk = unsafe { Box::from_raw(current) };
                current = *chunk.next.get_mut();
                for slot in chunk.slots.iter_mut() {
                    if *slot.occupied.get_mut() {
                        // SAFETY: occupied slots hold initialized values no
                        // consumer will ever read.
                        //
                        unsafe { slot.value.get_mut().assume_init_drop() };
                    }
                }
            }
        };

        drop_chain(*self.head.get_mut());
        drop_chain(*self.free_list.get_mut());
    }
}
