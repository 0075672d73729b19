//! Bounded message queue.
//!
//! A ring of `N` slots of a `Copy` element type, embedded in the
//! caller's allocation. Items are copied in on `send` and out on
//! `receive`; ordering is FIFO across successful sends. An internal
//! mutex serializes senders and receivers; a full (or empty) queue makes
//! the caller back off for a tick and retry until the deadline passes.

use core::cell::RefCell;

use crate::error::{KernelError, Result};
use crate::kernel;
use crate::sync::Mutex;
use crate::time::Deadline;

/// How long one attempt may wait for the internal mutex before the
/// deadline is rechecked.
const INNER_LOCK_TICKS: u32 = 10;

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

struct Ring<T: Copy, const N: usize> {
    buf: [Option<T>; N],
    head: usize,
    tail: usize,
    count: usize,
}

impl<T: Copy, const N: usize> Ring<T, N> {
    const fn new() -> Self {
        Self {
            buf: [None; N],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, item: T) -> bool {
        if self.count == N {
            return false;
        }
        self.buf[self.tail] = Some(item);
        self.tail = (self.tail + 1) % N;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.buf[self.head].take();
        self.head = (self.head + 1) % N;
        self.count -= 1;
        item
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A bounded FIFO queue of `N` items of type `T`.
pub struct Queue<T: Copy, const N: usize> {
    lock: Mutex,
    ring: critical_section::Mutex<RefCell<Ring<T, N>>>,
}

impl<T: Copy, const N: usize> Queue<T, N> {
    pub const fn new() -> Self {
        assert!(N > 0);
        Self {
            lock: Mutex::new(),
            ring: critical_section::Mutex::new(RefCell::new(Ring::new())),
        }
    }

    /// Copy `item` into the queue, waiting up to `timeout` ticks
    /// (0 = wait forever) for a free slot.
    pub fn send(&self, item: T, timeout: u32) -> Result<()> {
        let deadline = Deadline::start(timeout);
        loop {
            match self.lock.lock(INNER_LOCK_TICKS) {
                Ok(()) => {}
                Err(KernelError::Timeout) => {
                    if deadline.expired() {
                        return Err(KernelError::Timeout);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
            let sent = critical_section::with(|cs| self.ring.borrow_ref_mut(cs).push(item));
            self.lock.unlock()?;

            if sent {
                return Ok(());
            }
            if deadline.expired() {
                return Err(KernelError::Timeout);
            }
            kernel::delay(1); // full: give a receiver a tick to drain
        }
    }

    /// Copy the oldest item out of the queue, waiting up to `timeout`
    /// ticks (0 = wait forever) for one to arrive.
    pub fn receive(&self, timeout: u32) -> Result<T> {
        let deadline = Deadline::start(timeout);
        loop {
            match self.lock.lock(INNER_LOCK_TICKS) {
                Ok(()) => {}
                Err(KernelError::Timeout) => {
                    if deadline.expired() {
                        return Err(KernelError::Timeout);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }
            let item = critical_section::with(|cs| self.ring.borrow_ref_mut(cs).pop());
            self.lock.unlock()?;

            if let Some(item) = item {
                return Ok(item);
            }
            if deadline.expired() {
                return Err(KernelError::Timeout);
            }
            kernel::delay(1); // empty: give a sender a tick to produce
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.ring.borrow_ref(cs).count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: Copy, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted;
    use crate::config::PRIORITY_NORMAL;
    use crate::kernel::borrow_mut;
    use crate::testutil;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::vec::Vec;

    extern "C" fn nop_entry(_arg: usize) {}

    fn dispatch() {
        critical_section::with(|cs| borrow_mut(cs).sched.reschedule()).unwrap();
    }

    #[test]
    fn send_receive_is_fifo() {
        let _guard = testutil::fresh_kernel();
        kernel::create_task("t", nop_entry, 0, PRIORITY_NORMAL).unwrap();
        dispatch();

        let q: Queue<u32, 4> = Queue::new();
        for v in [10, 20, 30] {
            q.send(v, 0).unwrap();
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.receive(0), Ok(10));
        assert_eq!(q.receive(0), Ok(20));
        assert_eq!(q.receive(0), Ok(30));
        assert!(q.is_empty());
    }

    #[test]
    fn send_blocks_on_full_until_timeout() {
        let _guard = testutil::fresh_kernel();
        kernel::create_task("t", nop_entry, 0, PRIORITY_NORMAL).unwrap();
        dispatch();

        let q: Queue<u8, 2> = Queue::new();
        q.send(1, 0).unwrap();
        q.send(2, 0).unwrap();
        assert!(q.is_full());

        hosted::set_yield_hook(Some(|| hosted::advance_ticks(1)));
        assert_eq!(q.send(3, 3), Err(KernelError::Timeout));
        hosted::set_yield_hook(None);

        // Draining one slot lets the send through.
        assert_eq!(q.receive(0), Ok(1));
        q.send(3, 0).unwrap();
        assert_eq!(q.receive(0), Ok(2));
        assert_eq!(q.receive(0), Ok(3));
    }

    #[test]
    fn receive_times_out_on_empty() {
        let _guard = testutil::fresh_kernel();
        kernel::create_task("t", nop_entry, 0, PRIORITY_NORMAL).unwrap();
        dispatch();

        let q: Queue<u8, 2> = Queue::new();
        hosted::set_yield_hook(Some(|| hosted::advance_ticks(1)));
        assert_eq!(q.receive(4), Err(KernelError::Timeout));
        hosted::set_yield_hook(None);
        assert!(q.is_empty());
    }

    #[test]
    fn producer_consumer_preserves_order_through_backpressure() {
        // Capacity 5, twenty messages: the producer keeps hitting a full
        // queue and must block, yet the consumer sees 0..20 in order.
        let _guard = testutil::fresh_kernel();
        kernel::create_task("t", nop_entry, 0, PRIORITY_NORMAL).unwrap();
        dispatch();
        hosted::set_yield_hook(Some(|| hosted::advance_ticks(1)));

        let q: Queue<u32, 5> = Queue::new();
        let mut received = Vec::new();
        let mut next_to_send = 0u32;
        while received.len() < 20 {
            // Produce until the queue pushes back.
            while next_to_send < 20 {
                match q.send(next_to_send, 2) {
                    Ok(()) => next_to_send += 1,
                    Err(KernelError::Timeout) => {
                        assert!(q.is_full());
                        break;
                    }
                    Err(e) => panic!("unexpected send error: {e:?}"),
                }
            }
            received.push(q.receive(0).unwrap());
        }
        hosted::set_yield_hook(None);

        let expected: Vec<u32> = (0..20).collect();
        assert_eq!(received, expected);
    }

    proptest! {
        /// The ring maintains the index law (tail - head) mod N == count
        /// and agrees with a model deque under arbitrary push/pop mixes.
        #[test]
        fn ring_matches_model(ops in proptest::collection::vec(any::<Option<u8>>(), 0..200)) {
            let mut ring: Ring<u8, 5> = Ring::new();
            let mut model: VecDeque<u8> = VecDeque::new();

            for op in ops {
                match op {
                    Some(v) => {
                        let pushed = ring.push(v);
                        prop_assert_eq!(pushed, model.len() < 5);
                        if pushed {
                            model.push_back(v);
                        }
                    }
                    None => {
                        prop_assert_eq!(ring.pop(), model.pop_front());
                    }
                }
                prop_assert_eq!(ring.count, model.len());
                prop_assert!(ring.head < 5 && ring.tail < 5);
                prop_assert_eq!((ring.tail + 5 - ring.head) % 5, model.len() % 5);
            }
        }
    }
}
