//! Bounded work-stealing deque holding upcall entries.
//!
//! The owning capability pushes and pops at `bottom`, every other party steals
//! at `top`. Both counters grow without bound and are only masked when used as
//! an index, so `bottom - top` is always the number of live entries.

use std::{cell::Cell, marker::PhantomData, sync::Arc};

use crate::{
    UpcallError, Value,
    loom::{
        atomic::{AtomicU64, Ordering, fence},
        hint,
    },
};

struct Inner {
    top: AtomicU64,
    bottom: AtomicU64,
    mask: u64,
    elements: Box<[AtomicU64]>,
}

impl Inner {
    #[inline]
    fn slot(&self, index: u64) -> &AtomicU64 {
        &self.elements[(index & self.mask) as usize]
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    fn size(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        b.saturating_sub(t) as usize
    }
}

/// Owner side of an upcall queue. Not `Sync` and not `Clone`, only the
/// capability that created it can push or pop.
pub struct UpcallQueue {
    inner: Arc<Inner>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Stealing side of an upcall queue, shared with other capabilities.
#[derive(Clone)]
pub struct Stealer {
    inner: Arc<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal {
    Empty,
    /// lost a race against another stealer or the owner
    Retry,
    Success(Value),
}

impl Steal {
    pub fn success(self) -> Option<Value> {
        match self {
            Steal::Success(value) => Some(value),
            Steal::Empty | Steal::Retry => None,
        }
    }
}

impl UpcallQueue {
    /// `capacity` must be a non-zero power of two, anything else would let two
    /// live counters share a slot.
    pub fn new(capacity: usize) -> (UpcallQueue, Stealer) {
        assert!(
            capacity.is_power_of_two(),
            "upcall queue capacity {capacity} is not a power of two"
        );
        let elements = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        let inner = Arc::new(Inner {
            top: AtomicU64::new(0),
            bottom: AtomicU64::new(0),
            mask: capacity as u64 - 1,
            elements,
        });
        let stealer = Stealer {
            inner: inner.clone(),
        };
        let queue = UpcallQueue {
            inner,
            _not_sync: PhantomData,
        };
        (queue, stealer)
    }

    pub fn try_push(&self, value: Value) -> Result<(), UpcallError> {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Acquire);
        if b.wrapping_sub(t) >= self.inner.capacity() as u64 {
            return Err(UpcallError::QueueFull {
                capacity: self.inner.capacity(),
            });
        }

        self.inner.slot(b).store(value.raw(), Ordering::Relaxed);
        // publish the slot before the new bottom
        fence(Ordering::Release);
        self.inner.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Pushes `value`, aborting the process if the queue is full. An overflow
    /// means upcalls are produced faster than any capability can run them.
    pub fn push(&self, value: Value) {
        if let Err(err) = self.try_push(value) {
            log::error!("{err}, aborting");
            std::process::abort();
        }
    }

    /// Takes the most recently pushed entry.
    pub fn pop(&self) -> Option<Value> {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Relaxed);
        if b == t {
            return None;
        }

        let b = b - 1;
        self.inner.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.inner.top.load(Ordering::Relaxed);

        if t > b {
            // stealers emptied the queue under us
            self.inner.bottom.store(t, Ordering::Relaxed);
            return None;
        }

        let value = Value::from_raw(self.inner.slot(b).load(Ordering::Relaxed));
        if t < b {
            return Some(value);
        }

        // last entry, race the stealers for it
        let won = self
            .inner
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.inner.bottom.store(t + 1, Ordering::Relaxed);
        won.then_some(value)
    }

    pub fn stealer(&self) -> Stealer {
        Stealer {
            inner: self.inner.clone(),
        }
    }

    /// Approximate number of entries, stale as soon as it is returned.
    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn top(&self) -> u64 {
        self.inner.top.load(Ordering::Acquire)
    }

    pub fn bottom(&self) -> u64 {
        self.inner.bottom.load(Ordering::Acquire)
    }

    /// Calls `f` with every slot in the live range `[top, bottom)` as read at
    /// the start, and returns that range. Takes `&mut self` so the owner cannot
    /// push or pop while the slots are being visited.
    pub(crate) fn for_each_live_slot(&mut self, mut f: impl FnMut(&AtomicU64)) -> (u64, u64) {
        let top = self.inner.top.load(Ordering::Acquire);
        let bottom = self.inner.bottom.load(Ordering::Acquire);
        for index in top..bottom {
            f(self.inner.slot(index));
        }
        (top, bottom)
    }
}

impl Stealer {
    /// One attempt at taking the oldest entry.
    pub fn try_steal(&self) -> Steal {
        let t = self.inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.inner.bottom.load(Ordering::Acquire);
        if t >= b {
            return Steal::Empty;
        }

        let value = Value::from_raw(self.inner.slot(t).load(Ordering::Relaxed));
        match self
            .inner
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Steal::Success(value),
            Err(_) => Steal::Retry,
        }
    }

    /// Retries lost races until an entry is taken or the queue is empty.
    pub fn steal(&self) -> Option<Value> {
        loop {
            match self.try_steal() {
                Steal::Success(value) => return Some(value),
                Steal::Empty => return None,
                Steal::Retry => hint::spin_loop(),
            }
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn top(&self) -> u64 {
        self.inner.top.load(Ordering::Acquire)
    }

    pub fn bottom(&self) -> u64 {
        self.inner.bottom.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for UpcallQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcallQueue")
            .field("top", &self.top())
            .field("bottom", &self.bottom())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl std::fmt::Debug for Stealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stealer")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::{collections::HashSet, thread};

    fn e(n: i64) -> Value {
        Value::from_fixnum(n)
    }

    #[test]
    fn owner_pops_newest_first() {
        let (q, _s) = UpcallQueue::new(8);
        for n in 1..=3 {
            q.push(e(n));
        }
        assert_eq!(q.pop(), Some(e(3)));
        assert_eq!(q.pop(), Some(e(2)));
        assert_eq!(q.pop(), Some(e(1)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn stealers_take_oldest_first() {
        let (q, s) = UpcallQueue::new(8);
        for n in 1..=3 {
            q.push(e(n));
        }
        assert_eq!(s.steal(), Some(e(1)));
        assert_eq!(s.steal(), Some(e(2)));
        assert_eq!(s.steal(), Some(e(3)));
        assert_eq!(s.steal(), None);
        assert_eq!(s.try_steal(), Steal::Empty);
    }

    #[test]
    fn mixed_steal_and_pop_scenario() {
        let (q, s) = UpcallQueue::new(4);
        q.push(e(1));
        q.push(e(2));
        q.push(e(3));

        let other = s.clone();
        let stolen = thread::spawn(move || other.steal()).join().unwrap();
        assert_eq!(stolen, Some(e(1)));

        assert_eq!(q.pop(), Some(e(3)));
        assert_eq!(q.size(), 1);
        assert_eq!(s.steal(), Some(e(2)));
        assert_eq!(s.steal(), None);
        assert_eq!(q.pop(), None);
        assert_eq!(q.top(), q.bottom());
    }

    #[test]
    #[should_panic(expected = "not a power of two")]
    fn odd_capacity_is_rejected() {
        // with capacity 3 the third push would land on the first slot
        let _ = UpcallQueue::new(3);
    }

    #[test]
    fn stealer_sees_the_same_counters() {
        let (q, s) = UpcallQueue::new(4);
        for n in 1..=3 {
            q.push(e(n));
        }
        assert_eq!((s.top(), s.bottom()), (0, 3));
        assert_eq!(s.steal(), Some(e(1)));
        assert_eq!((s.top(), s.bottom()), (q.top(), q.bottom()));
        assert_eq!(s.top(), 1);
    }

    #[test]
    fn push_into_full_queue_fails_without_overwriting() {
        let (q, s) = UpcallQueue::new(4);
        for n in 0..4 {
            q.try_push(e(n)).unwrap();
        }
        assert_eq!(
            q.try_push(e(99)),
            Err(UpcallError::QueueFull { capacity: 4 })
        );
        assert_eq!(q.size(), 4);

        let drained: Vec<_> = std::iter::from_fn(|| s.steal()).collect();
        assert_eq!(drained, vec![e(0), e(1), e(2), e(3)]);

        // a slot freed by a steal can be reused
        q.try_push(e(5)).unwrap();
        assert_eq!(q.pop(), Some(e(5)));
    }

    #[test]
    fn counters_grow_past_capacity_without_losing_order() {
        let (q, s) = UpcallQueue::new(4);
        for round in 0..100 {
            q.push(e(round * 3));
            q.push(e(round * 3 + 1));
            q.push(e(round * 3 + 2));
            assert!(q.size() <= q.capacity());
            assert_eq!(s.steal(), Some(e(round * 3)));
            assert_eq!(q.pop(), Some(e(round * 3 + 2)));
            assert_eq!(s.steal(), Some(e(round * 3 + 1)));
            assert!(q.is_empty());
        }
        assert_eq!(q.top(), 200);
        assert_eq!(q.bottom(), 200);
    }

    #[test]
    fn size_tracks_bottom_minus_top() {
        let (q, s) = UpcallQueue::new(16);
        assert_eq!(q.size(), 0);
        for n in 0..10 {
            q.push(e(n));
            assert_eq!(q.size(), n as usize + 1);
        }
        s.steal();
        q.pop();
        assert_eq!(q.size(), 8);
        assert_eq!(s.size(), 8);
        assert_eq!(q.bottom() - q.top(), 8);
    }

    #[test]
    fn concurrent_stealers_and_owner_never_double_deliver() {
        const STEALERS: usize = 4;
        const TOTAL: i64 = 20_000;

        let (q, s) = UpcallQueue::new(256);
        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

        let handles: Vec<_> = (0..STEALERS)
            .map(|_| {
                let s = s.clone();
                let seen = seen.clone();
                let done = done.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        match s.try_steal() {
                            Steal::Success(v) => local.push(v),
                            Steal::Retry => continue,
                            Steal::Empty => {
                                if done.load(std::sync::atomic::Ordering::Acquire) {
                                    break;
                                }
                                thread::yield_now();
                            }
                        }
                    }
                    seen.lock().extend(local);
                })
            })
            .collect();

        let mut popped = Vec::new();
        let mut next = 0;
        while next < TOTAL {
            if q.try_push(e(next)).is_ok() {
                next += 1;
            }
            if next % 3 == 0 {
                popped.extend(q.pop());
            }
        }
        while let Some(v) = q.pop() {
            popped.push(v);
        }
        done.store(true, std::sync::atomic::Ordering::Release);
        for h in handles {
            h.join().unwrap();
        }

        let mut all = seen.lock().clone();
        all.extend(popped);
        assert_eq!(all.len(), TOTAL as usize, "every entry delivered exactly once");
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(unique.len(), TOTAL as usize);
        assert_eq!(q.top(), q.bottom());
    }
}
