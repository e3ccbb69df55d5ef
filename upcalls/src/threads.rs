use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Frame, Heap, Value};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// What a lightweight thread is for. The upcall thread of a capability is
/// recognised by its role, never by comparing against the capability slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Ordinary,
    UpcallThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Created,
    Running,
    Blocked,
    Finished,
}

/// A lightweight, cooperatively scheduled thread. Its execution state lives
/// in a heap allocated stack object.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    role: Role,
    state: ThreadState,
    stack: Value,
}

impl Thread {
    pub fn new(role: Role, stack: Value) -> Self {
        Self {
            id: ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)),
            role,
            state: ThreadState::Created,
            stack,
        }
    }

    /// A thread that will call `closure` when first run.
    pub fn new_ordinary(heap: &Heap, closure: Value) -> Self {
        let mut thread = Self::new(Role::Ordinary, heap.allocate_stack());
        thread.push_call(heap, closure);
        thread
    }

    pub fn new_upcall(heap: &Heap) -> Self {
        Self::new(Role::UpcallThread, heap.allocate_stack())
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn is_upcall_thread(&self) -> bool {
        self.role == Role::UpcallThread
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    #[inline]
    pub fn stack(&self) -> Value {
        self.stack
    }

    /// Makes `stack` the resumption state of this thread, the previous stack
    /// is dropped.
    pub fn install_continuation(&mut self, stack: Value) {
        self.stack = stack;
        self.state = ThreadState::Created;
    }

    /// Pushes a fresh call of `closure` on top of the current stack.
    pub fn push_call(&mut self, heap: &Heap, closure: Value) {
        let pushed = heap.with_stack_mut(self.stack, |s| s.frames.push(Frame::new(closure)));
        assert!(pushed.is_some(), "{:?} has no stack", self.id);
        self.state = ThreadState::Created;
    }

    /// Detaches the current stack and replaces it with an empty one. The
    /// returned stack is the continuation of the interrupted computation.
    /// The fresh stack is a new heap object, the arena has no reclamation.
    pub fn capture_continuation(&mut self, heap: &Heap) -> Value {
        let fresh = heap.allocate_stack();
        std::mem::replace(&mut self.stack, fresh)
    }
}
