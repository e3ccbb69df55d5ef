use crate::{
    Heap, Stealer, Thread, UpcallEntry, UpcallError, UpcallQueue, UpcallSettings, Visitor,
    for_each_root_in_upcall_queue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallState {
    Idle,
    /// the upcall thread is out running in place of the saved thread
    UpcallActive,
}

/// Upcall state of a single capability. Only the OS thread driving the
/// capability touches it, other capabilities go through [`Stealer`].
#[derive(Debug)]
pub struct Capability {
    id: CapabilityId,
    queue: UpcallQueue,
    stealer: Stealer,
    upcall_thread: Option<Thread>,
    saved_thread: Option<Thread>,
}

impl Capability {
    pub fn new(id: CapabilityId, settings: &UpcallSettings, heap: &Heap) -> Self {
        let (queue, stealer) = UpcallQueue::new(settings.queue_capacity());
        Self {
            id,
            queue,
            stealer,
            upcall_thread: Some(Thread::new_upcall(heap)),
            saved_thread: None,
        }
    }

    #[inline]
    pub fn id(&self) -> CapabilityId {
        self.id
    }

    pub fn stealer(&self) -> Stealer {
        self.stealer.clone()
    }

    pub fn queue(&self) -> &UpcallQueue {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut UpcallQueue {
        &mut self.queue
    }

    /// The parked upcall thread, `None` while it is running.
    pub fn upcall_thread(&self) -> Option<&Thread> {
        self.upcall_thread.as_ref()
    }

    pub fn saved_thread(&self) -> Option<&Thread> {
        self.saved_thread.as_ref()
    }

    pub fn state(&self) -> UpcallState {
        if self.upcall_thread.is_some() {
            UpcallState::Idle
        } else {
            UpcallState::UpcallActive
        }
    }

    /// A hint only, the queue can be emptied by stealers right after.
    #[inline]
    pub fn has_pending_upcalls(&self) -> bool {
        self.queue.size() > 0
    }

    /// Queues an upcall. Overflowing the queue aborts the process.
    pub fn enqueue_upcall(&self, entry: UpcallEntry) {
        self.queue.push(entry.value());
    }

    pub fn try_enqueue_upcall(&self, entry: UpcallEntry) -> Result<(), UpcallError> {
        self.queue.try_push(entry.value())
    }

    /// Picks the thread to run for this turn when upcalls are pending.
    ///
    /// Takes one entry off the queue and loads it into the upcall thread,
    /// which is returned in place of `current`. `current` is kept as the saved
    /// thread unless it is the upcall thread itself. If stealers emptied the
    /// queue in the meantime, `current` is handed back untouched.
    pub fn prepare_upcall_turn(&mut self, heap: &Heap, current: Option<Thread>) -> Option<Thread> {
        let Some(raw) = self.queue.pop() else {
            log::trace!("capability {}: upcall queue drained by stealers", self.id.0);
            return current;
        };

        let mut upcall_thread = match current {
            Some(thread) if thread.is_upcall_thread() => thread,
            current => {
                let Some(upcall_thread) = self.upcall_thread.take() else {
                    panic!(
                        "capability {}: upcall thread is already active, saved {:?}",
                        self.id.0,
                        self.saved_thread.as_ref().map(Thread::id)
                    );
                };
                debug_assert!(self.saved_thread.is_none());
                self.saved_thread = current;
                upcall_thread
            }
        };

        let entry = UpcallEntry::classify(heap, raw);
        log::trace!(
            "capability {}: dispatching {:?} on {:?}, saved {:?}",
            self.id.0,
            entry,
            upcall_thread.id(),
            self.saved_thread.as_ref().map(Thread::id)
        );
        match entry {
            UpcallEntry::SuspendedContinuation(stack) => upcall_thread.install_continuation(stack),
            UpcallEntry::PendingAction(closure) => upcall_thread.push_call(heap, closure),
        }
        Some(upcall_thread)
    }

    /// Hands back the thread the scheduler should continue with after a turn.
    ///
    /// If `current` is the upcall thread it is parked again and the saved
    /// thread is returned, otherwise `current` is returned as is.
    pub fn restore_after_turn(&mut self, current: Thread) -> Option<Thread> {
        if !current.is_upcall_thread() {
            return Some(current);
        }
        assert!(
            self.upcall_thread.is_none(),
            "capability {}: two upcall threads",
            self.id.0
        );
        log::trace!(
            "capability {}: parking {:?}, resuming {:?}",
            self.id.0,
            current.id(),
            self.saved_thread.as_ref().map(Thread::id)
        );
        self.upcall_thread = Some(current);
        self.saved_thread.take()
    }

    /// Root scan entry point for the collector.
    pub fn for_each_root(&mut self, visitor: &mut impl Visitor) {
        for_each_root_in_upcall_queue(self, visitor);
    }
}
