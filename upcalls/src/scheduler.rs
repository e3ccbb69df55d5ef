use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crate::{
    Capability, CapabilityId, Evacuator, ExecutionResult, Heap, Interpreter, SchedulerCreateInfo,
    SchedulerSettings, Stealer, Thread, UpcallEntry, UpcallError, Value,
    for_each_root_in_upcall_queue,
};

#[derive(Debug, Default)]
struct Counters {
    turns: AtomicUsize,
    upcalls_completed: AtomicUsize,
    upcalls_blocked: AtomicUsize,
    threads_completed: AtomicUsize,
    steals: AtomicUsize,
    panics: AtomicUsize,
    relocated: AtomicUsize,
}

/// What happened during [`Scheduler::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub turns: usize,
    pub upcalls_completed: usize,
    pub upcalls_blocked: usize,
    pub threads_completed: usize,
    pub steals: usize,
    pub panics: usize,
    pub relocated: usize,
}

struct Shared {
    heap: Heap,
    stealers: Vec<Stealer>,
    // ordinary threads plus upcalls that have not finished yet
    outstanding: AtomicUsize,
    counters: Counters,
    scan_interval: usize,
}

struct Worker {
    capability: Capability,
    local: VecDeque<Thread>,
}

/// Drives one capability per OS thread. Before every turn a capability checks
/// its upcall queue and lets the upcall thread run in place of the thread it
/// would have picked. Idle capabilities steal upcalls from the others.
pub struct Scheduler {
    heap: Heap,
    settings: SchedulerSettings,
    workers: Vec<Worker>,
    outstanding: usize,
}

impl Scheduler {
    pub fn new(info: SchedulerCreateInfo) -> Result<Self, UpcallError> {
        let settings = SchedulerSettings::new(info)?;
        let heap = Heap::new(settings.heap);
        let workers = (0..settings.capabilities)
            .map(|id| Worker {
                capability: Capability::new(CapabilityId(id), &settings.upcall, &heap),
                local: VecDeque::new(),
            })
            .collect();
        Ok(Self {
            heap,
            settings,
            workers,
            outstanding: 0,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    fn worker(&mut self, capability: CapabilityId) -> Result<&mut Worker, UpcallError> {
        self.workers
            .get_mut(capability.0)
            .ok_or(UpcallError::UnknownCapability(capability.0))
    }

    /// Adds an ordinary thread running `closure` to a capability's run queue.
    pub fn spawn(&mut self, capability: CapabilityId, closure: Value) -> Result<(), UpcallError> {
        let thread = Thread::new_ordinary(&self.heap, closure);
        self.worker(capability)?.local.push_back(thread);
        self.outstanding += 1;
        Ok(())
    }

    pub fn enqueue_upcall(
        &mut self,
        capability: CapabilityId,
        closure: Value,
    ) -> Result<(), UpcallError> {
        self.worker(capability)?
            .capability
            .try_enqueue_upcall(UpcallEntry::PendingAction(closure))?;
        self.outstanding += 1;
        Ok(())
    }

    /// Runs every capability until all threads and upcalls are done.
    pub fn run(self) -> SchedulerReport {
        let shared = Arc::new(Shared {
            stealers: self.workers.iter().map(|w| w.capability.stealer()).collect(),
            heap: self.heap,
            outstanding: AtomicUsize::new(self.outstanding),
            counters: Counters::default(),
            scan_interval: self.settings.scan_interval,
        });

        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let shared = shared.clone();
                let id = worker.capability.id();
                thread::Builder::new()
                    .name(format!("capability-{}", id.0))
                    .spawn(move || worker.run(&shared))
                    .expect("spawn capability thread")
            })
            .collect();

        for handle in handles {
            if handle.join().is_err() {
                log::error!("capability thread panicked");
            }
        }

        let c = &shared.counters;
        SchedulerReport {
            turns: c.turns.load(Ordering::Relaxed),
            upcalls_completed: c.upcalls_completed.load(Ordering::Relaxed),
            upcalls_blocked: c.upcalls_blocked.load(Ordering::Relaxed),
            threads_completed: c.threads_completed.load(Ordering::Relaxed),
            steals: c.steals.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            relocated: c.relocated.load(Ordering::Relaxed),
        }
    }
}

impl Worker {
    fn run(mut self, shared: &Shared) {
        let id = self.capability.id();
        let interpreter = Interpreter::new(shared.heap.clone());
        let mut turns = 0usize;
        log::info!("capability {} started", id.0);

        while shared.outstanding.load(Ordering::Acquire) > 0 {
            let current = self.local.pop_front();
            let next = if self.capability.has_pending_upcalls() {
                self.capability.prepare_upcall_turn(&shared.heap, current)
            } else {
                current
            };

            let Some(mut thread) = next else {
                self.steal_upcall(shared);
                continue;
            };

            turns += 1;
            shared.counters.turns.fetch_add(1, Ordering::Relaxed);
            let is_upcall = thread.is_upcall_thread();
            let result = interpreter.run(&mut thread);
            match &result {
                ExecutionResult::Finished => {
                    let counter = if is_upcall {
                        &shared.counters.upcalls_completed
                    } else {
                        &shared.counters.threads_completed
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    shared.outstanding.fetch_sub(1, Ordering::AcqRel);
                }
                ExecutionResult::Blocked if is_upcall => {
                    let continuation = thread.capture_continuation(&shared.heap);
                    self.capability
                        .enqueue_upcall(UpcallEntry::SuspendedContinuation(continuation));
                    shared.counters.upcalls_blocked.fetch_add(1, Ordering::Relaxed);
                }
                ExecutionResult::Blocked => {}
                ExecutionResult::Panic(msg) => {
                    log::error!("capability {}: {:?} panicked: {msg}", id.0, thread.id());
                    if is_upcall {
                        // throw away whatever is left of the failed upcall
                        thread.capture_continuation(&shared.heap);
                    }
                    shared.counters.panics.fetch_add(1, Ordering::Relaxed);
                    shared.outstanding.fetch_sub(1, Ordering::AcqRel);
                }
            }

            let finished = result != ExecutionResult::Blocked;
            if let Some(resumed) = self.capability.restore_after_turn(thread) {
                if is_upcall {
                    // the displaced thread never got its turn
                    self.local.push_front(resumed);
                } else if !finished {
                    self.local.push_back(resumed);
                }
            }

            if shared.scan_interval > 0 && turns % shared.scan_interval == 0 {
                let mut evacuator = Evacuator::new(&shared.heap);
                for_each_root_in_upcall_queue(&mut self.capability, &mut evacuator);
                shared
                    .counters
                    .relocated
                    .fetch_add(evacuator.moved(), Ordering::Relaxed);
            }
        }

        log::info!("capability {} done after {} turns", id.0, turns);
    }

    fn steal_upcall(&mut self, shared: &Shared) {
        let me = self.capability.id().0;
        let victims = shared.stealers.len();
        for offset in 1..victims {
            let victim = (me + offset) % victims;
            if let Some(raw) = shared.stealers[victim].steal() {
                log::trace!("capability {me} stole an upcall from capability {victim}");
                shared.counters.steals.fetch_add(1, Ordering::Relaxed);
                self.capability
                    .enqueue_upcall(UpcallEntry::classify(&shared.heap, raw));
                return;
            }
        }
        thread::sleep(Duration::from_micros(50));
    }
}
