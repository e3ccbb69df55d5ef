use crate::{Capability, RootSlot, UpcallQueue, Visitor};

/// Visits every entry of the capability's upcall queue as a collector root.
///
/// Must run at a safe point of `capability`: the `&mut` borrow keeps its owner
/// from pushing or popping. Other capabilities may keep stealing, a steal that
/// races the scan can hand out the pre-relocation reference, which stays valid
/// through the forwarding header the move left behind.
pub fn for_each_root_in_upcall_queue(capability: &mut Capability, visitor: &mut impl Visitor) {
    let id = capability.id();
    let (top, bottom) = scan_queue(capability.queue_mut(), visitor);
    log::debug!(
        target: "upcalls::roots",
        "capability {}: traversed upcall queue, len={} (top={}, bottom={})",
        id.0,
        bottom - top,
        top,
        bottom
    );
}

pub(crate) fn scan_queue(queue: &mut UpcallQueue, visitor: &mut impl Visitor) -> (u64, u64) {
    queue.for_each_live_slot(|slot| visitor.visit_root(RootSlot::new(slot)))
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::{Evacuator, Heap, HeapCreateInfo, UpcallEntry, UpcallSettings, Value};

    fn mk_capability(capacity: usize) -> (Heap, Capability) {
        let _ = env_logger::builder().is_test(true).try_init();
        let heap = Heap::new(HeapCreateInfo::default());
        let settings = UpcallSettings {
            queue_capacity: capacity,
        };
        let cap = Capability::new(crate::CapabilityId(0), &settings, &heap);
        (heap, cap)
    }

    fn snapshot(queue: &mut UpcallQueue) -> (u64, u64, Vec<Value>) {
        let mut values = Vec::new();
        let (top, bottom) = queue.for_each_live_slot(|slot| {
            values.push(Value::from_raw(slot.load(std::sync::atomic::Ordering::Relaxed)))
        });
        (top, bottom, values)
    }

    #[test]
    fn empty_queue_scan_visits_nothing() {
        let (_heap, mut cap) = mk_capability(4);
        let mut visits = 0;
        for_each_root_in_upcall_queue(&mut cap, &mut |_slot: RootSlot<'_>| visits += 1);
        assert_eq!(visits, 0);
    }

    #[test]
    fn inspecting_scan_is_non_destructive_at_every_occupancy() {
        // offset the counters so the live range wraps around the ring
        for occupancy in 0..=4 {
            let (heap, mut cap) = mk_capability(4);
            let stealer = cap.stealer();
            for _ in 0..3 {
                cap.enqueue_upcall(UpcallEntry::PendingAction(heap.allocate_cell(0)));
                stealer.steal();
            }
            for n in 0..occupancy {
                cap.enqueue_upcall(UpcallEntry::PendingAction(heap.allocate_cell(n)));
            }

            let before = snapshot(cap.queue_mut());
            let mut seen = Vec::new();
            for_each_root_in_upcall_queue(&mut cap, &mut |slot: RootSlot<'_>| {
                seen.push(slot.get())
            });
            let after = snapshot(cap.queue_mut());

            assert_eq!(before, after);
            assert_eq!(seen, before.2);
            assert_eq!(seen.len(), occupancy as usize);
        }
    }

    #[test]
    fn evacuating_scan_relocates_entries_in_place() {
        let (heap, mut cap) = mk_capability(8);
        let closure = heap.allocate_closure(vec![crate::Op::PushFixnum(1)]);
        let stack = heap.allocate_stack();
        cap.enqueue_upcall(UpcallEntry::PendingAction(closure));
        cap.enqueue_upcall(UpcallEntry::SuspendedContinuation(stack));
        let (top, bottom) = (cap.queue_mut().top(), cap.queue_mut().bottom());

        let mut evacuator = Evacuator::new(&heap);
        for_each_root_in_upcall_queue(&mut cap, &mut evacuator);
        assert_eq!(evacuator.moved(), 2);
        assert_eq!(cap.queue_mut().top(), top);
        assert_eq!(cap.queue_mut().bottom(), bottom);

        let (_, _, values) = snapshot(cap.queue_mut());
        assert_eq!(values, vec![heap.resolve(closure), heap.resolve(stack)]);
        assert_ne!(values[0], closure);

        // entries keep their shape after the move
        let stolen = cap.stealer().steal().unwrap();
        assert_eq!(
            UpcallEntry::classify(&heap, stolen),
            UpcallEntry::PendingAction(heap.resolve(closure))
        );
        let popped = cap.queue_mut().pop().unwrap();
        assert!(UpcallEntry::classify(&heap, popped).is_suspended());
    }

    #[test]
    fn scan_tolerates_concurrent_stealers() {
        let (heap, mut cap) = mk_capability(64);
        for n in 0..64 {
            cap.enqueue_upcall(UpcallEntry::PendingAction(heap.allocate_cell(n)));
        }
        let stealer = cap.stealer();
        let thief = std::thread::spawn(move || std::iter::from_fn(|| stealer.steal()).count());

        let mut evacuator = Evacuator::new(&heap);
        for_each_root_in_upcall_queue(&mut cap, &mut evacuator);

        let stolen = thief.join().unwrap();
        let mut remaining = 0;
        while let Some(v) = cap.queue_mut().pop() {
            assert!(heap.cell_value(v).is_some());
            remaining += 1;
        }
        assert_eq!(stolen + remaining, 64);
    }
}
