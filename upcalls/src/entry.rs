use crate::{Heap, ObjectType, Value};

/// A unit of deferred work in an upcall queue.
///
/// The queue only stores the raw reference, the variant is recovered from the
/// shape of the referenced object when the entry is taken out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpcallEntry {
    /// a closure that has not been started yet
    PendingAction(Value),
    /// the detached stack of an upcall that blocked while running
    SuspendedContinuation(Value),
}

impl UpcallEntry {
    pub fn classify(heap: &Heap, raw: Value) -> Self {
        match heap.object_type(raw) {
            Some(ObjectType::Stack) => Self::SuspendedContinuation(raw),
            _ => Self::PendingAction(raw),
        }
    }

    #[inline]
    pub fn value(self) -> Value {
        match self {
            Self::PendingAction(v) | Self::SuspendedContinuation(v) => v,
        }
    }

    #[inline]
    pub fn is_suspended(self) -> bool {
        matches!(self, Self::SuspendedContinuation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeapCreateInfo, Op};

    #[test]
    fn stacks_classify_as_suspended_continuations() {
        let heap = Heap::new(HeapCreateInfo::default());
        let closure = heap.allocate_closure(vec![Op::PushFixnum(1)]);
        let stack = heap.allocate_stack();

        assert_eq!(
            UpcallEntry::classify(&heap, closure),
            UpcallEntry::PendingAction(closure)
        );
        let suspended = UpcallEntry::classify(&heap, stack);
        assert_eq!(suspended, UpcallEntry::SuspendedContinuation(stack));
        assert!(suspended.is_suspended());
        assert_eq!(suspended.value(), stack);
    }

    #[test]
    fn classification_follows_forwarding() {
        let heap = Heap::new(HeapCreateInfo::default());
        let stack = heap.allocate_stack();
        let _moved = heap.relocate(stack);
        assert!(UpcallEntry::classify(&heap, stack).is_suspended());
    }
}
