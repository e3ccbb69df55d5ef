use crate::{
    Value,
    loom::atomic::{AtomicU64, Ordering},
};

/// A root slot handed out by a root scan. It is only valid for the duration of
/// the `visit_root` call, the visitor may read it and may relocate the
/// reference in place.
#[derive(Debug)]
pub struct RootSlot<'scan> {
    slot: &'scan AtomicU64,
}

impl<'scan> RootSlot<'scan> {
    pub(crate) fn new(slot: &'scan AtomicU64) -> Self {
        Self { slot }
    }

    #[inline]
    pub fn get(&self) -> Value {
        Value::from_raw(self.slot.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&mut self, value: Value) {
        self.slot.store(value.raw(), Ordering::Relaxed);
    }
}

pub trait Visitor {
    fn visit_root(&mut self, slot: RootSlot<'_>);
}

impl<F> Visitor for F
where
    F: FnMut(RootSlot<'_>),
{
    fn visit_root(&mut self, slot: RootSlot<'_>) {
        self(slot)
    }
}
