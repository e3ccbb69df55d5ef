use std::{mem, sync::Arc};

use parking_lot::RwLock;

use crate::{
    Closure, HeaderFlags, HeapObject, ObjectBody, ObjectType, Op, RootSlot, Stack, Value, Visitor,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct HeapCreateInfo {
    // number of object slots reserved up front
    pub initial_objects: Option<usize>,
}

/// Shared object arena. Objects are addressed by index, a moved object leaves
/// a forwarding header behind so stale references keep resolving.
#[derive(Debug, Clone)]
pub struct Heap {
    inner: Arc<HeapShared>,
}

#[derive(Debug)]
struct HeapShared {
    objects: RwLock<Vec<HeapObject>>,
}

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Self {
        let objects = Vec::with_capacity(info.initial_objects.unwrap_or(1024));
        Self {
            inner: Arc::new(HeapShared {
                objects: RwLock::new(objects),
            }),
        }
    }

    pub fn allocate(&self, body: ObjectBody) -> Value {
        let mut objects = self.inner.objects.write();
        let index = objects.len();
        assert!(index <= u32::MAX as usize, "heap index space exhausted");
        objects.push(HeapObject::new(body));
        Value::from_reference(index)
    }

    pub fn allocate_closure(&self, code: impl Into<Arc<[Op]>>) -> Value {
        self.allocate(ObjectBody::Closure(Closure { code: code.into() }))
    }

    pub fn allocate_stack(&self) -> Value {
        self.allocate(ObjectBody::Stack(Stack::default()))
    }

    pub fn allocate_cell(&self, initial: i64) -> Value {
        self.allocate(ObjectBody::Cell(Value::from_fixnum(initial)))
    }

    /// Number of object slots, forwarding stubs included.
    pub fn object_count(&self) -> usize {
        self.inner.objects.read().len()
    }

    fn resolve_index(objects: &[HeapObject], value: Value) -> Option<usize> {
        let mut index = value.reference_index()?;
        loop {
            let header = objects.get(index)?.header;
            if !header.is_forwarded() {
                return Some(index);
            }
            index = header.data() as usize;
        }
    }

    /// Follows forwarding headers to the current location of `value`.
    pub fn resolve(&self, value: Value) -> Value {
        let objects = self.inner.objects.read();
        match Self::resolve_index(&objects, value) {
            Some(index) => Value::from_reference(index),
            None => value,
        }
    }

    /// The runtime shape of the object `value` refers to.
    pub fn object_type(&self, value: Value) -> Option<ObjectType> {
        let objects = self.inner.objects.read();
        let index = Self::resolve_index(&objects, value)?;
        Some(objects[index].object_type())
    }

    pub fn pin(&self, value: Value) {
        let mut objects = self.inner.objects.write();
        if let Some(index) = Self::resolve_index(&objects, value) {
            let header = &mut objects[index].header;
            let flags = header.flags() | HeaderFlags::PIN;
            header.set_flags(flags);
        }
    }

    /// Moves the object to a fresh slot and returns its new reference.
    /// Fixnums, dangling references and pinned objects are returned resolved
    /// but otherwise untouched.
    ///
    /// The old slot stays behind as a forwarding stub and is never reclaimed,
    /// so every move grows the arena by one slot until the `u32` index space
    /// runs out.
    pub fn relocate(&self, value: Value) -> Value {
        let mut objects = self.inner.objects.write();
        let Some(from) = Self::resolve_index(&objects, value) else {
            return value;
        };
        if objects[from].header.flags().contains(HeaderFlags::PIN) {
            return Value::from_reference(from);
        }

        let to = objects.len();
        assert!(to <= u32::MAX as usize, "heap index space exhausted");
        let header = objects[from].header;
        let body = mem::replace(&mut objects[from].body, ObjectBody::Forwarded);
        objects.push(HeapObject { header, body });
        objects[from].header.forward_to(to as u32);
        Value::from_reference(to)
    }

    pub fn closure_code(&self, value: Value) -> Option<Arc<[Op]>> {
        let objects = self.inner.objects.read();
        let index = Self::resolve_index(&objects, value)?;
        match &objects[index].body {
            ObjectBody::Closure(closure) => Some(closure.code.clone()),
            _ => None,
        }
    }

    pub fn with_stack<R>(&self, value: Value, f: impl FnOnce(&Stack) -> R) -> Option<R> {
        let objects = self.inner.objects.read();
        let index = Self::resolve_index(&objects, value)?;
        match &objects[index].body {
            ObjectBody::Stack(stack) => Some(f(stack)),
            _ => None,
        }
    }

    pub fn with_stack_mut<R>(&self, value: Value, f: impl FnOnce(&mut Stack) -> R) -> Option<R> {
        let mut objects = self.inner.objects.write();
        let index = Self::resolve_index(&objects, value)?;
        match &mut objects[index].body {
            ObjectBody::Stack(stack) => Some(f(stack)),
            _ => None,
        }
    }

    pub fn cell_value(&self, cell: Value) -> Option<i64> {
        let objects = self.inner.objects.read();
        let index = Self::resolve_index(&objects, cell)?;
        match objects[index].body {
            ObjectBody::Cell(value) => value.as_fixnum(),
            _ => None,
        }
    }

    /// Returns false if `cell` is not a cell holding a fixnum.
    pub fn add_to_cell(&self, cell: Value, delta: i64) -> bool {
        let mut objects = self.inner.objects.write();
        let Some(index) = Self::resolve_index(&objects, cell) else {
            return false;
        };
        match &mut objects[index].body {
            ObjectBody::Cell(value) => match value.as_fixnum() {
                Some(current) => {
                    *value = Value::from_fixnum(current.wrapping_add(delta));
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// Root visitor of the moving collector: every visited reference is moved and
/// the root slot is rewritten to the new location.
#[derive(Debug)]
pub struct Evacuator<'heap> {
    heap: &'heap Heap,
    moved: usize,
}

impl<'heap> Evacuator<'heap> {
    pub fn new(heap: &'heap Heap) -> Self {
        Self { heap, moved: 0 }
    }

    pub fn moved(&self) -> usize {
        self.moved
    }
}

impl Visitor for Evacuator<'_> {
    fn visit_root(&mut self, mut slot: RootSlot<'_>) {
        let old = slot.get();
        let new = self.heap.relocate(old);
        if new != old {
            slot.set(new);
            self.moved += 1;
        }
    }
}
