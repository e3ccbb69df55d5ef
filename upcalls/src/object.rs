use std::sync::Arc;

use crate::{Op, Stack, Value};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ObjectType {
    Closure = 0b0000,
    Stack = 0b0001,
    Cell = 0b0010,
    Max = 0b1111,
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const PIN = 1 << 0;
        const FORWARD = 1 << 1;
    }
}

// [0..<2 tag]
// [2..<6 object]
// [12..<16 flags]
// [32..<64 additional data, forwarding index when FORWARD is set]
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header(u64);

impl Header {
    pub const TAG: u64 = 0b11;

    pub const OBJ_SHIFT: u64 = 2;
    pub const OBJ_MASK: u64 = 0b1111 << Self::OBJ_SHIFT;

    pub const FLAGS_SHIFT: u64 = 12;
    pub const FLAGS_MASK: u64 = 0xF << Self::FLAGS_SHIFT;

    pub const DATA_SHIFT: u64 = 32;
    pub const DATA_MASK: u64 = 0xFFFF_FFFFu64 << Self::DATA_SHIFT;

    #[inline]
    pub fn encode(ty: ObjectType, flags: HeaderFlags, data: u32) -> Header {
        let inner = Self::TAG
            | ((ty as u64) << Self::OBJ_SHIFT)
            | (((flags.bits() as u64) & 0xF) << Self::FLAGS_SHIFT)
            | ((data as u64) << Self::DATA_SHIFT);
        Header(inner)
    }

    #[inline]
    pub fn object_type(self) -> ObjectType {
        match ((self.0 & Self::OBJ_MASK) >> Self::OBJ_SHIFT) as u8 {
            0b0000 => ObjectType::Closure,
            0b0001 => ObjectType::Stack,
            0b0010 => ObjectType::Cell,
            _ => ObjectType::Max,
        }
    }

    #[inline]
    pub fn flags(self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(((self.0 & Self::FLAGS_MASK) >> Self::FLAGS_SHIFT) as u8)
    }

    #[inline]
    pub fn data(self) -> u32 {
        ((self.0 & Self::DATA_MASK) >> Self::DATA_SHIFT) as u32
    }

    #[inline]
    pub fn set_flags(&mut self, flags: HeaderFlags) -> &mut Self {
        let f = ((flags.bits() as u64) & 0xF) << Self::FLAGS_SHIFT;
        self.0 = (self.0 & !Self::FLAGS_MASK) | f;
        self
    }

    #[inline]
    pub fn set_data(&mut self, data: u32) -> &mut Self {
        let d = (data as u64) << Self::DATA_SHIFT;
        self.0 = (self.0 & !Self::DATA_MASK) | d;
        self
    }

    #[inline]
    pub fn is_forwarded(self) -> bool {
        self.flags().contains(HeaderFlags::FORWARD)
    }

    /// Turns this header into a forwarding header pointing at `index`.
    #[inline]
    pub fn forward_to(&mut self, index: u32) -> &mut Self {
        let flags = self.flags() | HeaderFlags::FORWARD;
        self.set_flags(flags).set_data(index)
    }
}

impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.object_type())
            .field("flags", &self.flags())
            .field("data", &self.data())
            .finish()
    }
}

/// A zero argument computation.
#[derive(Debug, Clone)]
pub struct Closure {
    pub code: Arc<[Op]>,
}

#[derive(Debug, Clone)]
pub enum ObjectBody {
    Closure(Closure),
    Stack(Stack),
    Cell(Value),
    /// left behind after the object moved, the header holds the new index
    Forwarded,
}

#[derive(Debug, Clone)]
pub struct HeapObject {
    pub header: Header,
    pub body: ObjectBody,
}

impl HeapObject {
    pub fn new(body: ObjectBody) -> Self {
        let ty = match &body {
            ObjectBody::Closure(_) => ObjectType::Closure,
            ObjectBody::Stack(_) => ObjectType::Stack,
            ObjectBody::Cell(_) => ObjectType::Cell,
            ObjectBody::Forwarded => ObjectType::Max,
        };
        Self {
            header: Header::encode(ty, HeaderFlags::empty(), 0),
            body,
        }
    }

    #[inline]
    pub fn object_type(&self) -> ObjectType {
        self.header.object_type()
    }
}
