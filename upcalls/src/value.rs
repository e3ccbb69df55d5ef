//! Value: any raw word, either a fixnum or a reference to a heap object.
//!
//! Queue slots store values as plain `u64` words, so nothing about an upcall
//! entry is known until the word is classified against the heap.

#[allow(unused)]
#[repr(u8)]
#[derive(Debug, Copy, Clone)]
pub enum ValueTag {
    Fixnum = 0b0,
    Reference = 0b01,
}

pub const REFERENCE_TAG_MASK: u64 = 0b11;
pub const REFERENCE_SHIFT: u64 = 2;

/// A generic Value
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn from_fixnum(value: i64) -> Self {
        Self((value as u64) << 1)
    }

    pub const fn zero() -> Self {
        Self::from_fixnum(0)
    }

    /// A reference to the object stored at `index` in the heap.
    pub const fn from_reference(index: usize) -> Self {
        Self(((index as u64) << REFERENCE_SHIFT) | ValueTag::Reference as u64)
    }

    #[inline]
    pub const fn is_fixnum(self) -> bool {
        self.0 & 0b1 == ValueTag::Fixnum as u64
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        self.0 & REFERENCE_TAG_MASK == ValueTag::Reference as u64
    }

    pub const fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    pub const fn reference_index(self) -> Option<usize> {
        if self.is_reference() {
            Some((self.0 >> REFERENCE_SHIFT) as usize)
        } else {
            None
        }
    }
}
