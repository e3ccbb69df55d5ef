pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(unused_imports)]

    pub(crate) mod atomic {
        pub use core::sync::atomic::Ordering;
        pub use loom::sync::atomic::*;
    }

    pub(crate) use loom::hint;

    #[cfg(test)]
    pub(crate) use loom::{model, sync, thread};
}

#[cfg(not(loom))]
mod inner {
    pub(crate) use core::sync::atomic;

    pub(crate) mod hint {
        #[inline(always)]
        pub(crate) fn spin_loop() {
            core::hint::spin_loop()
        }
    }
}
