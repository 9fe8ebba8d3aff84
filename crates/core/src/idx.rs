use std::fmt::Debug;
use std::iter::{Step, Sum};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A pixel/block index usable as an array subscript and as an atomic counter.
///
/// Mirrors the generic index abstraction used throughout the rest of the
/// engine: algorithms are written once against `Idx` and instantiated for
/// `u32` (the common case, images up to 2^32 pixels) or `usize` (when the
/// caller needs the full native width).
pub trait Idx:
    Copy
    + std::ops::Add<Output = Self>
    + std::ops::AddAssign
    + std::ops::Sub<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Mul<Output = Self>
    + Ord
    + Debug
    + Send
    + Sum
    + Sync
    + Sized
    + Step
    + 'static
{
    type Atomic: AtomicIdx<Inner = Self>;

    fn new(idx: usize) -> Self;

    fn zero() -> Self;

    fn one() -> Self;

    fn index(self) -> usize;

    fn atomic(self) -> Self::Atomic;
}

pub trait AtomicIdx: Send + Sync {
    type Inner: Idx<Atomic = Self>;

    fn load(&self, order: Ordering) -> Self::Inner;

    fn store(&self, val: Self::Inner, order: Ordering);

    fn fetch_add(&self, val: Self::Inner, order: Ordering) -> Self::Inner;

    fn compare_exchange_weak(
        &self,
        current: Self::Inner,
        new: Self::Inner,
        order: Ordering,
    ) -> Result<Self::Inner, Self::Inner>;

    fn zero() -> Self;
}

macro_rules! impl_idx {
    ($ty:ty, $atomic:ty) => {
        impl Idx for $ty {
            type Atomic = $atomic;

            #[inline]
            fn new(idx: usize) -> Self {
                assert!(idx <= <$ty>::MAX as usize, "index out of range for index type");
                idx as $ty
            }

            #[inline]
            fn zero() -> Self {
                0
            }

            #[inline]
            fn one() -> Self {
                1
            }

            #[inline]
            fn index(self) -> usize {
                self as usize
            }

            #[inline]
            fn atomic(self) -> $atomic {
                <$atomic>::new(self)
            }
        }

        impl AtomicIdx for $atomic {
            type Inner = $ty;

            #[inline]
            fn load(&self, order: Ordering) -> Self::Inner {
                <$atomic>::load(self, order)
            }

            #[inline]
            fn store(&self, val: Self::Inner, order: Ordering) {
                <$atomic>::store(self, val, order)
            }

            #[inline]
            fn fetch_add(&self, val: Self::Inner, order: Ordering) -> Self::Inner {
                <$atomic>::fetch_add(self, val, order)
            }

            #[inline]
            fn compare_exchange_weak(
                &self,
                current: Self::Inner,
                new: Self::Inner,
                order: Ordering,
            ) -> Result<Self::Inner, Self::Inner> {
                <$atomic>::compare_exchange_weak(self, current, new, order, Ordering::Relaxed)
            }

            #[inline]
            fn zero() -> Self {
                <$atomic>::new(0)
            }
        }
    };
}

impl_idx!(u32, AtomicU32);
impl_idx!(usize, AtomicUsize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_roundtrips() {
        assert_eq!(u32::new(7).index(), 7);
        assert_eq!(usize::new(7).index(), 7);
    }

    #[test]
    #[should_panic]
    fn new_rejects_overflow() {
        u32::new(usize::MAX);
    }
}
