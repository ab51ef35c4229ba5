use nalgebra::RealField;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub use nalgebra;

/// A real scalar type that the kernels can operate on.
///
/// In addition to the usual arithmetic provided by [`RealField`], a `Real` can be accumulated
/// atomically into shared storage. This is what the parallel scatter-add kernels rely on when
/// several elements contribute to the same global degree of freedom.
pub trait Real: RealField + Copy + Send + Sync + 'static {
    /// The atomic integer type with the same size and alignment as `Self`.
    type Atomic: Send + Sync;

    /// Reinterpret a mutable slice as a slice of atomics.
    ///
    /// The mutable borrow guarantees that no other (non-atomic) access to the data exists for
    /// the lifetime of the returned slice.
    fn atomic_view(values: &mut [Self]) -> &[Self::Atomic];

    /// Atomically perform `*target += value`.
    fn atomic_add(target: &Self::Atomic, value: Self);
}

const _: () = assert!(size_of::<AtomicU64>() == size_of::<f64>() && align_of::<AtomicU64>() == align_of::<f64>());
const _: () = assert!(size_of::<AtomicU32>() == size_of::<f32>() && align_of::<AtomicU32>() == align_of::<f32>());

impl Real for f64 {
    type Atomic = AtomicU64;

    fn atomic_view(values: &mut [Self]) -> &[Self::Atomic] {
        let len = values.len();
        // SAFETY: AtomicU64 has the same layout as f64 (checked above), and the exclusive borrow
        // rules out concurrent non-atomic access for the lifetime of the view
        unsafe { std::slice::from_raw_parts(values.as_mut_ptr() as *const AtomicU64, len) }
    }

    fn atomic_add(target: &Self::Atomic, value: Self) {
        let mut current = target.load(Ordering::Relaxed);
        loop {
            let new = (f64::from_bits(current) + value).to_bits();
            match target.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Real for f32 {
    type Atomic = AtomicU32;

    fn atomic_view(values: &mut [Self]) -> &[Self::Atomic] {
        let len = values.len();
        // SAFETY: see the f64 implementation
        unsafe { std::slice::from_raw_parts(values.as_mut_ptr() as *const AtomicU32, len) }
    }

    fn atomic_add(target: &Self::Atomic, value: Self) {
        let mut current = target.load(Ordering::Relaxed);
        loop {
            let new = (f32::from_bits(current) + value).to_bits();
            match target.compare_exchange_weak(current, new, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}
