//! General conversion functions and utilities.

pub mod sine;

pub use sine::SineSource;

/// Run a real-time processing function. With the `assert_process_allocs` feature enabled in debug
/// builds, any allocation inside of `f` terminates the process. The binary is responsible for
/// installing `assert_no_alloc::AllocDisabler` as the global allocator for this to have any effect.
#[inline]
pub fn process_wrapper<T, F: FnOnce() -> T>(f: F) -> T {
    cfg_if::cfg_if! {
        if #[cfg(all(debug_assertions, feature = "assert_process_allocs"))] {
            assert_no_alloc::assert_no_alloc(f)
        } else {
            f()
        }
    }
}

/// Temporarily allow allocations within `func` when called from inside of
/// [`process_wrapper()`]. Only use this for things like logging.
#[inline]
pub fn permit_alloc<T, F: FnOnce() -> T>(func: F) -> T {
    cfg_if::cfg_if! {
        if #[cfg(all(debug_assertions, feature = "assert_process_allocs"))] {
            assert_no_alloc::permit_alloc(func)
        } else {
            func()
        }
    }
}

/// Convert a time delay in seconds to a phase angle in degrees for a signal of the given
/// frequency. No wrapping is applied.
#[inline]
pub fn delay_to_degrees(time_delay: f32, signal_frequency: f32) -> f32 {
    time_delay * signal_frequency * 360.0
}

/// The inverse of [`delay_to_degrees()`].
#[inline]
pub fn degrees_to_delay(phase_degrees: f32, signal_frequency: f32) -> f32 {
    (phase_degrees / 360.0) / signal_frequency
}
