//! Monotonic timestamping.
//!
//! Event timestamps, integration timestamps and poll deadlines all use the
//! same monotonic nanosecond clock so that interval arithmetic is immune to
//! wall-clock adjustments.

/// Nanoseconds since an arbitrary fixed point, from `CLOCK_MONOTONIC`.
pub fn monotonic_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer and CLOCK_MONOTONIC cannot fail.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}
