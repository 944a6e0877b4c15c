//! Monotonic nanosecond clock shared by producer and consumer processes.
//!
//! Record timestamps and drop-episode bounds use `CLOCK_MONOTONIC` so both
//! sides of a mapping on the same host read the same timeline.

#[inline(always)]
pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
}
