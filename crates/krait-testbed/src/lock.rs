//! The double's interpreter lock.
//!
//! One process-wide mutex, locked by `gil_ensure` and unlocked by
//! `gil_release`. The layer under test serializes its own re-entrancy,
//! so the raw mutex never sees nested acquisition from one thread.
//! `run_forever` drops the lock while parked, exactly like the real
//! runtime does when its loop is idle.

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

static GIL: RawMutex = RawMutex::INIT;

pub(crate) fn acquire() {
    GIL.lock();
}

pub(crate) fn release() {
    unsafe { GIL.unlock() };
}
