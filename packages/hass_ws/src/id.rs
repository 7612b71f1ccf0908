use std::sync::atomic::{AtomicI64, Ordering};

/// Ids start at 1; an inbound frame without an `id` never matches a call.
static NEXT_ID: AtomicI64 = AtomicI64::new(1);

/// Allocate the next message id.
///
/// Process-wide and monotonically increasing, so ids stay unique even when
/// several sessions are open at once.
pub fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
