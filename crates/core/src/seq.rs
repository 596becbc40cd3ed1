//! Sequence number freshness.

/// Returns true when `new` is fresher than `old`.
///
/// An unknown old value (0) accepts anything, a zero new value is never
/// fresh, and otherwise `new` must be ahead of `old` by less than half the
/// sequence space. There is no wraparound acceptance: a smaller `new` is
/// always stale.
pub fn is_seq_new(old: u32, new: u32) -> bool {
    if old == 0 {
        return true;
    }
    if new == 0 {
        return false;
    }
    new > old && new - old < (1u32 << 31)
}
