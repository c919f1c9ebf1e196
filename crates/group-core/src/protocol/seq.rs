//! 16-bit sequence numbers with wraparound.

/// Half of the sequence space. A value more than this far below the last
/// one is taken as a wrapped counter.
pub const HALF_RANGE: i32 = 32768;

/// Returns true when `new` is a fresher sequence number than `old`.
///
/// `new` wins when it is larger, or when it is smaller by more than half
/// the range (the counter wrapped since `old` was recorded). A larger value
/// always wins, so once two values are more than half the range apart each
/// counts as fresher than the other.
///
/// # Examples
/// ```
/// use group_core::protocol::is_fresher;
///
/// assert!(is_fresher(5, 65530));
/// assert!(is_fresher(65530, 5));
/// assert!(!is_fresher(5, 100));
/// assert!(!is_fresher(7, 7));
/// ```
pub fn is_fresher(new: u16, old: u16) -> bool {
    let (new, old) = (new as i32, old as i32);
    new > old || new < old - HALF_RANGE
}

/// Monotonic wrapping counter used for INFO and GROUP_DATA sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqCounter {
    value: u16,
}

impl SeqCounter {
    pub fn new(value: u16) -> Self {
        Self { value }
    }

    /// Seed from wall-clock seconds, so a restarted node without stored
    /// state is unlikely to reuse a recently broadcast number.
    pub fn from_clock(now_ms: u64) -> Self {
        Self::new(((now_ms / 1000) % 65535) as u16)
    }

    /// Resume one past a persisted value.
    pub fn resume_after(stored: u16) -> Self {
        Self::new(stored.wrapping_add(1))
    }

    pub fn current(&self) -> u16 {
        self.value
    }

    /// Step forward and return the new value.
    pub fn advance(&mut self) -> u16 {
        self.value = self.value.wrapping_add(1);
        self.value
    }

    /// Return the current value and step past it.
    pub fn take(&mut self) -> u16 {
        let value = self.value;
        self.advance();
        value
    }

    /// The value most recently handed out by [`take`](Self::take).
    pub fn last_taken(&self) -> u16 {
        self.value.wrapping_sub(1)
    }
}
