//! Per-device frame sequence numbers

use std::collections::HashMap;

use homiq_protocol::FrameId;

/// Rolling sequence ids for frames originated by simulated devices
///
/// The first id handed out for an address is 1; after 511 it wraps to 1.
#[derive(Debug, Default)]
pub struct SequenceCounters {
    last: HashMap<String, FrameId>,
}

impl SequenceCounters {
    /// Create with no history
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `address`
    pub fn next(&mut self, address: &str) -> FrameId {
        let id = match self.last.get(address) {
            Some(last) => last.next(),
            None => FrameId::MIN,
        };
        self.last.insert(address.to_string(), id);
        id
    }

    /// Last id handed out for `address`
    pub fn last(&self, address: &str) -> Option<FrameId> {
        self.last.get(address).copied()
    }

    /// Pretend `id` was the last one handed out
    pub fn set_last(&mut self, address: &str, id: FrameId) {
        self.last.insert(address.to_string(), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_id_is_one() {
        let mut seq = SequenceCounters::new();
        assert_eq!(seq.next("01").get(), 1);
        assert_eq!(seq.next("01").get(), 2);
    }

    #[test]
    fn test_counters_are_per_device() {
        let mut seq = SequenceCounters::new();
        seq.next("01");
        seq.next("01");
        assert_eq!(seq.next("02").get(), 1);
        assert_eq!(seq.last("01").map(FrameId::get), Some(2));
    }

    #[test]
    fn test_wraps_after_511() {
        let mut seq = SequenceCounters::new();
        seq.set_last("01", FrameId::MAX);
        assert_eq!(seq.next("01").get(), 1);
    }
}
