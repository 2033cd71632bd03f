use std::num::NonZeroU32;

/// Picks every Kth sample of a session for persistence.
#[derive(Debug, Clone)]
pub struct CheckpointThrottler {
    every: NonZeroU32,
    counter: u64,
}

impl CheckpointThrottler {
    pub fn new(every: NonZeroU32) -> Self {
        Self {
            every,
            counter: 0,
        }
    }

    /// Counts a sample. Returns true when it should be persisted.
    pub fn observe(&mut self) -> bool {
        self.counter += 1;
        self.counter % u64::from(self.every.get()) == 0
    }

    pub fn samples(&self) -> u64 {
        self.counter
    }

    pub fn every(&self) -> NonZeroU32 {
        self.every
    }
}
