// Throttled per-frame logging
//
// Acquire and present run every frame. Each hook keeps its own counters and
// logs only on every n-th call.

#[derive(Clone, Debug)]
pub struct SampledCounter {
    every: u64,
    count: u64,
}

impl SampledCounter {
    /// `every` of 0 is treated as 1 (log every call)
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            count: 0,
        }
    }

    /// Count one call. True when this call should be logged: the first one and
    /// every `every`-th after it.
    pub fn tick(&mut self) -> bool {
        let sampled = self.count % self.every == 0;
        self.count += 1;
        sampled
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn every(&self) -> u64 {
        self.every
    }
}
