/// Fixed-size ring of transmission quality samples.
///
/// The average only counts non-zero slots, so an explicit zero sample and a
/// slot that was never written look the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingAverage {
    samples: Vec<u8>,
    cursor: usize,
}

impl RingAverage {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)],
            cursor: 0,
        }
    }

    pub fn push(&mut self, value: u8) {
        self.samples[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.samples.len();
    }

    pub fn average(&self) -> u8 {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|s| **s != 0)
            .fold((0u32, 0u32), |(sum, count), s| (sum + u32::from(*s), count + 1));
        if count == 0 {
            return 0;
        }
        (sum / count) as u8
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }
}
