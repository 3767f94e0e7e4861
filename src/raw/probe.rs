// A linear probe sequence.
#[derive(Default)]
pub struct Probe {
    // The current index in the probe sequence.
    pub i: usize,
    // The current length of the probe sequence.
    pub len: usize,
}

impl Probe {
    // Initialize the probe sequence.
    #[inline]
    pub fn start(hash: usize, mask: usize) -> Probe {
        Probe {
            i: hash & mask,
            len: 0,
        }
    }

    // Increment the probe sequence.
    #[inline]
    pub fn next(&mut self, mask: usize) {
        self.len += 1;
        self.i = (self.i + 1) & mask;
    }
}

// The maximum probe length for table operations.
//
// An operation that probes past this limit either follows the successor
// table or triggers a resize, keeping probe chains short without having
// to load the table length on every insert.
#[inline]
pub fn limit(capacity: usize) -> usize {
    capacity.min((capacity >> 5) + 5)
}
