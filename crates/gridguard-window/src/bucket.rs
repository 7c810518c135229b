/// One fixed-duration time slot of a rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bucket {
    /// Sum of every value added while this slot was current.
    pub sum: f64,
    /// Number of values added while this slot was current.
    pub count: u64,
    /// Start of the slot, in clock milliseconds.
    pub start: i64,
}

impl Bucket {
    /// An empty bucket covering the slot starting at `start`.
    pub fn empty(start: i64) -> Self {
        Self {
            sum: 0.0,
            count: 0,
            start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean of the values in this bucket, if any were added.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn reset(&mut self, start: i64) {
        *self = Self::empty(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_bucket_is_none() {
        assert_eq!(Bucket::empty(0).mean(), None);
    }

    #[test]
    fn add_and_reset() {
        let mut b = Bucket::empty(100);
        b.add(4.0);
        b.add(8.0);
        assert_eq!(b.count, 2);
        assert_eq!(b.mean(), Some(6.0));

        b.reset(200);
        assert!(b.is_empty());
        assert_eq!(b.sum, 0.0);
        assert_eq!(b.start, 200);
    }
}
