use crate::util::Interval;

/// A lookup table over evenly spaced buckets of the real number line.
#[derive(Clone, Debug)]
pub struct LookupTable<T> {
    offset: f64,
    step: f64,
    values: Vec<T>,
}

impl<T> LookupTable<T> {
    /// Creates a lookup table from a sample function, which is evaluated
    /// at the start of each bucket. Always holds at least one bucket.
    pub fn from_samples(range: Interval<f64>, step: f64, f: impl FnMut(f64) -> T) -> Self {
        let offset = range.min;
        let num_samples = usize::max((range.length() / step).ceil() as usize, 1);
        let xs = (0..num_samples).map(|i| offset + (i as f64) * step);
        let values = xs.map(f).collect();
        Self {
            offset,
            step,
            values,
        }
    }

    /// Samples the lookup table. Values outside the range map to the first or last bucket.
    pub fn sample(&self, x: f64) -> &T {
        let idx = (x - self.offset) / self.step;
        let idx = usize::min(idx as u32 as usize, self.values.len() - 1);
        &self.values[idx]
    }
}
