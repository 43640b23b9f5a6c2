use std::f64::consts::PI;

/// Cosine annealing evaluated per epoch:
/// `min + (initial - min) * (1 + cos(pi * epoch / t_max)) / 2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineSchedule {
    initial: f64,
    min: f64,
    t_max: usize,
}

impl CosineSchedule {
    pub fn new(initial: f64, min: f64, t_max: usize) -> Self {
        Self {
            initial,
            min,
            t_max: t_max.max(1),
        }
    }

    /// Rate for the `epoch`-th epoch of the current run, counted from zero.
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        let progress = epoch as f64 / self.t_max as f64;
        self.min + (self.initial - self.min) * (1.0 + (PI * progress).cos()) / 2.0
    }
}
