use std::collections::VecDeque;

/// Rolling mean of user-acceleration magnitude over the last N samples.
///
/// A mean above the noise threshold raises the advisory low-accuracy flag;
/// it clears as soon as the mean drops back below.
pub struct AccuracyTracker {
    window: VecDeque<f64>,
    window_size: usize,
    noise_threshold: f64,
    low_accuracy: bool,
}

impl AccuracyTracker {
    pub fn new(window_size: usize, noise_threshold: f64) -> Self {
        let window_size = window_size.max(1);
        AccuracyTracker {
            window: VecDeque::with_capacity(window_size),
            window_size,
            noise_threshold,
            low_accuracy: false,
        }
    }

    /// Record a magnitude. Returns `Some(flag)` when the low-accuracy flag changes.
    pub fn record(&mut self, magnitude: f64) -> Option<bool> {
        self.window.push_back(magnitude);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let noisy = self.mean() > self.noise_threshold;
        if noisy != self.low_accuracy {
            self.low_accuracy = noisy;
            return Some(noisy);
        }
        None
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    pub fn is_low_accuracy(&self) -> bool {
        self.low_accuracy
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.low_accuracy = false;
    }
}
