//! Bounded, ordered sample window

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::perception::DetectionSample;

/// Hard cap for age-bounded windows
pub const MAX_WINDOW_SAMPLES: usize = 1024;

/// How a window decides what to forget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBound {
    /// Keep the last N samples
    Samples(usize),
    /// Keep samples no older than this, measured from the newest sample on push and
    /// from the caller's clock on [`VotingWindow::evict_stale`]
    Age(Duration),
}

impl Default for WindowBound {
    fn default() -> Self {
        Self::Samples(10)
    }
}

/// Recent samples for one query type, oldest first
#[derive(Debug, Clone)]
pub struct VotingWindow {
    bound: WindowBound,
    samples: VecDeque<DetectionSample>,
}

impl VotingWindow {
    #[must_use]
    pub fn new(bound: WindowBound) -> Self {
        let bound = match bound {
            WindowBound::Samples(n) => WindowBound::Samples(n.clamp(1, MAX_WINDOW_SAMPLES)),
            age @ WindowBound::Age(_) => age,
        };
        let capacity = match bound {
            WindowBound::Samples(n) => n,
            WindowBound::Age(_) => 32,
        };
        Self {
            bound,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, then evict from the front until the bound holds
    ///
    /// Eviction never looks at confidence or label.
    pub fn push(&mut self, sample: DetectionSample) {
        self.samples.push_back(sample);

        match self.bound {
            WindowBound::Samples(n) => {
                while self.samples.len() > n {
                    self.samples.pop_front();
                }
            }
            WindowBound::Age(_) => {
                if let Some(newest) = self.samples.back().map(|s| s.timestamp) {
                    self.evict_stale(newest);
                }
                while self.samples.len() > MAX_WINDOW_SAMPLES {
                    self.samples.pop_front();
                }
            }
        }
    }

    /// Drop samples older than the age bound as of `now`
    ///
    /// Count-bounded windows are left alone. Returns how many samples were dropped.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let WindowBound::Age(max_age) = self.bound else {
            return 0;
        };
        let before = self.samples.len();
        while self
            .samples
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.timestamp) > max_age)
        {
            self.samples.pop_front();
        }
        before - self.samples.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub const fn bound(&self) -> WindowBound {
        self.bound
    }

    /// Samples, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &DetectionSample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::perception::QueryType;

    fn sample(label: &str, at: Instant) -> DetectionSample {
        DetectionSample::labelled(QueryType::Identify, label, 0.9, None, at)
    }

    #[test]
    fn test_count_bound_evicts_oldest() {
        let now = Instant::now();
        let mut window = VotingWindow::new(WindowBound::Samples(3));
        for label in ["a", "b", "c", "d"] {
            window.push(sample(label, now));
        }
        assert_eq!(window.len(), 3);
        let labels: Vec<_> = window.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_age_bound_evicts_stale() {
        let start = Instant::now();
        let mut window = VotingWindow::new(WindowBound::Age(Duration::from_millis(500)));
        window.push(sample("a", start));
        window.push(sample("b", start + Duration::from_millis(300)));
        window.push(sample("c", start + Duration::from_millis(700)));

        let labels: Vec<_> = window.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c"]);
    }

    #[test]
    fn test_age_bound_expires_without_new_samples() {
        let start = Instant::now();
        let mut window = VotingWindow::new(WindowBound::Age(Duration::from_millis(500)));
        window.push(sample("a", start));
        window.push(sample("b", start + Duration::from_millis(200)));

        assert_eq!(window.evict_stale(start + Duration::from_millis(400)), 0);
        assert_eq!(window.evict_stale(start + Duration::from_millis(600)), 1);
        assert_eq!(window.evict_stale(start + Duration::from_secs(5)), 1);
        assert!(window.is_empty());

        let mut counted = VotingWindow::new(WindowBound::Samples(3));
        counted.push(sample("a", start));
        assert_eq!(counted.evict_stale(start + Duration::from_secs(60)), 0);
        assert_eq!(counted.len(), 1);
    }

    #[test]
    fn test_age_bound_has_hard_cap() {
        let now = Instant::now();
        let mut window = VotingWindow::new(WindowBound::Age(Duration::from_secs(60)));
        for _ in 0..MAX_WINDOW_SAMPLES + 10 {
            window.push(sample("a", now));
        }
        assert_eq!(window.len(), MAX_WINDOW_SAMPLES);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let mut window = VotingWindow::new(WindowBound::Samples(0));
        window.push(sample("a", Instant::now()));
        assert_eq!(window.len(), 1);
    }
}
