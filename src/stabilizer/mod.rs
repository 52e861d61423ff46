//! Temporal voting over per-frame samples
//!
//! Every frame contributes one [`DetectionSample`] per query type. The stabilizer keeps a
//! bounded window per query and turns it into a [`StabilizedResult`] on demand by majority
//! vote. Ingest never fails and never blocks, so the capture loop can feed it
//! unconditionally.

mod window;

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde::Serialize;

use crate::perception::{BoundingBox, DetectionSample, NO_OBSERVATION, QueryType, is_sentinel_label};

pub use window::{MAX_WINDOW_SAMPLES, VotingWindow, WindowBound};

/// Voting parameters
#[derive(Debug, Clone, PartialEq)]
pub struct StabilizerConfig {
    /// Winner's share of the window needed for a stable result
    pub majority_threshold: f64,
    /// Window fill needed before any result can be stable
    pub min_samples_for_stable: usize,
    /// Per-query window bound; queries not listed use [`WindowBound::default`]
    pub windows: BTreeMap<QueryType, WindowBound>,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            majority_threshold: 0.5,
            min_samples_for_stable: 5,
            windows: BTreeMap::new(),
        }
    }
}

/// Current decision for one query type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StabilizedResult {
    pub query: QueryType,
    pub label: String,
    /// Decided count, only for [`QueryType::Count`]
    pub count: Option<u32>,
    /// Most common item label behind a count decision
    pub subject: Option<String>,
    /// Latest box seen for the winning label
    pub bbox: Option<BoundingBox>,
    pub support_count: usize,
    pub window_size: usize,
    pub mean_confidence: f32,
    pub is_stable: bool,
}

impl StabilizedResult {
    fn empty(query: QueryType) -> Self {
        Self {
            query,
            label: NO_OBSERVATION.to_string(),
            count: None,
            subject: None,
            bbox: None,
            support_count: 0,
            window_size: 0,
            mean_confidence: 0.0,
            is_stable: false,
        }
    }

    /// Stable and carrying real content (not a sentinel)
    #[must_use]
    pub fn is_announceable(&self) -> bool {
        self.is_stable && !is_sentinel_label(&self.label)
    }

    /// Winner's share of the window
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn vote_share(&self) -> f64 {
        if self.window_size == 0 {
            0.0
        } else {
            self.support_count as f64 / self.window_size as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VoteKey {
    Count(u32),
    Label(String),
}

#[derive(Debug, Default)]
struct Tally<'a> {
    votes: usize,
    confidence_sum: f64,
    last_seen: usize,
    bbox: Option<BoundingBox>,
    subjects: HashMap<&'a str, usize>,
}

/// Owns one voting window per query type
#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizerConfig,
    windows: HashMap<QueryType, VotingWindow>,
}

impl Stabilizer {
    #[must_use]
    pub fn new(config: StabilizerConfig) -> Self {
        let windows = QueryType::ALL
            .iter()
            .map(|&q| {
                let bound = config.windows.get(&q).copied().unwrap_or_default();
                (q, VotingWindow::new(bound))
            })
            .collect();
        Self { config, windows }
    }

    #[must_use]
    pub const fn config(&self) -> &StabilizerConfig {
        &self.config
    }

    /// Append a sample to the query's window
    pub fn ingest(&mut self, query: QueryType, sample: DetectionSample) {
        if sample.query != query {
            tracing::debug!(
                query = %query,
                sample_query = %sample.query,
                "sample filed under a different query"
            );
        }
        self.windows
            .entry(query)
            .or_insert_with(|| VotingWindow::new(WindowBound::default()))
            .push(sample);
    }

    /// Ingest a batch, filing each sample under its own query
    pub fn ingest_all(&mut self, samples: impl IntoIterator<Item = DetectionSample>) {
        for sample in samples {
            self.ingest(sample.query, sample);
        }
    }

    #[must_use]
    pub fn window(&self, query: QueryType) -> Option<&VotingWindow> {
        self.windows.get(&query)
    }

    /// Majority vote over the query's window
    ///
    /// Ties go to the label with the higher confidence sum, then to the one seen most
    /// recently. Count votes tied on frequency resolve to the median of the tied counts,
    /// rounded down.
    #[must_use]
    pub fn current_result(&self, query: QueryType) -> StabilizedResult {
        let Some(window) = self.windows.get(&query).filter(|w| !w.is_empty()) else {
            return StabilizedResult::empty(query);
        };

        let mut tallies: HashMap<VoteKey, Tally<'_>> = HashMap::new();
        for (idx, sample) in window.iter().enumerate() {
            let key = match sample.count {
                Some(n) if query == QueryType::Count => VoteKey::Count(n),
                _ => VoteKey::Label(sample.label.clone()),
            };
            let tally = tallies.entry(key).or_default();
            tally.votes += 1;
            tally.confidence_sum += f64::from(sample.confidence);
            tally.last_seen = idx;
            if sample.bbox.is_some() {
                tally.bbox = sample.bbox;
            }
            *tally.subjects.entry(sample.label.as_str()).or_default() += 1;
        }

        let top_votes = tallies.values().map(|t| t.votes).max().unwrap_or(0);
        let tied: Vec<(&VoteKey, &Tally<'_>)> =
            tallies.iter().filter(|(_, t)| t.votes == top_votes).collect();

        let decision = median_count(&tied).or_else(|| {
            tied.iter()
                .max_by(|a, b| {
                    a.1.confidence_sum
                        .total_cmp(&b.1.confidence_sum)
                        .then(a.1.last_seen.cmp(&b.1.last_seen))
                })
                .map(|(key, tally)| Decision::single(key, tally))
        });
        let Some(decision) = decision else {
            return StabilizedResult::empty(query);
        };

        let window_size = window.len();
        #[allow(clippy::cast_precision_loss)]
        let share = decision.support as f64 / window_size as f64;
        let is_stable =
            window_size >= self.config.min_samples_for_stable && share >= self.config.majority_threshold;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let mean_confidence = (decision.confidence_sum / decision.samples.max(1) as f64) as f32;

        let (label, count, subject) = match decision.key {
            VoteKey::Count(n) => {
                let subject = decision
                    .subjects
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                    .map(|(s, _)| (*s).to_string());
                (n.to_string(), Some(n), subject)
            }
            VoteKey::Label(l) => (l, None, None),
        };

        StabilizedResult {
            query,
            label,
            count,
            subject,
            bbox: decision.bbox,
            support_count: decision.support,
            window_size,
            mean_confidence,
            is_stable,
        }
    }

    /// Age out samples in age-bounded windows, even when no new frame arrived
    pub fn expire(&mut self, now: Instant) {
        for (query, window) in &mut self.windows {
            let dropped = window.evict_stale(now);
            if dropped > 0 {
                tracing::trace!(query = %query, dropped, "stale samples expired");
            }
        }
    }

    /// Drop every sample
    pub fn clear(&mut self) {
        for window in self.windows.values_mut() {
            window.clear();
        }
    }
}

/// Winning value with the votes that back it
#[derive(Debug)]
struct Decision<'a> {
    key: VoteKey,
    /// Votes credited to the winner, used for the majority share
    support: usize,
    confidence_sum: f64,
    /// Samples behind `confidence_sum`
    samples: usize,
    bbox: Option<BoundingBox>,
    subjects: HashMap<&'a str, usize>,
}

impl<'a> Decision<'a> {
    fn single(key: &VoteKey, tally: &Tally<'a>) -> Self {
        Self {
            key: key.clone(),
            support: tally.votes,
            confidence_sum: tally.confidence_sum,
            samples: tally.votes,
            bbox: tally.bbox,
            subjects: tally.subjects.clone(),
        }
    }
}

/// Median of count votes tied on frequency, rounded down
///
/// The median may be a value nobody voted for (`[2, 4]` decides 3). It is credited with the
/// shared top frequency, and confidence and subject are pooled over all tied votes.
fn median_count<'a>(tied: &[(&VoteKey, &Tally<'a>)]) -> Option<Decision<'a>> {
    if tied.len() < 2 {
        return None;
    }
    let mut counts = tied
        .iter()
        .map(|(k, _)| match k {
            VoteKey::Count(n) => Some(*n),
            VoteKey::Label(_) => None,
        })
        .collect::<Option<Vec<u32>>>()?;
    counts.sort_unstable();

    let mid = counts.len() / 2;
    let median = if counts.len().is_multiple_of(2) {
        let (lo, hi) = (u64::from(counts[mid - 1]), u64::from(counts[mid]));
        u32::try_from((lo + hi) / 2).unwrap_or(u32::MAX)
    } else {
        counts[mid]
    };

    let mut subjects: HashMap<&'a str, usize> = HashMap::new();
    for (subject, n) in tied.iter().flat_map(|(_, t)| t.subjects.iter()) {
        *subjects.entry(*subject).or_default() += n;
    }

    Some(Decision {
        key: VoteKey::Count(median),
        support: tied[0].1.votes,
        confidence_sum: tied.iter().map(|(_, t)| t.confidence_sum).sum(),
        samples: tied.iter().map(|(_, t)| t.votes).sum(),
        bbox: None,
        subjects,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::perception::UNAVAILABLE;

    fn stabilizer(threshold: f64, min_samples: usize) -> Stabilizer {
        Stabilizer::new(StabilizerConfig {
            majority_threshold: threshold,
            min_samples_for_stable: min_samples,
            windows: BTreeMap::new(),
        })
    }

    fn label(label: &str, conf: f32) -> DetectionSample {
        DetectionSample::labelled(QueryType::Identify, label, conf, None, Instant::now())
    }

    fn count(n: u32) -> DetectionSample {
        DetectionSample::counted("bottle", n, 0.8, Instant::now())
    }

    #[test]
    fn test_empty_window_is_unstable() {
        let result = stabilizer(0.5, 1).current_result(QueryType::Identify);
        assert_eq!(result.label, NO_OBSERVATION);
        assert!(!result.is_stable);
        assert_eq!(result.window_size, 0);
    }

    #[test]
    fn test_tie_goes_to_higher_confidence_sum() {
        let mut s = stabilizer(0.5, 1);
        s.ingest(QueryType::Identify, label("cat", 0.9));
        s.ingest(QueryType::Identify, label("dog", 0.5));
        s.ingest(QueryType::Identify, label("dog", 0.5));
        s.ingest(QueryType::Identify, label("cat", 0.9));
        assert_eq!(s.current_result(QueryType::Identify).label, "cat");
    }

    #[test]
    fn test_tie_on_confidence_goes_to_most_recent() {
        let mut s = stabilizer(0.5, 1);
        s.ingest(QueryType::Identify, label("cat", 0.5));
        s.ingest(QueryType::Identify, label("dog", 0.5));
        assert_eq!(s.current_result(QueryType::Identify).label, "dog");
    }

    #[test]
    fn test_count_tie_odd_set_takes_middle_value() {
        let mut s = stabilizer(0.1, 1);
        for n in [5, 2, 3, 5, 2, 3] {
            s.ingest(QueryType::Count, count(n));
        }
        let result = s.current_result(QueryType::Count);
        assert_eq!(result.count, Some(3));
        assert_eq!(result.label, "3");
        assert_eq!(result.subject.as_deref(), Some("bottle"));
    }

    #[test]
    fn test_count_tie_even_set_rounds_mean_of_middle_down() {
        let mut s = stabilizer(0.0, 1);
        for n in [2, 4, 2, 4] {
            s.ingest(QueryType::Count, count(n));
        }
        let result = s.current_result(QueryType::Count);
        assert_eq!(result.count, Some(3));
        assert_eq!(result.label, "3");
        assert_eq!(result.support_count, 2);
        assert_eq!(result.subject.as_deref(), Some("bottle"));
        assert!((result.mean_confidence - 0.8).abs() < 1e-6);

        let mut s = stabilizer(0.0, 1);
        for n in [1, 6, 2, 3, 1, 6, 2, 3] {
            s.ingest(QueryType::Count, count(n));
        }
        // tied {1, 2, 3, 6}: (2 + 3) / 2
        assert_eq!(s.current_result(QueryType::Count).count, Some(2));
    }

    #[test]
    fn test_count_mode() {
        let mut s = stabilizer(0.5, 4);
        for n in [2, 2, 2, 3] {
            s.ingest(QueryType::Count, count(n));
        }
        let result = s.current_result(QueryType::Count);
        assert_eq!(result.count, Some(2));
        assert_eq!(result.support_count, 3);
        assert!(result.is_stable);
    }

    #[test]
    fn test_stable_sentinel_is_not_announceable() {
        let mut s = stabilizer(0.5, 2);
        for _ in 0..3 {
            s.ingest(
                QueryType::Banknote,
                DetectionSample::unavailable(QueryType::Banknote, Instant::now()),
            );
        }
        let result = s.current_result(QueryType::Banknote);
        assert_eq!(result.label, UNAVAILABLE);
        assert!(result.is_stable);
        assert!(!result.is_announceable());
    }

    #[test]
    fn test_expired_votes_stop_being_stable() {
        let start = Instant::now();
        let mut s = Stabilizer::new(StabilizerConfig {
            majority_threshold: 0.5,
            min_samples_for_stable: 2,
            windows: BTreeMap::from([(QueryType::Obstacle, WindowBound::Age(Duration::from_secs(1)))]),
        });
        for _ in 0..3 {
            s.ingest(
                QueryType::Obstacle,
                DetectionSample::labelled(QueryType::Obstacle, "clear", 1.0, None, start),
            );
        }
        s.ingest(QueryType::Identify, label("cat", 0.9));
        assert!(s.current_result(QueryType::Obstacle).is_stable);

        s.expire(start + Duration::from_secs(2));
        let result = s.current_result(QueryType::Obstacle);
        assert_eq!(result.window_size, 0);
        assert!(!result.is_stable);
        assert_eq!(s.current_result(QueryType::Identify).window_size, 1);
    }

    #[test]
    fn test_windows_are_independent() {
        let mut s = stabilizer(0.5, 1);
        s.ingest(QueryType::Identify, label("cat", 0.9));
        assert_eq!(s.current_result(QueryType::Price).window_size, 0);
        assert_eq!(s.current_result(QueryType::Identify).window_size, 1);
    }
}
