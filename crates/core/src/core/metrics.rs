//! Rolling performance statistics derived from feedback.
//!
//! Everything here is a pure function of the authoritative feedback history:
//! [`MetricsEngine::rebuild`] reproduces the same series from scratch that the
//! incremental path produced.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::graph::NodeId;
use crate::reward::{MAX_RATING, MIN_RATING};
use crate::topics::{Topic, TopicSet};

/// How repeat feedback for the same interaction enters the statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackPolicy {
    /// The most recent rating replaces the earlier one's contribution.
    #[default]
    Latest,
    /// Every submission counts as a separate rating event.
    Accumulate,
}

impl FeedbackPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "replace" => Some(Self::Latest),
            "accumulate" | "all" => Some(Self::Accumulate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Trailing window for `recent_average_rating`.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    #[serde(default)]
    pub feedback_policy: FeedbackPolicy,
}

fn default_recent_window() -> usize {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            recent_window: default_recent_window(),
            feedback_policy: FeedbackPolicy::default(),
        }
    }
}

fn empty_distribution() -> BTreeMap<u8, u32> {
    (MIN_RATING..=MAX_RATING).map(|r| (r, 0)).collect()
}

/// Per-event series plus the rating histogram.
///
/// Series are aligned: index `i` of every vector describes the state after
/// the `i`-th authoritative rating. With no feedback all series are empty and
/// `rating_distribution` has all five keys at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamps: Vec<f64>,
    pub ratings: Vec<u8>,
    pub average_ratings: Vec<f32>,
    pub accuracy: Vec<f32>,
    pub recent_average_rating: Vec<f32>,
    pub rating_distribution: BTreeMap<u8, u32>,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        Self {
            timestamps: Vec::new(),
            ratings: Vec::new(),
            average_ratings: Vec::new(),
            accuracy: Vec::new(),
            recent_average_rating: Vec::new(),
            rating_distribution: empty_distribution(),
        }
    }
}

impl PerformanceSnapshot {
    pub fn total(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn average_rating(&self) -> Option<f32> {
        self.average_ratings.last().copied()
    }

    pub fn recent_average(&self) -> Option<f32> {
        self.recent_average_rating.last().copied()
    }

    pub fn current_accuracy(&self) -> Option<f32> {
        self.accuracy.last().copied()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_feedback: self.total(),
            average_rating: self.average_rating(),
            recent_average_rating: self.recent_average(),
            accuracy: self.current_accuracy(),
            rating_distribution: self.rating_distribution.clone(),
        }
    }
}

/// Latest aggregates only; `None` means "no data", not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_feedback: usize,
    pub average_rating: Option<f32>,
    pub recent_average_rating: Option<f32>,
    pub accuracy: Option<f32>,
    pub rating_distribution: BTreeMap<u8, u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicStats {
    pub ratings: Vec<u8>,
    pub timestamps: Vec<f64>,
    pub average_ratings: Vec<f32>,
}

impl TopicStats {
    fn push(&mut self, timestamp: f64, rating: u8) {
        let n = self.ratings.len() as f32 + 1.0;
        let prev = self.average_ratings.last().copied().unwrap_or(0.0);
        self.ratings.push(rating);
        self.timestamps.push(timestamp);
        self.average_ratings.push(prev + (rating as f32 - prev) / n);
    }

    pub fn average_rating(&self) -> Option<f32> {
        self.average_ratings.last().copied()
    }
}

/// One rating as seen by the metrics engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingEvent {
    pub interaction_id: NodeId,
    pub timestamp: f64,
    pub rating: u8,
    pub topics: TopicSet,
}

#[derive(Debug, Clone)]
pub struct MetricsEngine {
    cfg: MetricsConfig,
    events: Vec<RatingEvent>,
    // interaction id -> position in `events`; only maintained under `Latest`.
    by_interaction: HashMap<NodeId, usize>,
    good: u32,
    performance: PerformanceSnapshot,
    topics: BTreeMap<Topic, TopicStats>,
}

impl MetricsEngine {
    pub fn new(cfg: MetricsConfig) -> Self {
        Self {
            cfg,
            events: Vec::new(),
            by_interaction: HashMap::new(),
            good: 0,
            performance: PerformanceSnapshot::default(),
            topics: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.cfg
    }

    /// Feed one rating. Returns `true` if it replaced an earlier rating for the
    /// same interaction (only possible under [`FeedbackPolicy::Latest`]).
    pub fn record(&mut self, event: RatingEvent) -> bool {
        if self.cfg.feedback_policy == FeedbackPolicy::Latest {
            if let Some(&pos) = self.by_interaction.get(&event.interaction_id) {
                self.events.remove(pos);
                self.events.push(event);
                self.rebuild();
                return true;
            }
            self.by_interaction
                .insert(event.interaction_id.clone(), self.events.len());
        }
        self.apply(&event);
        self.events.push(event);
        false
    }

    fn reindex(&mut self) {
        self.by_interaction.clear();
        if self.cfg.feedback_policy == FeedbackPolicy::Latest {
            for (i, ev) in self.events.iter().enumerate() {
                self.by_interaction.insert(ev.interaction_id.clone(), i);
            }
        }
    }

    fn apply(&mut self, ev: &RatingEvent) {
        let p = &mut self.performance;
        let n = p.ratings.len() as f32 + 1.0;
        let prev_avg = p.average_ratings.last().copied().unwrap_or(0.0);

        p.timestamps.push(ev.timestamp);
        p.ratings.push(ev.rating);
        p.average_ratings
            .push(prev_avg + (ev.rating as f32 - prev_avg) / n);

        if ev.rating >= 4 {
            self.good += 1;
        }
        p.accuracy.push(self.good as f32 / n * 100.0);

        let window = self.cfg.recent_window.max(1);
        let start = p.ratings.len().saturating_sub(window);
        let recent = &p.ratings[start..];
        let recent_sum: u32 = recent.iter().map(|&r| r as u32).sum();
        p.recent_average_rating
            .push(recent_sum as f32 / recent.len() as f32);

        *p.rating_distribution.entry(ev.rating).or_insert(0) += 1;

        for topic in &ev.topics {
            self.topics
                .entry(*topic)
                .or_default()
                .push(ev.timestamp, ev.rating);
        }
    }

    /// Recompute every series from the retained events.
    pub fn rebuild(&mut self) {
        self.good = 0;
        self.performance = PerformanceSnapshot::default();
        self.topics.clear();
        let events = std::mem::take(&mut self.events);
        for ev in &events {
            self.apply(ev);
        }
        self.events = events;
        self.reindex();
    }

    pub fn performance(&self) -> &PerformanceSnapshot {
        &self.performance
    }

    pub fn topics(&self) -> &BTreeMap<Topic, TopicStats> {
        &self.topics
    }

    pub fn summary(&self) -> MetricsSummary {
        self.performance.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(id: &str, t: f64, rating: u8, topics: &[Topic]) -> RatingEvent {
        RatingEvent {
            interaction_id: id.to_string(),
            timestamp: t,
            rating,
            topics: topics.iter().copied().collect(),
        }
    }

    #[test]
    fn cold_start_has_empty_series_and_zeroed_distribution() {
        let m = MetricsEngine::new(MetricsConfig::default());
        let p = m.performance();
        assert!(p.is_empty());
        assert!(p.average_ratings.is_empty());
        assert_eq!(p.rating_distribution.len(), 5);
        assert!(p.rating_distribution.values().all(|&c| c == 0));
        assert_eq!(m.summary().average_rating, None);
        assert!(m.topics().is_empty());
    }

    #[test]
    fn running_aggregates() {
        let mut m = MetricsEngine::new(MetricsConfig::default());
        m.record(ev("a", 1.0, 5, &[Topic::InterestRates]));
        m.record(ev("b", 2.0, 3, &[Topic::InterestRates, Topic::LoanTypes]));
        m.record(ev("c", 3.0, 4, &[Topic::General]));

        let p = m.performance();
        assert_eq!(p.ratings, vec![5, 3, 4]);
        assert_eq!(p.average_ratings, vec![5.0, 4.0, 4.0]);
        let acc = p.current_accuracy().unwrap();
        assert!((acc - 200.0 / 3.0).abs() < 1e-3);
        assert_eq!(p.rating_distribution[&5], 1);
        assert_eq!(p.rating_distribution[&3], 1);
        assert_eq!(p.rating_distribution.values().sum::<u32>(), 3);

        let rates = &m.topics()[&Topic::InterestRates];
        assert_eq!(rates.ratings, vec![5, 3]);
        assert_eq!(rates.average_rating(), Some(4.0));
        assert_eq!(m.topics()[&Topic::LoanTypes].ratings, vec![3]);
    }

    #[test]
    fn recent_average_uses_trailing_window() {
        let mut m = MetricsEngine::new(MetricsConfig {
            recent_window: 10,
            ..Default::default()
        });
        for i in 0..10 {
            m.record(ev(&format!("low{i}"), i as f64, 1, &[]));
        }
        for i in 0..10 {
            m.record(ev(&format!("high{i}"), 10.0 + i as f64, 5, &[]));
        }
        let p = m.performance();
        assert_eq!(p.recent_average(), Some(5.0));
        assert!((p.average_rating().unwrap() - 3.0).abs() < 1e-4);
        assert_eq!(p.recent_average_rating[10], (9.0 + 5.0) / 10.0);
    }

    #[test]
    fn latest_policy_replaces_prior_rating() {
        let mut m = MetricsEngine::new(MetricsConfig::default());
        assert!(!m.record(ev("a", 1.0, 1, &[Topic::General])));
        assert!(!m.record(ev("b", 2.0, 4, &[Topic::General])));
        assert!(m.record(ev("a", 3.0, 5, &[Topic::General])));

        let p = m.performance();
        assert_eq!(p.ratings, vec![4, 5]);
        assert_eq!(p.rating_distribution[&1], 0);
        assert_eq!(p.rating_distribution.values().sum::<u32>(), 2);
        assert_eq!(p.current_accuracy(), Some(100.0));
        assert_eq!(m.topics()[&Topic::General].ratings, vec![4, 5]);
    }

    #[test]
    fn accumulate_policy_counts_every_submission() {
        let mut m = MetricsEngine::new(MetricsConfig {
            feedback_policy: FeedbackPolicy::Accumulate,
            ..Default::default()
        });
        m.record(ev("a", 1.0, 1, &[]));
        assert!(!m.record(ev("a", 2.0, 5, &[])));
        assert_eq!(m.performance().ratings, vec![1, 5]);
        assert_eq!(
            m.performance().rating_distribution.values().sum::<u32>(),
            2
        );
    }

    #[test]
    fn rebuild_matches_incremental() {
        let mut m = MetricsEngine::new(MetricsConfig::default());
        for (i, r) in [2u8, 5, 4, 1, 3, 5].into_iter().enumerate() {
            m.record(ev(&i.to_string(), i as f64, r, &[Topic::LoanTypes]));
        }
        let before = m.performance().clone();
        let before_topics = m.topics().clone();
        m.rebuild();
        assert_eq!(m.performance(), &before);
        assert_eq!(m.topics(), &before_topics);
    }

    #[test]
    fn large_history_replays_with_indexed_replacement() {
        let mut m = MetricsEngine::new(MetricsConfig::default());
        let n = 50_000usize;
        for i in 0..n {
            let rating = 1 + (i % 5) as u8;
            assert!(!m.record(ev(&format!("i{i}"), i as f64, rating, &[])));
        }
        assert_eq!(m.performance().total(), n);
        assert_eq!(m.by_interaction.len(), n);

        // Replacing shifts positions; later lookups must still land.
        assert!(m.record(ev("i0", n as f64, 5, &[])));
        assert!(m.record(ev("i49999", n as f64 + 1.0, 1, &[])));
        assert!(m.record(ev("i1", n as f64 + 2.0, 4, &[])));
        assert!(!m.record(ev("fresh", n as f64 + 3.0, 3, &[])));

        let p = m.performance();
        assert_eq!(p.total(), n + 1);
        assert_eq!(p.rating_distribution.values().sum::<u32>(), (n + 1) as u32);
        assert_eq!(&p.ratings[p.total() - 4..], &[5, 1, 4, 3]);
        for (i, e) in m.events.iter().enumerate() {
            assert_eq!(m.by_interaction[&e.interaction_id], i);
        }
    }

    #[test]
    fn accumulate_policy_keeps_no_index() {
        let mut m = MetricsEngine::new(MetricsConfig {
            feedback_policy: FeedbackPolicy::Accumulate,
            ..Default::default()
        });
        m.record(ev("a", 1.0, 3, &[]));
        m.rebuild();
        assert!(m.by_interaction.is_empty());
    }
}
