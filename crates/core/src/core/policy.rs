//! Versioned linear-softmax policy over the fixed action set.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::topics::{Topic, TopicSet};

/// Topic multi-hot features followed by a constant bias feature.
pub const FEATURE_DIM: usize = Topic::COUNT + 1;

const BIAS: usize = Topic::COUNT;

/// Fixed-width state encoding of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector(pub [f32; FEATURE_DIM]);

impl StateVector {
    pub fn from_topics(topics: &TopicSet) -> Self {
        let mut x = [0.0f32; FEATURE_DIM];
        for t in topics {
            x[t.index()] = 1.0;
        }
        x[BIAS] = 1.0;
        Self(x)
    }

    #[inline]
    pub fn features(&self) -> &[f32; FEATURE_DIM] {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionProb {
    pub action: Action,
    pub probability: f32,
}

/// Logit weights: one row per action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyWeights {
    pub rows: [[f32; FEATURE_DIM]; Action::COUNT],
}

impl Default for PolicyWeights {
    /// All-zero weights: the uniform distribution for every state.
    fn default() -> Self {
        Self {
            rows: [[0.0; FEATURE_DIM]; Action::COUNT],
        }
    }
}

impl PolicyWeights {
    pub fn logits(&self, s: &StateVector) -> [f32; Action::COUNT] {
        let mut out = [0.0f32; Action::COUNT];
        for (o, row) in out.iter_mut().zip(self.rows.iter()) {
            *o = row.iter().zip(s.features()).map(|(w, x)| w * x).sum();
        }
        out
    }

    pub fn probabilities(&self, s: &StateVector) -> [f32; Action::COUNT] {
        softmax(&self.logits(s))
    }

    pub fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|w| w.is_finite())
    }
}

pub fn softmax(logits: &[f32; Action::COUNT]) -> [f32; Action::COUNT] {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut out = [0.0f32; Action::COUNT];
    let mut sum = 0.0f32;
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - max).exp();
        sum += *o;
    }
    for o in &mut out {
        *o /= sum;
    }
    out
}

/// An immutable trained policy.
///
/// `version` is the training-completion time in unix milliseconds and is the
/// key the policy is persisted and loaded under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u64,
    pub weights: PolicyWeights,
    #[serde(default)]
    pub episodes: usize,
    #[serde(default)]
    pub iterations: u32,
    /// Version this one was warm-started from, if any.
    #[serde(default)]
    pub parent_version: Option<u64>,
}

impl Policy {
    pub fn distribution(&self, s: &StateVector) -> Vec<ActionProb> {
        let p = self.weights.probabilities(s);
        Action::ALL
            .iter()
            .zip(p)
            .map(|(&action, probability)| ActionProb {
                action,
                probability,
            })
            .collect()
    }

    /// Highest-probability action; ties go to the earlier action in
    /// [`Action::ALL`].
    pub fn best(&self, s: &StateVector) -> ActionProb {
        let p = self.weights.probabilities(s);
        let mut best = 0;
        for (i, &prob) in p.iter().enumerate().skip(1) {
            if prob > p[best] {
                best = i;
            }
        }
        ActionProb {
            action: Action::ALL[best],
            probability: p[best],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encoding_is_multi_hot_with_bias() {
        let s = StateVector::from_topics(&TopicSet::from([
            Topic::InterestRates,
            Topic::LoanTypes,
        ]));
        let x = s.features();
        assert_eq!(x[Topic::InterestRates.index()], 1.0);
        assert_eq!(x[Topic::LoanTypes.index()], 1.0);
        assert_eq!(x[Topic::General.index()], 0.0);
        assert_eq!(x[FEATURE_DIM - 1], 1.0);
        assert_eq!(x.iter().sum::<f32>(), 3.0);
    }

    #[test]
    fn zero_weights_are_uniform() {
        let w = PolicyWeights::default();
        let s = StateVector::from_topics(&TopicSet::from([Topic::General]));
        for p in w.probabilities(&s) {
            assert!((p - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 999.0, -1000.0, 0.0]);
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p[0] > p[1]);
    }

    #[test]
    fn best_picks_max_probability() {
        let mut w = PolicyWeights::default();
        w.rows[Action::InterestRateInfo.index()][Topic::InterestRates.index()] = 2.0;
        let policy = Policy {
            version: 1,
            weights: w,
            episodes: 0,
            iterations: 0,
            parent_version: None,
        };
        let s = StateVector::from_topics(&TopicSet::from([Topic::InterestRates]));
        assert_eq!(policy.best(&s).action, Action::InterestRateInfo);

        let s = StateVector::from_topics(&TopicSet::from([Topic::General]));
        // Uniform: tie-break to first action.
        assert_eq!(policy.best(&s).action, Action::MortgageCalculator);
    }

    #[test]
    fn best_reaches_the_last_action() {
        let mut w = PolicyWeights::default();
        w.rows[Action::General.index()][FEATURE_DIM - 1] = 1.0;
        let policy = Policy {
            version: 1,
            weights: w,
            episodes: 0,
            iterations: 0,
            parent_version: None,
        };
        let s = StateVector::from_topics(&TopicSet::from([Topic::MortgageCalculation]));
        let best = policy.best(&s);
        assert_eq!(best.action, Action::General);
        assert_eq!(best.probability, policy.weights.probabilities(&s)[3]);
    }
}
