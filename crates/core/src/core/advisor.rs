use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::policy::{ActionProb, Policy, StateVector};
use crate::topics::TopicSet;

/// A bounded, advisory integration point.
///
/// This is intentionally *not* an action selector: the reasoning engine
/// decides what to do, and the suggestion is recorded next to its choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Attach the current suggestion to each recorded interaction.
    #[serde(default = "default_true")]
    pub attach_to_interactions: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            attach_to_interactions: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub action: Action,
    pub probability: f32,
    #[serde(default)]
    pub distribution: Vec<ActionProb>,
    /// No policy has been trained yet; `action` is the fixed fallback.
    #[serde(default)]
    pub untrained: bool,
    #[serde(default)]
    pub policy_version: Option<u64>,
}

impl Suggestion {
    pub fn untrained() -> Self {
        Self {
            action: Action::General,
            probability: 1.0,
            distribution: vec![ActionProb {
                action: Action::General,
                probability: 1.0,
            }],
            untrained: true,
            policy_version: None,
        }
    }

    /// One-line rendering for a "thinking" panel.
    pub fn thinking_line(&self) -> String {
        if self.untrained {
            return "Policy: untrained (defaulting to general response)".to_string();
        }
        match self.action {
            Action::General => format!(
                "Suggest: General response (p={:.2})",
                self.probability
            ),
            tool => format!("Suggest: Use {} (p={:.2})", tool, self.probability),
        }
    }
}

/// Holds the current policy behind an atomically swappable pointer.
///
/// Readers never wait on writers: `suggest` loads whichever policy is current
/// and works on that immutable snapshot.
#[derive(Debug, Default)]
pub struct PolicyAdvisor {
    current: ArcSwapOption<Policy>,
}

impl PolicyAdvisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: Policy) -> Self {
        Self {
            current: ArcSwapOption::from_pointee(policy),
        }
    }

    pub fn current(&self) -> Option<Arc<Policy>> {
        self.current.load_full()
    }

    pub fn version(&self) -> Option<u64> {
        self.current.load_full().map(|p| p.version)
    }

    /// Replace the current policy; returns the one it displaced.
    pub fn install(&self, policy: Arc<Policy>) -> Option<Arc<Policy>> {
        self.current.swap(Some(policy))
    }

    pub fn suggest(&self, state: &StateVector) -> Suggestion {
        let guard = self.current.load();
        let Some(policy) = &*guard else {
            return Suggestion::untrained();
        };
        let best = policy.best(state);
        Suggestion {
            action: best.action,
            probability: best.probability,
            distribution: policy.distribution(state),
            untrained: false,
            policy_version: Some(policy.version),
        }
    }

    pub fn suggest_for_topics(&self, topics: &TopicSet) -> Suggestion {
        self.suggest(&StateVector::from_topics(topics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyWeights;
    use crate::topics::Topic;

    fn policy(version: u64) -> Policy {
        let mut w = PolicyWeights::default();
        w.rows[Action::MortgageCalculator.index()][Topic::MortgageCalculation.index()] = 3.0;
        Policy {
            version,
            weights: w,
            episodes: 10,
            iterations: 1,
            parent_version: None,
        }
    }

    #[test]
    fn untrained_falls_back_to_general() {
        let adv = PolicyAdvisor::new();
        let s = adv.suggest_for_topics(&TopicSet::from([Topic::MortgageCalculation]));
        assert!(s.untrained);
        assert_eq!(s.action, Action::General);
        assert_eq!(s.probability, 1.0);
        assert_eq!(s.policy_version, None);
        assert!(s.thinking_line().contains("untrained"));
    }

    #[test]
    fn trained_policy_suggests_top_action() {
        let adv = PolicyAdvisor::with_policy(policy(7));
        let s = adv.suggest_for_topics(&TopicSet::from([Topic::MortgageCalculation]));
        assert!(!s.untrained);
        assert_eq!(s.action, Action::MortgageCalculator);
        assert_eq!(s.policy_version, Some(7));
        assert_eq!(s.distribution.len(), Action::COUNT);
        let total: f32 = s.distribution.iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(s.thinking_line().starts_with("Suggest: Use mortgage_calculator"));
    }

    #[test]
    fn install_swaps_and_returns_previous() {
        let adv = PolicyAdvisor::with_policy(policy(1));
        let prev = adv.install(Arc::new(policy(2)));
        assert_eq!(prev.map(|p| p.version), Some(1));
        assert_eq!(adv.version(), Some(2));
    }
}
