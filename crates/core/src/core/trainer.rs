//! Proximal Policy Optimization over single-step episodes.
//!
//! Every rated interaction is an independent one-step decision, so returns are
//! just rewards and there is no discounting. The advantage is `r - V(s)` with
//! a linear value baseline fitted alongside the policy.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::Action;
use crate::graph::{InteractionGraph, NodeId};
use crate::policy::{PolicyWeights, StateVector, FEATURE_DIM};

// Keeps logits bounded so probabilities never underflow to exact zero.
const WEIGHT_LIMIT: f32 = 20.0;

const PROB_FLOOR: f32 = 1e-30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Minimum rated interactions before `train()` will run.
    #[serde(default = "default_min_episodes")]
    pub min_episodes: usize,
    /// Outer PPO updates; each freezes the behaviour policy once.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Full-batch gradient steps per update.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default = "default_value_learning_rate")]
    pub value_learning_rate: f32,
    #[serde(default = "default_clip_epsilon")]
    pub clip_epsilon: f32,
    #[serde(default = "default_entropy_coef")]
    pub entropy_coef: f32,
}

fn default_min_episodes() -> usize {
    5
}

fn default_iterations() -> u32 {
    20
}

fn default_epochs() -> u32 {
    4
}

fn default_learning_rate() -> f32 {
    0.5
}

fn default_value_learning_rate() -> f32 {
    0.5
}

fn default_clip_epsilon() -> f32 {
    0.2
}

fn default_entropy_coef() -> f32 {
    0.01
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_episodes: default_min_episodes(),
            iterations: default_iterations(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            value_learning_rate: default_value_learning_rate(),
            clip_epsilon: default_clip_epsilon(),
            entropy_coef: default_entropy_coef(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub interaction_id: NodeId,
    pub state: StateVector,
    pub action: Action,
    pub reward: f32,
}

/// One episode per interaction that has feedback; the most recent feedback's
/// reward is used when there are several.
pub fn build_episodes(graph: &InteractionGraph) -> Vec<Episode> {
    graph
        .interactions()
        .filter_map(|(id, interaction)| {
            let fb = graph.latest_feedback(id)?;
            Some(Episode {
                interaction_id: id.clone(),
                state: StateVector::from_topics(&interaction.topics),
                action: interaction.rl_action(),
                reward: fb.reward,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub episodes: usize,
    pub iterations: u32,
    pub mean_reward: f32,
    /// Mean clipped surrogate objective in the final epoch.
    pub surrogate: f32,
    /// Approximate KL(old || new) of the last update.
    pub approx_kl: f32,
    /// Fraction of episodes whose ratio was clipped in the final epoch.
    pub clip_fraction: f32,
}

#[derive(Debug, Clone)]
pub struct PpoTrainer {
    cfg: TrainerConfig,
}

struct EpochStats {
    surrogate: f32,
    clipped: usize,
}

impl PpoTrainer {
    pub fn new(cfg: TrainerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.cfg
    }

    /// Run the optimization starting from `init`. Never mutates `init`.
    pub fn optimize(
        &self,
        init: &PolicyWeights,
        episodes: &[Episode],
    ) -> (PolicyWeights, TrainingReport) {
        let n = episodes.len();
        let mut report = TrainingReport {
            episodes: n,
            ..Default::default()
        };
        if n == 0 {
            return (*init, report);
        }
        report.mean_reward = episodes.iter().map(|e| e.reward).sum::<f32>() / n as f32;

        let mut weights = *init;
        let mut value = [0.0f32; FEATURE_DIM];

        for it in 0..self.cfg.iterations {
            let old_probs: Vec<f32> = episodes
                .iter()
                .map(|e| weights.probabilities(&e.state)[e.action.index()])
                .collect();
            let advantages: Vec<f32> = episodes
                .iter()
                .map(|e| e.reward - dot(&value, e.state.features()))
                .collect();

            let mut last = EpochStats {
                surrogate: 0.0,
                clipped: 0,
            };
            for _ in 0..self.cfg.epochs {
                last = self.policy_step(&mut weights, episodes, &old_probs, &advantages);
                self.value_step(&mut value, episodes);
            }

            let kl = episodes
                .iter()
                .zip(&old_probs)
                .map(|(e, &old)| {
                    let new = weights.probabilities(&e.state)[e.action.index()];
                    old.max(PROB_FLOOR).ln() - new.max(PROB_FLOOR).ln()
                })
                .sum::<f32>()
                / n as f32;

            report.iterations = it + 1;
            report.surrogate = last.surrogate;
            report.clip_fraction = last.clipped as f32 / n as f32;
            report.approx_kl = kl;
            debug!(
                iteration = it + 1,
                surrogate = last.surrogate,
                approx_kl = kl,
                "ppo update"
            );
        }

        (weights, report)
    }

    fn policy_step(
        &self,
        weights: &mut PolicyWeights,
        episodes: &[Episode],
        old_probs: &[f32],
        advantages: &[f32],
    ) -> EpochStats {
        let eps = self.cfg.clip_epsilon;
        let mut grad = [[0.0f32; FEATURE_DIM]; Action::COUNT];
        let mut stats = EpochStats {
            surrogate: 0.0,
            clipped: 0,
        };

        for ((e, &old), &adv) in episodes.iter().zip(old_probs).zip(advantages) {
            let probs = weights.probabilities(&e.state);
            let a = e.action.index();
            let ratio = probs[a] / old.max(PROB_FLOOR);
            let clipped_ratio = ratio.clamp(1.0 - eps, 1.0 + eps);
            stats.surrogate += (ratio * adv).min(clipped_ratio * adv);

            // Once the ratio leaves the trust region in the direction the
            // advantage pushes it, the clipped term is active and flat.
            let clipped = (adv > 0.0 && ratio > 1.0 + eps) || (adv < 0.0 && ratio < 1.0 - eps);
            if clipped {
                stats.clipped += 1;
            }

            let entropy: f32 = -probs
                .iter()
                .map(|&p| if p > 0.0 { p * p.ln() } else { 0.0 })
                .sum::<f32>();

            for k in 0..Action::COUNT {
                let indicator = if k == a { 1.0 } else { 0.0 };
                let surrogate_grad = if clipped {
                    0.0
                } else {
                    adv * ratio * (indicator - probs[k])
                };
                let entropy_grad = if probs[k] > 0.0 {
                    -probs[k] * (probs[k].ln() + entropy)
                } else {
                    0.0
                };
                let g = surrogate_grad + self.cfg.entropy_coef * entropy_grad;
                for (gj, xj) in grad[k].iter_mut().zip(e.state.features()) {
                    *gj += g * xj;
                }
            }
        }

        let n = episodes.len() as f32;
        let step = self.cfg.learning_rate / n;
        for (row, grow) in weights.rows.iter_mut().zip(grad.iter()) {
            for (w, g) in row.iter_mut().zip(grow) {
                *w = (*w + step * g).clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT);
            }
        }
        stats.surrogate /= n;
        stats
    }

    fn value_step(&self, value: &mut [f32; FEATURE_DIM], episodes: &[Episode]) {
        let mut grad = [0.0f32; FEATURE_DIM];
        for e in episodes {
            let err = e.reward - dot(value, e.state.features());
            for (g, x) in grad.iter_mut().zip(e.state.features()) {
                *g += err * x;
            }
        }
        // Normalize by feature count too so a multi-hot state cannot overshoot.
        let step = self.cfg.value_learning_rate / (episodes.len() as f32 * FEATURE_DIM as f32);
        for (v, g) in value.iter_mut().zip(grad) {
            *v += step * g;
        }
    }
}

fn dot(a: &[f32; FEATURE_DIM], b: &[f32; FEATURE_DIM]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::{Topic, TopicSet};

    fn episode(topic: Topic, action: Action, reward: f32) -> Episode {
        Episode {
            interaction_id: format!("{topic}-{action}"),
            state: StateVector::from_topics(&TopicSet::from([topic])),
            action,
            reward,
        }
    }

    fn sample_episodes() -> Vec<Episode> {
        let mut eps = Vec::new();
        for _ in 0..4 {
            eps.push(episode(
                Topic::MortgageCalculation,
                Action::MortgageCalculator,
                1.0,
            ));
            eps.push(episode(Topic::MortgageCalculation, Action::General, -1.0));
            eps.push(episode(Topic::InterestRates, Action::InterestRateInfo, 1.0));
        }
        eps
    }

    #[test]
    fn rewarded_actions_gain_probability() {
        let trainer = PpoTrainer::new(TrainerConfig::default());
        let init = PolicyWeights::default();
        let (w, report) = trainer.optimize(&init, &sample_episodes());

        assert!(w.is_finite());
        assert_eq!(report.episodes, 12);
        assert_eq!(report.iterations, TrainerConfig::default().iterations);

        let s = StateVector::from_topics(&TopicSet::from([Topic::MortgageCalculation]));
        let p = w.probabilities(&s);
        assert!(p[Action::MortgageCalculator.index()] > 0.25);
        assert!(p[Action::MortgageCalculator.index()] > p[Action::General.index()]);
        assert!(p[Action::General.index()] < 0.25);

        let s = StateVector::from_topics(&TopicSet::from([Topic::InterestRates]));
        let p = w.probabilities(&s);
        assert!(p[Action::InterestRateInfo.index()] > 0.25);
    }

    #[test]
    fn optimize_is_deterministic_and_leaves_init_untouched() {
        let trainer = PpoTrainer::new(TrainerConfig::default());
        let init = PolicyWeights::default();
        let (a, _) = trainer.optimize(&init, &sample_episodes());
        let (b, _) = trainer.optimize(&init, &sample_episodes());
        assert_eq!(a, b);
        assert_eq!(init, PolicyWeights::default());
    }

    #[test]
    fn single_update_stays_near_trust_region() {
        let cfg = TrainerConfig {
            iterations: 1,
            epochs: 1,
            ..Default::default()
        };
        let trainer = PpoTrainer::new(cfg);
        let (_, report) = trainer.optimize(&PolicyWeights::default(), &sample_episodes());
        // First epoch starts at ratio 1.0 for every episode: nothing clipped.
        assert_eq!(report.clip_fraction, 0.0);
        assert!(report.approx_kl.abs() < 0.5);
    }

    #[test]
    fn empty_episode_set_returns_init() {
        let trainer = PpoTrainer::new(TrainerConfig::default());
        let init = PolicyWeights::default();
        let (w, report) = trainer.optimize(&init, &[]);
        assert_eq!(w, init);
        assert_eq!(report.iterations, 0);
    }
}
