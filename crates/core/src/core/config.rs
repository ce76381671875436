use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::advisor::AdvisorConfig;
use crate::error::Result;
use crate::metrics::{FeedbackPolicy, MetricsConfig};
use crate::reward::RewardConfig;
use crate::trainer::TrainerConfig;

/// Runtime configuration for the feedback loop. Every field has a default, so
/// a partial (or absent) `config.json` is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub reward: RewardConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
}

impl LoopConfig {
    /// Load from a JSON file if it exists, otherwise defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        info!("Loaded config from {:?}", path);
        Ok(cfg)
    }

    /// Apply `REWARDGRAPH_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|k| std::env::var(k).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        // REWARDGRAPH_MIN_EPISODES=5
        if let Some(v) = get("REWARDGRAPH_MIN_EPISODES") {
            match v.trim().parse::<usize>() {
                Ok(n) => self.trainer.min_episodes = n.max(1),
                Err(_) => warn!("Ignoring invalid REWARDGRAPH_MIN_EPISODES value: {}", v),
            }
        }

        // REWARDGRAPH_FEEDBACK_POLICY=latest|accumulate
        if let Some(v) = get("REWARDGRAPH_FEEDBACK_POLICY") {
            match FeedbackPolicy::parse(&v) {
                Some(p) => self.metrics.feedback_policy = p,
                None => warn!("Unknown REWARDGRAPH_FEEDBACK_POLICY value: {}", v),
            }
        }

        // REWARDGRAPH_RECENT_WINDOW=10
        if let Some(v) = get("REWARDGRAPH_RECENT_WINDOW") {
            match v.trim().parse::<usize>() {
                Ok(n) => self.metrics.recent_window = n.max(1),
                Err(_) => warn!("Ignoring invalid REWARDGRAPH_RECENT_WINDOW value: {}", v),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: LoopConfig =
            serde_json::from_str(r#"{ "trainer": { "min_episodes": 2 } }"#).unwrap();
        assert_eq!(cfg.trainer.min_episodes, 2);
        assert_eq!(cfg.trainer.clip_epsilon, TrainerConfig::default().clip_epsilon);
        assert_eq!(cfg.metrics.recent_window, 10);
        assert_eq!(cfg.reward, RewardConfig::default());
    }

    #[test]
    fn overrides_are_applied_and_bad_values_ignored() {
        let env: HashMap<&str, &str> = [
            ("REWARDGRAPH_MIN_EPISODES", "12"),
            ("REWARDGRAPH_FEEDBACK_POLICY", "accumulate"),
            ("REWARDGRAPH_RECENT_WINDOW", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut cfg = LoopConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.trainer.min_episodes, 12);
        assert_eq!(cfg.metrics.feedback_policy, FeedbackPolicy::Accumulate);
        assert_eq!(cfg.metrics.recent_window, 10);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LoopConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(cfg, LoopConfig::default());
    }
}
