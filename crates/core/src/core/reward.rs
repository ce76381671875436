//! Rating + tags → scalar reward.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{LoopError, Result};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

pub const MIN_REWARD: f32 = -1.0;
pub const MAX_REWARD: f32 = 1.0;

/// Linear map 1 → -1.0, 3 → 0.0, 5 → +1.0.
#[inline]
pub fn base_reward(rating: u8) -> f32 {
    (rating as f32 - 3.0) / 2.0
}

/// Validate a raw rating from the transport layer.
pub fn validate_rating(rating: i64) -> Result<u8> {
    if (MIN_RATING as i64..=MAX_RATING as i64).contains(&rating) {
        Ok(rating as u8)
    } else {
        Err(LoopError::InvalidRating(rating))
    }
}

/// Canonical form used for tag lookups: trimmed, lower-case, single spaces,
/// `_`/`-` treated as spaces. "Too_Verbose" and "too  verbose" are the same tag.
pub fn normalize_tag(tag: &str) -> String {
    tag.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Additive reward delta per recognized (normalized) tag.
    #[serde(default = "default_tag_deltas")]
    pub tag_deltas: BTreeMap<String, f32>,
}

fn default_tag_deltas() -> BTreeMap<String, f32> {
    [
        ("helpful", 0.1),
        ("accurate", 0.1),
        ("clear", 0.05),
        ("too verbose", -0.1),
        ("too concise", -0.1),
        ("needs more detail", -0.1),
        ("inaccurate", -0.2),
        ("off topic", -0.1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            tag_deltas: default_tag_deltas(),
        }
    }
}

impl RewardConfig {
    /// Sum of deltas for recognized tags. Each distinct tag counts once;
    /// unrecognized tags contribute nothing.
    pub fn tag_adjustment(&self, tags: &[String]) -> f32 {
        let distinct: BTreeSet<String> = tags.iter().map(|t| normalize_tag(t)).collect();
        distinct
            .iter()
            .filter_map(|t| self.tag_deltas.get(t))
            .sum()
    }

    pub fn reward(&self, rating: u8, tags: &[String]) -> f32 {
        (base_reward(rating) + self.tag_adjustment(tags)).clamp(MIN_REWARD, MAX_REWARD)
    }
}
