//! Keyword topic tagging.
//!
//! Labels come from a small fixed vocabulary so they can double as policy
//! features. Tagging never fails: input that matches nothing is `general`.

use std::collections::BTreeSet;

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::action::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    MortgageCalculation,
    LoanEligibility,
    InterestRates,
    LoanTypes,
    HomeBuyingProcess,
    General,
}

pub type TopicSet = BTreeSet<Topic>;

impl Topic {
    pub const COUNT: usize = 6;

    pub const ALL: [Topic; Topic::COUNT] = [
        Topic::MortgageCalculation,
        Topic::LoanEligibility,
        Topic::InterestRates,
        Topic::LoanTypes,
        Topic::HomeBuyingProcess,
        Topic::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::MortgageCalculation => "mortgage_calculation",
            Topic::LoanEligibility => "loan_eligibility",
            Topic::InterestRates => "interest_rates",
            Topic::LoanTypes => "loan_types",
            Topic::HomeBuyingProcess => "home_buying_process",
            Topic::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TOPIC_KEYWORDS: &[(Topic, &[&str])] = &[
    (
        Topic::MortgageCalculation,
        &["calculate", "payment", "monthly", "mortgage", "principal", "interest"],
    ),
    (
        Topic::LoanEligibility,
        &["eligible", "eligibility", "qualify", "qualification", "income", "credit"],
    ),
    (
        Topic::InterestRates,
        &["rate", "interest", "apr", "percentage", "fixed", "variable"],
    ),
    (
        Topic::LoanTypes,
        &["conventional", "fha", "va", "usda", "jumbo", "fixed", "arm"],
    ),
    (
        Topic::HomeBuyingProcess,
        &["process", "buying", "purchase", "offer", "closing", "escrow"],
    ),
];

// Whole-word match, tolerating a plural "s" so "rates" hits "rate" but "army"
// does not hit "arm".
fn word_matches(word: &str, keyword: &str) -> bool {
    word == keyword || word.strip_suffix('s') == Some(keyword)
}

/// Derive topic labels for an interaction.
///
/// The user's wording is matched against the keyword table; a tool action
/// additionally contributes its implied topic. The result is never empty.
pub fn tag(user_input: &str, action: Action) -> TopicSet {
    let lower = user_input.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut topics: TopicSet = TOPIC_KEYWORDS
        .iter()
        .filter(|(_, keywords)| {
            keywords
                .iter()
                .any(|k| words.iter().any(|w| word_matches(w, k)))
        })
        .map(|(topic, _)| *topic)
        .collect();

    if let Some(t) = action.implied_topic() {
        topics.insert(t);
    }

    if topics.is_empty() {
        topics.insert(Topic::General);
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_input_is_general() {
        let t = tag("hello there", Action::General);
        assert_eq!(t.into_iter().collect::<Vec<_>>(), vec![Topic::General]);
    }

    #[test]
    fn keywords_match_whole_words_and_plurals() {
        let t = tag("What are current rates for an FHA loan?", Action::General);
        assert!(t.contains(&Topic::InterestRates));
        assert!(t.contains(&Topic::LoanTypes));
        assert!(!t.contains(&Topic::General));

        let t = tag("my army buddy told me", Action::General);
        assert!(!t.contains(&Topic::LoanTypes));
    }

    #[test]
    fn tool_action_contributes_implied_topic() {
        let t = tag("hi", Action::MortgageCalculator);
        assert_eq!(
            t.into_iter().collect::<Vec<_>>(),
            vec![Topic::MortgageCalculation]
        );
    }

    #[test]
    fn tagging_is_deterministic() {
        let a = tag("Can I qualify with a 700 credit score?", Action::General);
        let b = tag("Can I qualify with a 700 credit score?", Action::General);
        assert_eq!(a, b);
        assert!(a.contains(&Topic::LoanEligibility));
    }

    #[test]
    fn topic_parse_roundtrips_labels() {
        for t in Topic::ALL {
            assert_eq!(Topic::parse(t.as_str()), Some(t));
        }
        assert_eq!(Topic::parse("weather"), None);
    }
}
