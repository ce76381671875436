use core::fmt;

use serde::{Deserialize, Serialize};

use crate::topics::Topic;

/// The fixed action set the policy chooses from.
///
/// Each tool the reasoning engine can call is one action; everything else
/// (free-form replies, unknown tools) collapses into [`Action::General`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    MortgageCalculator,
    LoanEligibilityChecker,
    InterestRateInfo,
    General,
}

impl Action {
    pub const COUNT: usize = 4;

    pub const ALL: [Action; Action::COUNT] = [
        Action::MortgageCalculator,
        Action::LoanEligibilityChecker,
        Action::InterestRateInfo,
        Action::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::MortgageCalculator => "mortgage_calculator",
            Action::LoanEligibilityChecker => "loan_eligibility_checker",
            Action::InterestRateInfo => "interest_rate_info",
            Action::General => "general",
        }
    }

    /// Parse a tool identifier. Returns `None` for identifiers outside the set.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mortgage_calculator" => Some(Self::MortgageCalculator),
            "loan_eligibility_checker" | "loan_eligibility" => Some(Self::LoanEligibilityChecker),
            "interest_rate_info" => Some(Self::InterestRateInfo),
            "general" | "" => Some(Self::General),
            _ => None,
        }
    }

    /// Like [`Action::parse`], but unknown identifiers become `General`.
    pub fn resolve(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::General)
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }

    pub fn is_tool(self) -> bool {
        self != Action::General
    }

    /// Topic a tool call implies regardless of the user's wording.
    pub fn implied_topic(self) -> Option<Topic> {
        match self {
            Action::MortgageCalculator => Some(Topic::MortgageCalculation),
            Action::LoanEligibilityChecker => Some(Topic::LoanEligibility),
            Action::InterestRateInfo => Some(Topic::InterestRates),
            Action::General => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
