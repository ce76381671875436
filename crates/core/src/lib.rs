//! # rewardgraph
//!
//! Records every agent turn and every user rating as an interaction graph,
//! derives rolling performance metrics from the ratings, and periodically
//! retrains a small softmax policy with PPO. The current policy is consulted
//! as an advisor: it suggests which tool fits a message, it never decides.
//!
//! ## Quick Start
//!
//! ```
//! use rewardgraph::prelude::*;
//!
//! let lp = FeedbackLoop::new(LoopConfig::default());
//!
//! let id = lp.record_interaction(
//!     "What would my monthly payment be on $300k at 6.5%?",
//!     "Monthly payment: $1896.20",
//!     "mortgage_calculator",
//! );
//! let ack = lp.record_feedback(&id, 5, vec!["Helpful".to_string()]).unwrap();
//! assert_eq!(ack.reward, 1.0);
//!
//! // Until training succeeds the advisor falls back to "general".
//! assert!(lp.suggest_for_input("monthly payment?").untrained);
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: interaction/feedback/topic/tool nodes and typed edges
//! - [`topics`]: keyword topic tagger
//! - [`reward`]: rating + tag to scalar reward
//! - [`metrics`]: rolling averages, accuracy, per-topic stats
//! - [`trainer`]: PPO over logged episodes
//! - [`advisor`]: lock-free access to the current policy
//! - [`feedback_loop`]: the facade tying the pieces together
//! - [`store`]: on-disk layout for graph state and policy versions

#[path = "core/action.rs"]
pub mod action;

#[path = "core/advisor.rs"]
pub mod advisor;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/error.rs"]
pub mod error;

#[path = "core/export.rs"]
pub mod export;

#[path = "core/feedback_loop.rs"]
pub mod feedback_loop;

#[path = "core/graph.rs"]
pub mod graph;

#[path = "core/metrics.rs"]
pub mod metrics;

#[path = "core/policy.rs"]
pub mod policy;

#[path = "core/reward.rs"]
pub mod reward;

#[path = "core/state_image.rs"]
pub mod state_image;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/store.rs"]
pub mod store;

#[path = "core/topics.rs"]
pub mod topics;

#[path = "core/trainer.rs"]
pub mod trainer;

/// Prelude module for convenient imports.
///
/// ```
/// use rewardgraph::prelude::*;
/// ```
pub mod prelude {
    pub use crate::action::Action;
    pub use crate::advisor::{AdvisorConfig, PolicyAdvisor, Suggestion};
    pub use crate::config::LoopConfig;
    pub use crate::error::LoopError;
    pub use crate::export::GraphExport;
    pub use crate::feedback_loop::{AgentTurn, FeedbackAck, FeedbackLoop, TrainingOutcome};
    pub use crate::graph::{EdgeKind, InteractionGraph, NodeId, NodeKind};
    pub use crate::metrics::{FeedbackPolicy, MetricsSummary, PerformanceSnapshot};
    pub use crate::policy::{Policy, StateVector};
    pub use crate::store::LoopStore;
    pub use crate::topics::{Topic, TopicSet};
    pub use crate::trainer::{TrainerConfig, TrainingReport};
}
