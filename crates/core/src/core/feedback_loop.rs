//! The single logical owner of graph, metrics and the current policy.
//!
//! Locking discipline:
//! - `record_interaction` / `record_feedback` hold the state write lock for the
//!   whole mutation (node, edges, metrics), so readers never see half of it.
//! - `export` holds the read lock while it copies.
//! - `suggest` only touches the policy pointer, never the state lock.
//! - `train` copies episodes under a short read lock, optimizes unlocked, and
//!   finishes with a pointer swap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::Action;
use crate::advisor::{PolicyAdvisor, Suggestion};
use crate::config::LoopConfig;
use crate::error::{LoopError, Result};
use crate::export::GraphExport;
use crate::graph::{
    tool_node_id, topic_node_id, EdgeKind, Feedback, GraphEdge, GraphNode, Interaction,
    InteractionGraph, NodeId, NodePayload,
};
use crate::metrics::{MetricsEngine, MetricsSummary, RatingEvent};
use crate::policy::{Policy, PolicyWeights, StateVector};
use crate::reward::validate_rating;
use crate::state_image;
use crate::store::LoopStore;
use crate::topics;
use crate::trainer::{build_episodes, PpoTrainer, TrainingReport};

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One turn as reported by the reasoning engine. Recorded as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentTurn {
    pub user_input: String,
    pub agent_response: String,
    pub action: String,
    #[serde(default)]
    pub reasoning_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub feedback_id: NodeId,
    pub interaction_id: NodeId,
    pub reward: f32,
    /// An earlier rating for this interaction stopped counting toward metrics.
    pub replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub version: u64,
    pub before_metrics: MetricsSummary,
    /// Training does not touch ratings, so this may equal `before_metrics`.
    pub after_metrics: MetricsSummary,
    pub report: TrainingReport,
}

struct LoopState {
    graph: InteractionGraph,
    metrics: MetricsEngine,
}

struct TrainingGuard<'a>(&'a AtomicBool);

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FeedbackLoop {
    cfg: LoopConfig,
    state: RwLock<LoopState>,
    advisor: PolicyAdvisor,
    trainer: PpoTrainer,
    training: AtomicBool,
    last_version: AtomicU64,
    dirty: AtomicBool,
    // Serializes saves so an older image never overwrites a newer one.
    save_lock: Mutex<()>,
    store: Option<LoopStore>,
}

impl FeedbackLoop {
    /// In-memory loop with no persistence.
    ///
    /// `trainer.min_episodes` is raised to at least 1 whatever its source, so
    /// training never runs on an empty episode set.
    pub fn new(mut cfg: LoopConfig) -> Self {
        cfg.trainer.min_episodes = cfg.trainer.min_episodes.max(1);
        let metrics = MetricsEngine::new(cfg.metrics.clone());
        let trainer = PpoTrainer::new(cfg.trainer.clone());
        Self {
            cfg,
            state: RwLock::new(LoopState {
                graph: InteractionGraph::new(),
                metrics,
            }),
            advisor: PolicyAdvisor::new(),
            trainer,
            training: AtomicBool::new(false),
            last_version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
            store: None,
        }
    }

    /// Open (or create) persisted state in `store`.
    ///
    /// Metrics are rebuilt by replaying the stored feedback in order. A missing
    /// or unreadable current policy leaves the loop untrained rather than
    /// failing startup.
    pub fn open(cfg: LoopConfig, store: LoopStore) -> Result<Self> {
        let mut lp = Self::new(cfg);

        if let Some(graph) = store.load_graph()? {
            let mut metrics = MetricsEngine::new(lp.cfg.metrics.clone());
            for (_, fb) in graph.feedback() {
                let topics = graph
                    .interaction(&fb.interaction_id)
                    .map(|i| i.topics.clone())
                    .unwrap_or_default();
                metrics.record(RatingEvent {
                    interaction_id: fb.interaction_id.clone(),
                    timestamp: fb.timestamp,
                    rating: fb.rating,
                    topics,
                });
            }
            info!(
                nodes = graph.node_count(),
                ratings = metrics.performance().total(),
                "Loaded interaction graph"
            );
            lp.state = RwLock::new(LoopState { graph, metrics });
        } else {
            info!("No saved graph; starting fresh");
        }

        let versions = store.policy_versions()?;
        if let Some(&max) = versions.last() {
            lp.last_version.store(max, Ordering::Release);
        }

        match store.current_policy_version() {
            Ok(Some(v)) => match store.load_policy(v) {
                Ok(policy) => {
                    info!(version = v, "Loaded current policy");
                    lp.advisor.install(Arc::new(policy));
                }
                Err(e) => warn!("Could not load policy {}: {}; running untrained", v, e),
            },
            Ok(None) => info!("No trained policy yet"),
            Err(e) => warn!("Could not read current policy pointer: {}", e),
        }

        lp.store = Some(store);
        Ok(lp)
    }

    pub fn config(&self) -> &LoopConfig {
        &self.cfg
    }

    pub fn store(&self) -> Option<&LoopStore> {
        self.store.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // ── Interaction Recorder ───────────────────────────────────────────────

    pub fn record_interaction(
        &self,
        user_input: impl Into<String>,
        agent_response: impl Into<String>,
        action: impl Into<String>,
    ) -> NodeId {
        self.record_turn(AgentTurn {
            user_input: user_input.into(),
            agent_response: agent_response.into(),
            action: action.into(),
            reasoning_trace: None,
        })
    }

    pub fn record_turn(&self, turn: AgentTurn) -> NodeId {
        let rl_action = Action::resolve(&turn.action);
        let topics = topics::tag(&turn.user_input, rl_action);
        let suggestion = self
            .cfg
            .advisor
            .attach_to_interactions
            .then(|| self.advisor.suggest_for_topics(&topics));

        let interaction = Interaction {
            timestamp: now_secs(),
            user_input: turn.user_input,
            agent_response: turn.agent_response,
            action: turn.action,
            topics: topics.clone(),
            reasoning_trace: turn.reasoning_trace,
            suggestion,
        };

        let mut st = self.state.write();
        let graph = &mut st.graph;

        let mut id = Uuid::new_v4().to_string();
        while graph.contains(&id) {
            id = Uuid::new_v4().to_string();
        }
        graph.insert_node(GraphNode {
            id: id.clone(),
            payload: NodePayload::Interaction(interaction),
        });

        if rl_action.is_tool() {
            let tool_id = tool_node_id(rl_action);
            graph.ensure_node(tool_id.clone(), || NodePayload::Tool { tool: rl_action });
            graph.insert_edge(GraphEdge {
                source: tool_id,
                target: id.clone(),
                kind: EdgeKind::Produced,
                weight: 1.0,
            });
        }

        for topic in &topics {
            let topic_id = topic_node_id(*topic);
            graph.ensure_node(topic_id.clone(), || NodePayload::Topic { label: *topic });
            graph.insert_edge(GraphEdge {
                source: id.clone(),
                target: topic_id,
                kind: EdgeKind::Discusses,
                weight: 1.0,
            });
        }
        drop(st);
        self.dirty.store(true, Ordering::Release);

        info!(
            interaction_id = %id,
            action = %rl_action,
            topics = ?topics,
            "Recorded interaction"
        );
        id
    }

    // ── Feedback Aggregator ────────────────────────────────────────────────

    pub fn record_feedback(
        &self,
        interaction_id: &str,
        rating: i64,
        tags: Vec<String>,
    ) -> Result<FeedbackAck> {
        let rating = validate_rating(rating)?;
        let reward = self.cfg.reward.reward(rating, &tags);
        let timestamp = now_secs();

        let mut st = self.state.write();
        let topics = match st.graph.interaction(interaction_id) {
            Some(i) => i.topics.clone(),
            None => return Err(LoopError::UnknownInteraction(interaction_id.to_string())),
        };

        let mut feedback_id = Uuid::new_v4().to_string();
        while st.graph.contains(&feedback_id) {
            feedback_id = Uuid::new_v4().to_string();
        }

        st.graph.insert_node(GraphNode {
            id: feedback_id.clone(),
            payload: NodePayload::Feedback(Feedback {
                interaction_id: interaction_id.to_string(),
                rating,
                tags,
                reward,
                timestamp,
            }),
        });
        st.graph.insert_edge(GraphEdge {
            source: interaction_id.to_string(),
            target: feedback_id.clone(),
            kind: EdgeKind::Rated,
            weight: reward,
        });

        let replaced = st.metrics.record(RatingEvent {
            interaction_id: interaction_id.to_string(),
            timestamp,
            rating,
            topics,
        });
        drop(st);
        self.dirty.store(true, Ordering::Release);

        info!(
            interaction_id,
            rating,
            reward,
            replaced,
            "Recorded feedback"
        );
        Ok(FeedbackAck {
            feedback_id,
            interaction_id: interaction_id.to_string(),
            reward,
            replaced,
        })
    }

    // ── Policy Advisor ─────────────────────────────────────────────────────

    pub fn suggest(&self, state: &StateVector) -> Suggestion {
        self.advisor.suggest(state)
    }

    /// Suggestion for a message the reasoning engine has not answered yet.
    pub fn suggest_for_input(&self, user_input: &str) -> Suggestion {
        self.advisor
            .suggest_for_topics(&topics::tag(user_input, Action::General))
    }

    pub fn current_policy(&self) -> Option<Arc<Policy>> {
        self.advisor.current()
    }

    pub fn policy_version(&self) -> Option<u64> {
        self.advisor.version()
    }

    // ── Policy Trainer ─────────────────────────────────────────────────────

    fn begin_training(&self) -> Result<TrainingGuard<'_>> {
        self.training
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| TrainingGuard(&self.training))
            .map_err(|_| LoopError::TrainingInProgress)
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Acquire)
    }

    // Versions are completion timestamps, bumped if the clock has not moved.
    fn next_version(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .last_version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(prev + 1)
    }

    pub fn train(&self) -> Result<TrainingOutcome> {
        let _guard = self.begin_training()?;

        let (episodes, before_metrics) = {
            let st = self.state.read();
            (build_episodes(&st.graph), st.metrics.summary())
        };

        let need = self.cfg.trainer.min_episodes;
        if episodes.len() < need {
            warn!(
                have = episodes.len(),
                need,
                "Training refused: not enough rated interactions"
            );
            return Err(LoopError::InsufficientData {
                have: episodes.len(),
                need,
            });
        }

        let parent = self.advisor.current();
        let init = parent
            .as_ref()
            .map(|p| p.weights)
            .unwrap_or_else(PolicyWeights::default);

        info!(
            episodes = episodes.len(),
            warm_start = parent.is_some(),
            "Training started"
        );
        let (weights, report) = self.trainer.optimize(&init, &episodes);

        let version = self.next_version();
        let policy = Policy {
            version,
            weights,
            episodes: episodes.len(),
            iterations: report.iterations,
            parent_version: parent.as_ref().map(|p| p.version),
        };

        if let Some(store) = &self.store {
            store.save_policy(&policy)?;
            store.set_current_policy(version)?;
        }
        self.advisor.install(Arc::new(policy));

        let after_metrics = self.state.read().metrics.summary();
        info!(
            version,
            mean_reward = report.mean_reward,
            approx_kl = report.approx_kl,
            "Training complete; policy swapped"
        );

        Ok(TrainingOutcome {
            version,
            before_metrics,
            after_metrics,
            report,
        })
    }

    pub fn load_policy(&self, version: u64) -> Result<Policy> {
        if let Some(p) = self.advisor.current().filter(|p| p.version == version) {
            return Ok((*p).clone());
        }
        match &self.store {
            Some(store) => store.load_policy(version),
            None => Err(LoopError::UnknownPolicy(version)),
        }
    }

    pub fn policy_versions(&self) -> Result<Vec<u64>> {
        match &self.store {
            Some(store) => store.policy_versions(),
            None => Ok(self.policy_version().into_iter().collect()),
        }
    }

    // ── Graph Exporter ─────────────────────────────────────────────────────

    pub fn export(&self) -> GraphExport {
        let st = self.state.read();
        GraphExport {
            nodes: st.graph.nodes().to_vec(),
            edges: st.graph.edges().to_vec(),
            performance: st.metrics.performance().clone(),
            topics: st.metrics.topics().clone(),
            policy_version: self.advisor.version(),
        }
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.state.read().metrics.summary()
    }

    pub fn interaction(&self, id: &str) -> Option<Interaction> {
        self.state.read().graph.interaction(id).cloned()
    }

    // ── Persistence ────────────────────────────────────────────────────────

    /// Persist the graph if anything changed. Returns whether a write happened.
    ///
    /// The state lock is held only while encoding; the file write and fsync
    /// happen after it is released.
    pub fn save(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let _saving = self.save_lock.lock();
        let bytes = {
            let st = self.state.read();
            // Writers are excluded while we hold the read lock, so clearing
            // the flag here cannot lose a concurrent mutation.
            if !self.dirty.swap(false, Ordering::AcqRel) {
                debug!("Save skipped; nothing changed");
                return Ok(false);
            }
            match state_image::encode_state(&st.graph, now_secs()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.dirty.store(true, Ordering::Release);
                    return Err(e.into());
                }
            }
        };
        if let Err(e) = store.write_state(&bytes) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }
}
