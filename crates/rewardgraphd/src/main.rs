//! rewardgraph daemon - feedback loop service
//!
//! Owns the interaction graph, metrics and current policy for one agent
//! deployment, and exposes them over newline-delimited JSON on a local TCP
//! port:
//! - record interactions and ratings as they happen
//! - ask the advisor for a suggestion
//! - trigger training, export the graph for dashboards
//!
//! Storage locations:
//! - Linux: ~/.local/share/rewardgraph/
//! - Windows: %APPDATA%\rewardgraph\
//! - MacOS: ~/Library/Application Support/rewardgraph/

use rewardgraph::advisor::Suggestion;
use rewardgraph::config::LoopConfig;
use rewardgraph::error::LoopError;
use rewardgraph::export::GraphExport;
use rewardgraph::feedback_loop::{AgentTurn, FeedbackLoop};
use rewardgraph::metrics::MetricsSummary;
use rewardgraph::policy::{Policy, StateVector};
use rewardgraph::store::LoopStore;
use rewardgraph::topics::{Topic, TopicSet};
use rewardgraph::trainer::TrainingReport;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod paths;

use paths::AppPaths;

const DEFAULT_ADDR: &str = "127.0.0.1:9877";
const DEFAULT_AUTOSAVE_SECS: u64 = 30;

#[derive(Debug, Error)]
enum DaemonError {
    #[error("paths: {0}")]
    Paths(String),
    #[error(transparent)]
    Loop(#[from] LoopError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid REWARDGRAPH_ADDR {0:?}")]
    Addr(String),
}

fn listen_addr() -> Result<SocketAddr, DaemonError> {
    let raw = std::env::var("REWARDGRAPH_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    raw.trim().parse().map_err(|_| DaemonError::Addr(raw))
}

// REWARDGRAPH_AUTOSAVE_SECS=0 disables the periodic save.
fn autosave_period() -> Option<Duration> {
    let secs = match std::env::var("REWARDGRAPH_AUTOSAVE_SECS") {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(n) => n,
            Err(_) => {
                warn!("Ignoring invalid REWARDGRAPH_AUTOSAVE_SECS value: {}", v);
                DEFAULT_AUTOSAVE_SECS
            }
        },
        Err(_) => DEFAULT_AUTOSAVE_SECS,
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ═══════════════════════════════════════════════════════════════════════════
// Protocol Messages
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    /// Introspect the daemon API surface (grouped by category).
    ApiCatalog,

    // Recording
    RecordInteraction {
        user_input: String,
        agent_response: String,
        action: String,
        #[serde(default)]
        reasoning_trace: Option<String>,
    },
    RecordFeedback {
        interaction_id: String,
        rating: i64,
        #[serde(default)]
        tags: Vec<String>,
    },

    // Advice
    /// Either raw `user_input` (tagged here) or explicit `topics`.
    Suggest {
        #[serde(default)]
        user_input: Option<String>,
        #[serde(default)]
        topics: Option<Vec<Topic>>,
    },

    // Training and audit
    Train,
    PolicyVersions,
    LoadPolicy {
        version: u64,
    },

    // Observability
    Export,
    Metrics,

    // Persistence
    Save,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiEndpoint {
    request: String,
    input: String,
    output: String,
    description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiCategory {
    name: String,
    endpoints: Vec<ApiEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
enum Response {
    ApiCatalog {
        categories: Vec<ApiCategory>,
    },
    InteractionRecorded {
        interaction_id: String,
    },
    FeedbackRecorded {
        feedback_id: String,
        interaction_id: String,
        reward: f32,
        replaced: bool,
    },
    Suggestion {
        suggestion: Suggestion,
        thinking: String,
    },
    Trained {
        status: String,
        version: u64,
        before_metrics: MetricsSummary,
        after_metrics: MetricsSummary,
        report: TrainingReport,
    },
    PolicyVersions {
        current: Option<u64>,
        versions: Vec<u64>,
    },
    Policy {
        policy: Policy,
    },
    Export {
        export: GraphExport,
    },
    Metrics {
        summary: MetricsSummary,
    },
    Saved {
        written: bool,
    },
    Error {
        /// Always "error"; lets clients branch without matching on `type`.
        status: String,
        code: String,
        message: String,
    },
}

impl Response {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<LoopError> for Response {
    fn from(e: LoopError) -> Self {
        Response::error(e.code(), e.to_string())
    }
}

fn endpoint(request: &str, input: &str, output: &str, description: &str) -> ApiEndpoint {
    ApiEndpoint {
        request: request.to_string(),
        input: input.to_string(),
        output: output.to_string(),
        description: description.to_string(),
    }
}

fn api_catalog() -> Vec<ApiCategory> {
    vec![
        ApiCategory {
            name: "Recording".to_string(),
            endpoints: vec![
                endpoint(
                    "RecordInteraction",
                    "{ user_input, agent_response, action, reasoning_trace? }",
                    "{ type: InteractionRecorded, interaction_id }",
                    "Record one agent turn; topics are tagged and tool/topic nodes linked.",
                ),
                endpoint(
                    "RecordFeedback",
                    "{ interaction_id, rating: 1..=5, tags? }",
                    "{ type: FeedbackRecorded|Error }",
                    "Attach a rating to an interaction and update metrics.",
                ),
            ],
        },
        ApiCategory {
            name: "Advice".to_string(),
            endpoints: vec![endpoint(
                "Suggest",
                "{ user_input? , topics? }",
                "{ type: Suggestion, suggestion, thinking }",
                "Ask the current policy which action fits; falls back to general when untrained.",
            )],
        },
        ApiCategory {
            name: "Training".to_string(),
            endpoints: vec![
                endpoint(
                    "Train",
                    "{}",
                    "{ type: Trained|Error }",
                    "Run PPO over logged episodes and swap in the new policy.",
                ),
                endpoint(
                    "PolicyVersions",
                    "{}",
                    "{ type: PolicyVersions, current, versions }",
                    "List persisted policy versions, oldest first.",
                ),
                endpoint(
                    "LoadPolicy",
                    "{ version }",
                    "{ type: Policy|Error }",
                    "Fetch one persisted policy for audit.",
                ),
            ],
        },
        ApiCategory {
            name: "Observability".to_string(),
            endpoints: vec![
                endpoint(
                    "Export",
                    "{}",
                    "{ type: Export, export }",
                    "Nodes, edges, performance series, topic stats, policy version.",
                ),
                endpoint(
                    "Metrics",
                    "{}",
                    "{ type: Metrics, summary }",
                    "Current rating summary without the graph.",
                ),
            ],
        },
        ApiCategory {
            name: "Persistence".to_string(),
            endpoints: vec![endpoint(
                "Save",
                "{}",
                "{ type: Saved, written }",
                "Persist the graph now if it changed since the last save.",
            )],
        },
    ]
}

async fn handle_request(lp: &Arc<FeedbackLoop>, request: Request) -> Response {
    match request {
        Request::ApiCatalog => Response::ApiCatalog {
            categories: api_catalog(),
        },

        Request::RecordInteraction {
            user_input,
            agent_response,
            action,
            reasoning_trace,
        } => {
            let interaction_id = lp.record_turn(AgentTurn {
                user_input,
                agent_response,
                action,
                reasoning_trace,
            });
            Response::InteractionRecorded { interaction_id }
        }

        Request::RecordFeedback {
            interaction_id,
            rating,
            tags,
        } => match lp.record_feedback(&interaction_id, rating, tags) {
            Ok(ack) => Response::FeedbackRecorded {
                feedback_id: ack.feedback_id,
                interaction_id: ack.interaction_id,
                reward: ack.reward,
                replaced: ack.replaced,
            },
            Err(e) => {
                warn!("Feedback rejected: {}", e);
                e.into()
            }
        },

        Request::Suggest { user_input, topics } => {
            let suggestion = match (topics, user_input) {
                (Some(topics), _) if !topics.is_empty() => {
                    let set: TopicSet = topics.into_iter().collect();
                    lp.suggest(&StateVector::from_topics(&set))
                }
                (_, Some(text)) => lp.suggest_for_input(&text),
                _ => lp.suggest(&StateVector::from_topics(&TopicSet::from([Topic::General]))),
            };
            let thinking = suggestion.thinking_line();
            Response::Suggestion {
                suggestion,
                thinking,
            }
        }

        Request::Train => {
            let lp = Arc::clone(lp);
            match tokio::task::spawn_blocking(move || lp.train()).await {
                Ok(Ok(outcome)) => Response::Trained {
                    status: "success".to_string(),
                    version: outcome.version,
                    before_metrics: outcome.before_metrics,
                    after_metrics: outcome.after_metrics,
                    report: outcome.report,
                },
                Ok(Err(e)) => {
                    warn!("Training failed: {}", e);
                    e.into()
                }
                Err(e) => {
                    error!("Training task panicked: {}", e);
                    Response::error("internal", format!("training task failed: {e}"))
                }
            }
        }

        Request::PolicyVersions => match lp.policy_versions() {
            Ok(versions) => Response::PolicyVersions {
                current: lp.policy_version(),
                versions,
            },
            Err(e) => e.into(),
        },

        Request::LoadPolicy { version } => match lp.load_policy(version) {
            Ok(policy) => Response::Policy { policy },
            Err(e) => e.into(),
        },

        Request::Export => Response::Export {
            export: lp.export(),
        },

        Request::Metrics => Response::Metrics {
            summary: lp.metrics_summary(),
        },

        Request::Save => match lp.save() {
            Ok(written) => Response::Saved { written },
            Err(e) => {
                error!("Save failed: {}", e);
                e.into()
            }
        },
    }
}

async fn handle_client(
    stream: TcpStream,
    lp: Arc<FeedbackLoop>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&lp, request).await,
            Err(e) => Response::error("bad_request", format!("Invalid request: {}", e)),
        };

        writer
            .write_all(serde_json::to_string(&response)?.as_bytes())
            .await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

/// Resolves on the first Ctrl-C or (on unix) SIGTERM and names which one.
/// A handler that cannot be installed never resolves.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                warn!("Ctrl-C handler unavailable: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = terminate => reason,
    }
}

fn save_before_exit(lp: &FeedbackLoop, reason: &str) {
    match lp.save() {
        Ok(true) => info!("{}: state saved", reason),
        Ok(false) => info!("{}: nothing to save", reason),
        Err(e) => error!("{} save failed: {}", reason, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let paths = AppPaths::new().map_err(DaemonError::Paths)?;
    info!("Data directory: {:?}", paths.data_dir());

    let mut cfg = LoopConfig::load(&paths.config_file())?;
    cfg.apply_env();

    let store = LoopStore::open(paths.data_dir())?;
    let lp = Arc::new(FeedbackLoop::open(cfg, store)?);

    // Save on Ctrl-C or SIGTERM so recent feedback survives the daemon being stopped.
    {
        let lp = Arc::clone(&lp);
        tokio::spawn(async move {
            let reason = shutdown_signal().await;
            save_before_exit(&lp, reason);
            std::process::exit(0);
        });
    }

    if let Some(period) = autosave_period() {
        let lp = Arc::clone(&lp);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                if !lp.is_dirty() {
                    continue;
                }
                let lp = Arc::clone(&lp);
                match tokio::task::spawn_blocking(move || lp.save()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Autosave failed: {}", e),
                    Err(e) => error!("Autosave task failed: {}", e),
                }
            }
        });
    }

    let addr = listen_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!("rewardgraph daemon listening on {}", addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Client connected: {}", peer);
        let lp = Arc::clone(&lp);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, lp).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_save_keeps_recorded_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let lp = Arc::new(
            FeedbackLoop::open(LoopConfig::default(), LoopStore::open(dir.path()).unwrap())
                .unwrap(),
        );

        let recorded = handle_request(
            &lp,
            Request::RecordInteraction {
                user_input: "What are today's rates?".to_string(),
                agent_response: "Around 6.5%".to_string(),
                action: "interest_rate_info".to_string(),
                reasoning_trace: None,
            },
        )
        .await;
        let interaction_id = match recorded {
            Response::InteractionRecorded { interaction_id } => interaction_id,
            other => panic!("unexpected response: {:?}", other),
        };

        let rated = handle_request(
            &lp,
            Request::RecordFeedback {
                interaction_id: interaction_id.clone(),
                rating: 4,
                tags: vec!["Helpful".to_string()],
            },
        )
        .await;
        assert!(matches!(rated, Response::FeedbackRecorded { .. }));
        assert!(lp.is_dirty());

        save_before_exit(&lp, "SIGTERM");
        assert!(!lp.is_dirty());
        drop(lp);

        let reopened =
            FeedbackLoop::open(LoopConfig::default(), LoopStore::open(dir.path()).unwrap())
                .unwrap();
        assert!(reopened.interaction(&interaction_id).is_some());
        assert_eq!(reopened.metrics_summary().total_feedback, 1);
    }
}
