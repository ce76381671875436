//! CLI client for the `rewardgraphd` daemon.
//!
//! Examples:
//!   rewardgraph-cli record mortgage_calculator "monthly payment on 300k?" "Monthly payment: $1896.20"
//!   rewardgraph-cli rate <interaction_id> 5 Helpful Accurate
//!   rewardgraph-cli suggest "do I qualify for an FHA loan?"
//!   rewardgraph-cli train
//!   rewardgraph-cli metrics
//!   rewardgraph-cli export > graph.json
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use rewardgraph::advisor::Suggestion;
use rewardgraph::metrics::MetricsSummary;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Request {
    ApiCatalog,
    RecordInteraction {
        user_input: String,
        agent_response: String,
        action: String,
    },
    RecordFeedback {
        interaction_id: String,
        rating: i64,
        tags: Vec<String>,
    },
    Suggest {
        user_input: Option<String>,
    },
    Train,
    PolicyVersions,
    LoadPolicy {
        version: u64,
    },
    Export,
    Metrics,
    Save,
}

fn usage() -> ! {
    eprintln!("rewardgraph-cli (talks to rewardgraphd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: rewardgraph-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  record <action> <user_input> <agent_response>  Record one agent turn");
    eprintln!("  rate <interaction_id> <1-5> [tags...]          Rate an interaction");
    eprintln!("  suggest <user_input>        Ask the advisor which action fits");
    eprintln!("  train                       Retrain the policy from logged feedback");
    eprintln!("  metrics                     Show the rating summary");
    eprintln!("  export                      Print the full graph export as JSON");
    eprintln!("  versions                    List persisted policy versions");
    eprintln!("  policy <version>            Print one persisted policy as JSON");
    eprintln!("  save                        Persist the graph now");
    eprintln!("  api                         Show the daemon API catalog");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn send_request(addr: &str, req: &Request, timeout: Duration) -> Result<serde_json::Value, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);

    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))?;

    let mut resp_line = String::new();
    reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn field<T: for<'de> Deserialize<'de>>(v: &serde_json::Value, key: &str) -> Option<T> {
    v.get(key).and_then(|x| serde_json::from_value(x.clone()).ok())
}

fn fmt_opt(v: Option<f32>) -> String {
    v.map(|x| format!("{x:.3}")).unwrap_or_else(|| "-".to_string())
}

fn print_summary(label: &str, s: &MetricsSummary) {
    let dist: Vec<String> = s
        .rating_distribution
        .iter()
        .map(|(r, c)| format!("{r}:{c}"))
        .collect();
    println!(
        "{label}total={} avg={} recent={} acc={} dist=[{}]",
        s.total_feedback,
        fmt_opt(s.average_rating),
        fmt_opt(s.recent_average_rating),
        fmt_opt(s.accuracy),
        dist.join(" ")
    );
}

fn print_pretty(v: &serde_json::Value) {
    match serde_json::to_string_pretty(v) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed: {e}"),
    }
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let make_error = |msg: &str| -> ! {
        eprintln!("{}", msg);
        process::exit(1);
    };

    let req = match cmd.as_str() {
        "record" => {
            if args.len() < 4 {
                usage();
            }
            Request::RecordInteraction {
                action: args[1].clone(),
                user_input: args[2].clone(),
                agent_response: args[3].clone(),
            }
        }
        "rate" => {
            if args.len() < 3 {
                usage();
            }
            let rating = args[2]
                .parse()
                .unwrap_or_else(|_| make_error("rating must be an integer"));
            Request::RecordFeedback {
                interaction_id: args[1].clone(),
                rating,
                tags: args[3..].to_vec(),
            }
        }
        "suggest" => Request::Suggest {
            user_input: Some(args[1..].join(" ")),
        },
        "train" => Request::Train,
        "metrics" => Request::Metrics,
        "export" => Request::Export,
        "versions" => Request::PolicyVersions,
        "policy" => {
            if args.len() < 2 {
                usage();
            }
            let version = args[1]
                .parse()
                .unwrap_or_else(|_| make_error("version must be an integer"));
            Request::LoadPolicy { version }
        }
        "save" => Request::Save,
        "api" => Request::ApiCatalog,
        _ => usage(),
    };

    // Training runs to completion before the daemon answers.
    let timeout = match req {
        Request::Train => Duration::from_secs(300),
        _ => Duration::from_secs(5),
    };

    let resp = match send_request(&addr, &req, timeout) {
        Ok(v) => v,
        Err(e) => make_error(&format!("Failed: {e}")),
    };

    match resp.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "InteractionRecorded" => {
            let id: String = field(&resp, "interaction_id").unwrap_or_default();
            println!("{id}");
        }
        "FeedbackRecorded" => {
            let reward: f32 = field(&resp, "reward").unwrap_or_default();
            let replaced: bool = field(&resp, "replaced").unwrap_or_default();
            println!("reward={reward:.2} replaced={replaced}");
        }
        "Suggestion" => {
            let thinking: String = field(&resp, "thinking").unwrap_or_default();
            println!("{thinking}");
            if let Some(s) = field::<Suggestion>(&resp, "suggestion") {
                for p in &s.distribution {
                    println!("  {:<26} {:.3}", p.action.as_str(), p.probability);
                }
            }
        }
        "Trained" => {
            let version: u64 = field(&resp, "version").unwrap_or_default();
            println!("trained policy version {version}");
            if let Some(s) = field::<MetricsSummary>(&resp, "before_metrics") {
                print_summary("before: ", &s);
            }
            if let Some(s) = field::<MetricsSummary>(&resp, "after_metrics") {
                print_summary("after:  ", &s);
            }
        }
        "Metrics" => match field::<MetricsSummary>(&resp, "summary") {
            Some(s) => print_summary("", &s),
            None => print_pretty(&resp),
        },
        "PolicyVersions" => {
            let current: Option<u64> = field(&resp, "current").unwrap_or_default();
            let versions: Vec<u64> = field(&resp, "versions").unwrap_or_default();
            for v in versions {
                let marker = if Some(v) == current { "*" } else { " " };
                println!("{marker} {v}");
            }
        }
        "Export" => print_pretty(resp.get("export").unwrap_or(&resp)),
        "Policy" => print_pretty(resp.get("policy").unwrap_or(&resp)),
        "Saved" => {
            let written: bool = field(&resp, "written").unwrap_or_default();
            println!("{}", if written { "saved" } else { "nothing to save" });
        }
        "Error" => {
            let code: String = field(&resp, "code").unwrap_or_default();
            let message: String = field(&resp, "message").unwrap_or_default();
            eprintln!("Error [{code}]: {message}");
            process::exit(1);
        }
        _ => print_pretty(&resp),
    }
}
