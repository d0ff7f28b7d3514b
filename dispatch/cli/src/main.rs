//! dispatchctl - Command-line front end for agent-dispatch
//!
//! Loads the dispatch configuration, wires the stack, and runs one command
//! against it.
//!
//! # Usage
//!
//! ```bash
//! # Health-check every configured backend
//! dispatchctl check
//!
//! # Route a single completion
//! dispatchctl complete --agent npc-7 "Say hello in five words"
//!
//! # Resolve decisions for a batch of observations (JSON array, `-` for stdin)
//! dispatchctl resolve --input observations.json
//!
//! # Show the resolved configuration
//! dispatchctl config
//!
//! # Custom config file, verbose logging
//! dispatchctl --config ./dispatch.toml --log-level debug check
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): cancels the in-flight command; admission waits,
//!   backoff sleeps and HTTP calls return promptly.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use dispatch_core::{
    load_config_from_path, CallContext, CompletionRequest, Decision, DispatchConfig,
    DispatchService, Observation,
};

/// dispatchctl - Weighted, rate-limited LLM dispatch for agent simulations
#[derive(Parser, Debug)]
#[command(name = "dispatchctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DISPATCH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "DISPATCH_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Health-check every configured backend
    Check,

    /// Route a single completion
    Complete {
        /// Agent the request is made for (applies overrides)
        #[arg(short = 'a', long)]
        agent: Option<String>,

        /// Output token limit
        #[arg(long, default_value_t = 150)]
        max_tokens: u32,

        /// Sampling temperature
        #[arg(long, default_value_t = 0.7)]
        temperature: f32,

        /// Prompt text
        prompt: String,
    },

    /// Resolve decisions for a batch of observations
    Resolve {
        /// JSON array of observations, `-` for stdin
        #[arg(short = 'i', long, value_name = "FILE")]
        input: PathBuf,
    },

    /// Show the resolved configuration
    Config,
}

fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("dispatchctl={level}").parse()?)
                .add_directive(format!("dispatch_core={level}").parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
    Ok(())
}

/// Read a JSON array of observations from `path`, or stdin for `-`
fn read_observations(path: &Path) -> Result<Vec<Observation>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read observations from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read observations from {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Observations must be a JSON array")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One line of `resolve` output
fn format_row(decision: &Decision, cached: bool) -> String {
    format!(
        "{:<14} {:<10} {}{}",
        decision.agent_id,
        decision.action,
        decision.reason.as_deref().unwrap_or(""),
        if cached { "  [cached]" } else { "" }
    )
}

fn describe_config(config: &DispatchConfig) {
    println!("source: {}", config.source());
    if let Some(path) = &config.config_file_path {
        println!("file:   {}", path.display());
    }
    println!("backends:");
    for backend in &config.backends {
        let d = &backend.descriptor;
        let key = if backend.api_key.is_some() {
            "key set"
        } else {
            "no key"
        };
        println!(
            "  {:<14} {:<7} weight={:<3} model={} enabled={} ({key})",
            d.name,
            d.protocol.to_string(),
            d.effective_weight(),
            if d.model.is_empty() { "-" } else { d.model.as_str() },
            d.enabled,
        );
    }
    for (agent, backend) in &config.overrides {
        println!("override: {agent} -> {backend}");
    }
    let admission = &config.router.admission;
    println!(
        "rate limit: capacity={} refill={}/s",
        admission.capacity, admission.refill_rate
    );
    println!(
        "cache: max_size={} ttl={}s grid={}",
        config.cache.max_size,
        config.cache.ttl.as_secs(),
        config.cache.grid_size
    );
    println!("actions: {}", config.actions.names().join(", "));
}

async fn run(args: Args, ctx: CallContext) -> Result<()> {
    let config = load_config_from_path(
        args.config
            .clone()
            .or_else(dispatch_core::default_config_path),
    )
    .context("Failed to load configuration")?;

    if let Command::Config = args.command {
        describe_config(&config);
        return Ok(());
    }

    let service = DispatchService::from_config(&config).context("Failed to build dispatch stack")?;
    for skipped in service.skipped_backends() {
        warn!(backend = %skipped.name, reason = %skipped.reason, "backend not loaded");
    }
    info!(backends = ?service.router().active_backends(), "dispatch stack ready");

    match args.command {
        Command::Check => {
            let reports = service.health_check(&ctx).await;
            if args.json {
                print_json(&reports)?;
            } else if reports.is_empty() {
                println!("no backends loaded");
            } else {
                for report in &reports {
                    let status = if report.healthy { "ok" } else { "FAIL" };
                    println!(
                        "{:<14} {:<4} {:>6}ms  {}{}",
                        report.backend,
                        status,
                        report.latency.as_millis(),
                        report.model,
                        report
                            .error
                            .as_deref()
                            .map(|e| format!("  ({e})"))
                            .unwrap_or_default()
                    );
                }
            }
            if reports.iter().any(|r| !r.healthy) {
                anyhow::bail!("one or more backends are unhealthy");
            }
        }
        Command::Complete {
            agent,
            max_tokens,
            temperature,
            prompt,
        } => {
            let mut request = CompletionRequest::new(prompt)
                .with_max_tokens(max_tokens)
                .with_temperature(temperature);
            if let Some(agent) = agent {
                request = request.with_agent(agent);
            }
            let result = service.complete(&ctx, &request).await?;
            if args.json {
                print_json(&result)?;
            } else {
                println!("{}", result.content);
                eprintln!(
                    "[{} / {} in {}ms]",
                    result.backend,
                    result.model,
                    result.latency.as_millis()
                );
            }
        }
        Command::Resolve { input } => {
            let observations = read_observations(&input)?;
            let result = service.resolve(&ctx, &observations).await?;
            if args.json {
                print_json(&result)?;
            } else {
                for (decision, cached) in result.decisions.iter().zip(&result.from_cache) {
                    println!("{}", format_row(decision, *cached));
                }
                if let Some(strategy) = &result.strategy {
                    println!("strategy: {strategy}");
                }
            }
        }
        Command::Config => {}
    }

    if args.json {
        return Ok(());
    }
    let stats = service.stats();
    info!(
        requests = stats.router.requests,
        successes = stats.router.successes,
        retries = stats.router.retries,
        fallbacks = stats.router.fallbacks,
        cache_hit_rate = stats.cache.hit_rate(),
        "done"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let ctx = CallContext::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, cancelling");
            signal_ctx.cancel();
        }
    });

    run(args, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_complete() {
        let args = Args::try_parse_from([
            "dispatchctl",
            "--config",
            "/tmp/d.toml",
            "complete",
            "--agent",
            "npc-1",
            "--max-tokens",
            "64",
            "hello there",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/d.toml")));
        match args.command {
            Command::Complete {
                agent,
                max_tokens,
                prompt,
                ..
            } => {
                assert_eq!(agent.as_deref(), Some("npc-1"));
                assert_eq!(max_tokens, 64);
                assert_eq!(prompt, "hello there");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_resolve_requires_input() {
        assert!(Args::try_parse_from(["dispatchctl", "resolve"]).is_err());
        let args = Args::try_parse_from(["dispatchctl", "resolve", "-i", "-", "--json"]).unwrap();
        assert!(args.json);
        assert!(matches!(args.command, Command::Resolve { .. }));
    }

    #[test]
    fn test_read_observations_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"agent_id":"npc-1","name":"Ada","position":[10.0,20.0],
                 "points":[{{"id":"g1","distance":40.0}}]}}]"#
        )
        .unwrap();

        let observations = read_observations(file.path()).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].agent_id, "npc-1");
        assert_eq!(observations[0].points[0].id, "g1");
        assert!(!observations[0].points[0].resolved);
    }

    #[test]
    fn test_format_row() {
        let obs = Observation::new("npc-1", "Ada", (0.0, 0.0));
        let fallback = Decision::fallback(&obs);
        assert_eq!(
            format_row(&fallback, false),
            "npc-1          explore    Looking around..."
        );

        let mut silent = fallback.clone();
        silent.action = "wait".into();
        silent.reason = None;
        assert_eq!(format_row(&silent, true), "npc-1          wait         [cached]");
    }

    #[test]
    fn test_read_observations_rejects_non_array() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"agent_id":"npc-1"}}"#).unwrap();
        assert!(read_observations(file.path()).is_err());
    }
}
