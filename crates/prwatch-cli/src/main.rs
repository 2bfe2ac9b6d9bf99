//! prwatch CLI
//!
//! Hosts the tool surface behind a line-delimited JSON loop: one request
//! object per stdin line, one directive per stdout line. Logs go to stderr
//! so the protocol channel stays clean.

use anyhow::Result;
use clap::{Parser, Subcommand};
use prwatch_agent::{NextStepParams, StartParams, ToolSurface};
use prwatch_core::{Directive, MonitorConfig};
use prwatch_github::{GhExecutor, GhFetcher};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Initialize logging with the specified verbosity level
fn init_logging(verbose: u8, quiet: bool, json: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_file(verbose >= 3)
        .with_line_number(verbose >= 3);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "prwatch")]
#[command(about = "Supervisory agent that watches a pull request and drives its decision loop")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// External dashboard binary launched when a monitor starts
    #[arg(long, env = "PRWATCH_VIEWER", global = true)]
    viewer: Option<String>,

    /// Increase verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output logs as JSON (for machine parsing)
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the tool surface over stdin/stdout
    Serve,
}

/// One request line on stdin
#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Option<Value>,
    tool: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct StopParams {
    monitor_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet, cli.log_json)?;

    match cli.command {
        Commands::Serve => serve(cli.viewer).await,
    }
}

async fn serve(viewer: Option<String>) -> Result<()> {
    let config = MonitorConfig {
        viewer_command: viewer,
        ..MonitorConfig::default()
    };
    let tools = Arc::new(ToolSurface::new(
        Arc::new(GhFetcher::new(config.clone())),
        Arc::new(GhExecutor::new()),
        config,
    ));

    info!("prwatch serving on stdin/stdout");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        let tools = tools.clone();
                        // next_step blocks for its whole poll; each request
                        // runs on its own task so other sessions stay live
                        tokio::spawn(async move {
                            let (id, directive) = dispatch(&tools, &line).await;
                            respond(id, &directive);
                        });
                    }
                    Ok(None) => {
                        info!("stdin closed; shutting down");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin read failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    tools.shutdown().await;
    Ok(())
}

async fn dispatch(tools: &ToolSurface, line: &str) -> (Option<Value>, Directive) {
    let request: ToolRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            return (
                None,
                Directive::stop(format!("Unparseable request: {e}")),
            )
        }
    };

    let directive = match request.tool.as_str() {
        "start" => match serde_json::from_value::<StartParams>(request.params) {
            Ok(params) => tools.start(params).await,
            Err(e) => Directive::stop(format!("Invalid start params: {e}")),
        },
        "next_step" => match serde_json::from_value::<NextStepParams>(request.params) {
            Ok(params) => tools.next_step(params).await,
            Err(e) => Directive::stop(format!("Invalid next_step params: {e}")),
        },
        "stop" => match serde_json::from_value::<StopParams>(request.params) {
            Ok(params) => tools.stop(&params.monitor_id).await,
            Err(e) => Directive::stop(format!("Invalid stop params: {e}")),
        },
        other => Directive::stop(format!("Unknown tool: {other}")),
    };
    (request.id, directive)
}

fn respond(id: Option<Value>, directive: &Directive) {
    let envelope = serde_json::json!({
        "id": id,
        "result": directive,
    });
    // println! locks stdout per call, so concurrent tasks emit whole lines
    println!("{envelope}");
}
