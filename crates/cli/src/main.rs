//! `pipeflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate` — build a pipe definition and print its node order.
//! - `run`      — execute a pipe, reading `cli` input nodes from stdin.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use engine::{EngineConfig, Handlers, Outcome, Pipe, PipeDefinition, PipeExecutor, PipeRegistry};
use nodes::{InteractiveRenderer, NodeError, RenderRequest, END_OF_INPUT};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeflow", about = "Resumable pipe execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a pipe definition file (JSON or YAML).
    Validate {
        /// Path to the pipe definition.
        path: PathBuf,
    },
    /// Run a pipe definition file.
    Run {
        /// Path to the pipe definition.
        path: PathBuf,
        /// Input value pushed onto the input stack (JSON, or a plain string).
        #[arg(long = "input", short = 'i')]
        inputs: Vec<String>,
        /// JSON object exposed to templates as `global`.
        #[arg(long, env = "PIPEFLOW_GLOBAL")]
        global: Option<String>,
        /// Caller/session identifier.
        #[arg(long, env = "PIPEFLOW_SID", default_value = "")]
        sid: String,
        /// Maximum node dispatches before the run is aborted.
        #[arg(long, env = "PIPEFLOW_MAX_STEPS")]
        max_steps: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let pipe = Pipe::build(load_definition(&path)?)
                .with_context(|| format!("{} is not a valid pipe", path.display()))?;
            let order: Vec<&str> = pipe.nodes.iter().map(|n| n.name.as_str()).collect();
            println!("pipe '{}' is valid. Node order: {order:?}", pipe.id);
        }
        Command::Run {
            path,
            inputs,
            global,
            sid,
            max_steps,
        } => {
            let mut config = EngineConfig::default();
            if let Some(max_steps) = max_steps {
                config.max_steps = max_steps;
            }

            let registry = Arc::new(PipeRegistry::new());
            let pipe = registry.register(load_definition(&path)?)?;
            let handlers = Handlers::default().with_renderer(StdinRenderer::new());
            let executor = PipeExecutor::new(registry, handlers, config);

            let global = match global {
                Some(raw) => parse_global(&raw)?,
                None => Map::new(),
            };
            let input: Vec<Value> = inputs.iter().map(|raw| parse_value(raw)).collect();

            info!(pipe = %pipe.id, "running");
            let outcome = executor
                .create(&pipe.id)?
                .with_global(global)
                .with_sid(sid)
                .exec(input)
                .await?;

            let printed = match outcome {
                Outcome::Completed(value) => serde_json::to_string_pretty(&value)?,
                Outcome::Suspended(rc) => {
                    info!(context_id = %rc.id, node = %rc.node.name, "run suspended");
                    serde_json::to_string_pretty(&rc)?
                }
            };
            println!("{printed}");
        }
    }

    Ok(())
}

/// Read a definition, as YAML for `.yaml`/`.yml` files and JSON otherwise.
fn load_definition(path: &Path) -> Result<PipeDefinition> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let def = if yaml {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML in {}", path.display()))?
    } else {
        PipeDefinition::from_json(&content).with_context(|| format!("invalid JSON in {}", path.display()))?
    };
    Ok(def)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_global(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("--global must be JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--global must be a JSON object, got {other}"),
    }
}

/// Renders `cli` nodes on the terminal: prints the label, replays the
/// autofill seed, then reads lines until an empty line or end of input.
struct StdinRenderer {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinRenderer {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl InteractiveRenderer for StdinRenderer {
    async fn render(&self, request: RenderRequest) -> Result<Vec<String>, NodeError> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(format!("{}:\n", request.label).as_bytes()).await?;

        let mut answer = Vec::new();
        for line in request.seed {
            if line == END_OF_INPUT {
                return Ok(answer);
            }
            stderr.write_all(format!("> {line}\n").as_bytes()).await?;
            answer.push(line);
        }

        let mut lines = self.lines.lock().await;
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                break;
            }
            answer.push(line);
        }
        Ok(answer)
    }
}
