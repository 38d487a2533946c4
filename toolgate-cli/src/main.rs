//! Toolgate CLI - resolve and invoke agent tools from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use toolgate_core::prelude::*;

#[derive(Parser)]
#[command(name = "toolgate")]
#[command(about = "Tool invocation runtime for agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (replaces toolgate.toml and environment lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where a tool resolves to
    Resolve {
        /// Tool name
        tool: String,
    },
    /// Invoke a configured tool
    Invoke {
        /// Tool name
        tool: String,

        /// Arguments as a JSON value
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Correlation ID (generated when omitted)
        #[arg(long)]
        correlation_id: Option<String>,

        /// Run the tool entry point through this interpreter
        #[arg(long, env = "TOOLGATE_INTERPRETER")]
        interpreter: Option<PathBuf>,
    },
    /// List configured tools with their limits
    Tools,
    /// Print the effective configuration
    Config,
    /// Version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<ToolgateConfig> {
    let config = match path {
        Some(path) => ToolgateConfig::from_file(path),
        None => ToolgateConfig::load(),
    };
    config.context("Failed to load configuration")
}

fn build_runtime(config: &ToolgateConfig, interpreter: Option<PathBuf>) -> Result<ToolRuntime> {
    let mut adapter = ProcessAdapter::new();
    if let Some(interpreter) = interpreter {
        adapter = adapter.with_interpreter(interpreter);
    }
    let adapter: Arc<dyn ToolAdapter> = Arc::new(adapter);

    let mut builder = ToolRuntime::builder()
        .with_config(config)
        .with_bus(Arc::new(TracingBus));
    for spec in &config.tools {
        builder = builder.register(ToolRegistration::from_spec(spec, config), Arc::clone(&adapter));
    }
    builder.build().context("Failed to register tools")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("toolgate {}", env!("CARGO_PKG_VERSION"));
            println!("toolgate-core {}", toolgate_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Tools => {
            let config = load_config(cli.config.as_ref())?;
            let runtime = build_runtime(&config, None)?;
            for name in runtime.tool_names() {
                if let Some(r) = runtime.registration(name) {
                    println!(
                        "{:<20} budget={:<8} timeout={:<8?} threshold={} cooldown={:?}",
                        r.name,
                        r.max_output_budget,
                        r.timeout,
                        r.breaker.failure_threshold,
                        r.breaker.cooldown
                    );
                }
            }
        }
        Commands::Resolve { tool } => {
            let config = load_config(cli.config.as_ref())?;
            let resolved = resolve(&tool, &config.paths, &FsProbe)?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::Invoke {
            tool,
            args,
            correlation_id,
            interpreter,
        } => {
            let mut request =
                InvocationRequest::from_json(tool, &args).context("--args must be valid JSON")?;
            let config = load_config(cli.config.as_ref())?;
            let runtime = build_runtime(&config, interpreter)?;

            if let Some(id) = correlation_id {
                request = request.with_correlation_id(id);
            }

            let result = runtime.invoke(request).await;
            runtime.flush_events().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
