//! Tool adapter boundary
//!
//! An adapter performs the actual tool call. The runtime only relies on the
//! timeout contract: a call may be dropped at any await point when it times
//! out or is cancelled.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Stdout prefix a process tool uses to report a modified artifact
pub const MODIFIED_PREFIX: &str = "::modified::";

/// Largest stderr excerpt carried in an error detail, in characters
const STDERR_DETAIL_LIMIT: usize = 2_000;

/// Errors reported by adapters
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The tool ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// The tool process could not be started
    #[error("Failed to spawn '{}': {source}", .program.display())]
    Spawn {
        /// Program that failed to start
        program: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The tool process exited unsuccessfully
    #[error("Process exited with {status}: {stderr}")]
    Exit {
        /// Exit status description
        status: String,
        /// Captured stderr
        stderr: String,
    },

    /// Arguments could not be encoded for the tool
    #[error("Invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    /// IO error while talking to the tool
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        AdapterError::Failed(message.into())
    }
}

/// What an adapter learns about the call it is serving
#[derive(Debug, Clone)]
pub struct AdapterContext {
    /// Tool being invoked
    pub tool_name: String,
    /// Correlation ID of the request
    pub correlation_id: String,
    /// Location the resolver chose for the tool
    pub location: PathBuf,
    /// Entry point inside `location` when it is a directory
    pub adapter_locator: String,
    /// Cancelled when the caller gives up on the call
    pub cancellation: CancellationToken,
}

impl AdapterContext {
    /// Context for calling a tool at `location`
    pub fn new(
        tool_name: impl Into<String>,
        correlation_id: impl Into<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            correlation_id: correlation_id.into(),
            location: location.into(),
            adapter_locator: super::registry::DEFAULT_ADAPTER_LOCATOR.to_string(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Builder: set the entry point
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.adapter_locator = locator.into();
        self
    }

    /// Builder: set the cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Successful adapter output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterOutput {
    /// Textual output, before budgeting
    pub output: String,
    /// Artifacts the call modified
    pub modified_artifacts: Vec<String>,
}

impl AdapterOutput {
    /// Output with no modified artifacts
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            modified_artifacts: Vec::new(),
        }
    }

    /// Builder: record a modified artifact
    pub fn with_modified(mut self, artifact: impl Into<String>) -> Self {
        self.modified_artifacts.push(artifact.into());
        self
    }
}

/// Executes tool calls
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Perform one call
    async fn invoke(&self, args: &Value, ctx: &AdapterContext)
    -> Result<AdapterOutput, AdapterError>;

    /// Adapter kind, for logs
    fn kind(&self) -> &'static str {
        "custom"
    }
}

/// Adapter wrapping an async closure, for in-process tools
pub struct FnAdapter<F> {
    handler: F,
}

impl<F, Fut> FnAdapter<F>
where
    F: Fn(Value, AdapterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AdapterOutput, AdapterError>> + Send,
{
    /// Wrap `handler`
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> ToolAdapter for FnAdapter<F>
where
    F: Fn(Value, AdapterContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AdapterOutput, AdapterError>> + Send,
{
    async fn invoke(
        &self,
        args: &Value,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }

    fn kind(&self) -> &'static str {
        "fn"
    }
}

/// Adapter running the resolved tool as a subprocess
///
/// The JSON arguments are written to stdin and stdout becomes the output.
/// A non-zero exit is a failure carrying stderr. Stdout lines starting with
/// [`MODIFIED_PREFIX`] report modified artifacts and are not part of the
/// output. The child is killed when the call is dropped.
#[derive(Debug, Clone, Default)]
pub struct ProcessAdapter {
    interpreter: Option<PathBuf>,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl ProcessAdapter {
    /// Run the entry point directly
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: run the entry point through an interpreter (`sh`, `python3`)
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Builder: append a command-line argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Builder: set an environment variable for the child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program to run for `ctx`: the location itself, or the entry point
    /// inside it when the location is a directory
    pub async fn entry_point(ctx: &AdapterContext) -> PathBuf {
        let is_dir = tokio::fs::metadata(&ctx.location)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let program = if is_dir {
            ctx.location.join(&ctx.adapter_locator)
        } else {
            ctx.location.clone()
        };
        // The child runs in the program's directory
        std::path::absolute(&program).unwrap_or(program)
    }

    fn command(&self, program: &Path, ctx: &AdapterContext) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg(program);
                c
            }
            None => Command::new(program),
        };

        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("TOOLGATE_TOOL", &ctx.tool_name)
            .env("TOOLGATE_CORRELATION_ID", &ctx.correlation_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Split process stdout into output text and reported artifacts
pub fn parse_process_stdout(stdout: &str) -> AdapterOutput {
    let mut parsed = AdapterOutput::default();
    for line in stdout.split_inclusive('\n') {
        match line.trim_end().strip_prefix(MODIFIED_PREFIX) {
            Some(artifact) if !artifact.trim().is_empty() => {
                parsed.modified_artifacts.push(artifact.trim().to_string());
            }
            _ => parsed.output.push_str(line),
        }
    }
    parsed
}

#[async_trait]
impl ToolAdapter for ProcessAdapter {
    async fn invoke(
        &self,
        args: &Value,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        if ctx.is_cancelled() {
            return Err(AdapterError::failed("cancelled before start"));
        }
        let program = Self::entry_point(ctx).await;
        let payload = serde_json::to_vec(args)?;

        let mut child = self
            .command(&program, ctx)
            .spawn()
            .map_err(|source| AdapterError::Spawn {
                program: program.clone(),
                source,
            })?;

        tracing::debug!(
            tool = %ctx.tool_name,
            correlation_id = %ctx.correlation_id,
            program = %program.display(),
            "Spawned tool process"
        );

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // Tools that ignore their arguments may exit before reading
                match stdin.write_all(&payload).await {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            Ok(())
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = crate::budget::apply_budget(stderr.trim(), STDERR_DETAIL_LIMIT).output;
            let status = match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "signal".to_string(),
            };
            return Err(AdapterError::Exit { status, stderr });
        }

        Ok(parse_process_stdout(&String::from_utf8_lossy(&output.stdout)))
    }

    fn kind(&self) -> &'static str {
        "process"
    }
}
