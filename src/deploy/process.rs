//! Runs external tools and streams their output into a node's output.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::core::KubedepsError;
use crate::runner::NodeOutput;

/// Locate `program` on `PATH` (or accept it as a path).
pub fn resolve_tool(program: &str) -> Result<PathBuf, KubedepsError> {
    which::which(program).map_err(|_| KubedepsError::ToolNotFound {
        tool: program.to_string(),
    })
}

/// A fully specified tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command line for logs and error messages.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion, forwarding stdout and stderr line by line.
    ///
    /// The child is killed if the returned future is dropped (node or run
    /// timeout). On unix it runs in its own process group, so a terminal
    /// Ctrl-C reaches only kubedeps and in-flight operations complete.
    pub async fn run(&self, output: &NodeOutput) -> Result<()> {
        let program = resolve_tool(&self.program)?;
        tracing::debug!("Executing: {} (in {})", self.display(), self.cwd.display());

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().with_context(|| format!("Failed to start {}", self.display()))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (status, (), ()) =
            tokio::join!(child.wait(), forward_lines(stdout, output), forward_lines(stderr, output));
        let status = status.with_context(|| format!("Failed to wait for {}", self.display()))?;

        if !status.success() {
            bail!("`{}` exited with {}", self.display(), status);
        }
        Ok(())
    }
}

async fn forward_lines(stream: Option<impl AsyncRead + Unpin>, output: &NodeOutput) {
    let Some(stream) = stream else {
        return;
    };
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => output.line(line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading tool output: {}", e);
                break;
            }
        }
    }
}
