//! Output sink shared by concurrently running nodes.
//!
//! Each node writes through its own [`NodeOutput`]. In live mode lines go
//! straight to the sink, prefixed with the node name, and interleave with
//! other nodes. In buffered mode lines are held until the node finishes and
//! then written as one block under a single lock, so concurrent siblings
//! never split each other's output.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use super::Operation;
use crate::utils::ProgressBar;

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Destination for all node output of a run.
#[derive(Clone)]
pub struct OutputHub {
    sink: Sink,
    progress: Option<ProgressBar>,
}

impl OutputHub {
    /// Hub writing to `writer`.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
            progress: None,
        }
    }

    /// Hub writing to the process stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Clear `bar` while writing so output and progress don't overlap.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Output handle for one node's operation.
    #[must_use]
    pub fn node(&self, name: &str, operation: Operation, live: bool) -> NodeOutput {
        NodeOutput {
            hub: self.clone(),
            name: name.to_string(),
            operation,
            buffer: (!live).then(|| Mutex::new(Vec::new())),
        }
    }

    /// Write `text` as one uninterrupted block.
    fn write_block(&self, text: &str) {
        let write = || {
            let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = sink.write_all(text.as_bytes()).and_then(|()| sink.flush()) {
                tracing::warn!("Failed to write node output: {}", e);
            }
        };
        match &self.progress {
            Some(bar) => bar.suspend(write),
            None => write(),
        }
    }
}

/// Per-node output handle given to executors.
pub struct NodeOutput {
    hub: OutputHub,
    name: String,
    operation: Operation,
    /// `None` in live mode.
    buffer: Option<Mutex<Vec<String>>>,
}

impl NodeOutput {
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.buffer.is_none()
    }

    /// Record one line of output.
    pub fn line(&self, line: impl AsRef<str>) {
        let line = line.as_ref().trim_end_matches(['\r', '\n']);
        match &self.buffer {
            Some(buffer) => {
                buffer.lock().unwrap_or_else(PoisonError::into_inner).push(line.to_string());
            }
            None => self.hub.write_block(&format!("[{}] {}\n", self.name, line)),
        }
    }

    /// Emit buffered lines as a single block. No-op in live mode or when
    /// nothing was written.
    pub fn flush(&self) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        let lines = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
        if lines.is_empty() {
            return;
        }

        let mut block = format!("==> {} ({})\n", self.name, self.operation);
        for line in lines {
            block.push_str("    ");
            block.push_str(&line);
            block.push('\n');
        }
        self.hub.write_block(&block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::SharedBuffer;

    #[test]
    fn test_live_lines_are_prefixed() {
        let buffer = SharedBuffer::default();
        let hub = OutputHub::new(buffer.clone());
        let output = hub.node("api", Operation::Deploy, true);

        output.line("applying manifests\n");
        output.flush();

        assert!(output.is_live());
        assert_eq!(buffer.contents(), "[api] applying manifests\n");
    }

    #[test]
    fn test_buffered_lines_flush_as_block() {
        let buffer = SharedBuffer::default();
        let hub = OutputHub::new(buffer.clone());
        let output = hub.node("db", Operation::Purge, false);

        output.line("one");
        output.line("two");
        assert_eq!(buffer.contents(), "");

        output.flush();
        assert_eq!(buffer.contents(), "==> db (purge)\n    one\n    two\n");

        output.flush();
        assert_eq!(buffer.contents(), "==> db (purge)\n    one\n    two\n");
    }
}
