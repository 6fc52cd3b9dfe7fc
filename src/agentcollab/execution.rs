//! Code execution collaborator.
//!
//! Participants flagged as able to execute code do not ask a model for their
//! turn while code is pending. Instead the group chat extracts the fenced code
//! blocks from the conversation and hands them to a [`CodeExecutor`]; the
//! captured output comes back as an [`ExecutionOutcome`] and is appended to the
//! transcript on behalf of the executing participant.
//!
//! Isolation is the executor's concern. [`LocalCodeExecutor`] runs blocks as
//! plain child processes inside the working directory with a timeout. There
//! is no container sandbox.
//!
//! # Example
//!
//! ```rust
//! use agentcollab::execution::extract_code_blocks;
//!
//! let text = "Here you go:\n```python\nprint('hi')\n```\nTERMINATE";
//! let blocks = extract_code_blocks(text);
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].language, "python");
//! assert_eq!(blocks[0].code, "print('hi')");
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Language assumed for fences without an info string.
pub const DEFAULT_LANGUAGE: &str = "python";

/// Exit code reported when a block ran past its timeout (matches `timeout(1)`).
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Maximum bytes kept per captured stream.
const DEFAULT_MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// A fenced code block found in a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Lower-cased info string of the fence, [`DEFAULT_LANGUAGE`] when absent.
    pub language: String,
    /// Block body without the fences.
    pub code: String,
}

impl CodeBlock {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        CodeBlock {
            language: language.into(),
            code: code.into(),
        }
    }

    /// File name requested by a leading `# filename: <name>` comment, if it is
    /// a plain relative path.
    pub fn filename_hint(&self) -> Option<String> {
        let first = self.code.lines().next()?.trim();
        let name = first
            .strip_prefix("# filename:")
            .or_else(|| first.strip_prefix("#filename:"))?
            .trim();
        if name.is_empty() {
            return None;
        }
        let path = Path::new(name);
        let plain = path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if plain {
            Some(name.to_string())
        } else {
            None
        }
    }
}

/// Extract every closed fenced code block from `text`, in order.
///
/// Unterminated fences are ignored. Only the first word of the info string is
/// used as the language.
pub fn extract_code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix("```") {
                    let language = info
                        .split_whitespace()
                        .next()
                        .map(|l| l.to_lowercase())
                        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
                    current = Some((language, Vec::new()));
                }
            }
            Some((language, mut body)) => {
                if trimmed == "```" {
                    blocks.push(CodeBlock::new(language, body.join("\n")));
                } else {
                    body.push(line);
                    current = Some((language, body));
                }
            }
        }
    }

    blocks
}

/// Captured result of running a code block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Process exit code; non-zero means the execution failed.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Language of the block that produced this outcome.
    pub language: String,
    /// File the block was written to inside the working directory.
    pub file_name: Option<String>,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// A failed outcome describing why the block could not run at all.
    pub fn failed(language: impl Into<String>, exit_code: i32, reason: impl Into<String>) -> Self {
        ExecutionOutcome {
            exit_code,
            stdout: String::new(),
            stderr: reason.into(),
            language: language.into(),
            file_name: None,
            duration_ms: 0,
        }
    }

    /// Convert an executor error into a failed outcome that can be appended
    /// to the transcript.
    pub fn from_error(block: &CodeBlock, err: &ExecutionError) -> Self {
        let exit_code = match err {
            ExecutionError::Timeout(_) => TIMEOUT_EXIT_CODE,
            _ => 1,
        };
        ExecutionOutcome::failed(block.language.clone(), exit_code, err.to_string())
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Deterministic text form shown to participants and sinks.
    pub fn render(&self) -> String {
        let status = if self.succeeded() { "succeeded" } else { "failed" };
        let mut out = format!(
            "exitcode: {} (execution {})\nCode output:\n{}",
            self.exit_code, status, self.stdout
        );
        if !self.stderr.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Errors reported by a [`CodeExecutor`].
///
/// These never abort a conversation: the group chat converts them into a
/// failed [`ExecutionOutcome`] so other participants can react.
#[derive(Debug)]
pub enum ExecutionError {
    /// The block ran longer than the configured timeout (seconds).
    Timeout(u64),
    /// The interpreter process could not be started.
    Spawn(String),
    /// Preparing the working directory or code file failed.
    Io(std::io::Error),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Timeout(secs) => write!(f, "Timeout after {} seconds", secs),
            ExecutionError::Spawn(msg) => write!(f, "Failed to start interpreter: {}", msg),
            ExecutionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for ExecutionError {}

impl From<std::io::Error> for ExecutionError {
    fn from(e: std::io::Error) -> Self {
        ExecutionError::Io(e)
    }
}

/// Runs code blocks on behalf of executing participants.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute `block` inside `work_dir` and capture its output.
    ///
    /// A block that runs and exits non-zero is an `Ok` outcome with a
    /// non-zero `exit_code`; `Err` is reserved for not being able to run it.
    async fn execute(
        &self,
        block: &CodeBlock,
        work_dir: &Path,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}

/// Executes blocks as child processes in the working directory.
///
/// Python blocks run through `python3`, shell blocks through `sh`. Any other
/// language produces a failed outcome without spawning anything.
pub struct LocalCodeExecutor {
    timeout_secs: u64,
    python: String,
    shell: String,
    max_output_size: usize,
}

impl LocalCodeExecutor {
    /// Executor with a 60 second timeout.
    pub fn new() -> Self {
        LocalCodeExecutor {
            timeout_secs: 60,
            python: "python3".to_string(),
            shell: "sh".to_string(),
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Override the Python interpreter (e.g. a virtualenv's `python`).
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_max_output_size(mut self, bytes: usize) -> Self {
        self.max_output_size = bytes;
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn interpreter(&self, language: &str) -> Option<(&str, &'static str)> {
        match language {
            "python" | "py" | "python3" => Some((self.python.as_str(), "py")),
            "sh" | "bash" | "shell" | "console" => Some((self.shell.as_str(), "sh")),
            _ => None,
        }
    }

    fn truncate(&self, bytes: &[u8]) -> String {
        let mut text = String::from_utf8_lossy(bytes).to_string();
        if text.len() > self.max_output_size {
            let mut cut = self.max_output_size;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n[output truncated]");
        }
        text
    }
}

impl Default for LocalCodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Content-addressed file name for a block without a filename hint.
fn hashed_file_name(code: &str, extension: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("tmp_code_{}.{}", hex, extension)
}

#[async_trait]
impl CodeExecutor for LocalCodeExecutor {
    async fn execute(
        &self,
        block: &CodeBlock,
        work_dir: &Path,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let (interpreter, extension) = match self.interpreter(&block.language) {
            Some(found) => found,
            None => {
                log::warn!(
                    "LocalCodeExecutor::execute(...): unknown language '{}'",
                    block.language
                );
                return Ok(ExecutionOutcome::failed(
                    block.language.clone(),
                    1,
                    format!("unknown language {}", block.language),
                ));
            }
        };

        tokio::fs::create_dir_all(work_dir).await?;

        let file_name = block
            .filename_hint()
            .unwrap_or_else(|| hashed_file_name(&block.code, extension));
        let file_path: PathBuf = work_dir.join(&file_name);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file_path, block.code.as_bytes()).await?;

        log::debug!(
            "LocalCodeExecutor::execute(...): running {} {} in {}",
            interpreter,
            file_name,
            work_dir.display()
        );

        let start = Instant::now();
        let child = Command::new(interpreter)
            .arg(&file_name)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(self.timeout_secs), child).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecutionError::Spawn(format!("{}: {}", interpreter, e))),
            Err(_) => return Err(ExecutionError::Timeout(self.timeout_secs)),
        };

        Ok(ExecutionOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: self.truncate(&output.stdout),
            stderr: self.truncate(&output.stderr),
            language: block.language.clone(),
            file_name: Some(file_name),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
