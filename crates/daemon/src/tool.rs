//! External tool capability.
//!
//! Every collaborator the pipeline shells out to (frame probe, commercial
//! detector, transcoder) is driven through [`ToolRunner`], so stages can be
//! exercised against a scripted runner without spawning real processes.

use async_trait::async_trait;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Which output stream of a tool carries its progress lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A fully built command line for one external tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<OsString>,
    /// Stream delivered line by line to the caller; the other one is discarded.
    pub watch: OutputStream,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, watch: OutputStream) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            watch,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Arguments as lossy UTF-8 strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// How a tool run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Starts a tool, streams its watched output and waits for it to exit.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `invocation` to completion, calling `on_line` for every line of
    /// the watched stream as it arrives.
    ///
    /// An `Err` means the tool could not be started or its output could not
    /// be read; a tool that ran and failed is reported through [`ToolExit`].
    async fn run(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> io::Result<ToolExit>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> io::Result<ToolExit> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        match invocation.watch {
            OutputStream::Stdout => cmd.stdout(Stdio::piped()).stderr(Stdio::null()),
            OutputStream::Stderr => cmd.stdout(Stdio::null()).stderr(Stdio::piped()),
        };

        let mut child = cmd.spawn()?;

        match invocation.watch {
            OutputStream::Stdout => {
                if let Some(stdout) = child.stdout.take() {
                    pump_lines(stdout, on_line).await?;
                }
            }
            OutputStream::Stderr => {
                if let Some(stderr) = child.stderr.take() {
                    pump_lines(stderr, on_line).await?;
                }
            }
        }

        let status = child.wait().await?;
        Ok(ToolExit {
            code: status.code(),
        })
    }
}

async fn pump_lines<R>(mut reader: R, on_line: &mut (dyn for<'l> FnMut(&'l str) + Send)) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::default();
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        splitter.push(&buf[..n], on_line);
    }
    splitter.finish(on_line);
    Ok(())
}

/// Splits a byte stream into lines on `\n` and `\r`.
///
/// Progress meters redraw in place with bare carriage returns, so both count
/// as terminators. Empty lines are dropped.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, chunk: &[u8], on_line: &mut (dyn for<'l> FnMut(&'l str) + Send)) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush(on_line);
            } else {
                self.pending.push(byte);
            }
        }
    }

    pub(crate) fn finish(&mut self, on_line: &mut (dyn for<'l> FnMut(&'l str) + Send)) {
        self.flush(on_line);
    }

    fn flush(&mut self, on_line: &mut (dyn for<'l> FnMut(&'l str) + Send)) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        on_line(&line);
    }
}
