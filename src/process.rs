//! Running the converter as a child process.
//!
//! [`run`] blocks until the child exits, writing stdin from a scoped thread
//! while both output pipes are drained. [`BackgroundProcess`] never blocks on
//! I/O: input is delivered from a temporary file and output is captured into
//! temporary files that [`BackgroundProcess::poll`] reads incrementally.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Everything a finished child produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Fail with [`Error::ProcessFailure`] if anything at all reached stderr.
    ///
    /// gpsbabel reports many failures on stderr with exit code 0, so the exit
    /// code is not consulted.
    pub fn check(self) -> Result<Self> {
        if self.stderr.is_empty() {
            return Ok(self);
        }
        let stderr = self.stderr_text();
        warn!(exit_code = ?self.exit_code, %stderr, "gpsbabel wrote to stderr");
        Err(Error::ProcessFailure { stderr })
    }
}

fn split_program(args: &[String]) -> Result<(&String, &[String])> {
    args.split_first().ok_or_else(|| Error::Spawn {
        program: String::new(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
    })
}

fn spawn_error(program: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Spawn {
        program: program.to_string(),
        source,
    }
}

/// Run `args` to completion, feeding `input` on stdin.
pub fn run(args: &[String], input: &[u8]) -> Result<ProcessOutput> {
    let (program, rest) = split_program(args)?;
    info!(program = %program, args = ?rest, "running gpsbabel");

    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error(program))?;
    let stdin = child.stdin.take();

    let output = thread::scope(|scope| -> io::Result<_> {
        let writer = scope.spawn(move || feed(stdin, input));
        let output = child.wait_with_output()?;
        writer
            .join()
            .map_err(|_| io::Error::other("stdin writer panicked"))??;
        Ok(output)
    })?;

    debug!(status = %output.status, "gpsbabel exited");
    Ok(ProcessOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Write the whole input, then close stdin by dropping it.
fn feed(stdin: Option<ChildStdin>, input: &[u8]) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(input) {
        // The child stopped reading; whatever it made of the input is in its output.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Result of [`BackgroundProcess::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(Option<i32>),
}

/// Output stream redirected into a temporary file and read back as it grows.
#[derive(Debug)]
struct Capture {
    file: NamedTempFile,
    buf: Vec<u8>,
}

impl Capture {
    /// Returns the capture and the handle to give the child.
    fn new(prefix: &str) -> io::Result<(Self, File)> {
        let file = tempfile::Builder::new().prefix(prefix).tempfile()?;
        let child_end = file.reopen()?;
        Ok((
            Self {
                file,
                buf: Vec::new(),
            },
            child_end,
        ))
    }

    /// Read whatever was appended since the last call.
    fn drain(&mut self) -> io::Result<usize> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(self.buf.len() as u64))?;
        file.read_to_end(&mut self.buf)
    }
}

/// A child started without blocking; drive it with [`poll`](Self::poll).
///
/// There is no internal thread and no cancellation: a caller that stops
/// polling owns the cleanup of the child. Temporary files are removed when
/// this value is dropped.
#[derive(Debug)]
pub struct BackgroundProcess {
    program: String,
    child: Child,
    input: Option<NamedTempFile>,
    stdout: Capture,
    stderr: Capture,
    exit: Option<Option<i32>>,
}

impl BackgroundProcess {
    pub fn spawn(args: &[String], input: &[u8]) -> Result<Self> {
        let (program, rest) = split_program(args)?;

        let mut input_file = tempfile::Builder::new().prefix("gpsbabel-in-").tempfile()?;
        input_file.write_all(input)?;
        input_file.flush()?;
        let child_stdin = input_file.reopen()?;
        let (stdout, child_stdout) = Capture::new("gpsbabel-out-")?;
        let (stderr, child_stderr) = Capture::new("gpsbabel-err-")?;

        info!(program = %program, args = ?rest, "starting gpsbabel in background");
        let child = Command::new(program)
            .args(rest)
            .stdin(Stdio::from(child_stdin))
            .stdout(Stdio::from(child_stdout))
            .stderr(Stdio::from(child_stderr))
            .spawn()
            .map_err(spawn_error(program))?;

        Ok(Self {
            program: program.clone(),
            child,
            input: Some(input_file),
            stdout,
            stderr,
            exit: None,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Check for exit without blocking, collecting any new output.
    pub fn poll(&mut self) -> Result<ProcessStatus> {
        if let Some(code) = self.exit {
            return Ok(ProcessStatus::Exited(code));
        }
        let status = self.child.try_wait()?;
        self.stdout.drain()?;
        self.stderr.drain()?;
        match status {
            Some(status) => {
                debug!(program = %self.program, %status, "gpsbabel exited");
                self.exit = Some(status.code());
                self.input = None;
                Ok(ProcessStatus::Exited(status.code()))
            }
            None => Ok(ProcessStatus::Running),
        }
    }

    /// Output collected so far.
    pub fn stdout(&self) -> &[u8] {
        &self.stdout.buf
    }

    /// Diagnostics collected so far.
    pub fn stderr(&self) -> &[u8] {
        &self.stderr.buf
    }

    /// Wait for exit if needed, read the remaining output, and release the temp files.
    pub fn finish(mut self) -> Result<ProcessOutput> {
        let exit_code = match self.exit {
            Some(code) => code,
            None => self.child.wait()?.code(),
        };
        self.input = None;
        self.stdout.drain()?;
        self.stderr.drain()?;
        Ok(ProcessOutput {
            exit_code,
            stdout: std::mem::take(&mut self.stdout.buf),
            stderr: std::mem::take(&mut self.stderr.buf),
        })
    }
}
