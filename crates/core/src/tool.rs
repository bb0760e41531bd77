use serde_json::{Map, Value};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Flat field name to value mapping returned by a metadata tool for one file.
pub type FieldMap = Map<String, Value>;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STDERR_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("could not start {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} did not finish within {timeout:?} for {file}")]
    Timeout {
        program: String,
        file: String,
        timeout: Duration,
    },
    #[error("{program} exited with {status} for {file}: {stderr}")]
    Failed {
        program: String,
        file: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("could not wait for {program}: {source}")]
    Wait { program: String, source: io::Error },
    #[error("unparseable tool output for {file}: {source}")]
    Parse {
        file: String,
        source: serde_json::Error,
    },
    #[error("no metadata returned for {0}")]
    Empty(String),
    #[error("could not read metadata from {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Something that turns an image file into a flat field map.
pub trait MetadataTool {
    fn name(&self) -> String;

    /// Checks the tool is usable before a run starts; returns a version or label.
    fn probe(&self) -> Result<String, ToolError> {
        Ok(self.name())
    }

    fn read_fields(&self, path: &Path) -> Result<FieldMap, ToolError>;
}

/// Runs an exiftool-compatible program once per file.
#[derive(Debug, Clone)]
pub struct ExiftoolCommand {
    program: OsString,
    args: Vec<OsString>,
    timeout: Duration,
}

impl Default for ExiftoolCommand {
    fn default() -> Self {
        Self::new("exiftool", DEFAULT_TOOL_TIMEOUT)
    }
}

impl ExiftoolCommand {
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self::with_args(program, ["-json"], timeout)
    }

    /// Like [`ExiftoolCommand::new`] with custom leading arguments; the file name is appended last.
    pub fn with_args<I, S>(program: impl Into<OsString>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn program_label(&self) -> String {
        self.program.to_string_lossy().to_string()
    }

    fn run(&self, mut command: Command, file: &str) -> Result<CapturedOutput, ToolError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(?command, "running metadata tool");

        let child = command.spawn().map_err(|source| ToolError::Spawn {
            program: self.program_label(),
            source,
        })?;
        let mut guard = ChildGuard::new(child);
        let stdout = drain(guard.child.stdout.take());
        let stderr = drain(guard.child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match guard.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    return Err(ToolError::Timeout {
                        program: self.program_label(),
                        file: file.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(ToolError::Wait {
                        program: self.program_label(),
                        source,
                    })
                }
            }
        };
        guard.reaped = true;

        Ok(CapturedOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }
}

impl MetadataTool for ExiftoolCommand {
    fn name(&self) -> String {
        self.program_label()
    }

    fn probe(&self) -> Result<String, ToolError> {
        let mut command = Command::new(&self.program);
        command.arg("-ver");
        let output = self.run(command, "-ver")?;
        if !output.status.success() {
            return Err(output.failure(self.program_label(), "-ver"));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// The tool only ever sees the base name and runs inside the file's
    /// directory; this process's working directory is left alone.
    fn read_fields(&self, path: &Path) -> Result<FieldMap, ToolError> {
        let file_label = path.display().to_string();
        let file_name = path.file_name().ok_or_else(|| ToolError::Unreadable {
            path: path.to_path_buf(),
            message: "path has no file name".to_string(),
        })?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        // A leading dash would be read as an option.
        let argument = if file_name.to_string_lossy().starts_with('-') {
            Path::new(".").join(file_name).into_os_string()
        } else {
            file_name.to_os_string()
        };

        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(argument).current_dir(dir);
        let output = self.run(command, &file_label)?;
        if !output.status.success() {
            return Err(output.failure(self.program_label(), &file_label));
        }
        parse_tool_output(&output.stdout, &file_label)
    }
}

/// Parses a JSON array holding at most one object of fields.
pub fn parse_tool_output(stdout: &[u8], file: &str) -> Result<FieldMap, ToolError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(ToolError::Empty(file.to_string()));
    }
    let entries: Vec<FieldMap> =
        serde_json::from_slice(stdout).map_err(|source| ToolError::Parse {
            file: file.to_string(),
            source,
        })?;
    entries
        .into_iter()
        .next()
        .ok_or_else(|| ToolError::Empty(file.to_string()))
}

struct CapturedOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CapturedOutput {
    fn failure(&self, program: String, file: &str) -> ToolError {
        let stderr: String = String::from_utf8_lossy(&self.stderr)
            .trim()
            .chars()
            .take(STDERR_EXCERPT_LEN)
            .collect();
        ToolError::Failed {
            program,
            file: file.to_string(),
            status: self.status,
            stderr,
        }
    }
}

/// Kills and reaps the child unless it already exited on its own.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
