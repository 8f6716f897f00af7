//! Probe processes as a [`Transport`].
//!
//! [`ProcessTransport`] resolves `probe://` locators to executables, spawns
//! one child per connection with stdin, stdout and stderr piped, and speaks
//! the line-delimited [`Frame`] protocol over the pipes. Stdout is read on a
//! helper thread so receives can honour a timeout; stderr is forwarded to
//! `tracing` at debug level.
//!
//! A spawned probe learns which callback commands the evaluator serves from
//! the [`PROBE_COMMANDS_ENV`] environment variable (comma separated wire
//! names). Commands it issues anyway are answered with an error outcome
//! without reaching the dispatcher.

use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tracing::{debug, warn};

use crate::defaults::{PROBE_COMMANDS_ENV, PROBE_SCHEME};
use crate::error::TransportError;
use crate::protocol::{CommandOutcome, Frame, ProbeCommand};
use crate::settings::ProbeSettings;
use crate::transport::Transport;

/// Tracing target for probe process operations.
const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Transport context that runs each probe as a child process.
///
/// # Example
///
/// ```rust,no_run
/// use oval_probes::ProbeSettings;
/// use oval_probes::process::ProcessTransport;
/// use oval_probes::protocol::{Frame, ProbeCommand};
/// use oval_probes::transport::Transport;
/// use serde_json::json;
///
/// let mut transport = ProcessTransport::new(&ProbeSettings::default());
/// transport.register_command(ProbeCommand::StateFetch).unwrap();
/// let mut probe = transport.open("probe:///usr/libexec/probes/probe_file").unwrap();
/// transport.send(&mut probe, &Frame::request(json!({"name": "file"}))).unwrap();
/// let reply = transport.receive(&mut probe).unwrap();
/// transport.close(probe).unwrap();
/// # let _ = reply;
/// ```
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    receive_timeout: Option<Duration>,
    close_grace: Duration,
    commands: Vec<ProbeCommand>,
}

impl ProcessTransport {
    /// Creates a transport using the timeouts from `settings`.
    #[must_use]
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            receive_timeout: settings.receive_timeout(),
            close_grace: settings.close_grace(),
            commands: Vec::new(),
        }
    }

    /// Commands registered so far, in registration order.
    #[must_use]
    pub fn registered_commands(&self) -> &[ProbeCommand] {
        &self.commands
    }

    fn advertised_commands(&self) -> String {
        self.commands
            .iter()
            .copied()
            .map(ProbeCommand::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    fn next_line(&self, connection: &ProbeConnection) -> Result<String, TransportError> {
        let locator = &connection.locator;
        let next = match self.receive_timeout {
            Some(timeout) => connection.lines.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => TransportError::TimedOut {
                    locator: locator.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                },
                RecvTimeoutError::Disconnected => TransportError::Closed {
                    locator: locator.clone(),
                },
            })?,
            None => connection.lines.recv().map_err(|_| TransportError::Closed {
                locator: locator.clone(),
            })?,
        };
        next.map_err(|err| TransportError::Io {
            locator: locator.clone(),
            source: Arc::new(err),
        })
    }
}

impl Transport for ProcessTransport {
    type Descriptor = ProbeConnection;

    fn open(&mut self, locator: &str) -> Result<ProbeConnection, TransportError> {
        let executable = executable_for(locator)?;
        debug!(
            target: PROCESS_TARGET,
            %locator,
            %executable,
            "spawning probe process"
        );

        let mut child = Command::new(executable.as_std_path())
            .env(PROBE_COMMANDS_ENV, self.advertised_commands())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(locator, err))?;

        match attach(locator, &mut child) {
            Ok((stdin, lines)) => Ok(ProbeConnection {
                locator: locator.to_owned(),
                child,
                stdin: Some(stdin),
                lines,
            }),
            Err(error) => {
                drop(child.kill());
                drop(child.wait());
                Err(error)
            }
        }
    }

    fn send(&mut self, descriptor: &mut ProbeConnection, frame: &Frame) -> Result<(), TransportError> {
        let locator = descriptor.locator.as_str();
        let mut line = serde_json::to_string(frame).map_err(|err| TransportError::Protocol {
            locator: locator.to_owned(),
            message: format!("cannot encode {} frame: {err}", frame.kind()),
        })?;
        line.push('\n');

        let stdin = descriptor
            .stdin
            .as_mut()
            .ok_or_else(|| TransportError::Closed {
                locator: locator.to_owned(),
            })?;
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(|err| io_error(locator, err))?;

        debug!(
            target: PROCESS_TARGET,
            %locator,
            kind = frame.kind(),
            bytes = line.len(),
            "frame written to probe"
        );
        Ok(())
    }

    fn receive(&mut self, descriptor: &mut ProbeConnection) -> Result<Frame, TransportError> {
        loop {
            let line = self.next_line(descriptor)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let frame: Frame =
                serde_json::from_str(trimmed).map_err(|err| TransportError::Protocol {
                    locator: descriptor.locator.clone(),
                    message: format!("invalid frame: {err}"),
                })?;

            match frame {
                Frame::Command { id, command, .. } if !self.commands.contains(&command) => {
                    warn!(
                        target: PROCESS_TARGET,
                        locator = %descriptor.locator,
                        %command,
                        "probe issued an unregistered command"
                    );
                    let outcome =
                        CommandOutcome::error(format!("command '{command}' is not served"));
                    self.send(descriptor, &Frame::CommandReply { id, outcome })?;
                }
                other => return Ok(other),
            }
        }
    }

    fn close(&mut self, descriptor: ProbeConnection) -> Result<(), TransportError> {
        let mut connection = descriptor;
        let locator = connection.locator.clone();
        drop(connection.stdin.take());

        let deadline = Instant::now() + self.close_grace;
        loop {
            match connection.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(target: PROCESS_TARGET, %locator, ?status, "probe process exited");
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => {
                    warn!(
                        target: PROCESS_TARGET,
                        %locator,
                        grace_ms = u64::try_from(self.close_grace.as_millis()).unwrap_or(u64::MAX),
                        "probe did not exit after stdin closed, killing it"
                    );
                    connection
                        .child
                        .kill()
                        .and_then(|()| connection.child.wait().map(drop))
                        .map_err(|err| io_error(&locator, err))?;
                    return Ok(());
                }
                Err(err) => return Err(io_error(&locator, err)),
            }
        }
    }

    fn register_command(&mut self, command: ProbeCommand) -> Result<(), TransportError> {
        if !self.commands.contains(&command) {
            self.commands.push(command);
        }
        Ok(())
    }
}

/// One running probe process.
///
/// Dropping a connection that was never closed kills the process.
pub struct ProbeConnection {
    locator: String,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<io::Result<String>>,
}

impl ProbeConnection {
    /// Locator the process was started from.
    #[must_use]
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Operating system process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl fmt::Debug for ProbeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeConnection")
            .field("locator", &self.locator)
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

impl Drop for ProbeConnection {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            drop(self.child.kill());
            drop(self.child.wait());
        }
    }
}

/// Resolves a `probe://` locator to the executable it names.
///
/// Everything after `probe://` is the path, taken verbatim: relative
/// directories and characters such as `#` or `?` are part of the file name.
fn executable_for(locator: &str) -> Result<Utf8PathBuf, TransportError> {
    let invalid = |message: &str| TransportError::InvalidLocator {
        locator: locator.to_owned(),
        message: message.to_owned(),
    };

    let (scheme, path) = locator
        .split_once("://")
        .ok_or_else(|| invalid(&format!("expected '{PROBE_SCHEME}://<path>'")))?;
    if scheme != PROBE_SCHEME {
        return Err(invalid(&format!(
            "unsupported scheme '{scheme}', expected '{PROBE_SCHEME}'"
        )));
    }
    if path.is_empty() || path.ends_with('/') {
        return Err(invalid("expected an executable path"));
    }
    Ok(Utf8PathBuf::from(path))
}

/// Takes the child's pipes and starts the stdout reader and stderr forwarder.
fn attach(
    locator: &str,
    child: &mut Child,
) -> Result<(ChildStdin, Receiver<io::Result<String>>), TransportError> {
    let missing = |stream: &str| {
        spawn_error(
            locator,
            io::Error::other(format!("failed to capture probe {stream}")),
        )
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let (sender, lines) = mpsc::channel();
    thread::Builder::new()
        .name(String::from("probe-stdout"))
        .spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let failed = line.is_err();
                if sender.send(line).is_err() || failed {
                    break;
                }
            }
        })
        .map_err(|err| spawn_error(locator, err))?;

    let owner = locator.to_owned();
    thread::Builder::new()
        .name(String::from("probe-stderr"))
        .spawn(move || forward_stderr(&owner, stderr))
        .map_err(|err| spawn_error(locator, err))?;

    Ok((stdin, lines))
}

fn forward_stderr(locator: &str, stderr: impl Read) {
    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
        if !line.trim().is_empty() {
            debug!(target: PROCESS_TARGET, %locator, stderr = %line.trim_end(), "probe stderr");
        }
    }
}

fn spawn_error(locator: &str, err: io::Error) -> TransportError {
    TransportError::Spawn {
        locator: locator.to_owned(),
        source: Arc::new(err),
    }
}

fn io_error(locator: &str, err: io::Error) -> TransportError {
    TransportError::Io {
        locator: locator.to_owned(),
        source: Arc::new(err),
    }
}
