//! Frame envelope exchanged between the evaluator and a probe.
//!
//! A connection carries one JSON object per line in each direction. The
//! evaluator writes a [`Frame::Request`] and then reads frames until the
//! matching [`Frame::Reply`] arrives. While it waits, the probe may interleave
//! any number of [`Frame::Command`] frames; each is answered with a
//! [`Frame::CommandReply`] carrying the same `id` before the evaluator reads
//! again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Callback commands a probe may issue while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeCommand {
    /// Evaluate the object whose id is the payload string.
    #[serde(rename = "obj_eval")]
    ObjectEval,
    /// Encode the states whose ids are the payload array.
    #[serde(rename = "ste_fetch")]
    StateFetch,
}

impl ProbeCommand {
    /// Every command, in registration order.
    pub const ALL: [Self; 2] = [Self::ObjectEval, Self::StateFetch];

    /// Returns the wire name.
    ///
    /// # Example
    ///
    /// ```
    /// use oval_probes::protocol::ProbeCommand;
    ///
    /// assert_eq!(ProbeCommand::StateFetch.as_str(), "ste_fetch");
    /// assert_eq!("obj_eval".parse::<ProbeCommand>(), Ok(ProbeCommand::ObjectEval));
    /// ```
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ObjectEval => "obj_eval",
            Self::StateFetch => "ste_fetch",
        }
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown command name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown probe command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for ProbeCommand {
    type Err = UnknownCommand;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == value)
            .ok_or_else(|| UnknownCommand(value.to_owned()))
    }
}

/// Result of serving a callback command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The command completed and has no data to return.
    Ack,
    /// Encoded states, in the order they were requested.
    States {
        /// One encoded state per requested id.
        states: Vec<Value>,
    },
    /// The command failed.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl CommandOutcome {
    /// Builds an error outcome from any displayable failure.
    #[must_use]
    pub fn error(reason: impl fmt::Display) -> Self {
        Self::Error {
            message: reason.to_string(),
        }
    }

    /// Returns `true` unless this is an [`CommandOutcome::Error`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }
}

/// One line of the probe protocol.
///
/// # Example
///
/// ```
/// use oval_probes::protocol::Frame;
/// use serde_json::json;
///
/// let frame = Frame::request(json!({"name": "file"}));
/// let line = serde_json::to_string(&frame).unwrap();
/// assert_eq!(line, r#"{"kind":"request","payload":{"name":"file"}}"#);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Evaluator to probe: evaluate this encoded object.
    Request {
        /// Encoded object.
        payload: Value,
    },
    /// Probe to evaluator: the collected data for the pending request.
    Reply {
        /// Encoded system characteristics.
        payload: Value,
    },
    /// Probe to evaluator: a callback issued mid-request.
    Command {
        /// Correlation id echoed in the reply.
        id: u64,
        /// Requested command.
        command: ProbeCommand,
        /// Command argument.
        #[serde(default)]
        payload: Value,
    },
    /// Evaluator to probe: the answer to a [`Frame::Command`].
    CommandReply {
        /// Correlation id of the command.
        id: u64,
        /// Result of serving it.
        outcome: CommandOutcome,
    },
}

impl Frame {
    /// Wraps an encoded object in a request frame.
    #[must_use]
    pub const fn request(payload: Value) -> Self {
        Self::Request { payload }
    }

    /// Wraps encoded system characteristics in a reply frame.
    #[must_use]
    pub const fn reply(payload: Value) -> Self {
        Self::Reply { payload }
    }

    /// Short name of the frame kind, for logs and protocol errors.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Reply { .. } => "reply",
            Self::Command { .. } => "command",
            Self::CommandReply { .. } => "command_reply",
        }
    }
}

#[cfg(test)]
mod tests;
