//! Errors raised while dispatching objects to probes.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! so [`TransportError`] stays `Clone` and can be carried as the last cause of
//! an exhausted retry loop.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::ProbeCommand;
use crate::registry::ObjectType;

/// Failures reported by a [`Transport`](crate::transport::Transport).
///
/// The dispatcher treats every variant except
/// [`TransportError::InvalidLocator`] as transient: the broken connection is
/// dropped and the request is retried within the attempt budget. See
/// [`TransportError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The locator could not be interpreted by the transport.
    #[error("invalid probe locator '{locator}': {message}")]
    InvalidLocator {
        /// Locator that was rejected.
        locator: String,
        /// Reason for the rejection.
        message: String,
    },

    /// The probe process could not be started.
    #[error("failed to start probe '{locator}': {source}")]
    Spawn {
        /// Locator of the probe.
        locator: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Reading from or writing to the probe failed.
    #[error("I/O error talking to probe '{locator}': {source}")]
    Io {
        /// Locator of the probe.
        locator: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The probe closed its end of the connection.
    #[error("probe '{locator}' closed the connection")]
    Closed {
        /// Locator of the probe.
        locator: String,
    },

    /// No message arrived within the receive timeout.
    #[error("probe '{locator}' did not answer within {timeout_ms}ms")]
    TimedOut {
        /// Locator of the probe.
        locator: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The probe sent something that is not a valid frame.
    #[error("protocol violation from probe '{locator}': {message}")]
    Protocol {
        /// Locator of the probe.
        locator: String,
        /// Description of the violation.
        message: String,
    },

    /// A callback command could not be registered on the transport context.
    #[error("cannot register command '{command}': {message}")]
    Registration {
        /// Command that was being registered.
        command: ProbeCommand,
        /// Reason for the failure.
        message: String,
    },

    /// The connection is in use by a request that has not completed.
    #[error("connection for object type {object_type} is busy")]
    Busy {
        /// Object type whose connection is busy.
        object_type: ObjectType,
    },
}

impl TransportError {
    /// Returns `false` for failures another attempt cannot clear.
    ///
    /// A rejected locator comes from configuration, so reconnecting with the
    /// same locator fails the same way.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidLocator { .. })
    }
}

/// Failures raised by a [`ProbeCodec`](crate::codec::ProbeCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be serialised into its wire form.
    #[error("failed to serialise {what}: {source}")]
    Serialize {
        /// What was being serialised.
        what: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A wire value could not be deserialised.
    #[error("failed to deserialise {what}: {source}")]
    Deserialize {
        /// What was being deserialised.
        what: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A wire value had an unexpected shape.
    #[error("malformed {what}: {message}")]
    Malformed {
        /// What was being interpreted.
        what: String,
        /// Description of the problem.
        message: String,
    },
}

/// Kind of identifier a probe asked the evaluator to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    /// An object definition.
    Object,
    /// A state definition.
    State,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Object => "object",
            Self::State => "state",
        })
    }
}

/// Errors surfaced by [`ProbeSession::evaluate_object`](crate::ProbeSession::evaluate_object)
/// and by the command handlers.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The connection table could not be created or its commands could not
    /// be registered.
    #[error("dispatch initialisation failed: {source}")]
    DispatchInitFailed {
        /// First failure encountered.
        #[source]
        source: TransportError,
    },

    /// No probe is registered for the object's type.
    #[error("unsupported object type {object_type} (object '{object_id}')")]
    UnsupportedObjectType {
        /// Object that was submitted.
        object_id: String,
        /// Its unregistered type.
        object_type: ObjectType,
    },

    /// The object could not be encoded into a request.
    #[error("failed to encode object '{object_id}': {source}")]
    EncodingFailed {
        /// Object that was submitted.
        object_id: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// Every attempt to reach the probe failed.
    #[error("probe '{locator}' unreachable after {attempts} attempt(s): {source}")]
    TransportExhausted {
        /// Locator of the probe.
        locator: String,
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the last attempt.
        #[source]
        source: TransportError,
    },

    /// The transport rejected the probe's locator.
    #[error("probe locator '{locator}' is unusable: {source}")]
    InvalidProbeLocator {
        /// Locator built for the probe.
        locator: String,
        /// Rejection reported by the transport.
        #[source]
        source: TransportError,
    },

    /// The probe's reply could not be decoded.
    #[error("failed to decode reply for object '{object_id}': {source}")]
    DecodingFailed {
        /// Object that was submitted.
        object_id: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// A probe asked for an identifier the definition model does not hold.
    #[error("unknown {kind} id '{id}'")]
    UnknownIdentifier {
        /// Kind of definition that was looked up.
        kind: IdentifierKind,
        /// Identifier that was requested.
        id: String,
    },

    /// A state requested by a probe could not be encoded.
    #[error("failed to encode state '{state_id}': {source}")]
    StateEncodingFailed {
        /// State that was requested.
        state_id: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// A nested evaluation targeted a probe that is already mid-request.
    #[error("object type {object_type} is already being evaluated on this session")]
    RecursiveDispatch {
        /// Object type whose connection is in flight.
        object_type: ObjectType,
    },

    /// A callback command carried an argument of the wrong shape.
    #[error("invalid argument for command '{command}': {message}")]
    InvalidCommandArgument {
        /// Command that was received.
        command: ProbeCommand,
        /// Description of the problem.
        message: String,
    },
}

impl DispatchError {
    /// Returns `true` when repeating the same call cannot succeed without a
    /// change to the input, the model, or the installed probes.
    ///
    /// Only [`DispatchError::TransportExhausted`] and
    /// [`DispatchError::DispatchInitFailed`] may clear on their own.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !matches!(
            self,
            Self::TransportExhausted { .. } | Self::DispatchInitFailed { .. }
        )
    }
}
