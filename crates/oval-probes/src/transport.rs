//! Transport seam between the dispatcher and probe processes.
//!
//! A [`Transport`] value is the shared context every connection of one
//! [`ConnectionTable`](crate::connection::ConnectionTable) runs over. The
//! production implementation is
//! [`ProcessTransport`](crate::process::ProcessTransport); tests substitute
//! scripted doubles.

use crate::error::TransportError;
use crate::protocol::{Frame, ProbeCommand};

/// Connection primitives used by the dispatcher.
///
/// Implementations need not be thread-safe: a transport is owned by exactly
/// one connection table, which in turn belongs to one evaluation session.
pub trait Transport {
    /// Handle to one live connection.
    type Descriptor;

    /// Opens a connection to the probe named by `locator`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the locator is invalid or the probe
    /// cannot be reached.
    fn open(&mut self, locator: &str) -> Result<Self::Descriptor, TransportError>;

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame cannot be written.
    fn send(&mut self, descriptor: &mut Self::Descriptor, frame: &Frame)
    -> Result<(), TransportError>;

    /// Blocks until the next frame arrives.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection fails, times out, or
    /// yields something that is not a frame.
    fn receive(&mut self, descriptor: &mut Self::Descriptor) -> Result<Frame, TransportError>;

    /// Closes a connection, consuming its descriptor.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the connection did not shut down
    /// cleanly. The descriptor is released either way.
    fn close(&mut self, descriptor: Self::Descriptor) -> Result<(), TransportError>;

    /// Declares that the evaluator serves `command` on connections opened
    /// through this context.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Registration`] if the command cannot be
    /// accepted.
    fn register_command(&mut self, command: ProbeCommand) -> Result<(), TransportError>;
}

/// Builds a fresh transport context for a new connection table.
///
/// Implemented for closures so sessions can be built inline:
///
/// ```
/// use oval_probes::{ProbeSettings, TransportError, process::ProcessTransport};
/// use oval_probes::transport::TransportFactory;
///
/// let factory = || Ok::<_, TransportError>(ProcessTransport::new(&ProbeSettings::default()));
/// assert!(factory.create().is_ok());
/// ```
pub trait TransportFactory {
    /// Transport produced by this factory.
    type Transport: Transport;

    /// Creates a transport context.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the context cannot be initialised.
    fn create(&self) -> Result<Self::Transport, TransportError>;
}

impl<T, F> TransportFactory for F
where
    T: Transport,
    F: Fn() -> Result<T, TransportError>,
{
    type Transport = T;

    fn create(&self) -> Result<T, TransportError> {
        self()
    }
}
