//! Object evaluation through probe processes.
//!
//! [`ProbeSession`] is the evaluation context a host driver owns: it lazily
//! builds one [`ConnectionTable`] and reuses it for every object it
//! evaluates. [`ProbeSession::evaluate_object`] runs the full exchange:
//! registry lookup, encoding, connection checkout, a bounded retry loop over
//! send and receive, serving any callback commands the probe issues while the
//! request is pending, and decoding of the reply.
//!
//! Transport failures are retried under a single attempt budget shared by
//! connect, send and receive. A rejected locator and every other failure are
//! reported immediately.

use std::thread;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::ProbeCodec;
use crate::command;
use crate::connection::{CheckoutError, ConnectionTable, Lease};
use crate::error::{DispatchError, TransportError};
use crate::model::{DefinitionModel, ProbeObject};
use crate::protocol::{CommandOutcome, Frame, ProbeCommand};
use crate::registry::{self, ObjectType, ProbeDescriptor};
use crate::settings::ProbeSettings;
use crate::transport::{Transport, TransportFactory};

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

type TableOf<F> = ConnectionTable<<F as TransportFactory>::Transport>;
type DescriptorOf<F> = <<F as TransportFactory>::Transport as Transport>::Descriptor;

/// Outcome of one attempt inside the retry loop.
enum AttemptError {
    /// Retryable: the connection broke and has been discarded.
    Transport {
        locator: String,
        source: TransportError,
    },
    /// Not retryable.
    Fatal(DispatchError),
}

/// One evaluation context: a transport factory, a codec, settings and the
/// lazily created connection table.
///
/// A session is meant to be owned by a single evaluation unit (one thread,
/// one task). It performs no internal locking; sharing it across threads
/// requires external synchronisation. Dropping the session drops its
/// transport and every cached connection.
///
/// # Example
///
/// ```rust,no_run
/// use oval_probes::codec::JsonCodec;
/// use oval_probes::model::{DefinitionModel, DefinitionSet, ObjectRecord};
/// use oval_probes::process::ProcessTransport;
/// use oval_probes::{ObjectType, ProbeSession, ProbeSettings, TransportError};
/// use serde_json::{Value, json};
///
/// let settings = ProbeSettings::default();
/// let factory = {
///     let probe_settings = settings.clone();
///     move || Ok::<_, TransportError>(ProcessTransport::new(&probe_settings))
/// };
/// let mut session = ProbeSession::new(factory, JsonCodec::<Value>::new(), settings);
///
/// let mut model: DefinitionSet = DefinitionSet::new();
/// model.insert_object(ObjectRecord::new("oval:x:obj:1", ObjectType::FAMILY, json!({})));
/// let object = model.object("oval:x:obj:1").unwrap();
/// let collected = session.evaluate_object(object, &model).unwrap();
/// println!("{:?}", collected.data());
/// ```
pub struct ProbeSession<F: TransportFactory, C> {
    factory: F,
    codec: C,
    settings: ProbeSettings,
    connections: Option<TableOf<F>>,
}

impl<F: TransportFactory, C> ProbeSession<F, C> {
    /// Creates a session. No transport is created until the first
    /// evaluation.
    #[must_use]
    pub const fn new(factory: F, codec: C, settings: ProbeSettings) -> Self {
        Self {
            factory,
            codec,
            settings,
            connections: None,
        }
    }

    /// Settings in effect for this session.
    #[must_use]
    pub const fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Codec used for requests, replies and states.
    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }

    /// The connection table, if one has been created yet.
    #[must_use]
    pub const fn connection_table(&self) -> Option<&TableOf<F>> {
        self.connections.as_ref()
    }

    /// Returns the session's connection table, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DispatchInitFailed`] if the transport factory
    /// fails.
    pub fn connections(&mut self) -> Result<&mut TableOf<F>, DispatchError> {
        table_in(&mut self.connections, &self.factory)
    }

    /// Evaluates `object` by delegating it to its probe.
    ///
    /// Callback commands issued by the probe are served against `model`
    /// while the request is pending; a nested object evaluation reuses this
    /// session.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::DispatchInitFailed`] if the connection table or its
    ///   callback commands cannot be set up.
    /// - [`DispatchError::UnsupportedObjectType`] if no probe serves the
    ///   object's type.
    /// - [`DispatchError::EncodingFailed`] / [`DispatchError::DecodingFailed`]
    ///   for codec failures.
    /// - [`DispatchError::TransportExhausted`] once the attempt budget is
    ///   spent.
    /// - [`DispatchError::InvalidProbeLocator`] if the transport rejects the
    ///   probe's locator; this is not retried.
    /// - [`DispatchError::RecursiveDispatch`] if the probe for this type is
    ///   already mid-request on this session.
    pub fn evaluate_object<M>(
        &mut self,
        object: &M::Object,
        model: &M,
    ) -> Result<C::SystemCharacteristics, DispatchError>
    where
        M: DefinitionModel,
        C: ProbeCodec<M>,
    {
        self.connections()?
            .ensure_commands_registered()
            .map_err(|source| DispatchError::DispatchInitFailed { source })?;

        let object_type = object.object_type();
        let probe = registry::lookup_by_type(object_type).ok_or_else(|| {
            DispatchError::UnsupportedObjectType {
                object_id: object.id().to_owned(),
                object_type,
            }
        })?;

        let payload = self
            .codec
            .encode_object(probe.display_name(), object)
            .map_err(|source| DispatchError::EncodingFailed {
                object_id: object.id().to_owned(),
                source,
            })?;
        let request = Frame::request(payload);

        debug!(
            target: DISPATCH_TARGET,
            object_id = object.id(),
            probe = probe.display_name(),
            "dispatching object to probe"
        );

        let reply = self.exchange(model, probe, &request)?;

        self.codec
            .decode_system_characteristics(reply, object)
            .map_err(|source| DispatchError::DecodingFailed {
                object_id: object.id().to_owned(),
                source,
            })
    }

    /// Serves one callback command against `model`.
    ///
    /// This is what the dispatcher runs for every [`Frame::Command`] a probe
    /// sends while a request is pending. Failures are reported as
    /// [`CommandOutcome::Error`].
    pub fn serve_command<M>(
        &mut self,
        model: &M,
        command: ProbeCommand,
        payload: &Value,
    ) -> CommandOutcome
    where
        M: DefinitionModel,
        C: ProbeCodec<M>,
    {
        command::serve(self, model, command, payload)
    }

    fn exchange<M>(
        &mut self,
        model: &M,
        probe: &ProbeDescriptor,
        request: &Frame,
    ) -> Result<Value, DispatchError>
    where
        M: DefinitionModel,
        C: ProbeCodec<M>,
    {
        let max_attempts = self.settings.max_attempts();
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            let (locator, source) = match self.attempt(model, probe, request) {
                Ok(payload) => return Ok(payload),
                Err(AttemptError::Fatal(error)) => return Err(error),
                Err(AttemptError::Transport { locator, source }) => (locator, source),
            };

            if !source.is_retryable() {
                warn!(target: DISPATCH_TARGET, %locator, %source, "probe locator rejected");
                return Err(DispatchError::InvalidProbeLocator { locator, source });
            }

            if attempt >= max_attempts {
                warn!(
                    target: DISPATCH_TARGET,
                    %locator,
                    attempts = attempt,
                    %source,
                    "probe retry limit reached"
                );
                return Err(DispatchError::TransportExhausted {
                    locator,
                    attempts: attempt,
                    source,
                });
            }

            warn!(
                target: DISPATCH_TARGET,
                %locator,
                attempt,
                max_attempts,
                %source,
                "probe exchange failed, reconnecting"
            );
            let delay = self.settings.backoff_after(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn attempt<M>(
        &mut self,
        model: &M,
        probe: &ProbeDescriptor,
        request: &Frame,
    ) -> Result<Value, AttemptError>
    where
        M: DefinitionModel,
        C: ProbeCodec<M>,
    {
        let object_type = probe.object_type();
        let settings = &self.settings;
        let table = table_in(&mut self.connections, &self.factory).map_err(AttemptError::Fatal)?;
        let was_connected = table.find(object_type).is_some_and(|entry| entry.is_connected());

        let lease = table
            .checkout(object_type, || settings.locator_for(probe.worker_name()))
            .map_err(|error| match error {
                CheckoutError::InFlight => {
                    AttemptError::Fatal(DispatchError::RecursiveDispatch { object_type })
                }
                CheckoutError::Open { locator, source } => {
                    AttemptError::Transport { locator, source }
                }
            })?;
        let Lease {
            mut descriptor,
            locator,
        } = lease;
        if !was_connected {
            info!(target: DISPATCH_TARGET, %locator, "connected to probe");
        }

        let outcome = self.converse(model, &mut descriptor, &locator, request);
        match outcome {
            Ok(payload) => {
                self.settle(object_type, descriptor, true);
                Ok(payload)
            }
            Err(source) => {
                self.settle(object_type, descriptor, false);
                Err(AttemptError::Transport { locator, source })
            }
        }
    }

    /// Sends the request and reads frames until its reply arrives, serving
    /// callback commands in between.
    fn converse<M>(
        &mut self,
        model: &M,
        descriptor: &mut DescriptorOf<F>,
        locator: &str,
        request: &Frame,
    ) -> Result<Value, TransportError>
    where
        M: DefinitionModel,
        C: ProbeCodec<M>,
    {
        debug!(target: DISPATCH_TARGET, %locator, "sending request");
        self.transport(locator)?.send(descriptor, request)?;

        loop {
            debug!(target: DISPATCH_TARGET, %locator, "waiting for reply");
            let frame = self.transport(locator)?.receive(descriptor)?;
            match frame {
                Frame::Reply { payload } => {
                    debug!(target: DISPATCH_TARGET, %locator, "reply received");
                    return Ok(payload);
                }
                Frame::Command {
                    id,
                    command,
                    payload,
                } => {
                    debug!(target: DISPATCH_TARGET, %locator, id, %command, "serving probe command");
                    let outcome = command::serve(self, model, command, &payload);
                    let reply = Frame::CommandReply { id, outcome };
                    self.transport(locator)?.send(descriptor, &reply)?;
                }
                other => {
                    return Err(TransportError::Protocol {
                        locator: locator.to_owned(),
                        message: format!("unexpected {} frame while awaiting reply", other.kind()),
                    });
                }
            }
        }
    }

    fn transport(&mut self, locator: &str) -> Result<&mut F::Transport, TransportError> {
        self.connections
            .as_mut()
            .map(ConnectionTable::transport_mut)
            .ok_or_else(|| TransportError::Closed {
                locator: locator.to_owned(),
            })
    }

    fn settle(&mut self, object_type: ObjectType, descriptor: DescriptorOf<F>, healthy: bool) {
        let Some(table) = self.connections.as_mut() else {
            return;
        };
        if healthy {
            table.checkin(object_type, descriptor);
        } else {
            table.discard(object_type, descriptor);
        }
    }
}

fn table_in<'a, F: TransportFactory>(
    slot: &'a mut Option<TableOf<F>>,
    factory: &F,
) -> Result<&'a mut TableOf<F>, DispatchError> {
    let table = match slot.take() {
        Some(table) => table,
        None => {
            let transport = factory
                .create()
                .map_err(|source| DispatchError::DispatchInitFailed { source })?;
            debug!(target: DISPATCH_TARGET, "created probe connection table");
            ConnectionTable::new(transport)
        }
    };
    Ok(slot.insert(table))
}
