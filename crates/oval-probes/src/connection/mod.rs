//! Per-session cache of probe connections.
//!
//! A [`ConnectionTable`] remembers, for every object type evaluated so far,
//! the locator of its probe and the live descriptor (if any). Entries are kept
//! sorted by [`ObjectType`] and looked up by binary search. The table owns the
//! transport context all of its connections run over and is never shared: it
//! belongs to one [`ProbeSession`](crate::ProbeSession), so no locking is
//! done here. Using a table from several threads requires external
//! synchronisation.

use std::fmt;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::protocol::ProbeCommand;
use crate::registry::ObjectType;
use crate::transport::Transport;

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

/// Cached connection state for one object type.
pub struct ConnectionEntry<D> {
    object_type: ObjectType,
    descriptor: Option<D>,
    locator: String,
    in_flight: bool,
}

impl<D> ConnectionEntry<D> {
    const fn new(object_type: ObjectType, locator: String) -> Self {
        Self {
            object_type,
            descriptor: None,
            locator,
            in_flight: false,
        }
    }

    /// Object type served over this entry.
    #[must_use]
    pub const fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Locator used to (re)open the connection.
    #[must_use]
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Live descriptor, if connected and idle.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&D> {
        self.descriptor.as_ref()
    }

    /// Returns `true` when an idle live connection is cached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Returns `true` while a request over this entry awaits its reply.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

impl<D> fmt::Debug for ConnectionEntry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("object_type", &self.object_type)
            .field("locator", &self.locator)
            .field("connected", &self.is_connected())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// A descriptor checked out of the table for one exchange.
pub(crate) struct Lease<D> {
    pub(crate) descriptor: D,
    pub(crate) locator: String,
}

/// Why a descriptor could not be checked out.
pub(crate) enum CheckoutError {
    /// The entry already has a request in flight.
    InFlight,
    /// Opening a fresh connection failed.
    Open {
        locator: String,
        source: TransportError,
    },
}

/// Connection cache bound to one transport context.
pub struct ConnectionTable<T: Transport> {
    transport: T,
    entries: Vec<ConnectionEntry<T::Descriptor>>,
    commands_registered: bool,
}

impl<T: Transport> ConnectionTable<T> {
    /// Creates an empty table over `transport`.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            entries: Vec::new(),
            commands_registered: false,
        }
    }

    /// Shared transport context.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the shared transport context.
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Number of cached entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been cached yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in object type order.
    pub fn entries(&self) -> impl Iterator<Item = &ConnectionEntry<T::Descriptor>> {
        self.entries.iter()
    }

    /// Whether the callback commands have been registered on the transport.
    #[must_use]
    pub const fn commands_registered(&self) -> bool {
        self.commands_registered
    }

    fn position(&self, object_type: ObjectType) -> Result<usize, usize> {
        self.entries
            .binary_search_by_key(&object_type, ConnectionEntry::object_type)
    }

    /// Finds the entry for `object_type`.
    #[must_use]
    pub fn find(&self, object_type: ObjectType) -> Option<&ConnectionEntry<T::Descriptor>> {
        self.position(object_type)
            .ok()
            .and_then(|index| self.entries.get(index))
    }

    fn find_mut(&mut self, object_type: ObjectType) -> Option<&mut ConnectionEntry<T::Descriptor>> {
        self.position(object_type)
            .ok()
            .and_then(|index| self.entries.get_mut(index))
    }

    /// Adds an unconnected entry for `object_type` and returns it.
    ///
    /// If the type already has an entry, that entry is returned unchanged and
    /// `locator` is discarded.
    pub fn insert(
        &mut self,
        object_type: ObjectType,
        locator: impl Into<String>,
    ) -> &ConnectionEntry<T::Descriptor> {
        self.slot(object_type, || locator.into())
    }

    /// Entry for `object_type`, inserting an unconnected one built from
    /// `make_locator` if none exists.
    #[expect(
        clippy::indexing_slicing,
        reason = "the index comes from a binary search over the same vector"
    )]
    fn slot(
        &mut self,
        object_type: ObjectType,
        make_locator: impl FnOnce() -> String,
    ) -> &mut ConnectionEntry<T::Descriptor> {
        let index = match self.position(object_type) {
            Ok(found) => found,
            Err(vacant) => {
                let entry = ConnectionEntry::new(object_type, make_locator());
                debug!(
                    target: CONNECTION_TARGET,
                    %object_type,
                    locator = entry.locator(),
                    "caching probe locator"
                );
                self.entries.insert(vacant, entry);
                vacant
            }
        };
        &mut self.entries[index]
    }

    /// Closes and forgets the entry for `object_type`.
    ///
    /// Returns `Ok(false)` if no entry existed. The entry is removed even if
    /// closing its descriptor fails; the close error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Busy`] if a request over the entry is still
    /// in flight, or the transport's close error.
    pub fn remove(&mut self, object_type: ObjectType) -> Result<bool, TransportError> {
        let Ok(index) = self.position(object_type) else {
            return Ok(false);
        };
        if self.entries.get(index).is_some_and(ConnectionEntry::is_in_flight) {
            return Err(TransportError::Busy { object_type });
        }
        let entry = self.entries.remove(index);
        debug!(
            target: CONNECTION_TARGET,
            %object_type,
            locator = entry.locator(),
            "removing cached probe connection"
        );
        entry.descriptor.map_or(Ok(true), |descriptor| {
            self.transport.close(descriptor).map(|()| true)
        })
    }

    /// Registers the callback commands on the transport context once.
    ///
    /// Commands are registered in [`ProbeCommand::ALL`] order. If a later
    /// registration fails the earlier ones stay registered, the flag stays
    /// unset, and the next call tries every command again.
    ///
    /// # Errors
    ///
    /// Returns the first registration failure.
    pub fn ensure_commands_registered(&mut self) -> Result<(), TransportError> {
        if self.commands_registered {
            return Ok(());
        }
        for command in ProbeCommand::ALL {
            self.transport.register_command(command)?;
        }
        self.commands_registered = true;
        debug!(target: CONNECTION_TARGET, "probe callback commands registered");
        Ok(())
    }

    /// Moves the entry's descriptor out for one exchange, opening a new
    /// connection when none is cached. The entry stays in flight until
    /// [`Self::checkin`] or [`Self::discard`] is called.
    pub(crate) fn checkout(
        &mut self,
        object_type: ObjectType,
        make_locator: impl FnOnce() -> String,
    ) -> Result<Lease<T::Descriptor>, CheckoutError> {
        let entry = self.slot(object_type, make_locator);
        if entry.in_flight {
            return Err(CheckoutError::InFlight);
        }
        let locator = entry.locator.clone();
        let cached = entry.descriptor.take();
        entry.in_flight = true;

        let descriptor = match cached {
            Some(descriptor) => descriptor,
            None => self.open(object_type, &locator).map_err(|source| CheckoutError::Open {
                locator: locator.clone(),
                source,
            })?,
        };
        Ok(Lease {
            descriptor,
            locator,
        })
    }

    /// Opens a fresh connection for an entry that is already marked in
    /// flight, clearing the mark again if the open fails.
    fn open(
        &mut self,
        object_type: ObjectType,
        locator: &str,
    ) -> Result<T::Descriptor, TransportError> {
        match self.transport.open(locator) {
            Ok(descriptor) => {
                debug!(target: CONNECTION_TARGET, %object_type, %locator, "probe connection opened");
                Ok(descriptor)
            }
            Err(error) => {
                if let Some(entry) = self.find_mut(object_type) {
                    entry.in_flight = false;
                }
                Err(error)
            }
        }
    }

    /// Returns a healthy descriptor to its entry.
    pub(crate) fn checkin(&mut self, object_type: ObjectType, descriptor: T::Descriptor) {
        let Some(entry) = self.find_mut(object_type) else {
            self.close_quietly(object_type, descriptor);
            return;
        };
        entry.in_flight = false;
        entry.descriptor = Some(descriptor);
    }

    /// Closes a broken descriptor and marks its entry unconnected.
    pub(crate) fn discard(&mut self, object_type: ObjectType, descriptor: T::Descriptor) {
        if let Some(entry) = self.find_mut(object_type) {
            entry.in_flight = false;
            entry.descriptor = None;
        }
        self.close_quietly(object_type, descriptor);
    }

    fn close_quietly(&mut self, object_type: ObjectType, descriptor: T::Descriptor) {
        if let Err(error) = self.transport.close(descriptor) {
            warn!(
                target: CONNECTION_TARGET,
                %object_type,
                %error,
                "abandoning probe connection that failed to close"
            );
        }
    }
}

impl<T: Transport> fmt::Debug for ConnectionTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("entries", &self.entries)
            .field("commands_registered", &self.commands_registered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
