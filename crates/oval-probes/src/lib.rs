//! Probe dispatch for OVAL object evaluation.
//!
//! The `oval-probes` crate routes each OVAL object to the external probe
//! process that knows how to collect system data for its subtype. Probes are
//! long-lived worker processes that speak a line-delimited JSON protocol over
//! standard I/O and may call back into the evaluator while a request is
//! pending.
//!
//! # Architecture
//!
//! - The [`registry`] maps object subtypes to probes. It is a static,
//!   sorted table searched by binary search.
//! - A [`ConnectionTable`] caches, per subtype, the locator of its probe and
//!   the live connection, so each probe is spawned once and reused.
//! - [`ProbeSession`] owns the table and drives the exchange: it encodes the
//!   object, sends it, serves callback commands ([`ProbeCommand`]) the probe
//!   issues, decodes the reply, and reconnects within a bounded attempt
//!   budget when a connection breaks.
//! - The [`Transport`] and [`ProbeCodec`](codec::ProbeCodec) traits are the
//!   seams to the process layer and to the host's definition model.
//!   [`ProcessTransport`](process::ProcessTransport) and [`JsonCodec`] are the
//!   bundled implementations.
//!
//! # Example
//!
//! ```rust,no_run
//! use oval_probes::model::{DefinitionModel, DefinitionSet, ObjectRecord};
//! use oval_probes::process::ProcessTransport;
//! use oval_probes::{JsonCodec, ObjectType, ProbeSession, ProbeSettings, TransportError};
//! use serde_json::{Value, json};
//!
//! let settings = ProbeSettings::default().with_probe_dir("/opt/oval/probes");
//! let factory = {
//!     let probe_settings = settings.clone();
//!     move || Ok::<_, TransportError>(ProcessTransport::new(&probe_settings))
//! };
//! let mut session = ProbeSession::new(factory, JsonCodec::<Value>::new(), settings);
//!
//! let mut model: DefinitionSet = DefinitionSet::new();
//! model.insert_object(ObjectRecord::new(
//!     "oval:org.example:obj:1",
//!     ObjectType::RPM_INFO,
//!     json!({"name": "openssl"}),
//! ));
//!
//! let object = model.object("oval:org.example:obj:1").expect("object exists");
//! match session.evaluate_object(object, &model) {
//!     Ok(collected) => println!("{}", collected.data()),
//!     Err(error) => eprintln!("evaluation failed: {error}"),
//! }
//! ```

pub mod codec;
mod command;
pub mod connection;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod tests;

pub use self::codec::{Collected, JsonCodec};
pub use self::connection::{ConnectionEntry, ConnectionTable};
pub use self::dispatch::ProbeSession;
pub use self::error::{CodecError, DispatchError, IdentifierKind, TransportError};
pub use self::protocol::{CommandOutcome, Frame, ProbeCommand};
pub use self::registry::{ObjectType, ProbeDescriptor};
pub use self::settings::ProbeSettings;
pub use self::transport::{Transport, TransportFactory};
