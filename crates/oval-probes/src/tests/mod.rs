//! Crate-level test support and BDD tests.
//!
//! [`ScriptedTransport`] stands in for probe processes. Its state lives
//! behind a shared [`Script`] handle so tests can arrange failures and
//! scripted frames up front and inspect what the dispatcher did afterwards.

use std::cell::{RefCell, RefMut};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde_json::{Value, json};

use crate::codec::JsonCodec;
use crate::dispatch::ProbeSession;
use crate::error::TransportError;
use crate::model::{DefinitionSet, ObjectRecord};
use crate::protocol::{Frame, ProbeCommand};
use crate::registry::ObjectType;
use crate::settings::ProbeSettings;
use crate::transport::{Transport, TransportFactory};


pub(crate) const FILE_OBJECT: &str = "oval:org.example:obj:1";
pub(crate) const FAMILY_OBJECT: &str = "oval:org.example:obj:2";
pub(crate) const SECOND_FILE_OBJECT: &str = "oval:org.example:obj:3";
pub(crate) const UNSUPPORTED_OBJECT: &str = "oval:org.example:obj:9";
pub(crate) const FIRST_STATE: &str = "oval:org.example:ste:1";
pub(crate) const SECOND_STATE: &str = "oval:org.example:ste:2";

/// What the dispatcher did to the scripted transport, and what it should do
/// next.
#[derive(Debug, Default)]
pub(crate) struct Script {
    pub(crate) opens: Vec<String>,
    pub(crate) failing_opens: usize,
    pub(crate) failing_sends: usize,
    pub(crate) failing_receives: usize,
    pub(crate) failing_close: bool,
    pub(crate) rejecting_locators: bool,
    pub(crate) failing_registration: Option<ProbeCommand>,
    pub(crate) registrations: Vec<ProbeCommand>,
    pub(crate) inbound: HashMap<String, VecDeque<Frame>>,
    pub(crate) sent: Vec<(u64, Frame)>,
    pub(crate) closed: Vec<u64>,
    next_connection: u64,
}

impl Script {
    /// Queues frames the probe with `worker` will send before its default
    /// reply.
    pub(crate) fn push_frames(&mut self, worker: &str, frames: impl IntoIterator<Item = Frame>) {
        self.inbound
            .entry(worker.to_owned())
            .or_default()
            .extend(frames);
    }

    /// Number of opens whose locator names `worker`.
    pub(crate) fn opens_of(&self, worker: &str) -> usize {
        self.opens
            .iter()
            .filter(|locator| worker_of(locator) == worker)
            .count()
    }

    /// Frames sent over connection `id`.
    pub(crate) fn sent_on(&self, id: u64) -> Vec<&Frame> {
        self.sent
            .iter()
            .filter(|(connection, _)| *connection == id)
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Command replies sent over any connection, in order.
    pub(crate) fn command_replies(&self) -> Vec<&Frame> {
        self.sent
            .iter()
            .map(|(_, frame)| frame)
            .filter(|frame| matches!(frame, Frame::CommandReply { .. }))
            .collect()
    }
}

/// Shared handle to a [`Script`].
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptHandle(Rc<RefCell<Script>>);

impl ScriptHandle {
    pub(crate) fn get(&self) -> RefMut<'_, Script> {
        self.0.borrow_mut()
    }

    /// Factory producing transports over this script.
    pub(crate) fn factory(&self) -> impl TransportFactory<Transport = ScriptedTransport> + use<> {
        let handle = self.clone();
        move || {
            Ok::<_, TransportError>(ScriptedTransport {
                script: handle.clone(),
            })
        }
    }
}

/// Connection handle issued by [`ScriptedTransport`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FakeConnection {
    pub(crate) id: u64,
    pub(crate) locator: String,
}

/// In-memory transport driven by a [`Script`].
///
/// Unless frames are queued for a worker, every receive yields a reply whose
/// payload names the connection it arrived on.
#[derive(Debug)]
pub(crate) struct ScriptedTransport {
    script: ScriptHandle,
}

impl Transport for ScriptedTransport {
    type Descriptor = FakeConnection;

    fn open(&mut self, locator: &str) -> Result<FakeConnection, TransportError> {
        let mut script = self.script.get();
        script.opens.push(locator.to_owned());
        if script.rejecting_locators {
            return Err(TransportError::InvalidLocator {
                locator: locator.to_owned(),
                message: String::from("scripted rejection"),
            });
        }
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            return Err(TransportError::Closed {
                locator: locator.to_owned(),
            });
        }
        script.next_connection += 1;
        Ok(FakeConnection {
            id: script.next_connection,
            locator: locator.to_owned(),
        })
    }

    fn send(
        &mut self,
        descriptor: &mut FakeConnection,
        frame: &Frame,
    ) -> Result<(), TransportError> {
        let mut script = self.script.get();
        if script.failing_sends > 0 {
            script.failing_sends -= 1;
            return Err(TransportError::Closed {
                locator: descriptor.locator.clone(),
            });
        }
        script.sent.push((descriptor.id, frame.clone()));
        Ok(())
    }

    fn receive(&mut self, descriptor: &mut FakeConnection) -> Result<Frame, TransportError> {
        let mut script = self.script.get();
        if script.failing_receives > 0 {
            script.failing_receives -= 1;
            return Err(TransportError::TimedOut {
                locator: descriptor.locator.clone(),
                timeout_ms: 10,
            });
        }
        let worker = worker_of(&descriptor.locator);
        let scripted = script
            .inbound
            .get_mut(worker)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| {
            Frame::reply(json!({"worker": worker, "connection": descriptor.id}))
        }))
    }

    fn close(&mut self, descriptor: FakeConnection) -> Result<(), TransportError> {
        let mut script = self.script.get();
        script.closed.push(descriptor.id);
        if script.failing_close {
            return Err(TransportError::Closed {
                locator: descriptor.locator,
            });
        }
        Ok(())
    }

    fn register_command(&mut self, command: ProbeCommand) -> Result<(), TransportError> {
        let mut script = self.script.get();
        if script.failing_registration == Some(command) {
            script.failing_registration = None;
            return Err(TransportError::Registration {
                command,
                message: String::from("scripted failure"),
            });
        }
        script.registrations.push(command);
        Ok(())
    }
}

pub(crate) type TestSession<F> = ProbeSession<F, JsonCodec<Value>>;

/// Settings with a fixed probe directory and no back-off.
pub(crate) fn test_settings() -> ProbeSettings {
    ProbeSettings::default().with_probe_dir("/test/probes")
}

/// A session over `script` using the JSON codec.
pub(crate) fn session_over(
    script: &ScriptHandle,
) -> TestSession<impl TransportFactory<Transport = ScriptedTransport> + use<>> {
    ProbeSession::new(script.factory(), JsonCodec::new(), test_settings())
}

/// A small definition model covering two probes and one unsupported type.
pub(crate) fn sample_model() -> DefinitionSet {
    let mut model = DefinitionSet::new();
    model.insert_object(ObjectRecord::new(
        FILE_OBJECT,
        ObjectType::FILE,
        json!({"path": "/etc", "filename": "passwd"}),
    ));
    model.insert_object(ObjectRecord::new(
        FAMILY_OBJECT,
        ObjectType::FAMILY,
        json!({}),
    ));
    model.insert_object(ObjectRecord::new(
        SECOND_FILE_OBJECT,
        ObjectType::FILE,
        json!({"path": "/etc", "filename": "shadow"}),
    ));
    model.insert_object(ObjectRecord::new(
        UNSUPPORTED_OBJECT,
        ObjectType::new(42),
        json!({}),
    ));
    model.insert_state(FIRST_STATE, json!({"user_id": {"equals": 0}}));
    model.insert_state(SECOND_STATE, json!({"family": "unix"}));
    model
}

/// Worker name at the end of a locator.
pub(crate) fn worker_of(locator: &str) -> &str {
    locator.rsplit('/').next().unwrap_or(locator)
}

/// A probe command frame.
pub(crate) fn command(id: u64, command: ProbeCommand, payload: Value) -> Frame {
    Frame::Command {
        id,
        command,
        payload,
    }
}
