//! Callback commands served to probes mid-request.
//!
//! While a probe processes a request it may ask the evaluator to evaluate a
//! referenced object ([`ProbeCommand::ObjectEval`]) or to hand over encoded
//! state definitions ([`ProbeCommand::StateFetch`]). Both run synchronously on
//! the dispatching thread, against the model of the request that is pending.
//! Object evaluation re-enters [`ProbeSession::evaluate_object`]; it opens or
//! reuses the connection for the nested object's type, never the one the
//! command arrived on.

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::ProbeCodec;
use crate::dispatch::{DISPATCH_TARGET, ProbeSession};
use crate::error::{DispatchError, IdentifierKind};
use crate::model::DefinitionModel;
use crate::protocol::{CommandOutcome, ProbeCommand};
use crate::transport::TransportFactory;

/// Runs `command` and converts any failure into an error outcome.
pub(crate) fn serve<F, C, M>(
    session: &mut ProbeSession<F, C>,
    model: &M,
    command: ProbeCommand,
    payload: &Value,
) -> CommandOutcome
where
    F: TransportFactory,
    M: DefinitionModel,
    C: ProbeCodec<M>,
{
    let result = match command {
        ProbeCommand::ObjectEval => resolve_object(session, model, payload),
        ProbeCommand::StateFetch => fetch_states(session.codec(), model, payload),
    };
    result.unwrap_or_else(|error| {
        warn!(target: DISPATCH_TARGET, %command, %error, "probe command failed");
        CommandOutcome::error(error)
    })
}

/// Evaluates the object named by a string payload.
fn resolve_object<F, C, M>(
    session: &mut ProbeSession<F, C>,
    model: &M,
    payload: &Value,
) -> Result<CommandOutcome, DispatchError>
where
    F: TransportFactory,
    M: DefinitionModel,
    C: ProbeCodec<M>,
{
    let id = payload
        .as_str()
        .ok_or_else(|| DispatchError::InvalidCommandArgument {
            command: ProbeCommand::ObjectEval,
            message: format!("expected an object id string, got {}", json_kind(payload)),
        })?;
    let object = model
        .object(id)
        .ok_or_else(|| DispatchError::UnknownIdentifier {
            kind: IdentifierKind::Object,
            id: id.to_owned(),
        })?;

    debug!(target: DISPATCH_TARGET, object_id = id, "evaluating object requested by probe");
    session.evaluate_object(object, model)?;
    Ok(CommandOutcome::Ack)
}

/// Encodes the states named by an array payload, in request order.
///
/// An unknown id, a non-string element or a state without a wire form fails
/// the whole batch; nothing collected so far is sent.
fn fetch_states<C, M>(
    codec: &C,
    model: &M,
    payload: &Value,
) -> Result<CommandOutcome, DispatchError>
where
    M: DefinitionModel,
    C: ProbeCodec<M>,
{
    let ids = payload
        .as_array()
        .ok_or_else(|| DispatchError::InvalidCommandArgument {
            command: ProbeCommand::StateFetch,
            message: format!("expected an array of state ids, got {}", json_kind(payload)),
        })?;

    let states = ids
        .iter()
        .map(|value| {
            let id = value
                .as_str()
                .ok_or_else(|| DispatchError::InvalidCommandArgument {
                    command: ProbeCommand::StateFetch,
                    message: format!("expected a state id string, got {}", json_kind(value)),
                })?;
            let state = model
                .state(id)
                .ok_or_else(|| DispatchError::UnknownIdentifier {
                    kind: IdentifierKind::State,
                    id: id.to_owned(),
                })?;
            codec
                .encode_state(id, state)
                .map_err(|source| DispatchError::StateEncodingFailed {
                    state_id: id.to_owned(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, DispatchError>>()?;

    debug!(target: DISPATCH_TARGET, count = states.len(), "states fetched for probe");
    Ok(CommandOutcome::States { states })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
