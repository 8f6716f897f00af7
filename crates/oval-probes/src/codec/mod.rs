//! Object, state and reply encoding.
//!
//! [`ProbeCodec`] converts between definition-model values and the JSON
//! payloads carried in [`Frame`](crate::protocol::Frame)s. [`JsonCodec`]
//! covers models whose objects and states are `serde` serialisable.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::CodecError;
use crate::model::{DefinitionModel, ProbeObject};

/// Encoding collaborator used by the dispatcher and command server.
pub trait ProbeCodec<M: DefinitionModel> {
    /// Decoded result of one object evaluation.
    type SystemCharacteristics;

    /// Encodes `object` as a request payload for the probe named
    /// `display_name`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the object has no wire form.
    fn encode_object(&self, display_name: &str, object: &M::Object) -> Result<Value, CodecError>;

    /// Decodes a reply payload for the object that was submitted.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the payload cannot be interpreted.
    fn decode_system_characteristics(
        &self,
        payload: Value,
        object: &M::Object,
    ) -> Result<Self::SystemCharacteristics, CodecError>;

    /// Encodes the state `state_id` names for a `ste_fetch` reply.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the state has no wire form.
    fn encode_state(&self, state_id: &str, state: &M::State) -> Result<Value, CodecError>;
}

/// Collected data for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collected<S> {
    object_id: String,
    data: S,
}

impl<S> Collected<S> {
    /// Associates decoded data with the object it was collected for.
    #[must_use]
    pub fn new(object_id: impl Into<String>, data: S) -> Self {
        Self {
            object_id: object_id.into(),
            data,
        }
    }

    /// Id of the evaluated object.
    #[must_use]
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Decoded probe data.
    #[must_use]
    pub const fn data(&self) -> &S {
        &self.data
    }

    /// Consumes the wrapper, returning the decoded data.
    #[must_use]
    pub fn into_data(self) -> S {
        self.data
    }
}

/// `serde_json` based codec.
///
/// Requests are encoded as `{"name": <display name>, "object": <object>}`
/// and replies are deserialised into `S`.
///
/// # Example
///
/// ```
/// use oval_probes::codec::{JsonCodec, ProbeCodec};
/// use oval_probes::model::{DefinitionSet, ObjectRecord};
/// use oval_probes::ObjectType;
/// use serde_json::json;
///
/// let codec = JsonCodec::<serde_json::Value>::new();
/// let object = ObjectRecord::new("oval:x:obj:1", ObjectType::FILE, json!({"path": "/"}));
/// let payload = ProbeCodec::<DefinitionSet>::encode_object(&codec, "file", &object).unwrap();
/// assert_eq!(payload["name"], "file");
/// ```
pub struct JsonCodec<S> {
    marker: PhantomData<fn() -> S>,
}

impl<S> JsonCodec<S> {
    /// Creates the codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<S> Default for JsonCodec<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for JsonCodec<S> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for JsonCodec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec").finish()
    }
}

impl<M, S> ProbeCodec<M> for JsonCodec<S>
where
    M: DefinitionModel,
    M::Object: Serialize,
    M::State: Serialize,
    S: DeserializeOwned,
{
    type SystemCharacteristics = Collected<S>;

    fn encode_object(&self, display_name: &str, object: &M::Object) -> Result<Value, CodecError> {
        let body = serde_json::to_value(object).map_err(|source| CodecError::Serialize {
            what: format!("object '{}'", object.id()),
            source,
        })?;
        Ok(json!({ "name": display_name, "object": body }))
    }

    fn decode_system_characteristics(
        &self,
        payload: Value,
        object: &M::Object,
    ) -> Result<Collected<S>, CodecError> {
        if payload.is_null() {
            return Err(CodecError::Malformed {
                what: format!("reply for object '{}'", object.id()),
                message: String::from("probe returned an empty payload"),
            });
        }
        let data = serde_json::from_value(payload).map_err(|source| CodecError::Deserialize {
            what: format!("reply for object '{}'", object.id()),
            source,
        })?;
        Ok(Collected::new(object.id(), data))
    }

    fn encode_state(&self, state_id: &str, state: &M::State) -> Result<Value, CodecError> {
        serde_json::to_value(state).map_err(|source| CodecError::Serialize {
            what: format!("state '{state_id}'"),
            source,
        })
    }
}
