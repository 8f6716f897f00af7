//! Definition model seam.
//!
//! The dispatcher only needs to find objects and states by id and to learn an
//! object's type. Hosts adapt their own definition model to
//! [`DefinitionModel`]; [`DefinitionSet`] is a ready-made in-memory one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::registry::ObjectType;

/// An object that can be handed to a probe.
pub trait ProbeObject {
    /// Definition id of the object.
    fn id(&self) -> &str;

    /// Subtype used to select the probe.
    fn object_type(&self) -> ObjectType;
}

/// Lookup interface over a loaded definition document.
pub trait DefinitionModel {
    /// Object definitions held by the model.
    type Object: ProbeObject;
    /// State definitions held by the model.
    type State;

    /// Finds an object by id.
    fn object(&self, id: &str) -> Option<&Self::Object>;

    /// Finds a state by id.
    fn state(&self, id: &str) -> Option<&Self::State>;
}

/// In-memory [`DefinitionModel`] keyed by definition id.
///
/// # Example
///
/// ```
/// use oval_probes::model::{DefinitionModel, DefinitionSet, ObjectRecord};
/// use oval_probes::ObjectType;
/// use serde_json::json;
///
/// let mut model = DefinitionSet::new();
/// model.insert_object(ObjectRecord::new("oval:x:obj:1", ObjectType::FILE, json!({"path": "/etc"})));
/// model.insert_state("oval:x:ste:1", json!({"user_id": 0}));
/// assert!(model.object("oval:x:obj:1").is_some());
/// assert!(model.state("oval:x:ste:2").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct DefinitionSet<O = ObjectRecord, S = serde_json::Value> {
    objects: HashMap<String, O>,
    states: HashMap<String, S>,
}

impl<O, S> Default for DefinitionSet<O, S> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            states: HashMap::new(),
        }
    }
}

impl<O: ProbeObject, S> DefinitionSet<O, S> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an object under its own id.
    pub fn insert_object(&mut self, object: O) {
        self.objects.insert(object.id().to_owned(), object);
    }

    /// Adds or replaces a state.
    pub fn insert_state(&mut self, id: impl Into<String>, state: S) {
        self.states.insert(id.into(), state);
    }

    /// Number of objects held.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of states held.
    #[must_use]
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

impl<O: ProbeObject, S> DefinitionModel for DefinitionSet<O, S> {
    type Object = O;
    type State = S;

    fn object(&self, id: &str) -> Option<&O> {
        self.objects.get(id)
    }

    fn state(&self, id: &str) -> Option<&S> {
        self.states.get(id)
    }
}

/// Generic object definition carrying its body as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    id: String,
    object_type: ObjectType,
    #[serde(default)]
    body: serde_json::Value,
}

impl ObjectRecord {
    /// Creates an object record.
    #[must_use]
    pub fn new(id: impl Into<String>, object_type: ObjectType, body: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            object_type,
            body,
        }
    }

    /// Object body as written in the definition document.
    #[must_use]
    pub const fn body(&self) -> &serde_json::Value {
        &self.body
    }
}

impl ProbeObject for ObjectRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn object_type(&self) -> ObjectType {
        self.object_type
    }
}
