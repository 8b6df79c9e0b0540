use std::collections::BTreeMap;

use crate::Id;

/// An event definition attached to a type
///
/// Events name a program (and optionally a method) to run when the matching trigger fires on
/// instances of the owning type. Events of an access check type decide access to the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDefinition {
    pub(crate) id: Id,
    pub(crate) name: String,
    pub(crate) event_type: Id,
    pub(crate) index: i64,
    pub(crate) program: Option<String>,
    pub(crate) method: Option<String>,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) access_check: bool,
}

impl EventDefinition {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the event type, i.e. the trigger
    pub fn event_type(&self) -> Id {
        self.event_type
    }

    /// Position of the event among the events of the owner
    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn is_access_check(&self) -> bool {
        self.access_check
    }
}
