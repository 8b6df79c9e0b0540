//! Declarative updates
//!
//! An [Update] is the content of one update file: the UUID of the admin object it describes
//! and one or more version scoped [Definition]s of that object. Applying an update selects the
//! definitions whose version expression holds for the current
//! [VersionContext](`crate::expr::VersionContext`), finds or creates the root instance and
//! reconciles its values, links, owned entries, properties and events with the declared ones.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::datamodel::ValueError;
use crate::db::StoreError;
use crate::errors::InternalError;
use crate::expr::ExpressionError;

mod apply;
mod entries;
mod event;
mod kind;
mod link;
mod parse;
mod properties;
mod reconcile;

pub use apply::*;
pub use entries::Entry;
pub use event::Event;
pub use kind::*;
pub use link::*;
pub use parse::ParseError;
pub use reconcile::{LinkReport, ReconcileStats};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Persistence(#[from] StoreError),

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("invalid value for attribute '{attribute}': {source}")]
    InvalidValue {
        attribute: String,
        #[source]
        source: ValueError,
    },

    #[error("found {count} instances of '{ty}' with {attribute} '{value}'")]
    AmbiguousInstance {
        ty: String,
        attribute: String,
        value: String,
        count: usize,
    },

    #[error("no instance of '{ty}' named '{name}'")]
    UnresolvedReference { ty: String, name: String },

    #[error("missing value for key attribute '{0}'")]
    MissingKey(String),

    #[error("'{0}' is not an event type")]
    NotAnEventType(String),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// How declared state replaces persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Persisted links, entries and events that are not declared are deleted
    #[default]
    Replace,
    /// Nothing is ever deleted
    Update,
}

/// A declared attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefValue {
    /// Textual value, parsed according to the attribute type
    Text(String),
    /// Name or UUID of an instance of the given type, its id is written
    Reference { type_name: String, name: String },
}

impl From<&str> for DefValue {
    fn from(value: &str) -> Self {
        DefValue::Text(value.to_string())
    }
}

impl From<String> for DefValue {
    fn from(value: String) -> Self {
        DefValue::Text(value)
    }
}

/// One version scoped definition of an admin object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Definition {
    /// Version expression, [DEFAULT_EXPRESSION](`crate::expr::DEFAULT_EXPRESSION`) if unset
    pub expression: Option<String>,
    pub mode: Mode,
    pub values: BTreeMap<String, DefValue>,
    pub properties: BTreeMap<String, String>,
    /// Declared link targets by link type
    pub links: BTreeMap<String, Vec<LinkInstance>>,
    pub entries: Vec<Entry>,
    pub events: Vec<Event>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expression(self, expression: impl Into<String>) -> Self {
        let mut def = self;
        def.expression = Some(expression.into());
        def
    }

    pub fn with_mode(self, mode: Mode) -> Self {
        let mut def = self;
        def.mode = mode;
        def
    }

    pub fn with_value(self, attribute: impl Into<String>, value: impl Into<DefValue>) -> Self {
        let mut def = self;
        def.values.insert(attribute.into(), value.into());
        def
    }

    pub fn with_property(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut def = self;
        def.properties.insert(name.into(), value.into());
        def
    }

    pub fn with_link(self, link_type: impl Into<String>, link: LinkInstance) -> Self {
        let mut def = self;
        def.links.entry(link_type.into()).or_default().push(link);
        def
    }

    pub fn with_entry(self, entry: Entry) -> Self {
        let mut def = self;
        def.entries.push(entry);
        def
    }

    pub fn with_event(self, event: Event) -> Self {
        let mut def = self;
        def.events.push(event);
        def
    }

    /// The declared name of the object
    pub fn name(&self) -> Option<&str> {
        match self.values.get(crate::admin::attributes::NAME) {
            Some(DefValue::Text(name)) => Some(name),
            _ => None,
        }
    }
}

/// The content of an update file
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    label: String,
    kind: Arc<Kind>,
    uuid: Uuid,
    application: Option<String>,
    revision: Option<String>,
    definitions: Vec<Definition>,
}

impl Update {
    pub fn new(label: impl Into<String>, kind: Arc<Kind>, uuid: Uuid) -> Self {
        Self {
            label: label.into(),
            kind,
            uuid,
            application: None,
            revision: None,
            definitions: Vec::new(),
        }
    }

    /// Parse an update file
    pub fn parse(label: &str, xml: &str, kinds: &Kinds) -> Result<Self, ParseError> {
        parse::parse(label, xml, kinds)
    }

    pub fn with_application(self, application: impl Into<String>) -> Self {
        let mut update = self;
        update.application = Some(application.into());
        update
    }

    pub fn with_revision(self, revision: impl Into<String>) -> Self {
        let mut update = self;
        update.revision = Some(revision.into());
        update
    }

    pub fn with_definition(self, definition: Definition) -> Self {
        let mut update = self;
        update.definitions.push(definition);
        update
    }

    /// Where the update was read from, used in reports and logs
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> &Arc<Kind> {
        &self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }
}
