use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::apply::Session;
use super::properties::set_properties;
use super::reconcile::ReconcileStats;
use super::{Error, Mode};
use crate::admin::{attributes, types};
use crate::db::{Edit, Insert, Instance, Query, Value};

/// An event definition declared on the root instance
///
/// Declared in update files as
///
/// ```xml
/// <trigger name="Check" event="access-check" program="AccessSetCheck" index="1">
///     <property name="Mode">strict</property>
/// </trigger>
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// Defaults to `<owner>.<event type>.<position>`
    pub name: Option<String>,
    /// Name of the event type, or one of the short names `access-check` and `ui-execute`
    pub event_type: String,
    pub program: Option<String>,
    pub method: Option<String>,
    /// Defaults to the 1-based position of the event among the declared events
    pub index: Option<i64>,
    pub properties: BTreeMap<String, String>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        let mut event = self;
        event.name = Some(name.into());
        event
    }

    pub fn with_program(self, program: impl Into<String>) -> Self {
        let mut event = self;
        event.program = Some(program.into());
        event
    }

    pub fn with_method(self, method: impl Into<String>) -> Self {
        let mut event = self;
        event.method = Some(method.into());
        event
    }

    pub fn with_index(self, index: i64) -> Self {
        let mut event = self;
        event.index = Some(index);
        event
    }

    pub fn with_property(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut event = self;
        event.properties.insert(name.into(), value.into());
        event
    }

    /// The full name of the event type
    pub fn type_name(&self) -> &str {
        match self.event_type.as_str() {
            "access-check" => types::ACCESS_CHECK_EVENT,
            "ui-execute" | "execute" => types::UI_COMMAND_EXECUTE_EVENT,
            other => other,
        }
    }
}

/// Make the events of the owner match the declared ones
///
/// Events are matched by name. A matching event of the same type is updated in place, one of
/// another type is replaced. In [Mode::Replace] events of the owner that are not declared are
/// deleted with their properties.
#[instrument(level = "debug", skip_all, fields(owner = %owner), err)]
pub(crate) fn set_events(
    session: &Session<'_>,
    owner: Instance,
    owner_name: &str,
    events: &[Event],
    mode: Mode,
) -> Result<ReconcileStats, Error> {
    let definition = session.require_type(types::EVENT_DEFINITION)?;
    let mut stats = ReconcileStats::default();

    let mut existing: Vec<(Instance, String)> = Query::new(definition)
        .filter(attributes::ABSTRACT, owner.id())
        .select(attributes::NAME)
        .execute(session.conn)?
        .into_iter()
        .map(|row| {
            let name = row
                .get(attributes::NAME)
                .and_then(Value::as_text)
                .unwrap_or_default()
                .to_string();
            (row.instance(), name)
        })
        .collect();

    for (pos, event) in events.iter().enumerate() {
        let ty = session.require_type(event.type_name())?;
        if !ty.is_kind_of(definition) {
            return Err(Error::NotAnEventType(ty.name().to_string()));
        }
        let name = event
            .name
            .clone()
            .unwrap_or_else(|| format!("{owner_name}.{}.{}", ty.name(), pos + 1));
        let index = event.index.unwrap_or(pos as i64 + 1);

        let found = existing
            .iter()
            .position(|(_, n)| *n == name)
            .map(|pos| existing.remove(pos).0);

        let instance = match found {
            Some(instance) if instance.type_id() == ty.id() => {
                Edit::new(ty, instance.id())
                    .set(attributes::INDEX_POSITION, index)
                    .set(attributes::PROGRAM, event.program.clone())
                    .set(attributes::METHOD, event.method.clone())
                    .execute(session.conn)?;
                stats.updated += 1;
                instance
            }
            found => {
                if let Some(previous) = found {
                    debug!(event = name.as_str(), "event type changed, replacing event");
                    session.delete_instance(previous)?;
                    stats.deleted += 1;
                }
                let instance = Insert::new(ty)
                    .set(attributes::NAME, name.as_str())
                    .set(attributes::ABSTRACT, owner.id())
                    .set(attributes::INDEX_POSITION, index)
                    .set(attributes::PROGRAM, event.program.clone())
                    .set(attributes::METHOD, event.method.clone())
                    .execute(session.conn)?;
                stats.inserted += 1;
                instance
            }
        };

        set_properties(session, instance, &event.properties)?;
    }

    if mode == Mode::Replace {
        for (instance, name) in existing {
            debug!(event = name.as_str(), "deleting event");
            session.delete_instance(instance)?;
            stats.deleted += 1;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_expands_event_type_aliases() {
        assert_eq!(
            Event::new("access-check").type_name(),
            types::ACCESS_CHECK_EVENT
        );
        assert_eq!(
            Event::new("ui-execute").type_name(),
            types::UI_COMMAND_EXECUTE_EVENT
        );
        assert_eq!(Event::new("Custom_Event").type_name(), "Custom_Event");
    }
}
