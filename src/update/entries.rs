use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::apply::Session;
use super::reconcile::ReconcileStats;
use super::{DefValue, EntrySchema, Error, Mode};
use crate::db::{Edit, Insert, Instance, Query, Value};

/// A row owned by the root instance, e.g. one attribute of a type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub values: BTreeMap<String, DefValue>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, attribute: impl Into<String>, value: impl Into<DefValue>) -> Self {
        let mut entry = self;
        entry.values.insert(attribute.into(), value.into());
        entry
    }
}

/// Make the entries of the owner match the declared ones
///
/// Entries are matched by the value of the key attribute. In [Mode::Replace] entries of the
/// owner that are not declared are deleted.
#[instrument(level = "debug", skip_all, fields(entry = schema.type_name.as_str(), owner = %owner), err)]
pub(crate) fn set_entries(
    session: &Session<'_>,
    owner: Instance,
    schema: &EntrySchema,
    entries: &[Entry],
    mode: Mode,
) -> Result<ReconcileStats, Error> {
    let ty = session.require_type(&schema.type_name)?;
    let mut stats = ReconcileStats::default();

    let mut existing: Vec<(Instance, Option<String>)> = Query::new(ty)
        .filter(schema.owner_attribute.as_str(), owner.id())
        .select(schema.key_attribute.as_str())
        .execute(session.conn)?
        .into_iter()
        .map(|row| {
            let key = row
                .get(&schema.key_attribute)
                .and_then(Value::as_text)
                .map(str::to_string);
            (row.instance(), key)
        })
        .collect();

    for entry in entries {
        let key = match entry.values.get(&schema.key_attribute) {
            Some(DefValue::Text(key)) if !key.trim().is_empty() => key.trim(),
            _ => return Err(Error::MissingKey(schema.key_attribute.clone())),
        };
        let mut values = session.resolve_values(ty, &entry.values)?;
        values.push((schema.owner_attribute.clone(), Value::Integer(owner.id())));

        match existing
            .iter()
            .position(|(_, k)| k.as_deref() == Some(key))
        {
            Some(pos) => {
                let (instance, _) = existing.remove(pos);
                let concrete = session.instance_type(instance)?;
                let mut edit = Edit::new(concrete, instance.id());
                for (attribute, value) in values {
                    edit = edit.set(attribute, value);
                }
                edit.execute(session.conn)?;
                stats.updated += 1;
            }
            None => {
                let mut insert = Insert::new(ty);
                for (attribute, value) in values {
                    insert = insert.set(attribute, value);
                }
                let instance = insert.execute(session.conn)?;
                debug!(key, instance = %instance, "entry created");
                stats.inserted += 1;
            }
        }
    }

    if mode == Mode::Replace {
        for (instance, key) in existing {
            debug!(key = key.as_deref().unwrap_or_default(), instance = %instance, "deleting entry");
            session.delete_instance(instance)?;
            stats.deleted += 1;
        }
    }

    Ok(stats)
}
