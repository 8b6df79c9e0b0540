use anyhow::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::entries::set_entries;
use super::event::set_events;
use super::properties::set_properties;
use super::reconcile::{set_links, ReconcileStats};
use super::{DefValue, Definition, Error, Update};
use crate::admin::attributes;
use crate::datamodel::{Snapshot, Type};
use crate::db::{ConnectionResource, Delete, Edit, Insert, Instance, Query, Value};
use crate::errors::InternalError;
use crate::expr::{Expression, VersionContext};
use crate::install::Opts;

/// The steps of an installation
///
/// Every update is applied once per step. The `Create` step only finds or creates the root
/// instances, so that references between the files of one installation resolve during the
/// `Update` step, whatever the order of the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Create,
    Update,
}

impl Lifecycle {
    pub const ALL: [Lifecycle; 2] = [Lifecycle::Create, Lifecycle::Update];
}

/// The result of applying an update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Number of selected definitions
    pub definitions: usize,
    /// The root instance of every selected definition
    pub instances: Vec<Instance>,
    /// Number of root instances created
    pub created: usize,
    pub links: ReconcileStats,
    pub entries: ReconcileStats,
    pub events: ReconcileStats,
}

impl Applied {
    /// Add the result of a later step
    pub fn absorb(&mut self, later: Applied) {
        self.definitions = self.definitions.max(later.definitions);
        self.instances = later.instances;
        self.created += later.created;
        self.links += later.links;
        self.entries += later.entries;
        self.events += later.events;
    }
}

/// Everything needed to write one update
pub(crate) struct Session<'a> {
    pub(crate) conn: &'a ConnectionResource<'a>,
    pub(crate) model: &'a Snapshot,
    pub(crate) opts: &'a Opts,
}

impl<'a> Session<'a> {
    pub(crate) fn require_type(&self, name: &str) -> Result<&'a Arc<Type>, Error> {
        self.model
            .type_by_name(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// The concrete type of a persisted instance
    pub(crate) fn instance_type(&self, instance: Instance) -> Result<&'a Arc<Type>, Error> {
        self.model
            .types()
            .get(instance.type_id())
            .with_context(|| {
                format!(
                    "instance {instance} has type {} which is not part of the loaded data model",
                    instance.type_id()
                )
            })
            .map_err(|err| InternalError::from(err).into())
    }

    /// Instances of `ty` or its descendants with the given name, or with the given UUID if
    /// `name` is one
    pub(crate) fn find_by_name(&self, ty: &Type, name: &str) -> Result<Vec<Instance>, Error> {
        let query = match Uuid::parse_str(name.trim()) {
            Ok(uuid) if ty.attribute(attributes::UUID).is_some() => {
                Query::new(ty).filter(attributes::UUID, uuid)
            }
            _ => Query::new(ty).filter(attributes::NAME, name.trim()),
        };
        Ok(query
            .execute(self.conn)?
            .into_iter()
            .map(|row| row.instance())
            .collect())
    }

    /// The id of the single instance of `type_name` identified by `name`
    pub(crate) fn resolve_reference(&self, type_name: &str, name: &str) -> Result<Value, Error> {
        if name.trim().is_empty() {
            return Ok(Value::Null);
        }
        let ty = self.require_type(type_name)?;
        let found = self.find_by_name(ty, name)?;
        match found.as_slice() {
            [instance] => Ok(Value::Integer(instance.id())),
            [] => Err(Error::UnresolvedReference {
                ty: type_name.to_string(),
                name: name.to_string(),
            }),
            _ => Err(Error::AmbiguousInstance {
                ty: type_name.to_string(),
                attribute: attributes::NAME.to_string(),
                value: name.to_string(),
                count: found.len(),
            }),
        }
    }

    /// Convert declared values into values of the attributes of `ty`
    pub(crate) fn resolve_values(
        &self,
        ty: &Type,
        values: &BTreeMap<String, DefValue>,
    ) -> Result<Vec<(String, Value)>, Error> {
        let mut resolved = Vec::with_capacity(values.len());
        for (name, value) in values {
            let attribute =
                ty.attribute(name)
                    .ok_or_else(|| crate::db::StoreError::UnknownAttribute {
                        ty: ty.name().to_string(),
                        attribute: name.clone(),
                    })?;
            let value = match value {
                DefValue::Text(raw) => {
                    attribute
                        .attribute_type()
                        .parse(raw)
                        .map_err(|source| Error::InvalidValue {
                            attribute: name.clone(),
                            source,
                        })?
                }
                DefValue::Reference { type_name, name } => {
                    self.resolve_reference(type_name, name)?
                }
            };
            resolved.push((name.clone(), value));
        }
        Ok(resolved)
    }

    pub(crate) fn is_property_owner(&self, ty: &Type) -> Result<bool, Error> {
        let owner = self.require_type(&self.opts.property_owner_type)?;
        Ok(ty.is_kind_of(owner))
    }

    /// Delete an instance together with its properties
    pub(crate) fn delete_instance(&self, instance: Instance) -> Result<(), Error> {
        let ty = self.instance_type(instance)?;
        if self.is_property_owner(ty)? {
            super::properties::clear_properties(self, instance)?;
        }
        Delete::new(ty, instance.id()).execute(self.conn)?;
        Ok(())
    }
}

impl Update {
    /// Apply the selected definitions of the update
    ///
    /// Returns `None` if no definition is selected by the version context, in which case
    /// nothing is written.
    #[instrument(
        name = "apply_update",
        skip_all,
        fields(file = self.label(), uuid = %self.uuid(), step = ?step),
        err
    )]
    pub fn apply(
        &self,
        step: Lifecycle,
        conn: &ConnectionResource<'_>,
        model: &Snapshot,
        ctx: &VersionContext,
        opts: &Opts,
    ) -> Result<Option<Applied>, Error> {
        let session = Session { conn, model, opts };
        let mut applied = Applied::default();

        for (pos, def) in self.definitions().iter().enumerate() {
            let expression = match &def.expression {
                Some(src) => Expression::parse(src)?,
                None => Expression::default(),
            };
            if !expression.evaluate(ctx)? {
                debug!(definition = pos, expression = %expression, "definition not selected");
                continue;
            }
            applied.definitions += 1;

            let ty = session.require_type(self.kind().type_name())?;
            let instance = match self.search(&session, ty, def)? {
                Some(instance) => instance,
                None => {
                    applied.created += 1;
                    self.create(&session, ty, def)?
                }
            };
            applied.instances.push(instance);

            if step == Lifecycle::Update {
                self.update_definition(&session, instance, def, &mut applied)?;
            }
        }

        if applied.definitions == 0 {
            return Ok(None);
        }
        Ok(Some(applied))
    }

    fn search(
        &self,
        session: &Session<'_>,
        ty: &Type,
        def: &Definition,
    ) -> Result<Option<Instance>, Error> {
        let attribute = self
            .kind()
            .search_attribute()
            .unwrap_or(&session.opts.search_attribute);
        let value = if attribute == attributes::UUID {
            Value::from(self.uuid())
        } else {
            let declared = def
                .values
                .get(attribute)
                .ok_or_else(|| Error::MissingKey(attribute.to_string()))?;
            let values = BTreeMap::from([(attribute.to_string(), declared.clone())]);
            session
                .resolve_values(ty, &values)?
                .pop()
                .map(|(_, v)| v)
                .unwrap_or_default()
        };

        let rows = Query::new(ty)
            .filter(attribute, value.clone())
            .execute(session.conn)?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(row.instance())),
            _ => Err(Error::AmbiguousInstance {
                ty: ty.name().to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
                count: rows.len(),
            }),
        }
    }

    fn create(
        &self,
        session: &Session<'_>,
        ty: &Type,
        def: &Definition,
    ) -> Result<Instance, Error> {
        let mut insert = Insert::new(ty);
        if ty.attribute(attributes::UUID).is_some() {
            insert = insert.set(attributes::UUID, self.uuid());
        }
        if ty.attribute(attributes::NAME).is_some() {
            let name = def.name().unwrap_or(&session.opts.default_name);
            insert = insert.set(attributes::NAME, name);
        }
        if let Some(revision) = self.revision() {
            if ty.attribute(&session.opts.revision_attribute).is_some() {
                insert = insert.set(session.opts.revision_attribute.as_str(), revision);
            }
        }
        let instance = insert.execute(session.conn)?;
        debug!(ty = ty.name(), instance = %instance, "created");
        Ok(instance)
    }

    fn update_definition(
        &self,
        session: &Session<'_>,
        instance: Instance,
        def: &Definition,
        applied: &mut Applied,
    ) -> Result<(), Error> {
        let ty = session.instance_type(instance)?;

        let mut edit = Edit::new(ty, instance.id());
        if let Some(revision) = self.revision() {
            if ty.attribute(&session.opts.revision_attribute).is_some() {
                edit = edit.set(session.opts.revision_attribute.as_str(), revision);
            }
        }
        for (attribute, value) in session.resolve_values(ty, &def.values)? {
            edit = edit.set(attribute, value);
        }
        if !edit.is_empty() {
            edit.execute(session.conn)?;
            trace!(instance = %instance, "values written");
        }

        for link in self.kind().links() {
            let desired = def
                .links
                .get(&link.link_type)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let report = set_links(session, instance, link, desired, def.mode)?;
            applied.links += report.stats;
        }

        if let Some(schema) = self.kind().entries() {
            applied.entries += set_entries(session, instance, schema, &def.entries, def.mode)?;
        }

        set_properties(session, instance, &def.properties)?;

        let owner = def
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.uuid().to_string());
        applied.events += set_events(session, instance, &owner, &def.events, def.mode)?;

        Ok(())
    }
}
