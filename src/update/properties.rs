use std::collections::BTreeMap;
use tracing::trace;

use super::apply::Session;
use super::Error;
use crate::admin::{attributes, types};
use crate::db::{Delete, Insert, Instance, Query};

/// Delete every property of the owner, returning the number of deleted properties
pub(crate) fn clear_properties(session: &Session<'_>, owner: Instance) -> Result<usize, Error> {
    let property = session.require_type(types::COMMON_PROPERTY)?;
    let rows = Query::new(property)
        .filter(attributes::ABSTRACT, owner.id())
        .execute(session.conn)?;
    for row in &rows {
        Delete::new(property, row.instance().id()).execute(session.conn)?;
    }
    Ok(rows.len())
}

/// Replace the properties of the owner with the declared ones
///
/// Only instances of the configured property owner type have properties, for other instances
/// nothing is written and `false` is returned.
pub(crate) fn set_properties(
    session: &Session<'_>,
    owner: Instance,
    properties: &BTreeMap<String, String>,
) -> Result<bool, Error> {
    if !session.is_property_owner(session.instance_type(owner)?)? {
        trace!(instance = %owner, "instance does not own properties");
        return Ok(false);
    }

    let property = session.require_type(types::COMMON_PROPERTY)?;
    let deleted = clear_properties(session, owner)?;
    for (name, value) in properties {
        Insert::new(property)
            .set(attributes::ABSTRACT, owner.id())
            .set(attributes::NAME, name.as_str())
            .set(attributes::VALUE, value.as_str())
            .execute(session.conn)?;
    }
    trace!(instance = %owner, deleted, inserted = properties.len(), "properties replaced");
    Ok(true)
}
