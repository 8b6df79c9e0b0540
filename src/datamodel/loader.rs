//! Reads of the admin tables backing the caches

use rusqlite::{params, Row};
use std::sync::Arc;
use tracing::{instrument, trace};
use uuid::Uuid;

use super::{
    build_tables, build_types, AttributeRow, EventRow, LoadError, PropertyRow, SqlTable,
    TableRow, Type, TypeRow, TypeSource,
};
use crate::access::{AccessSet, AccessType, Principal};
use crate::admin;
use crate::cache::Generation;
use crate::db::{ConnectionResource, Database, StoreError};
use crate::Id;

fn parse_uuid(name: &str, value: Option<String>) -> Result<Option<Uuid>, LoadError> {
    match value {
        Some(value) if !value.trim().is_empty() => Uuid::parse_str(value.trim())
            .map(Some)
            .map_err(|_| LoadError::InvalidUuid {
                name: name.to_string(),
                value,
            }),
        _ => Ok(None),
    }
}

fn collect<T, F>(
    conn: &ConnectionResource<'_>,
    sql: &str,
    params: impl rusqlite::Params,
    f: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, f)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[instrument(level = "trace", skip_all, err)]
pub(crate) fn load_tables(db: &Database) -> Result<Vec<Arc<SqlTable>>, LoadError> {
    let conn = db.read()?;
    let raw = collect(
        &conn,
        "SELECT a.ID, a.UUID, a.NAME, t.SQLTABLE, t.SQLCOLUMNID, t.SQLCOLUMNTYPE, \
                t.SQLNEWIDSELECT, t.DMTABLEMAIN, t.READONLY \
         FROM dm_table t JOIN cm_abstract a ON a.ID = t.ID ORDER BY a.ID",
        [],
        |row| {
            Ok((
                row.get::<_, Id>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<Id>>(7)?,
                row.get::<_, Option<bool>>(8)?.unwrap_or(false),
            ))
        },
    )?;
    let stored = collect(
        &conn,
        "SELECT DISTINCT DMTABLEID, DMTYPEID FROM dm_attribute \
         WHERE DMTABLEID IS NOT NULL AND DMTYPEID IS NOT NULL",
        [],
        |row| Ok((row.get::<_, Id>(0)?, row.get::<_, Id>(1)?)),
    )?;
    conn.abort()?;

    let mut rows = Vec::with_capacity(raw.len());
    for (id, uuid, name, sql_table, id_column, type_column, new_id_select, main, read_only) in raw
    {
        rows.push(TableRow {
            id,
            uuid: parse_uuid(&name, uuid)?,
            sql_table,
            id_column: id_column
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "ID".to_string()),
            type_column: type_column.filter(|c| !c.trim().is_empty()),
            new_id_select: new_id_select.filter(|s| !s.trim().is_empty()),
            main_table: main.filter(|id| *id != 0),
            read_only,
            name,
        });
    }
    trace!(tables = rows.len(), "read sql tables");

    build_tables(rows, &stored)
}

#[instrument(level = "trace", skip_all, err)]
pub(crate) fn load_types(
    db: &Database,
    tables: &Generation<SqlTable>,
) -> Result<Vec<Arc<Type>>, LoadError> {
    let source = read_type_source(db)?;
    trace!(
        types = source.types.len(),
        attributes = source.attributes.len(),
        "read types"
    );
    build_types(source, tables)
}

fn read_type_source(db: &Database) -> Result<TypeSource, LoadError> {
    let conn = db.read()?;

    let raw_types = collect(
        &conn,
        "SELECT a.ID, a.UUID, a.NAME, t.PARENTDMTYPE, t.ABSTRACT, t.STOREID, t.CACHEEXPR \
         FROM dm_type t JOIN cm_abstract a ON a.ID = t.ID ORDER BY a.ID",
        [],
        |row| {
            Ok((
                row.get::<_, Id>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                row.get::<_, Option<Id>>(3)?,
                row.get::<_, Option<bool>>(4)?.unwrap_or(false),
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        },
    )?;

    let raw_attributes = collect(
        &conn,
        "SELECT ID, NAME, DMTYPEID, DMTABLEID, SQLCOLUMN, DMATTRIBUTETYPE, DMTYPELINK \
         FROM dm_attribute WHERE DMTYPEID IS NOT NULL ORDER BY ID",
        [],
        |row| {
            Ok((
                row.get::<_, Id>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Id>(2)?,
                row.get::<_, Option<Id>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                row.get::<_, Option<Id>>(6)?,
            ))
        },
    )?;

    let properties = collect(
        &conn,
        "SELECT ABSTRACT, NAME, VALUE FROM cm_property \
         WHERE ABSTRACT IN (SELECT ID FROM dm_type UNION SELECT ID FROM cm_eventdef) \
         ORDER BY ID",
        [],
        |row| {
            Ok(PropertyRow {
                owner: row.get(0)?,
                name: row.get(1)?,
                value: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        },
    )?;

    let events = collect(
        &conn,
        "SELECT e.ID, e.ABSTRACT, a.NAME, a.TYPEID, e.INDEXPOS, e.PROGRAM, e.METHOD \
         FROM cm_eventdef e JOIN cm_abstract a ON a.ID = e.ID \
         WHERE e.ABSTRACT IN (SELECT ID FROM dm_type) \
         ORDER BY e.ABSTRACT, e.INDEXPOS, e.ID",
        [],
        |row| {
            Ok(EventRow {
                id: row.get(0)?,
                owner: row.get(1)?,
                name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                event_type: row.get(3)?,
                index: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                program: row.get(5)?,
                method: row.get(6)?,
            })
        },
    )?;

    let access_sets = link_rows(&conn, admin::types::ACCESS_SET2TYPE)?;
    let allowed_events = link_rows(&conn, admin::types::DATAMODEL_TYPE_EVENT_IS_ALLOWED_FOR)?;
    conn.abort()?;

    let mut types = Vec::with_capacity(raw_types.len());
    for (id, uuid, name, parent, is_abstract, store_id, cache_expr) in raw_types {
        types.push(TypeRow {
            id,
            uuid: parse_uuid(&name, uuid)?,
            name,
            parent: parent.filter(|id| *id != 0),
            is_abstract,
            store_id,
            cache_expr: cache_expr.filter(|e| !e.trim().is_empty()),
        });
    }

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (id, name, type_id, table, column, attribute_type, link) in raw_attributes {
        let attribute_type =
            attribute_type
                .parse()
                .map_err(|_| LoadError::InvalidAttributeType {
                    attribute: name.clone(),
                    value: attribute_type.clone(),
                })?;
        attributes.push(AttributeRow {
            id,
            name,
            type_id,
            table,
            column: column.filter(|c| !c.trim().is_empty()),
            attribute_type,
            link,
        });
    }

    Ok(TypeSource {
        types,
        attributes,
        properties,
        events,
        access_sets,
        allowed_events,
    })
}

/// (from, to) pairs of the link rows of the given link type
fn link_rows(conn: &ConnectionResource<'_>, link_type: &str) -> Result<Vec<(Id, Id)>, StoreError> {
    collect(
        conn,
        "SELECT l.FROMID, l.TOID FROM cm_abstract2abstract l \
         JOIN cm_abstract a ON a.ID = l.TYPEID JOIN dm_type t ON t.ID = a.ID \
         WHERE a.NAME = ?1 AND l.FROMID IS NOT NULL AND l.TOID IS NOT NULL \
         ORDER BY l.ID",
        params![link_type],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

/// (id, uuid, name) of every instance of the named type and its descendants
fn instances(
    conn: &ConnectionResource<'_>,
    type_name: &str,
) -> Result<Vec<(Id, Option<String>, String)>, StoreError> {
    collect(
        conn,
        "WITH RECURSIVE kind(ID) AS ( \
             SELECT a.ID FROM cm_abstract a JOIN dm_type t ON t.ID = a.ID WHERE a.NAME = ?1 \
             UNION SELECT t.ID FROM dm_type t JOIN kind k ON t.PARENTDMTYPE = k.ID \
         ) \
         SELECT a.ID, a.UUID, a.NAME FROM cm_abstract a WHERE a.TYPEID IN (SELECT ID FROM kind) \
         ORDER BY a.ID",
        params![type_name],
        |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            ))
        },
    )
}

#[instrument(level = "trace", skip(db), err)]
pub(crate) fn load_principals(
    db: &Database,
    type_name: &'static str,
) -> Result<Vec<Arc<Principal>>, LoadError> {
    let conn = db.read()?;
    let rows = instances(&conn, type_name)?;
    let status = collect(&conn, "SELECT ID, STATUS FROM us_abstract", [], |row| {
        Ok((row.get::<_, Id>(0)?, row.get::<_, Option<bool>>(1)?))
    })?;
    conn.abort()?;

    let status: std::collections::HashMap<Id, bool> = status
        .into_iter()
        .map(|(id, s)| (id, s.unwrap_or(true)))
        .collect();

    let mut principals = Vec::with_capacity(rows.len());
    for (id, uuid, name) in rows {
        principals.push(Arc::new(Principal {
            id,
            uuid: parse_uuid(&name, uuid)?,
            active: status.get(&id).copied().unwrap_or(true),
            name,
        }));
    }
    Ok(principals)
}

#[instrument(level = "trace", skip_all, err)]
pub(crate) fn load_access_types(db: &Database) -> Result<Vec<Arc<AccessType>>, LoadError> {
    let conn = db.read()?;
    let rows = instances(&conn, admin::types::ACCESS_TYPE)?;
    conn.abort()?;

    let mut access_types = Vec::with_capacity(rows.len());
    for (id, uuid, name) in rows {
        access_types.push(Arc::new(AccessType {
            id,
            uuid: parse_uuid(&name, uuid)?,
            name,
        }));
    }
    Ok(access_types)
}

#[instrument(level = "trace", skip_all, err)]
pub(crate) fn load_access_sets(db: &Database) -> Result<Vec<Arc<AccessSet>>, LoadError> {
    let conn = db.read()?;
    let rows = instances(&conn, admin::types::ACCESS_SET)?;
    let access_types = link_rows(&conn, admin::types::ACCESS_SET2ACCESS_TYPE)?;
    let types = link_rows(&conn, admin::types::ACCESS_SET2TYPE)?;
    let principals = link_rows(&conn, admin::types::ACCESS_SET2USER)?;
    conn.abort()?;

    let mut sets = Vec::with_capacity(rows.len());
    for (id, uuid, name) in rows {
        let linked = |links: &[(Id, Id)]| {
            links
                .iter()
                .filter(|(from, _)| *from == id)
                .map(|(_, to)| *to)
                .collect()
        };
        sets.push(Arc::new(AccessSet {
            id,
            uuid: parse_uuid(&name, uuid)?,
            access_types: linked(&access_types),
            types: linked(&types),
            principals: linked(&principals),
            name,
        }));
    }
    Ok(sets)
}
