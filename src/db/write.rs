use rusqlite::params_from_iter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use super::query::{main_table, storage};
use super::{quote, ConnectionResource, Instance, StoreError, Value};
use crate::datamodel::{AttributeType, SqlTable, Type};
use crate::Id;

/// Group attribute values by the table storing them
///
/// Id and type discriminator attributes are maintained by the statements themselves and are
/// skipped.
fn by_table<'t>(
    ty: &'t Type,
    values: &[(String, Value)],
) -> Result<BTreeMap<Id, (&'t Arc<SqlTable>, Vec<(&'t str, Value)>)>, StoreError> {
    let mut tables: BTreeMap<Id, (&Arc<SqlTable>, Vec<(&str, Value)>)> = BTreeMap::new();
    for (name, value) in values {
        let (attr, table, column) = storage(ty, name)?;
        if matches!(attr.attribute_type(), AttributeType::Id | AttributeType::Type) {
            trace!(attribute = name.as_str(), "skipping generated attribute");
            continue;
        }
        if table.is_read_only() {
            return Err(StoreError::ReadOnly(table.name().to_string()));
        }
        let (_, columns) = tables.entry(table.id()).or_insert_with(|| (table, Vec::new()));
        columns.retain(|(c, _)| *c != column);
        columns.push((column, value.clone()));
    }
    Ok(tables)
}

fn insert_row(
    conn: &ConnectionResource<'_>,
    table: &SqlTable,
    columns: Vec<(&str, Value)>,
) -> Result<(), StoreError> {
    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote(table.sql_table()))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table.sql_table()),
            columns
                .iter()
                .map(|(c, _)| quote(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    };
    conn.execute(&sql, params_from_iter(columns.iter().map(|(_, v)| v)))?;
    Ok(())
}

/// Create a new instance of a type
///
/// The row of the main table is inserted first, its id is then used for the rows of every
/// other table of the type.
#[derive(Debug, Clone)]
pub struct Insert<'t> {
    ty: &'t Type,
    values: Vec<(String, Value)>,
}

impl<'t> Insert<'t> {
    pub fn new(ty: &'t Type) -> Self {
        Self {
            ty,
            values: Vec::new(),
        }
    }

    pub fn set(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut insert = self;
        insert.values.push((attribute.into(), value.into()));
        insert
    }

    pub fn execute(&self, conn: &ConnectionResource<'_>) -> Result<Instance, StoreError> {
        if self.ty.is_abstract() {
            return Err(StoreError::AbstractType(self.ty.name().to_string()));
        }
        let main = main_table(self.ty)?;
        if main.is_read_only() {
            return Err(StoreError::ReadOnly(main.name().to_string()));
        }
        let mut tables = by_table(self.ty, &self.values)?;

        let mut columns = Vec::new();
        let new_id = match main.new_id_select() {
            Some(select) => {
                let id: Id = conn.query_row(select, [], |row| row.get(0))?;
                columns.push((main.id_column(), Value::Integer(id)));
                Some(id)
            }
            None => None,
        };
        if let Some(type_column) = main.type_column() {
            columns.push((type_column, Value::Integer(self.ty.id())));
        }
        if let Some((_, values)) = tables.remove(&main.id()) {
            columns.extend(values);
        }
        insert_row(conn, main, columns)?;
        let id = new_id.unwrap_or_else(|| conn.last_insert_rowid());

        for table in self.ty.tables().filter(|t| t.id() != main.id()) {
            if table.is_read_only() {
                continue;
            }
            let mut columns = vec![(table.id_column(), Value::Integer(id))];
            if let Some(type_column) = table.type_column() {
                columns.push((type_column, Value::Integer(self.ty.id())));
            }
            if let Some((_, values)) = tables.remove(&table.id()) {
                columns.extend(values);
            }
            insert_row(conn, table, columns)?;
        }

        let instance = Instance::new(self.ty.id(), id);
        trace!(ty = self.ty.name(), instance = %instance, "inserted");
        Ok(instance)
    }
}

/// Change attribute values of an existing instance
#[derive(Debug, Clone)]
pub struct Edit<'t> {
    ty: &'t Type,
    id: Id,
    values: Vec<(String, Value)>,
}

impl<'t> Edit<'t> {
    pub fn new(ty: &'t Type, id: Id) -> Self {
        Self {
            ty,
            id,
            values: Vec::new(),
        }
    }

    pub fn set(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut edit = self;
        edit.values.push((attribute.into(), value.into()));
        edit
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Write the values, returning the number of updated rows
    pub fn execute(&self, conn: &ConnectionResource<'_>) -> Result<usize, StoreError> {
        let mut updated = 0;
        for (_, (table, columns)) in by_table(self.ty, &self.values)? {
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                quote(table.sql_table()),
                columns
                    .iter()
                    .map(|(c, _)| format!("{} = ?", quote(c)))
                    .collect::<Vec<_>>()
                    .join(", "),
                quote(table.id_column()),
            );
            let params = columns
                .iter()
                .map(|(_, v)| v.clone())
                .chain(std::iter::once(Value::Integer(self.id)));
            updated += conn.execute(&sql, params_from_iter(params))?;
        }
        Ok(updated)
    }
}

/// Remove an instance from every table of its type
#[derive(Debug, Clone)]
pub struct Delete<'t> {
    ty: &'t Type,
    id: Id,
}

impl<'t> Delete<'t> {
    pub fn new(ty: &'t Type, id: Id) -> Self {
        Self { ty, id }
    }

    pub fn execute(&self, conn: &ConnectionResource<'_>) -> Result<(), StoreError> {
        let main = main_table(self.ty)?;
        if main.is_read_only() {
            return Err(StoreError::ReadOnly(main.name().to_string()));
        }
        let secondary: Vec<_> = self.ty.tables().filter(|t| t.id() != main.id()).collect();
        for table in secondary.into_iter().rev().chain(std::iter::once(main)) {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    quote(table.sql_table()),
                    quote(table.id_column())
                ),
                [self.id],
            )?;
        }
        trace!(ty = self.ty.name(), id = self.id, "deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{attributes, types};
    use crate::datamodel::DataModel;
    use crate::db::{type_of, Database, Query};
    use pretty_assertions::assert_eq;

    fn model() -> DataModel {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.bootstrap().unwrap();
        DataModel::new(db)
    }

    #[test]
    fn it_inserts_into_every_table_of_a_type() {
        let model = model();
        let snapshot = model.snapshot().unwrap();
        let role = snapshot.type_by_name(types::USER_ROLE).unwrap();

        let conn = model.db().transaction().unwrap();
        let instance = Insert::new(role)
            .set(attributes::NAME, "Admin")
            .set(attributes::STATUS, false)
            .execute(&conn)
            .unwrap();
        assert_eq!(instance.type_id(), role.id());

        let rows = Query::new(role)
            .filter(attributes::NAME, "Admin")
            .select(attributes::STATUS)
            .select(attributes::TYPE)
            .execute(&conn)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instance(), instance);
        assert_eq!(rows[0].get(attributes::STATUS), Some(&Value::Boolean(false)));
        assert_eq!(
            rows[0].get(attributes::TYPE),
            Some(&Value::Integer(role.id()))
        );
    }

    #[test]
    fn it_queries_subtypes_by_discriminator() {
        let model = model();
        let snapshot = model.snapshot().unwrap();
        let command = snapshot.type_by_name(types::UI_COMMAND).unwrap();
        let menu = snapshot.type_by_name(types::UI_MENU).unwrap();
        let form = snapshot.type_by_name(types::UI_FORM).unwrap();

        let conn = model.db().transaction().unwrap();
        let a = Insert::new(command).set(attributes::NAME, "a").execute(&conn).unwrap();
        let b = Insert::new(menu).set(attributes::NAME, "b").execute(&conn).unwrap();
        Insert::new(form).set(attributes::NAME, "c").execute(&conn).unwrap();

        let found: Vec<_> = Query::new(command)
            .execute(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.instance())
            .collect();
        assert_eq!(found, vec![a, b]);
        assert_eq!(type_of(&conn, command, b.id()).unwrap(), Some(menu.id()));
        assert_eq!(type_of(&conn, command, 9999).unwrap(), None);

        // null filters
        let unnamed = Query::new(command)
            .filter(attributes::UUID, Value::Null)
            .execute(&conn)
            .unwrap();
        assert_eq!(unnamed.len(), 2);
    }

    #[test]
    fn it_rejects_abstract_types_and_unknown_attributes() {
        let model = model();
        let snapshot = model.snapshot().unwrap();
        let conn = model.db().transaction().unwrap();

        let ui = snapshot.type_by_name(types::UI_ABSTRACT).unwrap();
        assert!(matches!(
            Insert::new(ui).execute(&conn),
            Err(StoreError::AbstractType(_))
        ));

        let command = snapshot.type_by_name(types::UI_COMMAND).unwrap();
        assert!(matches!(
            Insert::new(command).set("Color", "red").execute(&conn),
            Err(StoreError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn it_edits_and_deletes_instances() {
        let model = model();
        let snapshot = model.snapshot().unwrap();
        let group = snapshot.type_by_name(types::USER_GROUP).unwrap();

        let conn = model.db().transaction().unwrap();
        let instance = Insert::new(group)
            .set(attributes::NAME, "Staff")
            .execute(&conn)
            .unwrap();

        let updated = Edit::new(group, instance.id())
            .set(attributes::NAME, "Employees")
            .set(attributes::STATUS, false)
            .execute(&conn)
            .unwrap();
        assert_eq!(updated, 2);

        let rows = Query::new(group)
            .select(attributes::NAME)
            .execute(&conn)
            .unwrap();
        assert_eq!(
            rows[0].get(attributes::NAME),
            Some(&Value::Text("Employees".to_string()))
        );

        Delete::new(group, instance.id()).execute(&conn).unwrap();
        assert!(Query::new(group).execute(&conn).unwrap().is_empty());
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM us_abstract", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn it_inserts_rows_without_columns() {
        let model = model();
        let snapshot = model.snapshot().unwrap();
        let attribute = snapshot.type_by_name(types::DATAMODEL_ATTRIBUTE).unwrap();
        let conn = model.db().transaction().unwrap();

        // dm_attribute requires a name
        assert!(Insert::new(attribute).execute(&conn).is_err());

        let property = snapshot.type_by_name(types::COMMON_PROPERTY).unwrap();
        let instance = Insert::new(property)
            .set(attributes::ABSTRACT, 1_i64)
            .set(attributes::NAME, "Key")
            .execute(&conn)
            .unwrap();
        assert_eq!(instance.type_id(), property.id());
    }
}
