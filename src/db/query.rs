use rusqlite::{params_from_iter, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{quote, ConnectionResource, Instance, StoreError, Value};
use crate::datamodel::{Attribute, SqlTable, Type};
use crate::Id;

/// A row returned by a [Query]
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    instance: Instance,
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// Value of a selected attribute
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }
}

/// Table aliases of a statement, the main table is always `T0`
pub(super) struct Aliases<'a> {
    main: &'a Arc<SqlTable>,
    joined: Vec<&'a Arc<SqlTable>>,
}

impl<'a> Aliases<'a> {
    pub(super) fn new(main: &'a Arc<SqlTable>) -> Self {
        Self {
            main,
            joined: Vec::new(),
        }
    }

    pub(super) fn alias(&mut self, table: &'a Arc<SqlTable>) -> String {
        if table.id() == self.main.id() {
            return "T0".to_string();
        }
        let pos = match self.joined.iter().position(|t| t.id() == table.id()) {
            Some(pos) => pos,
            None => {
                self.joined.push(table);
                self.joined.len() - 1
            }
        };
        format!("T{}", pos + 1)
    }

    fn from_clause(&self) -> String {
        let id_column = quote(self.main.id_column());
        let mut clause = format!("{} T0", quote(self.main.sql_table()));
        for (pos, table) in self.joined.iter().enumerate() {
            let alias = format!("T{}", pos + 1);
            clause.push_str(&format!(
                " LEFT JOIN {} {alias} ON {alias}.{} = T0.{id_column}",
                quote(table.sql_table()),
                quote(table.id_column()),
            ));
        }
        clause
    }
}

/// Resolve an attribute of a type to its table and column
pub(super) fn storage<'a>(
    ty: &'a Type,
    name: &str,
) -> Result<(&'a Attribute, &'a Arc<SqlTable>, &'a str), StoreError> {
    let attr = ty
        .attribute(name)
        .ok_or_else(|| StoreError::UnknownAttribute {
            ty: ty.name().to_string(),
            attribute: name.to_string(),
        })?;
    let (table, column) = attr
        .storage()
        .ok_or_else(|| StoreError::UnmappedAttribute {
            ty: ty.name().to_string(),
            attribute: name.to_string(),
        })?;
    Ok((attr, table, column))
}

pub(super) fn main_table(ty: &Type) -> Result<&Arc<SqlTable>, StoreError> {
    ty.main_table()
        .ok_or_else(|| StoreError::NoMainTable(ty.name().to_string()))
}

/// Select instances of a type and its descendants
///
/// ```rust,no_run
/// # use schemata::db::{Query, Database};
/// # use schemata::datamodel::DataModel;
/// # use std::sync::Arc;
/// # let db = Arc::new(Database::open_in_memory().unwrap());
/// # let model = DataModel::new(db.clone());
/// let menu = model.types().get_by_name("Admin_UI_Menu").unwrap().unwrap();
/// let conn = db.read().unwrap();
/// let rows = Query::new(&menu)
///     .filter("Name", "Main_Menu")
///     .select("UUID")
///     .execute(&conn)
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Query<'t> {
    ty: &'t Type,
    filters: Vec<(String, Value)>,
    select: Vec<String>,
}

impl<'t> Query<'t> {
    pub fn new(ty: &'t Type) -> Self {
        Self {
            ty,
            filters: Vec::new(),
            select: Vec::new(),
        }
    }

    /// Only return instances where the attribute equals the value
    ///
    /// A [Value::Null] filter matches rows where the column is NULL.
    pub fn filter(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut query = self;
        query.filters.push((attribute.into(), value.into()));
        query
    }

    /// Read the value of the attribute for every returned instance
    pub fn select(self, attribute: impl Into<String>) -> Self {
        let mut query = self;
        query.select.push(attribute.into());
        query
    }

    /// Run the query, returning rows in ascending id order
    pub fn execute(&self, conn: &ConnectionResource<'_>) -> Result<Vec<Row>, StoreError> {
        let main = main_table(self.ty)?;
        let mut aliases = Aliases::new(main);
        let id_column = quote(main.id_column());

        let mut columns = vec![format!("T0.{id_column}")];
        if let Some(type_column) = main.type_column() {
            columns.push(format!("T0.{}", quote(type_column)));
        }
        let offset = columns.len();

        let mut selected = Vec::with_capacity(self.select.len());
        for name in &self.select {
            let (attr, table, column) = storage(self.ty, name)?;
            columns.push(format!("{}.{}", aliases.alias(table), quote(column)));
            selected.push(attr);
        }

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(type_column) = main.type_column() {
            let ids: Vec<Id> = self.ty.type_ids().collect();
            conditions.push(format!(
                "T0.{} IN ({})",
                quote(type_column),
                vec!["?"; ids.len()].join(", ")
            ));
            params.extend(ids.into_iter().map(Value::Integer));
        }
        for (name, value) in &self.filters {
            let (_, table, column) = storage(self.ty, name)?;
            let alias = aliases.alias(table);
            if value.is_null() {
                conditions.push(format!("{alias}.{} IS NULL", quote(column)));
            } else {
                conditions.push(format!("{alias}.{} = ?", quote(column)));
                params.push(value.clone());
            }
        }

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), aliases.from_clause());
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY T0.{id_column}"));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let id: Id = row.get(0)?;
            let type_id: Id = if main.type_column().is_some() {
                row.get(1)?
            } else {
                self.ty.id()
            };

            let mut values = BTreeMap::new();
            for (pos, attr) in selected.iter().enumerate() {
                let value = attr
                    .attribute_type()
                    .read(row.get_ref(offset + pos)?)
                    .map_err(|source| StoreError::InvalidValue {
                        attribute: attr.name().to_string(),
                        source,
                    })?;
                values.insert(attr.name().to_string(), value);
            }
            result.push(Row {
                instance: Instance::new(type_id, id),
                values,
            });
        }

        Ok(result)
    }
}

/// Read the concrete type id of an instance of `ty` or one of its descendants
///
/// Returns `None` if no such row exists.
pub fn type_of(
    conn: &ConnectionResource<'_>,
    ty: &Type,
    id: Id,
) -> Result<Option<Id>, StoreError> {
    let main = main_table(ty)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        main.type_column().map(quote).unwrap_or_else(|| "NULL".to_string()),
        quote(main.sql_table()),
        quote(main.id_column()),
    );
    let found = conn
        .query_row(&sql, [id], |row| row.get::<_, Option<Id>>(0))
        .optional()?;
    Ok(found.map(|type_id| type_id.unwrap_or(ty.id())))
}
