use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::LoadError;
use crate::cache::CacheObject;
use crate::Id;

/// Mapping of a physical SQL table
///
/// A table may have a main table: rows of the table share their id with a row of the main
/// table, which receives the insert first.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlTable {
    id: Id,
    uuid: Option<Uuid>,
    name: String,
    sql_table: String,
    id_column: String,
    type_column: Option<String>,
    new_id_select: Option<String>,
    main_table: Option<Arc<SqlTable>>,
    read_only: bool,
    types: BTreeSet<Id>,
}

impl SqlTable {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the physical table
    pub fn sql_table(&self) -> &str {
        &self.sql_table
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    /// Column holding the concrete type id, if the table stores more than one type
    pub fn type_column(&self) -> Option<&str> {
        self.type_column.as_deref()
    }

    /// Statement returning the id for a new row, if ids are not generated by the table
    pub fn new_id_select(&self) -> Option<&str> {
        self.new_id_select.as_deref()
    }

    pub fn main_table(&self) -> Option<&Arc<SqlTable>> {
        self.main_table.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Ids of the types with at least one attribute stored in this table
    pub fn types(&self) -> &BTreeSet<Id> {
        &self.types
    }
}

impl CacheObject for SqlTable {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }
}

/// A `dm_table` row
#[derive(Debug, Clone, Default)]
pub struct TableRow {
    pub id: Id,
    pub uuid: Option<Uuid>,
    pub name: String,
    pub sql_table: String,
    pub id_column: String,
    pub type_column: Option<String>,
    pub new_id_select: Option<String>,
    pub main_table: Option<Id>,
    pub read_only: bool,
}

/// Build the table objects of a generation
///
/// `stored` lists (table id, type id) pairs for every type with an attribute in the table.
/// Main table chains may have any depth but must not be cyclic.
pub fn build_tables(
    rows: Vec<TableRow>,
    stored: &[(Id, Id)],
) -> Result<Vec<Arc<SqlTable>>, LoadError> {
    let mut by_id = BTreeMap::new();
    for row in rows {
        let id = row.id;
        if by_id.insert(id, row).is_some() {
            return Err(LoadError::DuplicateId(id));
        }
    }

    for row in by_id.values() {
        let mut visited = BTreeSet::from([row.id]);
        let mut next = row.main_table;
        while let Some(main) = next {
            let Some(main_row) = by_id.get(&main) else {
                return Err(LoadError::UnknownMainTable {
                    name: row.name.clone(),
                    main,
                });
            };
            if !visited.insert(main) {
                return Err(LoadError::CyclicTableChain {
                    name: row.name.clone(),
                });
            }
            next = main_row.main_table;
        }
    }

    let mut types: HashMap<Id, BTreeSet<Id>> = HashMap::new();
    for &(table, ty) in stored {
        types.entry(table).or_default().insert(ty);
    }

    let mut built = HashMap::new();
    for id in by_id.keys() {
        build(*id, &by_id, &mut types, &mut built);
    }

    Ok(by_id.keys().filter_map(|id| built.remove(id)).collect())
}

fn build(
    id: Id,
    rows: &BTreeMap<Id, TableRow>,
    types: &mut HashMap<Id, BTreeSet<Id>>,
    built: &mut HashMap<Id, Arc<SqlTable>>,
) -> Option<Arc<SqlTable>> {
    if let Some(table) = built.get(&id) {
        return Some(table.clone());
    }
    let row = rows.get(&id)?;
    let main_table = row
        .main_table
        .and_then(|main| build(main, rows, types, built));

    let table = Arc::new(SqlTable {
        id,
        uuid: row.uuid,
        name: row.name.clone(),
        sql_table: row.sql_table.clone(),
        id_column: row.id_column.clone(),
        type_column: row.type_column.clone(),
        new_id_select: row.new_id_select.clone(),
        main_table,
        read_only: row.read_only,
        types: types.remove(&id).unwrap_or_default(),
    });
    built.insert(id, table.clone());
    Some(table)
}
