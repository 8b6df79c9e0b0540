//! The in-memory data model
//!
//! [DataModel] is the registry of every metadata cache of a store. Caches depend on each other
//! in load order: types are built against the SQL tables of the current table generation, so a
//! full [reload](`DataModel::reload`) refreshes tables first.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::access::{AccessContext, AccessSet, AccessType, Principal, Programs, Subject};
use crate::admin;
use crate::cache::{Cache, DuplicateKey, Generation, ReloadError};
use crate::db::{Database, StoreError};
use crate::Id;

mod attribute;
mod event;
mod loader;
mod sql_table;
mod types;

pub use attribute::*;
pub use event::*;
pub use sql_table::*;
pub use types::*;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Duplicate(#[from] DuplicateKey),

    #[error(transparent)]
    Dependency(Box<ReloadError>),

    #[error("duplicate id {0}")]
    DuplicateId(Id),

    #[error("type '{name}' is part of a cyclic type hierarchy")]
    CyclicHierarchy { name: String },

    #[error("sql table '{name}' is part of a cyclic main table chain")]
    CyclicTableChain { name: String },

    #[error("type '{name}' has unknown parent type {parent}")]
    UnknownParent { name: String, parent: Id },

    #[error("sql table '{name}' has unknown main table {main}")]
    UnknownMainTable { name: String, main: Id },

    #[error("attribute '{attribute}' belongs to unknown type {type_id}")]
    UnknownType { attribute: String, type_id: Id },

    #[error("attribute '{attribute}' of type '{ty}' is stored in unknown sql table {table}")]
    UnknownTable {
        attribute: String,
        ty: String,
        table: Id,
    },

    #[error("attribute '{attribute}' links to unknown type {target}")]
    UnknownLinkTarget { attribute: String, target: Id },

    #[error("attribute '{attribute}' has invalid attribute type '{value}'")]
    InvalidAttributeType { attribute: String, value: String },

    #[error("'{name}' has invalid uuid '{value}'")]
    InvalidUuid { name: String, value: String },
}

impl From<ReloadError> for LoadError {
    fn from(err: ReloadError) -> Self {
        LoadError::Dependency(Box::new(err))
    }
}

/// A consistent view of the tables and types generations
#[derive(Debug, Clone)]
pub struct Snapshot {
    tables: Arc<Generation<SqlTable>>,
    types: Arc<Generation<Type>>,
}

impl Snapshot {
    pub fn new(tables: Arc<Generation<SqlTable>>, types: Arc<Generation<Type>>) -> Self {
        Self { tables, types }
    }

    pub fn tables(&self) -> &Generation<SqlTable> {
        &self.tables
    }

    pub fn types(&self) -> &Generation<Type> {
        &self.types
    }

    pub fn type_by_name(&self, name: &str) -> Option<&Arc<Type>> {
        self.types.get_by_name(name)
    }
}

/// Whether every table referenced by the types belongs to the given tables generation
fn is_built_on(types: &Generation<Type>, tables: &Generation<SqlTable>) -> bool {
    types.iter().flat_map(|ty| ty.tables()).all(|table| {
        tables
            .get(table.id())
            .is_some_and(|current| Arc::ptr_eq(current, table))
    })
}

/// Registry of the metadata caches of a store
pub struct DataModel {
    db: Arc<Database>,
    programs: Programs,
    tables: Arc<Cache<SqlTable>>,
    types: Cache<Type>,
    roles: Cache<Principal>,
    groups: Cache<Principal>,
    access_types: Cache<AccessType>,
    access_sets: Cache<AccessSet>,
}

impl DataModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_programs(db, Programs::default())
    }

    /// Create the registry with a custom set of access check programs
    pub fn with_programs(db: Arc<Database>, programs: Programs) -> Self {
        let tables = Arc::new(Cache::new("sql table", {
            let db = db.clone();
            move || loader::load_tables(&db)
        }));
        let types = Cache::new("type", {
            let db = db.clone();
            let tables = tables.clone();
            move || {
                let tables = tables.snapshot()?;
                loader::load_types(&db, &tables)
            }
        });
        let roles = Cache::new("role", {
            let db = db.clone();
            move || loader::load_principals(&db, admin::types::USER_ROLE)
        });
        let groups = Cache::new("group", {
            let db = db.clone();
            move || loader::load_principals(&db, admin::types::USER_GROUP)
        });
        let access_types = Cache::new("access type", {
            let db = db.clone();
            move || loader::load_access_types(&db)
        });
        let access_sets = Cache::new("access set", {
            let db = db.clone();
            move || loader::load_access_sets(&db)
        });

        Self {
            db,
            programs,
            tables,
            types,
            roles,
            groups,
            access_types,
            access_sets,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn programs(&self) -> &Programs {
        &self.programs
    }

    pub fn tables(&self) -> &Cache<SqlTable> {
        &self.tables
    }

    pub fn types(&self) -> &Cache<Type> {
        &self.types
    }

    pub fn roles(&self) -> &Cache<Principal> {
        &self.roles
    }

    pub fn groups(&self) -> &Cache<Principal> {
        &self.groups
    }

    pub fn access_types(&self) -> &Cache<AccessType> {
        &self.access_types
    }

    pub fn access_sets(&self) -> &Cache<AccessSet> {
        &self.access_sets
    }

    /// Return the current tables and types generations, loading them if needed
    ///
    /// Types are loaded first, as loading types may refresh the tables cache. If the tables
    /// were reloaded on their own since the types were built, the types are rebuilt so that
    /// every type refers to the tables of the returned generation.
    pub fn snapshot(&self) -> Result<Snapshot, ReloadError> {
        loop {
            let types = self.types.snapshot()?;
            let tables = self.tables.snapshot()?;
            if is_built_on(&types, &tables) {
                return Ok(Snapshot::new(tables, types));
            }
            debug!("sql tables changed since types were loaded");
            self.types.invalidate();
        }
    }

    /// Reload every cache in dependency order
    ///
    /// Stops at the first failure, caches not yet reloaded at that point keep their current
    /// generation.
    #[instrument(level = "debug", skip_all, err)]
    pub fn reload(&self) -> Result<(), ReloadError> {
        self.tables.reload()?;
        self.types.reload()?;
        self.roles.reload()?;
        self.groups.reload()?;
        self.access_types.reload()?;
        self.access_sets.reload()?;
        Ok(())
    }

    /// Mark every cache as stale
    pub fn invalidate(&self) {
        self.tables.invalidate();
        self.types.invalidate();
        self.roles.invalidate();
        self.groups.invalidate();
        self.access_types.invalidate();
        self.access_sets.invalidate();
    }

    /// Create an access context for the given subject
    pub fn access<'a>(&'a self, subject: &'a Subject) -> Result<AccessContext<'a>, ReloadError> {
        Ok(AccessContext::new(
            &self.programs,
            self.access_sets.snapshot()?,
            subject,
        ))
    }
}
