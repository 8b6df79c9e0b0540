//! Relational backing store
//!
//! A [Database] holds a single SQLite connection. All statements, the metadata reads of the
//! caches as well as the writes of the installer, go through a [ConnectionResource] holding
//! that connection for the duration of one transaction.
//!
//! Rows are read and written through the loaded data model: a [Query], [Insert], [Edit] or
//! [Delete] is built against a [Type](`crate::datamodel::Type`) and translates attribute
//! names into the tables and columns the type is stored in.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::datamodel::ValueError;

mod query;
mod resource;
mod schema;
mod value;
mod write;

pub use query::*;
pub use resource::*;
pub use schema::seed_uuid;
pub use value::*;
pub use write::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("type '{ty}' has no attribute '{attribute}'")]
    UnknownAttribute { ty: String, attribute: String },

    #[error("attribute '{attribute}' of type '{ty}' is not mapped to a column")]
    UnmappedAttribute { ty: String, attribute: String },

    #[error("type '{0}' is not stored in any table")]
    NoMainTable(String),

    #[error("cannot create instances of abstract type '{0}'")]
    AbstractType(String),

    #[error("sql table '{0}' is read only")]
    ReadOnly(String),

    #[error("invalid value for attribute '{attribute}': {source}")]
    InvalidValue {
        attribute: String,
        #[source]
        source: ValueError,
    },
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Create the admin schema and seed the core data model if the store is empty
    ///
    /// Returns `true` if the store was seeded, `false` if the schema already existed.
    #[instrument(level = "debug", skip_all, err)]
    pub fn bootstrap(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        if schema::exists(&conn)? {
            debug!("admin schema exists, skipping bootstrap");
            return Ok(false);
        }

        let tx = conn.transaction()?;
        schema::create(&tx)?;
        tx.commit()?;
        debug!("admin schema created");
        Ok(true)
    }

    /// Start a write transaction
    ///
    /// The write lock on the store is taken immediately, blocking any other writer until the
    /// transaction ends.
    pub fn transaction(&self) -> Result<ConnectionResource<'_>, StoreError> {
        ConnectionResource::begin(self.conn.lock(), "BEGIN IMMEDIATE")
    }

    /// Start a read transaction
    pub fn read(&self) -> Result<ConnectionResource<'_>, StoreError> {
        ConnectionResource::begin(self.conn.lock(), "BEGIN DEFERRED")
    }
}

/// Quote an identifier coming from the data model
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
