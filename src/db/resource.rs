use parking_lot::MutexGuard;
use rusqlite::Connection;
use std::ops::Deref;
use tracing::{debug, warn};

use super::StoreError;

/// Exclusive access to the store connection, scoped to one transaction
///
/// The transaction is rolled back when the resource is dropped without being committed or
/// aborted.
pub struct ConnectionResource<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl<'a> ConnectionResource<'a> {
    pub(crate) fn begin(conn: MutexGuard<'a, Connection>, stmt: &str) -> Result<Self, StoreError> {
        conn.execute_batch(stmt)?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn abort(mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Deref for ConnectionResource<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for ConnectionResource<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => debug!("transaction rolled back"),
            Err(e) => warn!("failed to roll back transaction: {e}"),
        }
    }
}
