//! Ambient per-caller state: connection, database, read preference, write
//! mode. Carried explicitly so there is no process-wide configuration.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::wire::Connection;

/// Whether reads may be served by a secondary replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreference {
    Master,
    SlaveOk,
}

/// Write acknowledgment policy.
///
/// `Unsafe` fires the write notice and returns immediately; `Safe` follows
/// every write with a `getLastError` round-trip on the same connection and
/// raises the failure the server reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    Unsafe,
    Safe,
}

/// Immutable ambient state threaded through every operation.
///
/// Scoped mutators hand a shadowed copy to a nested closure; the outer
/// record is never touched, so the outer binding is in force again on every
/// exit path, including panics.
#[derive(Clone)]
pub struct Session {
    pub(crate) conn: Arc<dyn Connection>,
    pub(crate) database: String,
    pub(crate) read_preference: ReadPreference,
    pub(crate) write_mode: WriteMode,
}

impl Session {
    /// A session on `database` with confirmed writes and master reads.
    pub fn new(conn: Arc<dyn Connection>, database: impl Into<String>) -> Self {
        Self {
            conn,
            database: database.into(),
            read_preference: ReadPreference::Master,
            write_mode: WriteMode::Safe,
        }
    }

    /// Run `op` with the current database bound to `database`.
    pub fn use_db<R>(&self, database: &str, op: impl FnOnce(&Session) -> R) -> R {
        let scoped = Session { database: database.to_string(), ..self.clone() };
        op(&scoped)
    }

    /// Run `op` allowing reads from a secondary.
    pub fn slave_ok<R>(&self, op: impl FnOnce(&Session) -> R) -> R {
        let scoped = Session { read_preference: ReadPreference::SlaveOk, ..self.clone() };
        op(&scoped)
    }

    /// Run `op` under the given write acknowledgment mode.
    pub fn write_mode<R>(&self, mode: WriteMode, op: impl FnOnce(&Session) -> R) -> R {
        let scoped = Session { write_mode: mode, ..self.clone() };
        op(&scoped)
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    #[must_use]
    pub fn current_write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// `"<db>.<coll>"` under the ambient database.
    #[must_use]
    pub fn full_collection(&self, coll: &str) -> String {
        format!("{}.{}", self.database, coll)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("read_preference", &self.read_preference)
            .field("write_mode", &self.write_mode)
            .finish_non_exhaustive()
    }
}
