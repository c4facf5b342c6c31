//! mongolite: the query and cursor layer of a MongoDB wire-protocol client.
//!
//! Translates document operations (insert, update, delete, find, count,
//! distinct, group, map-reduce, commands) into wire messages, multiplexes
//! one server connection across concurrent callers, and manages server-side
//! cursors from the client.
//!
//! The byte-level framer stays outside this crate: anything that can
//! transmit [`wire::Notice`]s and [`wire::Request`]s over an ordered channel
//! and fulfill [`wire::ReplySlot`]s implements [`wire::Connection`]. All
//! operations hang off a [`Session`], the immutable ambient record of
//! connection, database, read preference, and write mode.

pub mod admin;
pub mod aggregate;
pub mod auth;
pub mod cursor;
pub mod errors;
pub mod query;
pub mod session;
pub mod wire;

mod command;
mod write;

pub use admin::{index_name, Index};
pub use aggregate::{Group, GroupKey, Javascript, MapReduce};
pub use cursor::Cursor;
pub use errors::DbError;
pub use query::{query, select, Query, QueryOption, Selection};
pub use session::{ReadPreference, Session, WriteMode};
