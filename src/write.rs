//! Write path: insert, update, and delete families over the ambient
//! [`WriteMode`](crate::session::WriteMode).

use bson::{doc, oid::ObjectId, Bson, Document};

use crate::cursor::reply_to_state;
use crate::errors::DbError;
use crate::query::{build_query_request, select, Query, Selection};
use crate::session::{Session, WriteMode};
use crate::wire::{DeleteFlags, Notice, UpdateFlags};

impl Session {
    /// Emit a write notice under the ambient write mode.
    ///
    /// Under `Unsafe` the notice is fired and forgotten. Under `Safe` it is
    /// followed by `getLastError` in the same batch and the server's verdict
    /// is raised as [`DbError::WriteFailure`].
    pub fn write(&self, notice: Notice) -> Result<(), DbError> {
        match self.write_mode {
            WriteMode::Unsafe => self.conn.send(&[notice]),
            WriteMode::Safe => {
                let ack = self.get_last_error(&[notice])?;
                match ack.get("err") {
                    None | Some(Bson::Null) => Ok(()),
                    Some(err) => Err(write_failure(&ack, err)),
                }
            }
        }
    }

    /// Send `notices` followed by `getLastError` in one batch, so the
    /// command observes the preceding writes on this connection.
    pub(crate) fn get_last_error(&self, notices: &[Notice]) -> Result<Document, DbError> {
        let cmd = Query { limit: 1, ..Query::new(select(doc! {"getlasterror": 1}, "$cmd")) };
        let (request, remaining_limit) =
            build_query_request(false, self.read_preference, &self.database, &cmd);
        let reply = self.conn.call(notices, request)?.wait()?;
        let mut state = reply_to_state(reply, remaining_limit)?;
        Ok(state
            .pending
            .pop_front()
            .expect("getLastError returned no acknowledgment document"))
    }

    /// Insert a document, returning its `_id`. A fresh `ObjectId` is
    /// generated and prepended when the document carries none.
    pub fn insert(&self, coll: &str, doc: Document) -> Result<Bson, DbError> {
        let (id, doc) = assign_id(doc);
        self.write(Notice::Insert {
            full_collection: self.full_collection(coll),
            documents: vec![doc],
        })?;
        Ok(id)
    }

    /// Insert documents in one notice, returning their `_id`s in order.
    pub fn insert_many(&self, coll: &str, docs: Vec<Document>) -> Result<Vec<Bson>, DbError> {
        let (ids, docs): (Vec<_>, Vec<_>) = docs.into_iter().map(assign_id).unzip();
        self.write(Notice::Insert {
            full_collection: self.full_collection(coll),
            documents: docs,
        })?;
        Ok(ids)
    }

    /// Emit an update notice with explicit wire flags.
    pub fn update(
        &self,
        flags: UpdateFlags,
        sel: Selection,
        updater: Document,
    ) -> Result<(), DbError> {
        self.write(Notice::Update {
            full_collection: self.full_collection(&sel.coll),
            flags,
            selector: sel.selector,
            updater,
        })
    }

    /// Replace the first document matching `sel`.
    pub fn replace(&self, sel: Selection, doc: Document) -> Result<(), DbError> {
        self.update(UpdateFlags::empty(), sel, doc)
    }

    /// Replace the first match, inserting `doc` when nothing matches.
    pub fn repsert(&self, sel: Selection, doc: Document) -> Result<(), DbError> {
        self.update(UpdateFlags::UPSERT, sel, doc)
    }

    /// Apply an update expression to every matching document.
    pub fn modify(&self, sel: Selection, updater: Document) -> Result<(), DbError> {
        self.update(UpdateFlags::MULTI_UPDATE, sel, updater)
    }

    /// Insert when `doc` has no `_id`, otherwise upsert keyed on it.
    pub fn save(&self, coll: &str, doc: Document) -> Result<(), DbError> {
        match doc.get("_id") {
            Some(id) => {
                let sel = select(doc! {"_id": id.clone()}, coll);
                self.repsert(sel, doc)
            }
            None => self.insert(coll, doc).map(|_| ()),
        }
    }

    /// Delete every document matching `sel`.
    pub fn delete(&self, sel: Selection) -> Result<(), DbError> {
        self.write(Notice::Delete {
            full_collection: self.full_collection(&sel.coll),
            flags: DeleteFlags::empty(),
            selector: sel.selector,
        })
    }

    /// Delete at most one matching document.
    pub fn delete_one(&self, sel: Selection) -> Result<(), DbError> {
        self.write(Notice::Delete {
            full_collection: self.full_collection(&sel.coll),
            flags: DeleteFlags::SINGLE_REMOVE,
            selector: sel.selector,
        })
    }
}

/// Return the document's `_id` and the document itself, generating and
/// prepending a fresh `ObjectId` when absent. A present `_id` is preserved
/// unchanged.
fn assign_id(doc: Document) -> (Bson, Document) {
    if let Some(id) = doc.get("_id") {
        return (id.clone(), doc);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut with_id = doc! { "_id": id.clone() };
    with_id.extend(doc);
    (id, with_id)
}

fn write_failure(ack: &Document, err: &Bson) -> DbError {
    let code = match ack.get("code") {
        Some(Bson::Int32(c)) => *c,
        Some(Bson::Int64(c)) => *c as i32,
        Some(Bson::Double(c)) => *c as i32,
        _ => 0,
    };
    let message = match err {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    };
    DbError::WriteFailure { code, message }
}
