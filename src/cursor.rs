//! Client-side cursors over server batches.

use std::collections::VecDeque;
use std::sync::Arc;

use bson::Document;
use parking_lot::Mutex;

use crate::errors::DbError;
use crate::query::{batch_size_remaining_limit, build_query_request, Query};
use crate::session::Session;
use crate::wire::{Connection, Notice, Reply, ReplyPromise, Request, ResponseFlags};

/// What is known about a server cursor after a reply was observed.
///
/// A cursor id of 0 means the server holds no more data; `pending` is the
/// locally buffered part of the current batch.
#[derive(Debug)]
pub(crate) struct CursorState {
    pub(crate) remaining_limit: u32,
    pub(crate) cursor_id: i64,
    pub(crate) pending: VecDeque<Document>,
}

impl CursorState {
    fn drained() -> Self {
        Self { remaining_limit: 0, cursor_id: 0, pending: VecDeque::new() }
    }
}

/// Convert a raw reply into cursor state, raising the protocol failures
/// carried in the response flags. `AWAIT_CAPABLE` is informational only.
pub(crate) fn reply_to_state(reply: Reply, remaining_limit: u32) -> Result<CursorState, DbError> {
    if reply.flags.contains(ResponseFlags::CURSOR_NOT_FOUND) {
        return Err(DbError::CursorNotFound(reply.cursor_id));
    }
    if reply.flags.contains(ResponseFlags::QUERY_ERROR) {
        let message = reply
            .documents
            .first()
            .and_then(|doc| doc.get_str("$err").ok())
            .unwrap_or("query failed")
            .to_string();
        return Err(DbError::QueryFailure(message));
    }
    Ok(CursorState {
        remaining_limit,
        cursor_id: reply.cursor_id,
        pending: reply.documents.into(),
    })
}

enum Frame {
    /// A reply submitted but not yet observed.
    Delayed { reply: ReplyPromise, remaining_limit: u32 },
    Ready(CursorState),
}

impl Frame {
    /// Observe the delayed reply if there is one.
    fn force(self) -> Result<CursorState, DbError> {
        match self {
            Frame::Delayed { reply, remaining_limit } => reply_to_state(reply.wait()?, remaining_limit),
            Frame::Ready(state) => Ok(state),
        }
    }
}

/// Handle to a server-side cursor.
///
/// Meant for a single owner; an internal mutex serializes concurrent
/// `next`/`close`/`is_closed` calls. Dropping a cursor without closing it
/// attempts a best-effort `KillCursors`.
pub struct Cursor {
    conn: Arc<dyn Connection>,
    full_collection: String,
    batch_size: u32,
    frame: Mutex<Option<Frame>>,
}

impl Session {
    /// Submit a query, wrapping the pending reply in a [`Cursor`].
    pub fn find(&self, q: Query) -> Result<Cursor, DbError> {
        let (request, remaining_limit) =
            build_query_request(false, self.read_preference, &self.database, &q);
        let reply = self.conn.call(&[], request)?;
        Ok(Cursor {
            conn: Arc::clone(&self.conn),
            full_collection: self.full_collection(&q.selection.coll),
            batch_size: q.batch_size,
            frame: Mutex::new(Some(Frame::Delayed { reply, remaining_limit })),
        })
    }
}

impl Cursor {
    /// Pull the next document; `None` once the cursor is exhausted.
    ///
    /// When the pop empties the local batch and the server still holds the
    /// cursor, the next batch is requested before returning, so it is in
    /// flight while the caller consumes this document.
    pub fn next(&self) -> Result<Option<Document>, DbError> {
        let mut slot = self.frame.lock();
        let frame = slot.take().expect("cursor state lost to an earlier panic");
        let mut state = match frame.force() {
            Ok(state) => state,
            Err(e) => {
                // A failed reply consumed the server cursor; leave the
                // handle closed so close() stays quiet.
                *slot = Some(Frame::Ready(CursorState::drained()));
                return Err(e);
            }
        };
        let Some(doc) = state.pending.pop_front() else {
            *slot = Some(Frame::Ready(CursorState::drained()));
            assert!(
                state.cursor_id == 0,
                "server cursor {} promised more data but delivered none",
                state.cursor_id
            );
            return Ok(None);
        };
        if state.pending.is_empty() && state.cursor_id != 0 {
            let (wire_batch, remaining_limit) =
                batch_size_remaining_limit(self.batch_size, state.remaining_limit);
            let request = Request::GetMore {
                full_collection: self.full_collection.clone(),
                batch_size: wire_batch,
                cursor_id: state.cursor_id,
            };
            match self.conn.call(&[], request) {
                Ok(reply) => *slot = Some(Frame::Delayed { reply, remaining_limit }),
                Err(e) => {
                    *slot = Some(Frame::Ready(CursorState::drained()));
                    return Err(e);
                }
            }
        } else {
            *slot = Some(Frame::Ready(state));
        }
        Ok(Some(doc))
    }

    /// Pull at most `n` documents, stopping early at end of stream.
    pub fn next_n(&self, n: usize) -> Result<Vec<Document>, DbError> {
        let mut docs = Vec::new();
        for _ in 0..n {
            match self.next()? {
                Some(doc) => docs.push(doc),
                None => break,
            }
        }
        Ok(docs)
    }

    /// Drain the cursor.
    pub fn rest(&self) -> Result<Vec<Document>, DbError> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next()? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Kill the server-side cursor and drop pending documents. Idempotent.
    pub fn close(&self) -> Result<(), DbError> {
        let mut slot = self.frame.lock();
        let frame = slot.take().expect("cursor state lost to an earlier panic");
        *slot = Some(Frame::Ready(CursorState::drained()));
        let state = frame.force()?;
        if state.cursor_id != 0 {
            self.conn.send(&[Notice::KillCursors { cursor_ids: vec![state.cursor_id] }])?;
        }
        Ok(())
    }

    /// True once the server holds no more data and the local batch is empty.
    pub fn is_closed(&self) -> Result<bool, DbError> {
        let mut slot = self.frame.lock();
        let frame = slot.take().expect("cursor state lost to an earlier panic");
        let state = match frame.force() {
            Ok(state) => state,
            Err(e) => {
                *slot = Some(Frame::Ready(CursorState::drained()));
                return Err(e);
            }
        };
        let closed = state.cursor_id == 0 && state.pending.is_empty();
        *slot = Some(Frame::Ready(state));
        Ok(closed)
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let Some(frame) = self.frame.get_mut().take() else { return };
        let state = match frame {
            Frame::Ready(state) => state,
            // Blocking in drop is off the table; kill only when the reply
            // has already arrived.
            Frame::Delayed { reply, remaining_limit } => match reply.try_take() {
                Some(Ok(r)) => match reply_to_state(r, remaining_limit) {
                    Ok(state) => state,
                    Err(_) => return,
                },
                _ => return,
            },
        };
        if state.cursor_id != 0 {
            let notice = Notice::KillCursors { cursor_ids: vec![state.cursor_id] };
            if let Err(e) = self.conn.send(&[notice]) {
                log::debug!(
                    "dropping cursor {} on {}: kill failed: {e}",
                    state.cursor_id,
                    self.full_collection
                );
            }
        }
    }
}
