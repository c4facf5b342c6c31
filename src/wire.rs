//! Wire-protocol vocabulary shared with the message framer.
//!
//! The framer itself (message headers, the byte codec, socket I/O) lives
//! outside this crate. Anything that can transmit [`Notice`]s and
//! [`Request`]s over an ordered channel and fulfill [`ReplySlot`]s
//! implements [`Connection`].

use std::sync::mpsc::{self, Receiver, Sender};

use bitflags::bitflags;
use bson::Document;

use crate::errors::DbError;

bitflags! {
    /// Flag word of a wire query.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: i32 {
        const TAILABLE_CURSOR = 0x02;
        const SLAVE_OK = 0x04;
        const NO_CURSOR_TIMEOUT = 0x10;
        const AWAIT_DATA = 0x20;
    }
}

bitflags! {
    /// Flag word of a wire reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResponseFlags: i32 {
        const CURSOR_NOT_FOUND = 0x01;
        const QUERY_ERROR = 0x02;
        const AWAIT_CAPABLE = 0x08;
    }
}

bitflags! {
    /// Flag word of an update notice.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: i32 {
        const UPSERT = 0x01;
        const MULTI_UPDATE = 0x02;
    }
}

bitflags! {
    /// Flag word of a delete notice.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeleteFlags: i32 {
        const SINGLE_REMOVE = 0x01;
    }
}

/// A fire-and-forget message. The server never replies to a notice; write
/// acknowledgment is obtained by following it with a `getLastError` request
/// in the same batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Insert {
        full_collection: String,
        documents: Vec<Document>,
    },
    Update {
        full_collection: String,
        flags: UpdateFlags,
        selector: Document,
        updater: Document,
    },
    Delete {
        full_collection: String,
        flags: DeleteFlags,
        selector: Document,
    },
    KillCursors {
        cursor_ids: Vec<i64>,
    },
}

/// A message that yields exactly one [`Reply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Query {
        flags: QueryFlags,
        full_collection: String,
        skip: i32,
        /// Wire `numberToReturn`: positive for a batch size, negative to
        /// close the cursor after a single batch of that many documents.
        batch_size: i32,
        selector: Document,
        projector: Document,
    },
    GetMore {
        full_collection: String,
        batch_size: i32,
        cursor_id: i64,
    },
}

/// A decoded reply.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub flags: ResponseFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

/// A pending reply: submitted with its request, observed at first use.
///
/// Forcing blocks the calling task until the framer fulfills the paired
/// [`ReplySlot`]; the connection serializes replies, so the value delivered
/// here is the reply to the request this promise was created for.
pub struct ReplyPromise {
    rx: Receiver<Result<Reply, DbError>>,
}

/// Producer half of a [`ReplyPromise`], held by the framer. Fulfill exactly
/// once; dropping it unfulfilled fails the promise with an I/O error.
pub struct ReplySlot {
    tx: Sender<Result<Reply, DbError>>,
}

impl ReplyPromise {
    /// Create a linked slot/promise pair.
    #[must_use]
    pub fn pair() -> (ReplySlot, ReplyPromise) {
        let (tx, rx) = mpsc::channel();
        (ReplySlot { tx }, ReplyPromise { rx })
    }

    /// Block until the reply arrives.
    pub fn wait(self) -> Result<Reply, DbError> {
        match self.rx.recv() {
            Ok(reply) => reply,
            Err(_) => Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before reply",
            ))),
        }
    }

    /// Non-blocking probe; `None` while the reply is still in flight.
    pub(crate) fn try_take(&self) -> Option<Result<Reply, DbError>> {
        self.rx.try_recv().ok()
    }
}

impl ReplySlot {
    /// Deliver the reply, or the I/O error that ended the exchange.
    pub fn fulfill(self, reply: Result<Reply, DbError>) {
        let _ = self.tx.send(reply);
    }
}

/// An ordered message channel to one server.
///
/// `call` transmits `notices` and `request` in a single batch; within one
/// connection, order of submission equals order of replies. Both operations
/// may be invoked from multiple tasks; the framer serializes transmission.
pub trait Connection: Send + Sync {
    /// Transmit notices without expecting a reply.
    fn send(&self, notices: &[Notice]) -> Result<(), DbError>;

    /// Transmit notices followed by a request, returning the pending reply.
    fn call(&self, notices: &[Notice], request: Request) -> Result<ReplyPromise, DbError>;
}
