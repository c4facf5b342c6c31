//! One-shot commands over the `"$cmd"` collection.

use bson::{doc, Bson, Document};

use crate::cursor::reply_to_state;
use crate::errors::DbError;
use crate::query::{build_query_request, select, Query, Selection};
use crate::session::Session;

impl Session {
    /// Run a database command, e.g. `doc! {"count": "posts"}`.
    ///
    /// Commands always produce a reply document; a missing one means client
    /// and server disagree about the protocol, which panics.
    pub fn run_command(&self, cmd: Document) -> Result<Document, DbError> {
        let name = cmd.keys().next().cloned().unwrap_or_default();
        let q = Query { limit: 1, ..Query::new(select(cmd, "$cmd")) };
        let reply = self.find_one(q)?;
        Ok(reply.unwrap_or_else(|| panic!("command {name:?} returned no reply document")))
    }

    /// Run the no-argument command `name`.
    pub fn run_command1(&self, name: &str) -> Result<Document, DbError> {
        let mut cmd = Document::new();
        cmd.insert(name, 1);
        self.run_command(cmd)
    }

    /// First matching document, if any.
    pub fn find_one(&self, q: Query) -> Result<Option<Document>, DbError> {
        let cursor = self.find(Query { limit: 1, ..q })?;
        cursor.next()
    }

    /// Like [`find_one`](Self::find_one), but asks the server for the query
    /// plan instead of running the query.
    pub fn explain(&self, q: Query) -> Result<Document, DbError> {
        let q = Query { limit: 1, ..q };
        let (request, remaining_limit) =
            build_query_request(true, self.read_preference, &self.database, &q);
        let reply = self.conn.call(&[], request)?.wait()?;
        let mut state = reply_to_state(reply, remaining_limit)?;
        Ok(state.pending.pop_front().expect("explain returned no plan document"))
    }

    /// Count documents matching the query's selection, honoring skip and
    /// limit. A limit of 0 is not sent.
    pub fn count(&self, q: &Query) -> Result<i64, DbError> {
        let mut cmd = doc! {
            "count": q.selection.coll.clone(),
            "query": q.selection.selector.clone(),
            "skip": q.skip as i32,
        };
        if q.limit != 0 {
            cmd.insert("limit", q.limit as i32);
        }
        let reply = self.run_command(cmd)?;
        Ok(number_field(&reply, "n").expect("count reply carried no numeric n"))
    }

    /// Distinct values of `key` over documents matching `sel`.
    pub fn distinct(&self, key: &str, sel: Selection) -> Result<Vec<Bson>, DbError> {
        let reply = self.run_command(doc! {
            "distinct": sel.coll,
            "key": key,
            "query": sel.selector,
        })?;
        Ok(reply
            .get_array("values")
            .expect("distinct reply carried no values array")
            .clone())
    }

    /// Run JavaScript on the server, returning its `retval`.
    pub fn eval(&self, code: &str) -> Result<Bson, DbError> {
        let reply = self.run_command(doc! { "$eval": Bson::JavaScriptCode(code.to_string()) })?;
        Ok(reply.get("retval").expect("eval reply carried no retval").clone())
    }
}

/// Read a numeric field at any BSON width.
pub(crate) fn number_field(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

/// True when `key` holds the server's idea of truth: `1` or `true`.
pub(crate) fn true1(doc: &Document, key: &str) -> bool {
    match doc.get(key) {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(b)) => *b,
        _ => false,
    }
}
