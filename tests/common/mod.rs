#![allow(dead_code)]

//! In-memory wire endpoint for driver tests.
//!
//! Executes notices and requests against hash-map collections with just
//! enough server behavior to exercise the query, cursor, write, and command
//! paths: per-connection `getlasterror` state, server-side cursors honoring
//! the sign of `numberToReturn`, and the command subset the facade issues.
//! Every transmitted batch is recorded for wire-level assertions.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{doc, Bson, Document};
use md5::{Digest, Md5};
use parking_lot::Mutex;

use mongolite::errors::DbError;
use mongolite::wire::{
    Connection, DeleteFlags, Notice, Reply, ReplyPromise, Request, ResponseFlags, UpdateFlags,
};

const DEFAULT_BATCH: usize = 101;

/// One transmitted batch: zero or more notices plus an optional request.
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub notices: Vec<Notice>,
    pub request: Option<Request>,
}

struct ServerCursor {
    docs: Vec<Document>,
}

#[derive(Default)]
pub struct MockServer {
    collections: HashMap<String, Vec<Document>>,
    cursors: HashMap<i64, ServerCursor>,
    next_cursor_id: i64,
    last_error: Option<(i32, String)>,
    users: HashMap<String, String>,
    nonce: String,
    pub sent: Vec<SentBatch>,
}

impl MockServer {
    /// Preload a full collection, replacing its contents.
    pub fn seed(&mut self, full_collection: &str, docs: Vec<Document>) {
        self.collections.insert(full_collection.to_string(), docs);
    }

    /// Current contents of a collection.
    pub fn collection(&self, full_collection: &str) -> Vec<Document> {
        self.collections.get(full_collection).cloned().unwrap_or_default()
    }

    /// Register a user for the authenticate command.
    pub fn add_user(&mut self, db: &str, user: &str, password: &str) {
        let hash = hex::encode(Md5::digest(format!("{user}:mongo:{password}")));
        self.users.insert(format!("{db}.{user}"), hash);
    }

    /// Evict every server-side cursor, as the idle timeout would.
    pub fn expire_cursors(&mut self) {
        self.cursors.clear();
    }

    pub fn open_cursors(&self) -> usize {
        self.cursors.len()
    }

    fn apply_notice(&mut self, notice: &Notice) {
        match notice {
            Notice::Insert { full_collection, documents } => {
                for doc in documents {
                    let dup = match doc.get("_id") {
                        Some(id) => self
                            .collections
                            .get(full_collection)
                            .is_some_and(|coll| coll.iter().any(|d| d.get("_id") == Some(id))),
                        None => false,
                    };
                    if dup {
                        self.last_error = Some((
                            11000,
                            format!("E11000 duplicate key error index: {full_collection}.$_id_"),
                        ));
                    } else {
                        self.collections
                            .entry(full_collection.clone())
                            .or_default()
                            .push(doc.clone());
                    }
                }
            }
            Notice::Update { full_collection, flags, selector, updater } => {
                let multi = flags.contains(UpdateFlags::MULTI_UPDATE);
                let upsert = flags.contains(UpdateFlags::UPSERT);
                let coll = self.collections.entry(full_collection.clone()).or_default();
                let mut matched = false;
                for doc in coll.iter_mut() {
                    if matches(doc, selector) {
                        matched = true;
                        *doc = apply_update(doc, updater);
                        if !multi {
                            break;
                        }
                    }
                }
                if !matched && upsert {
                    let mut doc = updater.clone();
                    if doc.get("_id").is_none() {
                        if let Some(id) = selector.get("_id") {
                            doc.insert("_id", id.clone());
                        }
                    }
                    coll.push(doc);
                }
            }
            Notice::Delete { full_collection, flags, selector } => {
                let single = flags.contains(DeleteFlags::SINGLE_REMOVE);
                if let Some(coll) = self.collections.get_mut(full_collection) {
                    if single {
                        if let Some(pos) = coll.iter().position(|d| matches(d, selector)) {
                            coll.remove(pos);
                        }
                    } else {
                        coll.retain(|d| !matches(d, selector));
                    }
                }
            }
            Notice::KillCursors { cursor_ids } => {
                for id in cursor_ids {
                    self.cursors.remove(id);
                }
            }
        }
    }

    fn execute(&mut self, request: Request) -> Reply {
        match request {
            Request::Query { full_collection, skip, batch_size, selector, .. } => {
                if let Some(db) = full_collection.strip_suffix(".$cmd") {
                    let db = db.to_string();
                    return self.run_command(&db, &selector);
                }
                let (filter, sort, explain) = unwrap_envelope(&selector);
                let mut docs: Vec<Document> = self
                    .collections
                    .get(&full_collection)
                    .map(|coll| coll.iter().filter(|d| matches(d, &filter)).cloned().collect())
                    .unwrap_or_default();
                if !sort.is_empty() {
                    sort_docs(&mut docs, &sort);
                }
                let docs: Vec<Document> = docs.into_iter().skip(skip.max(0) as usize).collect();
                if explain {
                    return single_doc_reply(doc! {
                        "cursor": "BasicCursor",
                        "n": docs.len() as i64,
                        "millis": 0,
                    });
                }
                self.first_batch(docs, batch_size)
            }
            Request::GetMore { batch_size, cursor_id, .. } => {
                let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
                    return Reply {
                        flags: ResponseFlags::CURSOR_NOT_FOUND,
                        cursor_id,
                        starting_from: 0,
                        documents: Vec::new(),
                    };
                };
                let n = if batch_size == 0 { DEFAULT_BATCH } else { batch_size.unsigned_abs() as usize };
                let take = n.min(cursor.docs.len());
                let documents: Vec<Document> = cursor.docs.drain(..take).collect();
                let close = batch_size < 0 || cursor.docs.is_empty();
                if close {
                    self.cursors.remove(&cursor_id);
                }
                Reply {
                    flags: ResponseFlags::empty(),
                    cursor_id: if close { 0 } else { cursor_id },
                    starting_from: 0,
                    documents,
                }
            }
        }
    }

    /// First batch of a query result, allocating a server cursor when the
    /// result does not fit. A negative `numberToReturn` closes after one
    /// batch, discarding the remainder.
    fn first_batch(&mut self, mut docs: Vec<Document>, batch_size: i32) -> Reply {
        let single_batch = batch_size < 0;
        let n = if batch_size == 0 { DEFAULT_BATCH } else { batch_size.unsigned_abs() as usize };
        let take = n.min(docs.len());
        let rest = docs.split_off(take);
        let cursor_id = if single_batch || rest.is_empty() {
            0
        } else {
            self.next_cursor_id += 1;
            self.cursors.insert(self.next_cursor_id, ServerCursor { docs: rest });
            self.next_cursor_id
        };
        Reply { flags: ResponseFlags::empty(), cursor_id, starting_from: 0, documents: docs }
    }

    fn run_command(&mut self, db: &str, cmd: &Document) -> Reply {
        let Some(name) = cmd.keys().next() else {
            return single_doc_reply(doc! {"ok": 0, "errmsg": "empty command"});
        };
        match name.as_str() {
            "getlasterror" => {
                let doc = match self.last_error.take() {
                    Some((code, msg)) => doc! {"err": msg, "code": code, "ok": 1},
                    None => doc! {"err": Bson::Null, "n": 0, "ok": 1},
                };
                single_doc_reply(doc)
            }
            "count" => {
                let coll = cmd.get_str("count").unwrap_or_default();
                let filter = cmd.get_document("query").cloned().unwrap_or_default();
                let skip = number(cmd, "skip").unwrap_or(0).max(0) as usize;
                let full = format!("{db}.{coll}");
                let mut n = self
                    .collections
                    .get(&full)
                    .map_or(0, |c| c.iter().filter(|d| matches(d, &filter)).count());
                n = n.saturating_sub(skip);
                if let Some(limit) = number(cmd, "limit") {
                    n = n.min(limit.max(0) as usize);
                }
                single_doc_reply(doc! {"n": n as i64, "ok": 1})
            }
            "distinct" => {
                let coll = cmd.get_str("distinct").unwrap_or_default();
                let key = cmd.get_str("key").unwrap_or_default();
                let filter = cmd.get_document("query").cloned().unwrap_or_default();
                let full = format!("{db}.{coll}");
                let mut values: Vec<Bson> = Vec::new();
                if let Some(coll) = self.collections.get(&full) {
                    for doc in coll.iter().filter(|d| matches(d, &filter)) {
                        if let Some(v) = doc.get(key) {
                            if !values.contains(v) {
                                values.push(v.clone());
                            }
                        }
                    }
                }
                single_doc_reply(doc! {"values": values, "ok": 1})
            }
            "getnonce" => {
                self.nonce = "2375531c32080ae8".to_string();
                single_doc_reply(doc! {"nonce": self.nonce.clone(), "ok": 1})
            }
            "authenticate" => {
                let user = cmd.get_str("user").unwrap_or_default();
                let key = cmd.get_str("key").unwrap_or_default();
                let nonce = cmd.get_str("nonce").unwrap_or_default();
                let expected = self.users.get(&format!("{db}.{user}")).map(|hash| {
                    hex::encode(Md5::digest(format!("{nonce}{user}{hash}")))
                });
                if nonce == self.nonce && expected.as_deref() == Some(key) {
                    single_doc_reply(doc! {"ok": 1})
                } else {
                    single_doc_reply(doc! {"ok": 0, "errmsg": "auth fails"})
                }
            }
            "listDatabases" => {
                let mut names: Vec<&str> = self
                    .collections
                    .keys()
                    .filter_map(|full| full.split('.').next())
                    .collect();
                names.sort_unstable();
                names.dedup();
                let databases: Vec<Bson> = names
                    .into_iter()
                    .map(|name| Bson::Document(doc! {"name": name, "empty": false}))
                    .collect();
                single_doc_reply(doc! {"databases": databases, "ok": 1})
            }
            "buildinfo" => single_doc_reply(doc! {"version": "2.4.10", "ok": 1}),
            "drop" => {
                let coll = cmd.get_str("drop").unwrap_or_default();
                let existed = self.collections.remove(&format!("{db}.{coll}")).is_some();
                if existed {
                    single_doc_reply(doc! {"ok": 1})
                } else {
                    single_doc_reply(doc! {"ok": 0, "errmsg": "ns not found"})
                }
            }
            "dropDatabase" => {
                let prefix = format!("{db}.");
                self.collections.retain(|full, _| !full.starts_with(&prefix));
                single_doc_reply(doc! {"dropped": db, "ok": 1})
            }
            "deleteIndexes" => single_doc_reply(doc! {"nIndexesWas": 1, "ok": 1}),
            "$eval" => {
                let retval = match cmd.get("$eval") {
                    Some(Bson::JavaScriptCode(code)) => Bson::String(code.clone()),
                    other => other.cloned().unwrap_or(Bson::Null),
                };
                single_doc_reply(doc! {"retval": retval, "ok": 1})
            }
            "group" => {
                let Ok(g) = cmd.get_document("group") else {
                    return single_doc_reply(doc! {"ok": 0, "errmsg": "group spec missing"});
                };
                let ns = g.get_str("ns").unwrap_or_default();
                let cond = g.get_document("cond").cloned().unwrap_or_default();
                let initial = g.get_document("initial").cloned().unwrap_or_default();
                let key_fields: Vec<String> = g
                    .get_document("key")
                    .map(|k| k.keys().cloned().collect())
                    .unwrap_or_default();
                let full = format!("{db}.{ns}");
                // One row per distinct key projection, merged with initial.
                let mut rows: Vec<Document> = Vec::new();
                if let Some(coll) = self.collections.get(&full) {
                    for doc in coll.iter().filter(|d| matches(d, &cond)) {
                        let mut row = Document::new();
                        for f in &key_fields {
                            if let Some(v) = doc.get(f) {
                                row.insert(f.clone(), v.clone());
                            }
                        }
                        for (k, v) in &initial {
                            row.insert(k.clone(), v.clone());
                        }
                        if !rows.contains(&row) {
                            rows.push(row);
                        }
                    }
                }
                let count = rows.len() as i64;
                let retval: Vec<Bson> = rows.into_iter().map(Bson::Document).collect();
                single_doc_reply(doc! {"retval": retval, "count": count, "ok": 1})
            }
            "mapreduce" => {
                let coll = cmd.get_str("mapreduce").unwrap_or_default();
                let map = match cmd.get("map") {
                    Some(Bson::JavaScriptCode(code)) => code.clone(),
                    _ => String::new(),
                };
                if map.contains("fail") {
                    return single_doc_reply(doc! {"ok": 0, "errmsg": "JS compile error"});
                }
                let out = cmd
                    .get_str("out")
                    .map(str::to_string)
                    .unwrap_or_else(|_| format!("tmp.mr.{coll}_1"));
                let filter = cmd.get_document("query").cloned().unwrap_or_default();
                let source = self.collection(&format!("{db}.{coll}"));
                let results: Vec<Document> =
                    source.into_iter().filter(|d| matches(d, &filter)).collect();
                let count = results.len() as i64;
                self.collections.insert(format!("{db}.{out}"), results);
                single_doc_reply(doc! {
                    "result": out,
                    "counts": {"input": count, "output": count},
                    "ok": 1,
                })
            }
            other => single_doc_reply(doc! {"ok": 0, "errmsg": format!("no such cmd: {other}")}),
        }
    }
}

/// Shared handle implementing the driver's `Connection` seam; every request
/// is executed synchronously and its promise fulfilled immediately.
pub struct MockConnection {
    server: Arc<Mutex<MockServer>>,
}

impl MockConnection {
    pub fn new() -> (Arc<MockConnection>, Arc<Mutex<MockServer>>) {
        let server = Arc::new(Mutex::new(MockServer::default()));
        (Arc::new(MockConnection { server: Arc::clone(&server) }), server)
    }
}

impl Connection for MockConnection {
    fn send(&self, notices: &[Notice]) -> Result<(), DbError> {
        let mut srv = self.server.lock();
        srv.sent.push(SentBatch { notices: notices.to_vec(), request: None });
        for notice in notices {
            srv.apply_notice(notice);
        }
        Ok(())
    }

    fn call(&self, notices: &[Notice], request: Request) -> Result<ReplyPromise, DbError> {
        let mut srv = self.server.lock();
        srv.sent.push(SentBatch { notices: notices.to_vec(), request: Some(request.clone()) });
        for notice in notices {
            srv.apply_notice(notice);
        }
        let reply = srv.execute(request);
        let (slot, promise) = ReplyPromise::pair();
        slot.fulfill(Ok(reply));
        Ok(promise)
    }
}

/// Connection that replays a fixed list of replies, for protocol edge cases
/// the well-behaved mock server never produces.
pub struct ScriptedConnection {
    replies: Mutex<Vec<Reply>>,
}

impl ScriptedConnection {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self { replies: Mutex::new(replies) })
    }
}

impl Connection for ScriptedConnection {
    fn send(&self, _notices: &[Notice]) -> Result<(), DbError> {
        Ok(())
    }

    fn call(&self, _notices: &[Notice], _request: Request) -> Result<ReplyPromise, DbError> {
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            return Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "reply script exhausted",
            )));
        }
        let reply = replies.remove(0);
        let (slot, promise) = ReplyPromise::pair();
        slot.fulfill(Ok(reply));
        Ok(promise)
    }
}

fn single_doc_reply(doc: Document) -> Reply {
    Reply {
        flags: ResponseFlags::AWAIT_CAPABLE,
        cursor_id: 0,
        starting_from: 0,
        documents: vec![doc],
    }
}

fn unwrap_envelope(selector: &Document) -> (Document, Document, bool) {
    match selector.get_document("$query") {
        Ok(filter) => {
            let sort = selector.get_document("$orderby").cloned().unwrap_or_default();
            let explain = selector.get_bool("$explain").unwrap_or(false);
            (filter.clone(), sort, explain)
        }
        Err(_) => (selector.clone(), Document::new(), false),
    }
}

/// Equality match on every selector field.
fn matches(doc: &Document, selector: &Document) -> bool {
    selector.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn number(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn apply_update(current: &Document, updater: &Document) -> Document {
    if let Ok(set) = updater.get_document("$set") {
        let mut out = current.clone();
        for (k, v) in set {
            out.insert(k.clone(), v.clone());
        }
        return out;
    }
    // Whole-document replace keeps the matched _id.
    let mut out = updater.clone();
    if out.get("_id").is_none() {
        if let Some(id) = current.get("_id") {
            let mut with_id = doc! {"_id": id.clone()};
            with_id.extend(out);
            out = with_id;
        }
    }
    out
}

fn cmp_bson(a: &Bson, b: &Bson) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Double(x), Bson::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn sort_docs(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, dir) in sort {
            let ord = match (a.get(field), b.get(field)) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => cmp_bson(x, y),
            };
            if ord != std::cmp::Ordering::Equal {
                let descending = matches!(dir, Bson::Int32(d) if *d < 0)
                    || matches!(dir, Bson::Int64(d) if *d < 0)
                    || matches!(dir, Bson::Double(d) if *d < 0.0);
                return if descending { ord.reverse() } else { ord };
            }
        }
        std::cmp::Ordering::Equal
    });
}
