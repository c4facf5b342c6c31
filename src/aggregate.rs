//! Group and map-reduce, encoded as command documents.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::command::true1;
use crate::cursor::Cursor;
use crate::errors::DbError;
use crate::query::query;
use crate::session::Session;

/// Server-side JavaScript source.
pub type Javascript = String;

/// Grouping key: either named document fields or a key-extraction function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupKey {
    Fields(Vec<String>),
    KeyF(Javascript),
}

/// Configuration for the `group` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub coll: String,
    pub key: GroupKey,
    pub reduce: Javascript,
    pub initial: Document,
    /// Filter applied before grouping; empty selects everything.
    pub cond: Document,
    pub finalize: Option<Javascript>,
}

impl Group {
    fn document(&self) -> Document {
        let mut g = Document::new();
        if let Some(f) = &self.finalize {
            g.insert("finalize", Bson::JavaScriptCode(f.clone()));
        }
        g.insert("ns", self.coll.clone());
        match &self.key {
            GroupKey::Fields(fields) => {
                let mut key = Document::new();
                for f in fields {
                    key.insert(f.clone(), true);
                }
                g.insert("key", key);
            }
            GroupKey::KeyF(js) => {
                g.insert("$keyf", Bson::JavaScriptCode(js.clone()));
            }
        }
        g.insert("$reduce", Bson::JavaScriptCode(self.reduce.clone()));
        g.insert("initial", self.initial.clone());
        g.insert("cond", self.cond.clone());
        g
    }
}

/// Configuration for the `mapreduce` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapReduce {
    pub coll: String,
    pub map: Javascript,
    pub reduce: Javascript,
    /// Filter applied before mapping; empty selects everything.
    pub selector: Document,
    pub sort: Document,
    pub limit: u32,
    /// Output collection; the server picks a temporary one when absent.
    pub out: Option<String>,
    pub keep_temp: bool,
    pub finalize: Option<Javascript>,
    pub scope: Document,
    pub verbose: bool,
}

impl MapReduce {
    /// Map-reduce over `coll` with everything else defaulted.
    #[must_use]
    pub fn new(coll: &str, map: Javascript, reduce: Javascript) -> Self {
        Self {
            coll: coll.to_string(),
            map,
            reduce,
            selector: Document::new(),
            sort: Document::new(),
            limit: 0,
            out: None,
            keep_temp: false,
            finalize: None,
            scope: Document::new(),
            verbose: false,
        }
    }

    fn document(&self) -> Document {
        let mut cmd = doc! { "mapreduce": self.coll.clone() };
        if let Some(out) = &self.out {
            cmd.insert("out", out.clone());
        }
        if let Some(f) = &self.finalize {
            cmd.insert("finalize", Bson::JavaScriptCode(f.clone()));
        }
        cmd.insert("map", Bson::JavaScriptCode(self.map.clone()));
        cmd.insert("reduce", Bson::JavaScriptCode(self.reduce.clone()));
        cmd.insert("query", self.selector.clone());
        cmd.insert("sort", self.sort.clone());
        cmd.insert("limit", self.limit as i32);
        cmd.insert("keeptemp", self.keep_temp);
        cmd.insert("scope", self.scope.clone());
        cmd.insert("verbose", self.verbose);
        cmd
    }
}

impl Session {
    /// Run a group command, returning its `retval` rows.
    pub fn group(&self, g: &Group) -> Result<Vec<Document>, DbError> {
        let reply = self.run_command(doc! { "group": g.document() })?;
        let rows = reply.get_array("retval").expect("group reply carried no retval array");
        Ok(rows
            .iter()
            .map(|row| row.as_document().expect("group retval row is not a document").clone())
            .collect())
    }

    /// Run map-reduce, returning the server's result summary document.
    ///
    /// Panics with the server's `errmsg` when the job is rejected; a
    /// rejected job means the configuration itself is bad.
    pub fn run_mr_doc(&self, mr: &MapReduce) -> Result<Document, DbError> {
        let reply = self.run_command(mr.document())?;
        assert!(
            true1(&reply, "ok"),
            "mapreduce failed: {}",
            reply.get_str("errmsg").unwrap_or("unknown error")
        );
        Ok(reply)
    }

    /// Run map-reduce and open a cursor over its output collection.
    ///
    /// Temporary output collections are left for the server to reap; the
    /// client does not delete them.
    pub fn run_mr(&self, mr: &MapReduce) -> Result<Cursor, DbError> {
        let reply = self.run_mr_doc(mr)?;
        let out = reply
            .get_str("result")
            .expect("mapreduce reply carried no result collection")
            .to_string();
        self.find(query(Document::new(), &out))
    }
}
