//! Database administration helpers.

use bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::command::true1;
use crate::errors::DbError;
use crate::query::{query, Query};
use crate::session::Session;

/// An index over one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub coll: String,
    pub key: Document,
    pub name: String,
    pub unique: bool,
    pub drop_dups: bool,
}

impl Index {
    /// Index on `key` with the conventional derived name.
    #[must_use]
    pub fn on(coll: &str, key: Document) -> Self {
        let name = index_name(&key);
        Self { coll: coll.to_string(), key, name, unique: false, drop_dups: false }
    }
}

/// Conventional index name: key fields joined with their directions,
/// e.g. `{x: 1, y: -1}` becomes `"x_1_y_-1"`.
#[must_use]
pub fn index_name(key: &Document) -> String {
    key.iter()
        .map(|(field, dir)| match dir {
            Bson::Int32(d) => format!("{field}_{d}"),
            Bson::Int64(d) => format!("{field}_{d}"),
            Bson::Double(d) => format!("{field}_{d}"),
            other => format!("{field}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

impl Session {
    /// Names of all databases on the server.
    pub fn all_databases(&self) -> Result<Vec<String>, DbError> {
        let reply = self.use_db("admin", |admin| admin.run_command1("listDatabases"))?;
        let dbs = reply
            .get_array("databases")
            .expect("listDatabases reply carried no databases array");
        Ok(dbs
            .iter()
            .filter_map(|entry| entry.as_document())
            .filter_map(|entry| entry.get_str("name").ok())
            .map(str::to_string)
            .collect())
    }

    /// Names of all collections in the ambient database.
    ///
    /// Internal `$`-namespaces are filtered out, with the single exception
    /// of the replication oplog `local.oplog.$main`.
    pub fn all_collections(&self) -> Result<Vec<String>, DbError> {
        let q = Query { sort: doc! {"name": 1}, ..query(Document::new(), "system.namespaces") };
        let cursor = self.find(q)?;
        let prefix = format!("{}.", self.database);
        let mut names = Vec::new();
        for doc in cursor.rest()? {
            let full = doc.get_str("name").unwrap_or_default();
            let Some(name) = full.strip_prefix(&prefix) else { continue };
            if !name.contains('$') || full == "local.oplog.$main" {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Create an index by writing its spec into `system.indexes`.
    pub fn create_index(&self, idx: &Index) -> Result<(), DbError> {
        let spec = doc! {
            "ns": self.full_collection(&idx.coll),
            "key": idx.key.clone(),
            "name": idx.name.clone(),
            "unique": idx.unique,
            "dropDups": idx.drop_dups,
        };
        self.insert("system.indexes", spec).map(|_| ())
    }

    /// Drop one index by name; false when the server refused.
    pub fn drop_index(&self, coll: &str, name: &str) -> Result<bool, DbError> {
        let reply = self.run_command(doc! {"deleteIndexes": coll, "index": name})?;
        Ok(true1(&reply, "ok"))
    }

    /// Drop every index on `coll` except the `_id` index.
    pub fn drop_indexes(&self, coll: &str) -> Result<bool, DbError> {
        self.drop_index(coll, "*")
    }

    /// Drop a collection; false when it did not exist.
    pub fn drop_collection(&self, coll: &str) -> Result<bool, DbError> {
        let reply = self.run_command(doc! {"drop": coll})?;
        Ok(true1(&reply, "ok"))
    }

    /// Drop the ambient database.
    pub fn drop_database(&self) -> Result<(), DbError> {
        self.run_command(doc! {"dropDatabase": 1}).map(|_| ())
    }

    /// Server version string, from `buildinfo`.
    pub fn server_version(&self) -> Result<String, DbError> {
        let reply = self.use_db("admin", |admin| admin.run_command1("buildinfo"))?;
        Ok(reply
            .get_str("version")
            .expect("buildinfo reply carried no version")
            .to_string())
    }
}
