//! Query descriptions and their folding into wire requests.

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::session::ReadPreference;
use crate::wire::{QueryFlags, Request};

/// Cursor behavior toggles carried on a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOption {
    /// Leave the cursor open after the last batch (capped collections).
    TailableCursor,
    /// Disable the server's idle-cursor eviction (roughly ten minutes).
    NoCursorTimeout,
    /// Block briefly at the end of a tailable cursor instead of returning
    /// an empty batch.
    AwaitData,
}

fn option_flag(option: QueryOption) -> QueryFlags {
    match option {
        QueryOption::TailableCursor => QueryFlags::TAILABLE_CURSOR,
        QueryOption::NoCursorTimeout => QueryFlags::NO_CURSOR_TIMEOUT,
        QueryOption::AwaitData => QueryFlags::AWAIT_DATA,
    }
}

/// A filter aimed at one collection. An empty selector matches everything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub selector: Document,
    pub coll: String,
}

/// Shorthand for building a [`Selection`].
#[must_use]
pub fn select(selector: Document, coll: &str) -> Selection {
    Selection { selector, coll: coll.to_string() }
}

/// A full query description.
///
/// `limit` of 0 means unlimited; `batch_size` of 0 asks for the server
/// default. Empty `projection`, `sort`, and `hint` documents mean "all
/// fields", "no order", and "no hint".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub options: Vec<QueryOption>,
    pub selection: Selection,
    pub projection: Document,
    pub skip: u32,
    pub limit: u32,
    pub sort: Document,
    pub snapshot: bool,
    pub batch_size: u32,
    pub hint: Document,
}

impl Query {
    /// Query with every modifier at its default.
    #[must_use]
    pub fn new(selection: Selection) -> Self {
        Self {
            options: Vec::new(),
            selection,
            projection: Document::new(),
            skip: 0,
            limit: 0,
            sort: Document::new(),
            snapshot: false,
            batch_size: 0,
            hint: Document::new(),
        }
    }
}

impl From<Selection> for Query {
    fn from(selection: Selection) -> Self {
        Self::new(selection)
    }
}

/// Shorthand for `Query::new(select(selector, coll))`.
#[must_use]
pub fn query(selector: Document, coll: &str) -> Query {
    Query::new(select(selector, coll))
}

/// Reconcile the user-facing batch size and limit into the wire
/// `numberToReturn` plus the limit to carry into follow-up `GetMore`s.
///
/// A batch size of exactly 1 is sent as 2: the server reads a wire value of
/// -1 as "limit one and close", so 1 can never go out on the wire. When the
/// limit caps the result, the wire batch is the negated limit, which tells
/// the server to close the cursor after a single batch; the remaining limit
/// of 1 is a sentinel that is never consulted because the server closes.
pub(crate) fn batch_size_remaining_limit(batch_size: u32, limit: u32) -> (i32, u32) {
    let bs = if batch_size == 1 { 2 } else { batch_size };
    if limit == 0 {
        (bs as i32, 0)
    } else if 0 < bs && bs < limit {
        (bs as i32, limit - bs)
    } else {
        (-(limit as i32), 1)
    }
}

/// Wrap the selector in a `$query` envelope when any modifier is active.
fn special_selector(q: &Query, is_explain: bool) -> Document {
    let special = !q.sort.is_empty() || q.snapshot || !q.hint.is_empty() || is_explain;
    if !special {
        return q.selection.selector.clone();
    }
    let mut doc = Document::new();
    doc.insert("$query", q.selection.selector.clone());
    if !q.sort.is_empty() {
        doc.insert("$orderby", q.sort.clone());
    }
    if q.snapshot {
        doc.insert("$snapshot", true);
    }
    if !q.hint.is_empty() {
        doc.insert("$hint", q.hint.clone());
    }
    if is_explain {
        doc.insert("$explain", true);
    }
    doc
}

/// Fold a [`Query`] into its wire request, returning the remaining limit to
/// carry into the cursor.
pub(crate) fn build_query_request(
    is_explain: bool,
    read_preference: ReadPreference,
    database: &str,
    q: &Query,
) -> (Request, u32) {
    let mut flags = q
        .options
        .iter()
        .copied()
        .map(option_flag)
        .fold(QueryFlags::empty(), |acc, f| acc | f);
    if read_preference == ReadPreference::SlaveOk {
        flags |= QueryFlags::SLAVE_OK;
    }
    let (wire_batch, remaining_limit) = batch_size_remaining_limit(q.batch_size, q.limit);
    let request = Request::Query {
        flags,
        full_collection: format!("{}.{}", database, q.selection.coll),
        skip: q.skip as i32,
        batch_size: wire_batch,
        selector: special_selector(q, is_explain),
        projector: q.projection.clone(),
    };
    (request, remaining_limit)
}
