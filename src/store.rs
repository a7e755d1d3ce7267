//! Document stores.
//!
//! Entities are persisted as JSON documents keyed by their identifier within a
//! named collection. Two stores are provided: [`MemoryStore`] for transient
//! sessions and tests, and [`SqliteStore`] which keeps every collection in a
//! single SQLite table and filters on the stored JSON with `json_extract`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifier::Identifier;
use crate::variable::NameHasher;

// ------------- Filter -------------
/// Conjunction of key equalities on top-level document fields.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document.
    pub fn all() -> Self {
        Self::default()
    }
    pub fn eq(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((key.to_string(), value.into()));
        self
    }
    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }
    pub fn matches(&self, document: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| document.get(key).is_some_and(|actual| actual == expected))
    }
}

// ------------- Sort -------------
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Sort {
    keys: Vec<(String, bool)>,
}

impl Sort {
    pub fn ascending(key: &str) -> Self {
        Self {
            keys: vec![(key.to_string(), true)],
        }
    }
    pub fn descending(key: &str) -> Self {
        Self {
            keys: vec![(key.to_string(), false)],
        }
    }
    pub fn then_ascending(mut self, key: &str) -> Self {
        self.keys.push((key.to_string(), true));
        self
    }
    pub fn keys(&self) -> &[(String, bool)] {
        &self.keys
    }
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (key, ascending) in &self.keys {
            let ordering = compare_values(a.get(key), b.get(key));
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

// Missing and null sort first, then booleans, numbers and strings, as SQLite does.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    fn numeric(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }
    match (a, b) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(a) == 1 && rank(b) == 1 => {
            numeric(x).partial_cmp(&numeric(y)).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

// ------------- DocumentStore -------------
pub trait DocumentStore {
    /// Inserts the document, or replaces the one stored under the same id.
    fn upsert(&mut self, collection: &str, id: &Identifier, document: &Value) -> Result<()>;
    /// Documents of the collection matching the filter. Without a sort they
    /// come back in identifier order.
    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> Result<Vec<Value>>;
    fn find_by_id(&self, collection: &str, id: &Identifier) -> Result<Option<Value>>;
    /// Returns whether a document was removed.
    fn remove(&mut self, collection: &str, id: &Identifier) -> Result<bool>;
}

// ------------- MemoryStore -------------
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, BTreeMap<Identifier, Value>, NameHasher>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }
}

impl DocumentStore for MemoryStore {
    fn upsert(&mut self, collection: &str, id: &Identifier, document: &Value) -> Result<()> {
        trace!(collection, %id, "memory upsert");
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(*id, document.clone());
        Ok(())
    }
    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> Result<Vec<Value>> {
        let mut found: Vec<Value> = self
            .collections
            .get(collection)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|document| filter.matches(document))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            found.sort_by(|a, b| sort.compare(a, b));
        }
        Ok(found)
    }
    fn find_by_id(&self, collection: &str, id: &Identifier) -> Result<Option<Value>> {
        Ok(self.collections.get(collection).and_then(|c| c.get(id)).cloned())
    }
    fn remove(&mut self, collection: &str, id: &Identifier) -> Result<bool> {
        Ok(self
            .collections
            .get_mut(collection)
            .is_some_and(|c| c.remove(id).is_some()))
    }
}

// ------------- SqliteStore -------------
#[derive(Debug)]
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }
    fn with_connection(db: Connection) -> Result<Self> {
        db.execute_batch(
            "
            create table if not exists Document (
                Collection text not null,
                Document_Identity text not null,
                Body text not null,
                constraint unique_and_referenceable_Document primary key (
                    Collection,
                    Document_Identity
                )
            );
            ",
        )?;
        Ok(Self { db })
    }
    fn path(key: &str) -> String {
        format!("$.\"{}\"", key.replace('"', "\\\""))
    }
}

impl DocumentStore for SqliteStore {
    fn upsert(&mut self, collection: &str, id: &Identifier, document: &Value) -> Result<()> {
        let body = serde_json::to_string(document)?;
        let mut upsert = self.db.prepare_cached(
            "
            insert into Document (
                Collection,
                Document_Identity,
                Body
            ) values (?, ?, ?)
            on conflict (Collection, Document_Identity) do update set Body = excluded.Body
            ",
        )?;
        upsert.execute(params![collection, id.to_hex(), body])?;
        debug!(collection, %id, "document upserted");
        Ok(())
    }
    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> Result<Vec<Value>> {
        let mut sql = String::from("select Body from Document where Collection = ?");
        let mut arguments = vec![collection.to_string()];
        for (key, value) in filter.conditions() {
            sql.push_str(" and json_extract(Body, ?) = json_extract(?, '$')");
            arguments.push(Self::path(key));
            arguments.push(serde_json::to_string(value)?);
        }
        sql.push_str(" order by ");
        if let Some(sort) = sort {
            for (key, ascending) in sort.keys() {
                sql.push_str(if *ascending {
                    "json_extract(Body, ?) asc, "
                } else {
                    "json_extract(Body, ?) desc, "
                });
                arguments.push(Self::path(key));
            }
        }
        sql.push_str("Document_Identity");
        let mut find = self.db.prepare_cached(&sql)?;
        let bodies = find
            .query_map(params_from_iter(arguments.iter()), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        debug!(collection, found = bodies.len(), "documents found");
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(Into::into))
            .collect()
    }
    fn find_by_id(&self, collection: &str, id: &Identifier) -> Result<Option<Value>> {
        let mut get = self.db.prepare_cached(
            "
            select Body
                from Document
                where Collection = ? and Document_Identity = ?
            ",
        )?;
        let body: Option<String> = get
            .query_row(params![collection, id.to_hex()], |row| row.get(0))
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }
    fn remove(&mut self, collection: &str, id: &Identifier) -> Result<bool> {
        let mut remove = self
            .db
            .prepare_cached("delete from Document where Collection = ? and Document_Identity = ?")?;
        Ok(remove.execute(params![collection, id.to_hex()])? > 0)
    }
}
