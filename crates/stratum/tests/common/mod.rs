#![allow(dead_code)] // each test binary uses a different fixture subset

//! In-memory fake driver and shared schema fixtures.
//!
//! The fake executes the exact statement shapes the engine generates for
//! single-table types: selects by key predicate, inserts (with
//! RETURNING-generated keys), updates and deletes. Rows live in a plain
//! table-name -> row-list store shared between connections, so two
//! engines over the same store behave like two processes over one
//! database.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use stratum::{
    ColumnSpec, Connection, Driver, Error, PropertyDescriptor, Result, Row, SchemaRegistry,
    SqlType, StorageErrorKind, TableDescriptor, TypeDescriptor, Value,
};

type StoredRow = HashMap<String, Value>;

#[derive(Default)]
pub struct FakeStore {
    tables: Mutex<HashMap<String, Vec<StoredRow>>>,
    /// Errors injected ahead of upcoming selects.
    select_failures: Mutex<VecDeque<(StorageErrorKind, bool)>>,
    select_count: AtomicUsize,
    statement_log: Mutex<Vec<String>>,
    next_key: AtomicI64,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_key: AtomicI64::new(1000),
            ..Self::default()
        })
    }

    /// Seed a table with rows.
    pub fn seed(&self, table: &str, rows: Vec<Vec<(&str, Value)>>) {
        let mut tables = self.tables.lock();
        let entry = tables.entry(table.to_string()).or_default();
        for row in rows {
            entry.push(row.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        }
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, table: &str) -> Vec<StoredRow> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Overwrite one column of every row matching `key`.
    pub fn patch(&self, table: &str, key: (&str, Value), set: (&str, Value)) {
        let mut tables = self.tables.lock();
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut() {
                if row.get(key.0) == Some(&key.1) {
                    row.insert(set.0.to_string(), set.1.clone());
                }
            }
        }
    }

    /// Number of SELECTs executed so far.
    pub fn select_count(&self) -> usize {
        self.select_count.load(Ordering::SeqCst)
    }

    /// All non-select statements executed, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statement_log.lock().clone()
    }

    /// Fail the next `n` selects with the given storage error kind.
    pub fn fail_next_selects(&self, n: usize, kind: StorageErrorKind, transient: bool) {
        let mut failures = self.select_failures.lock();
        for _ in 0..n {
            failures.push_back((kind, transient));
        }
    }
}

pub struct FakeDriver {
    store: Arc<FakeStore>,
}

impl FakeDriver {
    pub fn new(store: Arc<FakeStore>) -> Self {
        Self { store }
    }
}

impl Driver for FakeDriver {
    fn acquire(&self, _data_source: &str) -> Result<Box<dyn Connection>> {
        Ok(Box::new(FakeConnection {
            store: Arc::clone(&self.store),
        }))
    }
}

struct FakeConnection {
    store: Arc<FakeStore>,
}

/// First double-quoted identifier in a fragment.
fn ident(fragment: &str) -> String {
    fragment
        .split('"')
        .nth(1)
        .unwrap_or_default()
        .to_string()
}

/// Bind-parameter index in a fragment like `"col" = $3`.
fn param_index(fragment: &str) -> Option<usize> {
    let dollar = fragment.find('$')?;
    let digits: String = fragment[dollar + 1..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Parse `"a" = $1 AND "b" = $2` into (column, param index) pairs.
fn parse_terms(clause: &str) -> Vec<(String, usize)> {
    clause
        .split(" AND ")
        .filter_map(|term| {
            let col = ident(term);
            param_index(term).map(|ix| (col, ix))
        })
        .collect()
}

fn row_matches(row: &StoredRow, terms: &[(String, usize)], params: &[Value]) -> bool {
    terms.iter().all(|(col, ix)| {
        let bound = params.get(ix - 1).cloned().unwrap_or(Value::Null);
        row.get(col).cloned().unwrap_or(Value::Null) == bound
    })
}

fn sort_key(value: &Value) -> String {
    format!("{value:?}")
}

impl Connection for FakeConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if let Some((kind, transient)) = self.store.select_failures.lock().pop_front() {
            self.store.select_count.fetch_add(1, Ordering::SeqCst);
            return Err(Error::storage(kind, "injected select failure", transient));
        }
        self.store.select_count.fetch_add(1, Ordering::SeqCst);

        let body = sql.strip_prefix("SELECT ").expect("select statement");
        let (select_list, rest) = body.split_once(" FROM ").expect("FROM clause");
        let columns: Vec<String> = select_list.split(", ").map(ident).collect();

        // peel trailing clauses off in reverse order
        let mut tail = rest.to_string();
        let mut offset = 0usize;
        let mut limit = usize::MAX;
        if let Some(ix) = tail.find(" OFFSET ") {
            offset = tail[ix + 8..].trim().parse().unwrap_or(0);
            tail.truncate(ix);
        }
        if let Some(ix) = tail.find(" LIMIT ") {
            limit = tail[ix + 7..].trim().parse().unwrap_or(usize::MAX);
            tail.truncate(ix);
        }
        let mut order_terms: Vec<(String, bool)> = Vec::new();
        if let Some(ix) = tail.find(" ORDER BY ") {
            order_terms = tail[ix + 10..]
                .split(", ")
                .map(|term| (ident(term), term.ends_with(" DESC")))
                .collect();
            tail.truncate(ix);
        }
        let (from_part, where_clause) = match tail.split_once(" WHERE ") {
            Some((f, w)) => (f.to_string(), w.to_string()),
            None => (tail, String::new()),
        };
        let table = ident(&from_part);

        // OR-groups of AND-terms; an empty clause matches everything
        let groups: Vec<Vec<(String, usize)>> = if where_clause.is_empty() {
            Vec::new()
        } else {
            where_clause
                .split(" OR ")
                .map(|group| parse_terms(group.trim_start_matches('(').trim_end_matches(')')))
                .collect()
        };

        let mut matched: Vec<StoredRow> = self
            .store
            .rows(&table)
            .into_iter()
            .filter(|row| {
                groups.is_empty() || groups.iter().any(|terms| row_matches(row, terms, params))
            })
            .collect();
        for (col, desc) in order_terms.iter().rev() {
            matched.sort_by_key(|row| sort_key(&row.get(col).cloned().unwrap_or(Value::Null)));
            if *desc {
                matched.reverse();
            }
        }

        let names: Vec<String> = columns.clone();
        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| {
                let values = columns
                    .iter()
                    .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
                    .collect();
                Row::new(names.clone(), values)
            })
            .collect())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.store.statement_log.lock().push(sql.to_string());

        if let Some(body) = sql.strip_prefix("INSERT INTO ") {
            let table = ident(body);
            let open = body.find('(').expect("column list");
            let close = body.find(')').expect("column list");
            let columns: Vec<String> = body[open + 1..close].split(", ").map(ident).collect();
            let row: StoredRow = columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), params.get(i).cloned().unwrap_or(Value::Null)))
                .collect();
            self.store
                .tables
                .lock()
                .entry(table)
                .or_default()
                .push(row);
            return Ok(1);
        }

        if let Some(body) = sql.strip_prefix("UPDATE ") {
            let table = ident(body);
            let (_, rest) = body.split_once(" SET ").expect("SET clause");
            let (sets, where_clause) = rest.split_once(" WHERE ").expect("WHERE clause");
            let set_terms: Vec<(String, Option<usize>)> = sets
                .split(", ")
                .map(|term| (ident(term), param_index(term)))
                .collect();
            let terms = parse_terms(where_clause);
            let mut tables = self.store.tables.lock();
            let rows = tables.entry(table).or_default();
            let mut affected = 0;
            for row in rows.iter_mut() {
                if row_matches(row, &terms, params) {
                    for (col, ix) in &set_terms {
                        let value = match ix {
                            Some(ix) => params.get(ix - 1).cloned().unwrap_or(Value::Null),
                            None => Value::Null,
                        };
                        row.insert(col.clone(), value);
                    }
                    affected += 1;
                }
            }
            return Ok(affected);
        }

        if let Some(body) = sql.strip_prefix("DELETE FROM ") {
            let table = ident(body);
            let where_clause = body.split_once(" WHERE ").map(|(_, w)| w).unwrap_or("");
            let terms = parse_terms(where_clause);
            let mut tables = self.store.tables.lock();
            let rows = tables.entry(table).or_default();
            let before = rows.len();
            rows.retain(|row| !row_matches(row, &terms, params));
            return Ok((before - rows.len()) as u64);
        }

        Err(Error::Custom(format!("fake driver cannot execute: {sql}")))
    }

    fn insert_returning(&mut self, sql: &str, params: &[Value]) -> Result<Row> {
        let (insert_sql, returning) = sql.split_once(" RETURNING ").expect("RETURNING clause");
        let returning_cols: Vec<String> = returning.split(", ").map(ident).collect();

        self.store.statement_log.lock().push(sql.to_string());
        let body = insert_sql.strip_prefix("INSERT INTO ").expect("insert");
        let table = ident(body);
        let open = body.find('(').expect("column list");
        let close = body.find(')').expect("column list");
        let columns: Vec<String> = body[open + 1..close].split(", ").map(ident).collect();

        let mut row: StoredRow = columns
            .iter()
            .enumerate()
            .map(|(i, col)| (col.clone(), params.get(i).cloned().unwrap_or(Value::Null)))
            .collect();
        for col in &returning_cols {
            if !row.contains_key(col) {
                let generated = self.store.next_key.fetch_add(1, Ordering::SeqCst);
                row.insert(col.clone(), Value::BigInt(generated));
            }
        }
        let values: Vec<Value> = returning_cols
            .iter()
            .map(|col| row.get(col).cloned().unwrap_or(Value::Null))
            .collect();
        self.store
            .tables
            .lock()
            .entry(table)
            .or_default()
            .push(row);
        Ok(Row::new(returning_cols, values))
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Schema fixtures
// ----------------------------------------------------------------------

/// `Note`: single table, caller-assigned identity, one lazy extra group.
pub fn note_descriptor() -> TypeDescriptor {
    TypeDescriptor::new("Note")
        .table(TableDescriptor::primary("notes", vec!["id".into()]))
        .property(PropertyDescriptor::identity(
            "id",
            vec![ColumnSpec::new("id", SqlType::BigInt)],
        ))
        .property(PropertyDescriptor::scalar(
            "body",
            ColumnSpec::new("body", SqlType::Text),
        ))
        .property(
            PropertyDescriptor::scalar("pinned", ColumnSpec::new("pinned", SqlType::Bool))
                .nullable(true),
        )
        .property(
            PropertyDescriptor::scalar("extra", ColumnSpec::new("extra", SqlType::Text))
                .nullable(true)
                .fetch_group("extra")
                .on_demand(true),
        )
}

/// `Team`/`Hero`: bidirectional one-to-many through the hero table's
/// foreign key. The hero's `team` reference owns the pair; the team's
/// `members` collection is the mirrored, read-only side.
pub fn team_hero_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TypeDescriptor::new("Team")
                .table(TableDescriptor::primary("teams", vec!["id".into()]))
                .table(
                    TableDescriptor::multi_row("heroes", vec!["team_id".into()], vec!["id".into()])
                        .reference(true)
                        .reverse_property("team"),
                )
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt).db_generated(true)],
                ))
                .property(PropertyDescriptor::scalar(
                    "name",
                    ColumnSpec::new("name", SqlType::Text),
                ))
                .property(
                    PropertyDescriptor::collection("members", "Hero", 1)
                        .fetch_group("members")
                        .reverse("team"),
                ),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::new("Hero")
                .table(TableDescriptor::primary("heroes", vec!["id".into()]))
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::scalar(
                    "name",
                    ColumnSpec::new("name", SqlType::Text),
                ))
                .property(
                    PropertyDescriptor::reference(
                        "team",
                        "Team",
                        vec![ColumnSpec::new("team_id", SqlType::BigInt)],
                    )
                    .nullable(true)
                    .reverse("members"),
                ),
        )
        .unwrap();
    registry.resolve().unwrap();
    registry
}

/// `Playlist`/`Song`: many-to-many through `playlist_songs`. The
/// playlist side owns the link table; the song side mirrors it.
pub fn playlist_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TypeDescriptor::new("Playlist")
                .table(TableDescriptor::primary("playlists", vec!["id".into()]))
                .table(TableDescriptor::multi_row(
                    "playlist_songs",
                    vec!["playlist_id".into()],
                    vec!["song_id".into()],
                ))
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::scalar(
                    "title",
                    ColumnSpec::new("title", SqlType::Text),
                ))
                .property(
                    PropertyDescriptor::collection("songs", "Song", 1)
                        .fetch_group("songs")
                        .reverse("playlists"),
                ),
        )
        .unwrap();
    registry
        .register(
            TypeDescriptor::new("Song")
                .table(TableDescriptor::primary("songs", vec!["id".into()]))
                .table(
                    TableDescriptor::multi_row(
                        "playlist_songs",
                        vec!["song_id".into()],
                        vec!["playlist_id".into()],
                    )
                    .reference(true),
                )
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::scalar(
                    "title",
                    ColumnSpec::new("title", SqlType::Text),
                ))
                .property(
                    PropertyDescriptor::collection("playlists", "Playlist", 1)
                        .fetch_group("playlists")
                        .reverse("songs"),
                ),
        )
        .unwrap();
    registry.resolve().unwrap();
    registry
}

/// `Doc`: carries a version property for the version-checked update path.
pub fn doc_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TypeDescriptor::new("Doc")
                .table(TableDescriptor::primary("docs", vec!["id".into()]))
                .property(PropertyDescriptor::identity(
                    "id",
                    vec![ColumnSpec::new("id", SqlType::BigInt)],
                ))
                .property(PropertyDescriptor::scalar(
                    "title",
                    ColumnSpec::new("title", SqlType::Text),
                ))
                .property(
                    PropertyDescriptor::scalar(
                        "version",
                        ColumnSpec::new("version", SqlType::BigInt),
                    )
                    .version(true),
                ),
        )
        .unwrap();
    registry.resolve().unwrap();
    registry
}

pub fn note_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register(note_descriptor()).unwrap();
    registry.resolve().unwrap();
    registry
}
