//! SQLite manager
//!
//! Two physical connections per database:
//! - a read/DDL connection guarded by a mutex, used directly by callers
//! - a write connection owned by the [`WriteProxy`] worker
//!
//! Reads do not queue behind writes; they observe writes once committed.

use super::proxy::{PendingTask, WriteProxy};
use crate::config::{ensure_db_dir, DbConfig};
use crate::model::{Model, Record};
use crate::schema::{InsertMode, NamedParams, RawRow, Schema};
use crate::statement::{Expr, Query};
use crate::{Error, Result};
use indexmap::IndexMap;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Manager for one SQLite database
pub struct SqliteDb {
    config: DbConfig,
    reader: Mutex<Connection>,
    writer: WriteProxy,
    tables: Mutex<IndexMap<String, Arc<Schema>>>,
}

/// Result of a bulk insert: every schema group is attempted.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub failures: Vec<(String, Error)>,
}

impl BatchOutcome {
    pub fn into_result(self) -> Result<usize> {
        if self.failures.is_empty() {
            Ok(self.inserted)
        } else {
            Err(Error::InsertMany {
                inserted: self.inserted,
                failures: self.failures,
            })
        }
    }
}

struct InsertGroup {
    table: String,
    sql: String,
    rows: Vec<NamedParams>,
}

impl SqliteDb {
    /// Open (or create) the database described by `config`
    pub fn open(config: DbConfig) -> Result<Self> {
        ensure_db_dir(&config.database)?;

        let reader = connect(&config)?;
        let writer_conn = connect(&config)?;
        let writer = WriteProxy::start(writer_conn, config.database.clone(), config.write_timeout())?;

        tracing::info!("Opened {}", config.database.display());
        Ok(Self {
            config,
            reader: Mutex::new(reader),
            writer,
            tables: Mutex::new(IndexMap::new()),
        })
    }

    /// Open a database file with default settings
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(DbConfig::new(path.as_ref()))
    }

    /// Open and create every table in `tables`
    pub fn open_with_tables(config: DbConfig, tables: &[Arc<Schema>]) -> Result<Self> {
        let db = Self::open(config)?;
        for schema in tables {
            db.create_table(schema)?;
        }
        Ok(db)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// The serialized writer, for callers that need raw write access
    pub fn proxy(&self) -> &WriteProxy {
        &self.writer
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Tables ==========

    /// Run the schema's DDL and register it under its table name
    pub fn create_table(&self, schema: &Arc<Schema>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tables.get(schema.table_name()) {
            if **existing != **schema {
                return Err(Error::SchemaConflict {
                    table: schema.table_name().to_string(),
                });
            }
        }

        let sql = schema.make_create_statement();
        tracing::debug!(%sql, "create table");
        self.reader().execute_batch(sql)?;

        if tables.insert(schema.table_name().to_string(), Arc::clone(schema)).is_none() {
            tracing::info!("Created table {}", schema.table_name());
        }
        Ok(())
    }

    /// Names of tables registered through [`create_table`](Self::create_table)
    pub fn tables(&self) -> Vec<String> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Schema registered under `table_name`
    pub fn registered(&self, table_name: &str) -> Option<Arc<Schema>> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table_name)
            .cloned()
    }

    // ========== Insert ==========

    pub fn insert(&self, record: &Record) -> Result<()> {
        self.insert_with(record, InsertMode::Insert)
    }

    pub fn insert_with(&self, record: &Record, mode: InsertMode) -> Result<()> {
        let schema = record.schema();
        let sql = schema.insert_statement(mode).to_string();
        let params = schema.make_insert_values(record)?;

        self.writer.submit_blocking(move |conn| {
            tracing::debug!(%sql, "insert");
            conn.execute(&sql, params.as_params().as_slice())?;
            Ok(())
        })
    }

    /// Insert a batch that may mix schemas. Returns the number of rows
    /// inserted.
    ///
    /// Records are grouped by table; each group is one prepared statement
    /// in its own transaction. Every group is attempted; if any fails the
    /// call returns [`Error::InsertMany`] listing the failed tables.
    pub fn insert_many(&self, records: &[Record]) -> Result<usize> {
        self.insert_many_with(records, InsertMode::Insert)
    }

    pub fn insert_many_with(&self, records: &[Record], mode: InsertMode) -> Result<usize> {
        let pending = self.enqueue_insert_many(records, mode)?;
        let outcome = match self.writer.timeout() {
            Some(timeout) => pending.wait_timeout(timeout)?,
            None => pending.wait()?,
        };
        outcome.into_result()
    }

    /// Queue a bulk insert without waiting for it.
    ///
    /// Values are converted here, so conversion and missing-field errors
    /// surface before anything is queued.
    pub fn enqueue_insert_many(&self, records: &[Record], mode: InsertMode) -> Result<PendingTask<BatchOutcome>> {
        let groups = group_by_schema(records, mode)?;

        Ok(self.writer.submit(move |conn| {
            let mut outcome = BatchOutcome::default();
            for group in groups {
                match insert_group(conn, &group) {
                    Ok(count) => outcome.inserted += count,
                    Err(e) => {
                        tracing::error!("Bulk insert into {} failed: {}", group.table, e);
                        outcome.failures.push((group.table, e));
                    }
                }
            }
            Ok(outcome)
        }))
    }

    // ========== Select ==========

    pub fn get(&self, schema: &Arc<Schema>, query: &Query) -> Result<Vec<Record>> {
        let sql = query.to_sql(schema)?;
        self.select(&sql)?
            .iter()
            .map(|row| schema.parse_row(row))
            .collect()
    }

    pub fn get_all(&self, schema: &Arc<Schema>) -> Result<Vec<Record>> {
        self.get(schema, &Query::new())
    }

    /// Run a raw query on the read connection
    pub fn select(&self, sql: &str) -> Result<Vec<RawRow>> {
        tracing::debug!(%sql, "select");
        let conn = self.reader();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let rows = stmt
            .query_map([], |row| {
                let mut raw = RawRow::with_capacity(names.len());
                for (idx, name) in names.iter().enumerate() {
                    raw.insert(name.clone(), row.get::<_, SqlValue>(idx)?);
                }
                Ok(raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    // ========== Delete ==========

    /// Delete rows matching `filter`. A missing filter is refused; use
    /// [`delete_all`](Self::delete_all) to empty a table.
    pub fn delete(&self, schema: &Schema, filter: Option<&Expr>) -> Result<usize> {
        let sql = schema.make_delete_statement(filter, false)?;
        self.execute(&sql, Vec::new())
    }

    pub fn delete_all(&self, schema: &Schema) -> Result<usize> {
        let sql = schema.make_delete_statement(None, true)?;
        self.execute(&sql, Vec::new())
    }

    /// Run a mutating statement with positional parameters on the writer
    pub fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<usize> {
        let sql = sql.to_string();
        self.writer.submit_blocking(move |conn| {
            tracing::debug!(%sql, "execute");
            Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
        })
    }

    // ========== Typed models ==========

    pub fn insert_model<M: Model>(&self, model: &M) -> Result<()> {
        self.insert(&model.to_record()?)
    }

    pub fn insert_models<M: Model>(&self, models: &[M]) -> Result<usize> {
        let records = models.iter().map(M::to_record).collect::<Result<Vec<_>>>()?;
        self.insert_many(&records)
    }

    pub fn get_models<M: Model>(&self, query: &Query) -> Result<Vec<M>> {
        self.get(&M::schema(), query)?
            .iter()
            .map(M::from_record)
            .collect()
    }

    pub fn get_all_models<M: Model>(&self) -> Result<Vec<M>> {
        self.get_models(&Query::new())
    }
}

impl std::fmt::Debug for SqliteDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDb")
            .field("database", &self.config.database)
            .field("tables", &self.tables())
            .finish_non_exhaustive()
    }
}

fn connect(config: &DbConfig) -> Result<Connection> {
    let conn = Connection::open(&config.database)?;
    conn.busy_timeout(config.busy_timeout())?;
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", config.journal_mode.as_str(), |row| {
        row.get(0)
    })?;
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    Ok(conn)
}

/// Group records by table, preserving first-seen order.
fn group_by_schema(records: &[Record], mode: InsertMode) -> Result<Vec<InsertGroup>> {
    let mut groups: IndexMap<String, InsertGroup> = IndexMap::new();
    for record in records {
        let schema = record.schema();
        let params = schema.make_insert_values(record)?;
        groups
            .entry(schema.table_name().to_string())
            .or_insert_with(|| InsertGroup {
                table: schema.table_name().to_string(),
                sql: schema.insert_statement(mode).to_string(),
                rows: Vec::new(),
            })
            .rows
            .push(params);
    }
    Ok(groups.into_values().collect())
}

fn insert_group(conn: &mut Connection, group: &InsertGroup) -> Result<usize> {
    tracing::debug!(sql = %group.sql, rows = group.rows.len(), "insert many");
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(&group.sql)?;
        for params in &group.rows {
            inserted += stmt.execute(params.as_params().as_slice())?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::model::tests::Note;
    use crate::statement::Order;
    use crate::value::Value;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, SqliteDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDb::open_path(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn users() -> Arc<Schema> {
        Schema::builder("users")
            .field("id", Field::integer().not_null().unique().primary_key())
            .field("name", Field::text().not_null())
            .field("age", Field::integer())
            .field("active", Field::boolean().not_null().default_value(true))
            .build()
            .unwrap()
    }

    fn user(schema: &Arc<Schema>, id: i64, name: &str, age: i64) -> Record {
        Record::new(schema)
            .with("id", id)
            .unwrap()
            .with("name", name)
            .unwrap()
            .with("age", age)
            .unwrap()
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();

        let record = user(&schema, 1, "ann", 30).with("active", false).unwrap();
        db.insert(&record).unwrap();

        let rows = db.get_all(&schema).unwrap();
        assert_eq!(rows, vec![record]);
    }

    #[test]
    fn test_missing_required_field_then_default() {
        let (_dir, db) = open_db();
        let schema = Schema::builder("accounts")
            .field("id", Field::integer().primary_key().auto_increment())
            .field("tier", Field::text().not_null())
            .build()
            .unwrap();
        db.create_table(&schema).unwrap();

        let record = Record::new(&schema);
        assert!(matches!(db.insert(&record), Err(Error::MissingRequiredField { .. })));
        assert!(db.get_all(&schema).unwrap().is_empty());

        let with_default = Schema::builder("accounts_v2")
            .field("id", Field::integer().primary_key().auto_increment())
            .field("tier", Field::text().not_null().default_value("free"))
            .build()
            .unwrap();
        db.create_table(&with_default).unwrap();
        db.insert(&Record::new(&with_default)).unwrap();

        let rows = db.get_all(&with_default).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("tier"), Some(&Value::Text("free".into())));
        assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_get_with_query() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();

        let records: Vec<Record> = (1..=30).map(|i| user(&schema, i, &format!("u{}", i), i)).collect();
        assert_eq!(db.insert_many(&records).unwrap(), 30);

        let filter = schema.field("age").unwrap().ge(18).unwrap() & schema.field("active").unwrap().eq(true).unwrap();
        let query = Query::new().filter(filter).order_by("age", Order::Desc).limit(10);
        assert_eq!(
            query.to_sql(&schema).unwrap(),
            "SELECT * FROM users WHERE age >= 18 AND active == 1 ORDER BY age DESC LIMIT 0,10"
        );

        let rows = db.get(&schema, &query).unwrap();
        let ages: Vec<i64> = rows.iter().map(|r| r.get_as("age").unwrap()).collect();
        assert_eq!(ages, (21..=30).rev().collect::<Vec<i64>>());

        let page = db.get(&schema, &Query::new().order_by("id", Order::Asc).limit(5).offset(10)).unwrap();
        assert_eq!(page.first().unwrap().get_as::<i64>("id").unwrap(), 11);
        assert_eq!(page.len(), 5);
    }

    #[test]
    fn test_delete_guard() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();
        db.insert_many(&[user(&schema, 1, "a", 1), user(&schema, 2, "b", 2), user(&schema, 3, "c", 3)])
            .unwrap();

        assert!(matches!(db.delete(&schema, None), Err(Error::UnconditionalDeleteRefused { .. })));
        assert_eq!(db.get_all(&schema).unwrap().len(), 3);

        let filter = schema.field("name").unwrap().eq("b").unwrap();
        assert_eq!(db.delete(&schema, Some(&filter)).unwrap(), 1);

        assert_eq!(db.delete_all(&schema).unwrap(), 2);
        assert!(db.get_all(&schema).unwrap().is_empty());
    }

    #[test]
    fn test_insert_many_heterogeneous() {
        let (_dir, db) = open_db();
        let people = users();
        let tags = Schema::builder("tags")
            .field("label", Field::text().not_null().unique())
            .build()
            .unwrap();
        db.create_table(&people).unwrap();
        db.create_table(&tags).unwrap();

        let batch = vec![
            user(&people, 1, "a", 10),
            Record::new(&tags).with("label", "red").unwrap(),
            user(&people, 2, "b", 20),
            Record::new(&tags).with("label", "blue").unwrap(),
        ];
        assert_eq!(db.insert_many(&batch).unwrap(), 4);
        assert_eq!(db.get_all(&people).unwrap().len(), 2);
        assert_eq!(db.get_all(&tags).unwrap().len(), 2);
    }

    #[test]
    fn test_insert_many_attempts_every_group() {
        let (_dir, db) = open_db();
        let people = users();
        let tags = Schema::builder("tags")
            .field("label", Field::text().not_null().unique())
            .build()
            .unwrap();
        db.create_table(&people).unwrap();
        db.create_table(&tags).unwrap();
        db.insert(&user(&people, 1, "a", 10)).unwrap();

        // the users group collides on id 1; the tags group must still land
        let batch = vec![
            user(&people, 1, "dup", 10),
            Record::new(&tags).with("label", "green").unwrap(),
        ];
        match db.insert_many(&batch) {
            Err(Error::InsertMany { inserted, failures }) => {
                assert_eq!(inserted, 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "users");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(db.get_all(&tags).unwrap().len(), 1);
        assert_eq!(db.get_all(&people).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_modes() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();
        db.insert(&user(&schema, 1, "first", 1)).unwrap();

        assert!(matches!(
            db.insert(&user(&schema, 1, "again", 1)),
            Err(Error::WorkerTaskFailure { .. })
        ));

        db.insert_with(&user(&schema, 1, "ignored", 1), InsertMode::Ignore).unwrap();
        let rows = db.get_all(&schema).unwrap();
        assert_eq!(rows[0].get_as::<String>("name").unwrap(), "first");

        db.insert_with(&user(&schema, 1, "replaced", 1), InsertMode::Replace).unwrap();
        let rows = db.get_all(&schema).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_as::<String>("name").unwrap(), "replaced");
    }

    #[test]
    fn test_concurrent_writers_serialize() {
        let (_dir, db) = open_db();
        let schema = Schema::builder("events")
            .field("id", Field::integer().primary_key().auto_increment())
            .field("worker", Field::integer().not_null())
            .field("seq", Field::integer().not_null())
            .build()
            .unwrap();
        db.create_table(&schema).unwrap();

        const WORKERS: i64 = 8;
        const PER_WORKER: i64 = 25;

        std::thread::scope(|s| {
            for w in 0..WORKERS {
                let db = &db;
                let schema = &schema;
                s.spawn(move || {
                    for seq in 0..PER_WORKER {
                        let record = Record::new(schema)
                            .with("worker", w)
                            .unwrap()
                            .with("seq", seq)
                            .unwrap();
                        db.insert(&record).unwrap();
                    }
                });
            }
        });

        let rows = db.get_all(&schema).unwrap();
        assert_eq!(rows.len() as i64, WORKERS * PER_WORKER);

        let mut ids: Vec<i64> = rows.iter().map(|r| r.get_as("id").unwrap()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len() as i64, WORKERS * PER_WORKER);
    }

    #[test]
    fn test_enqueue_without_waiting() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();

        let pending = db
            .enqueue_insert_many(&[user(&schema, 1, "a", 1), user(&schema, 2, "b", 2)], InsertMode::Insert)
            .unwrap();
        // a later blocking write runs after the queued one
        db.insert(&user(&schema, 3, "c", 3)).unwrap();

        assert_eq!(pending.wait().unwrap().into_result().unwrap(), 2);
        assert_eq!(db.get_all(&schema).unwrap().len(), 3);
    }

    #[test]
    fn test_schema_registry() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();
        db.create_table(&schema).unwrap();
        assert_eq!(db.tables(), vec!["users".to_string()]);

        let other = Schema::builder("users").field("id", Field::integer()).build().unwrap();
        assert!(matches!(db.create_table(&other), Err(Error::SchemaConflict { .. })));
        assert_eq!(db.registered("users").unwrap(), schema);
    }

    #[test]
    fn test_typed_models() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDb::open_with_tables(DbConfig::new(dir.path().join("notes.db")), &[Note::schema()]).unwrap();

        let created_at = DateTime::from_timestamp_micros(1_700_000_000_654_321).unwrap();
        let notes = vec![
            Note { id: None, title: "one".into(), pinned: false, created_at },
            Note { id: None, title: "two".into(), pinned: true, created_at },
        ];
        assert_eq!(db.insert_models(&notes).unwrap(), 2);

        let pinned_filter = Note::schema().field("pinned").unwrap().eq(true).unwrap();
        let pinned: Vec<Note> = db.get_models(&Query::new().filter(pinned_filter)).unwrap();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].title, "two");
        assert_eq!(pinned[0].created_at, created_at);
        assert_eq!(pinned[0].id, Some(2));

        let all: Vec<Note> = db.get_all_models().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_normalized_record_matches_stored_row() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();

        let record = Record::new(&schema)
            .with("id", "7")
            .unwrap()
            .with("name", "ann")
            .unwrap()
            .with("age", "42")
            .unwrap()
            .with("active", 0)
            .unwrap();
        db.insert(&record).unwrap();

        let rows = db.get_all(&schema).unwrap();
        assert_eq!(rows, vec![record]);
        assert_eq!(rows[0].get_as::<i64>("age").unwrap(), 42);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let (_dir, db) = open_db();
        assert!(db.config().foreign_keys);
        let authors = users();
        let books = Schema::builder("books")
            .field("id", Field::integer().primary_key().auto_increment())
            .field("title", Field::text().not_null())
            .field("author_id", Field::integer().not_null().references("users", "id"))
            .build()
            .unwrap();
        assert!(books
            .make_create_statement()
            .ends_with("FOREIGN KEY(author_id) REFERENCES users(id))"));
        db.create_table(&authors).unwrap();
        db.create_table(&books).unwrap();
        db.insert(&user(&authors, 1, "ann", 40)).unwrap();

        let book = |author: i64| {
            Record::new(&books)
                .with("title", "notes")
                .unwrap()
                .with("author_id", author)
                .unwrap()
        };
        db.insert(&book(1)).unwrap();

        let err = db.insert(&book(99)).unwrap_err();
        assert!(matches!(err, Error::WorkerTaskFailure { source: Some(_), .. }));
        assert!(matches!(
            db.insert_many(&[book(1), book(98)]),
            Err(Error::InsertMany { inserted: 0, .. })
        ));
        assert_eq!(db.get_all(&books).unwrap().len(), 1);

        // the referenced row cannot go while a book points at it
        let ann = authors.field("id").unwrap().eq(1).unwrap();
        assert!(db.delete(&authors, Some(&ann)).is_err());
    }

    #[test]
    fn test_raw_select_and_execute() {
        let (_dir, db) = open_db();
        let schema = users();
        db.create_table(&schema).unwrap();
        db.insert(&user(&schema, 1, "a", 5)).unwrap();

        let changed = db
            .execute("UPDATE users SET age = ?1 WHERE id = ?2", vec![SqlValue::Integer(6), SqlValue::Integer(1)])
            .unwrap();
        assert_eq!(changed, 1);

        let rows = db.select("SELECT name, age FROM users").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("age"), Some(&SqlValue::Integer(6)));
        assert_eq!(rows[0].keys().cloned().collect::<Vec<_>>(), vec!["name", "age"]);
    }
}
