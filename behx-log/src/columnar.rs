//! Columnar sqlite form of the event log.
//!
//! `Event` indexes every record in arrival order; each record type gets its
//! own table (`Type_<kind>`) whose columns grow as new field names show up.
//! File-level attributes live in `Attributes`. Every append is committed on
//! arrival, so a crash loses at most the record being written.

use behx_core::{EventRecord, FieldValue, Fields};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::LogError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Attributes (
    Name  TEXT PRIMARY KEY,
    Value
);
CREATE TABLE IF NOT EXISTS Event (
    Id        INTEGER PRIMARY KEY,
    Time      REAL NOT NULL,
    DeltaTime REAL NOT NULL,
    StartTime REAL NOT NULL,
    Type      TEXT NOT NULL,
    TypeIndex INTEGER NOT NULL
);
";

/// Row of the `Event` index table.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub time: f64,
    pub delta_time: f64,
    pub start_time: f64,
    pub kind: String,
    pub type_index: i64,
}

/// Columns every type table starts with.
const FIXED_COLUMNS: [&str; 3] = ["TypeIndex", "Time", "DeltaTime"];

struct TypeTable {
    /// Lowercased name to the column's spelling. SQLite compares column
    /// names case-insensitively.
    columns: HashMap<String, String>,
    next_index: i64,
}

pub struct ColumnarStore {
    conn: Connection,
    path: PathBuf,
    tables: HashMap<String, TypeTable>,
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Int(v) => Value::Integer(*v),
        FieldValue::Float(v) => Value::Real(*v),
        FieldValue::Bool(v) => Value::Integer(i64::from(*v)),
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Time(t) => Value::Real(FieldValue::posix_seconds(t)),
    }
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_name(kind: &str) -> String {
    format!("Type_{kind}")
}

impl ColumnarStore {
    /// Opens (creating if needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path,
            tables: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_attribute(&mut self, name: &str, value: &FieldValue) -> Result<(), LogError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO Attributes (Name, Value) VALUES (?1, ?2)",
            params![name, sql_value(value)],
        )?;
        Ok(())
    }

    pub fn set_attributes(&mut self, attributes: &Fields) -> Result<(), LogError> {
        for (name, value) in attributes.iter() {
            self.set_attribute(name, value)?;
        }
        Ok(())
    }

    /// Writes one record and commits it.
    pub fn append(&mut self, record: &EventRecord, start: DateTime<Utc>) -> Result<(), LogError> {
        let (type_index, names) = self.prepare_table(&record.kind, &record.fields)?;
        let table = ident(&table_name(&record.kind));

        let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| ident(c)).collect();
        let mut values = vec![
            Value::Integer(type_index),
            Value::Real(FieldValue::posix_seconds(&record.time)),
            Value::Real(record.delta_seconds()),
        ];
        for (name, (_, value)) in names.iter().zip(record.fields.iter()) {
            columns.push(ident(name));
            values.push(sql_value(value));
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let insert = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO Event (Time, DeltaTime, StartTime, Type, TypeIndex)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                FieldValue::posix_seconds(&record.time),
                record.delta_seconds(),
                FieldValue::posix_seconds(&start),
                record.kind,
                type_index
            ],
        )?;
        tx.execute(&insert, params_from_iter(values))?;
        tx.commit()?;

        if let Some(t) = self.tables.get_mut(&record.kind) {
            t.next_index += 1;
        }
        Ok(())
    }

    /// Creates the type table on first sight and adds any missing columns.
    /// Returns the index the next record of this type gets and the column
    /// each field is stored in. A field whose name differs from an earlier
    /// one only in case gets a numbered column (`item_2`).
    fn prepare_table(&mut self, kind: &str, fields: &Fields) -> Result<(i64, Vec<String>), LogError> {
        let table = table_name(kind);
        if !self.tables.contains_key(kind) {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (TypeIndex INTEGER PRIMARY KEY, Time REAL, DeltaTime REAL)",
                ident(&table)
            ))?;
            let columns = self
                .columns_of(&table)?
                .into_iter()
                .map(|c| (c.to_lowercase(), c))
                .collect();
            let next_index: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", ident(&table)),
                [],
                |row| row.get(0),
            )?;
            self.tables.insert(
                kind.to_string(),
                TypeTable {
                    columns,
                    next_index,
                },
            );
        }

        let Some(entry) = self.tables.get_mut(kind) else {
            return Ok((0, fields.names().map(str::to_string).collect()));
        };
        let mut taken: HashSet<String> = FIXED_COLUMNS.iter().map(|c| c.to_lowercase()).collect();
        let mut names = Vec::with_capacity(fields.len());
        for field in fields.names() {
            let mut name = field.to_string();
            let mut n = 1;
            while taken.contains(&name.to_lowercase()) {
                n += 1;
                name = format!("{field}_{n}");
            }
            let key = name.to_lowercase();
            taken.insert(key.clone());
            match entry.columns.get(&key) {
                Some(existing) => names.push(existing.clone()),
                None => {
                    self.conn.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        ident(&table),
                        ident(&name)
                    ))?;
                    entry.columns.insert(key, name.clone());
                    names.push(name);
                }
            }
        }
        Ok((entry.next_index, names))
    }

    fn columns_of(&self, table: &str) -> Result<Vec<String>, LogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let rows = stmt.query_map(params![table], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Column names of the table holding records of `kind`.
    pub fn columns(&self, kind: &str) -> Result<Vec<String>, LogError> {
        self.columns_of(&table_name(kind))
    }

    pub fn events(&self) -> Result<Vec<EventRow>, LogError> {
        let mut stmt = self.conn.prepare(
            "SELECT Time, DeltaTime, StartTime, Type, TypeIndex FROM Event ORDER BY Id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(EventRow {
                time: row.get(0)?,
                delta_time: row.get(1)?,
                start_time: row.get(2)?,
                kind: row.get(3)?,
                type_index: row.get(4)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Value>, LogError> {
        let mut stmt = self
            .conn
            .prepare("SELECT Value FROM Attributes WHERE Name = ?1")?;
        let mut rows = stmt.query(params![name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Releases the file.
    pub fn close(self) -> Result<(), LogError> {
        self.conn.close().map_err(|(_, e)| LogError::Store(e))
    }
}
