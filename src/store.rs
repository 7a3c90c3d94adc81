//! Per-tenant audio storage.
//!
//! Each tenant owns one SQLite table instantiated from a single schema
//! template, addressed by a parsed UUID key. The analysis column set is
//! closed: the same `ANALYSIS_FIELDS` array drives the DDL, write-back
//! filtering, and the listing header row.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StorageError;

/// The closed set of analysis fields written by the language pipeline.
/// Any key outside this set is silently dropped on write-back.
pub const ANALYSIS_FIELDS: &[&str] = &[
    "transcription",
    "pitch_followed_analysis",
    "pitch_followed_positive_example",
    "pitch_followed_negative_example",
    "pitch_followed_suggestions",
    "confidence_analysis",
    "confidence_positive_example",
    "confidence_negative_example",
    "confidence_suggestions",
    "tonality_analysis",
    "tonality_positive_example",
    "tonality_negative_example",
    "tonality_suggestions",
    "energy_analysis",
    "energy_positive_example",
    "energy_negative_example",
    "energy_suggestions",
    "objection_handling_analysis",
    "objection_handling_positive_example",
    "objection_handling_negative_example",
    "objection_handling_suggestions",
    "strengths",
    "areas_for_improvement",
    "pitch_followed_score",
    "confidence_score",
    "tonality_score",
    "energy_score",
    "objection_handling_score",
    "overall_score",
];

/// Integer 1-10 category scores.
const SCORE_FIELDS: &[&str] = &[
    "pitch_followed_score",
    "confidence_score",
    "tonality_score",
    "energy_score",
    "objection_handling_score",
];

/// Opaque per-tenant storage key. Parsing rejects anything that is not a
/// UUID, which also keeps the derived table name injection-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantKey(Uuid);

impl TenantKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// SQL table name for this tenant.
    fn table_name(&self) -> String {
        format!("audio_{}", self.0.simple())
    }
}

impl FromStr for TenantKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TenantKey)
            .map_err(|_| StorageError::InvalidTenantKey(s.to_string()))
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One listed record: everything except the audio blob.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    /// Values for `ANALYSIS_FIELDS`, in order. Null columns stay `Value::Null`.
    pub analysis: Vec<Value>,
}

/// Tenant-scoped audio store over a shared SQLite connection.
pub struct AudioStore {
    conn: Mutex<Connection>,
}

impl AudioStore {
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Provision the tenant's table. Called exactly once at tenant creation;
    /// calling twice for the same key surfaces as a storage error.
    pub fn create_tenant_table(&self, key: &TenantKey) -> Result<(), StorageError> {
        let mut ddl = format!(
            "CREATE TABLE \"{}\" (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  name TEXT NOT NULL,\n  content BLOB NOT NULL,\n  created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            key.table_name()
        );
        for field in ANALYSIS_FIELDS {
            let ty = if SCORE_FIELDS.contains(field) {
                "INTEGER"
            } else if *field == "overall_score" {
                "REAL"
            } else {
                "TEXT"
            };
            ddl.push_str(&format!(",\n  {} {}", field, ty));
        }
        ddl.push_str("\n)");

        let conn = self.conn.lock().unwrap();
        conn.execute(&ddl, [])?;
        Ok(())
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, StorageError> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Append a record with null analysis fields. Fails if the tenant table
    /// was never provisioned.
    pub fn store_audio(
        &self,
        key: &TenantKey,
        name: &str,
        content: &[u8],
    ) -> Result<i64, StorageError> {
        let table = key.table_name();
        let conn = self.conn.lock().unwrap();
        if !Self::table_exists(&conn, &table)? {
            return Err(StorageError::MissingTenantTable(key.to_string()));
        }
        let created_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (name, content, created_at) VALUES (?1, ?2, ?3)",
                table
            ),
            rusqlite::params![name, content, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Write analysis fields for a record. Keys outside `ANALYSIS_FIELDS`
    /// are ignored; a nonexistent record id is a successful no-op (callers
    /// must not rely on existence validation here).
    pub fn update_analysis(
        &self,
        key: &TenantKey,
        record_id: i64,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<(), StorageError> {
        let updates: Vec<(&str, &Value)> = ANALYSIS_FIELDS
            .iter()
            .filter_map(|col| fields.get(*col).map(|v| (*col, v)))
            .collect();
        if updates.is_empty() {
            return Ok(());
        }

        let set_clause = updates
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE id = ?{}",
            key.table_name(),
            set_clause,
            updates.len() + 1
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = updates
            .iter()
            .map(|(_, v)| json_to_sql(v))
            .collect();
        params.push(Box::new(record_id));

        let conn = self.conn.lock().unwrap();
        conn.execute(
            &sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
        )?;
        Ok(())
    }

    /// Fetch a record's name and audio bytes.
    pub fn get_audio(
        &self,
        key: &TenantKey,
        record_id: i64,
    ) -> Result<Option<(String, Vec<u8>)>, StorageError> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                &format!(
                    "SELECT name, content FROM \"{}\" WHERE id = ?1",
                    key.table_name()
                ),
                [record_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(result)
    }

    /// Paginated listing ordered by `created_at` descending. Page numbers
    /// beyond range return an empty list with the correct total count.
    pub fn list_page(
        &self,
        key: &TenantKey,
        page_number: u32,
        page_size: u32,
    ) -> Result<(u64, Vec<RecordRow>), StorageError> {
        let table = key.table_name();
        let conn = self.conn.lock().unwrap();

        let total: u64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                row.get(0)
            })?;

        let offset = (page_number.saturating_sub(1) as u64) * page_size as u64;
        let columns = ANALYSIS_FIELDS.join(", ");
        let sql = format!(
            "SELECT id, name, created_at, {} FROM \"{}\" ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            columns, table
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params![page_size, offset], |row| {
            let mut analysis = Vec::with_capacity(ANALYSIS_FIELDS.len());
            for i in 0..ANALYSIS_FIELDS.len() {
                let value = row.get_ref(3 + i)?;
                analysis.push(sql_to_json(value));
            }
            Ok(RecordRow {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
                analysis,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok((total, records))
    }
}

fn json_to_sql(value: &Value) -> Box<dyn rusqlite::ToSql> {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64())
            }
        }
        Value::String(s) => Box::new(s.clone()),
        // Structured values are persisted as their JSON text.
        other => Box::new(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}
